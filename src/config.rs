// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Static configuration.
//!
//! Everything is read once at startup from a TOML document:
//!
//! ```toml
//! verbose = false
//!
//! [broker]
//! host = "server.lan"
//! port = 8883
//! username = "username"
//! password = "password"
//!
//! [broker.tls]
//! ca_cert = "/root/your_ca.crt"
//! client_cert = "/root/your_cert.crt"
//! client_key = "/root/your_key.pem"
//!
//! [bridge]
//! topic_prefix = "living_room"
//! poll_interval_ms = 100
//!
//! [pins]
//! numbering = "board"
//! outputs = [{ name = "Output_01", pin = 23 }]
//! inputs = [{ name = "Schalter_01", pin = 8, pull = "down", debounce_ms = 0 }]
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::{CommandHandler, CommandReceiver};
use crate::error::ConfigError;
use crate::gpio::{PinNumbering, Pull};
use crate::types::{TopicScheme, is_valid_topic_level};

/// Root of the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[serde(default)]
    pub verbose: bool,
    /// Broker connection.
    pub broker: BrokerConfig,
    /// Loop timing and topics.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// Pin assignment.
    pub pins: PinsConfig,
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    /// Broker host name or address.
    pub host: String,
    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username, if the broker requires authentication.
    #[serde(default)]
    pub username: Option<String>,
    /// Password for `username`.
    #[serde(default)]
    pub password: Option<String>,
    /// MQTT client id; generated when absent.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Keep-alive interval in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// TLS material; the session is unencrypted without it.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// Paths to PEM certificates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// CA bundle used to verify the broker.
    pub ca_cert: PathBuf,
    /// Client certificate for mutual TLS.
    #[serde(default)]
    pub client_cert: Option<PathBuf>,
    /// Private key for `client_cert`.
    #[serde(default)]
    pub client_key: Option<PathBuf>,
}

/// Loop timing and topic prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Prefix of every topic.
    pub topic_prefix: String,
    /// Pause before each tick, in milliseconds.
    pub poll_interval_ms: u64,
    /// Connection polls before a tick gives up.
    pub connect_attempts: u32,
    /// Pause between connection polls, in milliseconds.
    pub connect_poll_interval_ms: u64,
    /// Extra pause after a failed connection, in milliseconds.
    pub connect_backoff_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "living_room".to_string(),
            poll_interval_ms: 100,
            connect_attempts: 5,
            connect_poll_interval_ms: 1000,
            connect_backoff_ms: 1000,
        }
    }
}

impl BridgeConfig {
    /// Pause before each tick.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Pause between connection polls.
    #[must_use]
    pub fn connect_poll_interval(&self) -> Duration {
        Duration::from_millis(self.connect_poll_interval_ms)
    }

    /// Extra pause after a failed connection.
    #[must_use]
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }

    /// Topic naming for this prefix.
    #[must_use]
    pub fn topics(&self) -> TopicScheme {
        TopicScheme::new(self.topic_prefix.as_str())
    }
}

/// Pin assignment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PinsConfig {
    /// Numbering scheme of every `pin` below.
    #[serde(default)]
    pub numbering: PinNumbering,
    /// Commandable pins.
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
    /// Observed pins.
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
}

/// One output pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Name used in topics.
    pub name: String,
    /// Pin number in the configured numbering.
    pub pin: u8,
}

/// One input pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Name used in topics.
    pub name: String,
    /// Pin number in the configured numbering.
    pub pin: u8,
    /// Input bias.
    #[serde(default)]
    pub pull: Pull,
    /// How long a new level must hold before it is reported, in milliseconds.
    #[serde(default)]
    pub debounce_ms: u64,
}

impl InputConfig {
    /// Debounce window.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_port() -> u16 {
    crate::protocol::DEFAULT_TLS_PORT
}

fn default_keep_alive_secs() -> u64 {
    30
}

impl Config {
    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the document is malformed or invalid.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every constraint the bridge relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::Invalid("broker host is empty".to_string()));
        }
        if self.broker.password.is_some() && self.broker.username.is_none() {
            return Err(ConfigError::Invalid(
                "broker password given without username".to_string(),
            ));
        }
        if let Some(tls) = &self.broker.tls
            && tls.client_cert.is_some() != tls.client_key.is_some()
        {
            return Err(ConfigError::Invalid(
                "client certificate and key must be given together".to_string(),
            ));
        }

        let bridge = &self.bridge;
        if bridge.topics().prefix().is_empty() {
            return Err(ConfigError::Invalid("topic prefix is empty".to_string()));
        }
        if bridge.topic_prefix.contains(['+', '#']) {
            return Err(ConfigError::Invalid(format!(
                "topic prefix {:?} contains a wildcard",
                bridge.topic_prefix
            )));
        }
        if bridge.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll interval must be positive".to_string()));
        }
        if bridge.connect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "connect attempts must be positive".to_string(),
            ));
        }

        check_names(self.pins.outputs.iter().map(|o| o.name.as_str()))?;
        check_names(self.pins.inputs.iter().map(|i| i.name.as_str()))?;

        let mut ids = HashSet::new();
        let pins = self.pins.outputs.iter().map(|o| o.pin);
        for pin in pins.chain(self.pins.inputs.iter().map(|i| i.pin)) {
            let bcm = self.pins.numbering.to_bcm(pin)?;
            if !ids.insert(bcm) {
                return Err(ConfigError::DuplicateHardwareId(bcm));
            }
        }
        Ok(())
    }

    /// Builds the command handler for the configured outputs.
    #[must_use]
    pub fn command_handler(&self) -> (CommandHandler, CommandReceiver) {
        CommandHandler::new(
            &self.bridge.topics(),
            self.pins.outputs.iter().map(|o| o.name.as_str()),
        )
    }
}

fn check_names<'a>(names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if !is_valid_topic_level(name) {
            return Err(ConfigError::InvalidPinName(name.to_string()));
        }
        if !seen.insert(name) {
            return Err(ConfigError::DuplicatePinName(name.to_string()));
        }
    }
    Ok(())
}

#[cfg(feature = "mqtt")]
impl TlsConfig {
    /// Reads the certificates into memory.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` for any unreadable file.
    pub fn load(&self) -> Result<crate::protocol::TlsMaterial, ConfigError> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        };

        let material = crate::protocol::TlsMaterial::new(read(self.ca_cert.as_path())?);
        match (&self.client_cert, &self.client_key) {
            (Some(cert), Some(key)) => Ok(material.with_client_auth(
                read(cert.as_path())?,
                read(key.as_path())?,
            )),
            (None, None) => Ok(material),
            _ => Err(ConfigError::Invalid(
                "client certificate and key must be given together".to_string(),
            )),
        }
    }
}
