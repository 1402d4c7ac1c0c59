// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the bridge.
//!
//! Every fallible collaborator call returns one of the categories below.
//! Only configuration and startup failures are meant to stop the process;
//! everything raised while the synchronization loop runs is logged and
//! retried on a later tick.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// A value could not be validated or decoded.
    #[error("value error: {0}")]
    Value(#[from] ValueError),

    /// Reading or writing a hardware pin failed.
    #[error("hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// Communication with the broker failed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The configuration is unreadable or invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An inbound command could not be staged.
    #[error("command error: {0}")]
    Command(#[from] CommandError),
}

/// Errors related to value validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// The payload is not one of `ON` or `OFF`.
    #[error("invalid pin state payload: {0:?}")]
    InvalidPinState(String),
}

/// Errors raised by a pin driver.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// The underlying GPIO peripheral reported an error.
    #[cfg(feature = "rppal")]
    #[error("GPIO error: {0}")]
    Gpio(#[from] rppal::gpio::Error),

    /// The pin was accessed before being configured.
    #[error("pin {0} is not configured")]
    NotConfigured(u8),

    /// A level write was attempted on a pin configured as input.
    #[error("pin {0} is not configured as an output")]
    NotAnOutput(u8),

    /// The pin could not be accessed.
    #[error("pin {0} is unavailable")]
    Unavailable(u8),
}

/// Errors related to broker communication.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The MQTT client rejected a request.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Connection to the broker failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The session did not come up within the polling budget.
    #[error("not connected after {attempts} attempts")]
    NotConnected {
        /// Number of polls performed before giving up.
        attempts: u32,
    },

    /// Invalid broker address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Errors related to loading and validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// The file that failed to load.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML document is malformed.
    #[error("cannot parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Two pins of the same kind share a name.
    #[error("duplicate pin name: {0}")]
    DuplicatePinName(String),

    /// Two pins share a hardware id.
    #[error("hardware pin {0} is assigned more than once")]
    DuplicateHardwareId(u8),

    /// A pin name cannot be used as a topic level.
    #[error("invalid pin name {0:?}: must be non-empty and free of '/', '+' and '#'")]
    InvalidPinName(String),

    /// A physical header number has no GPIO line behind it.
    #[error("board pin {0} is not a GPIO line")]
    UnknownBoardPin(u8),

    /// Any other constraint violation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors raised while decoding or staging an inbound command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The topic does not address a known output.
    #[error("no output listens on topic {0}")]
    UnknownTopic(String),

    /// The payload is not part of the ON/OFF vocabulary.
    #[error("undecodable payload: {0}")]
    Payload(#[from] ValueError),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_error_display() {
        let err = ValueError::InvalidPinState("TOGGLE".to_string());
        assert_eq!(err.to_string(), "invalid pin state payload: \"TOGGLE\"");
    }

    #[test]
    fn error_from_hardware_error() {
        let err: Error = HardwareError::Unavailable(17).into();
        assert!(matches!(err, Error::Hardware(HardwareError::Unavailable(17))));
    }

    #[test]
    fn command_error_wraps_value_error() {
        let err: CommandError = ValueError::InvalidPinState("1".to_string()).into();
        assert!(matches!(err, CommandError::Payload(_)));
        assert_eq!(
            err.to_string(),
            "undecodable payload: invalid pin state payload: \"1\""
        );
    }

    #[test]
    fn not_connected_display() {
        let err = ProtocolError::NotConnected { attempts: 5 };
        assert_eq!(err.to_string(), "not connected after 5 attempts");
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidPinName("a/b".to_string());
        assert_eq!(
            err.to_string(),
            "invalid pin name \"a/b\": must be non-empty and free of '/', '+' and '#'"
        );
    }
}
