// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MQTT broker session over TLS.
//!
//! [`MqttBroker`] owns at most one `rumqttc` session at a time. Each call to
//! [`Broker::connect`] while disconnected builds a fresh client and spawns a
//! task that drives its event loop; that task records the connection state,
//! notices refused subscriptions and feeds inbound publishes to the
//! [`CommandHandler`]. When the event loop fails the task ends and the
//! session is considered gone until the next connect.
//!
//! # Examples
//!
//! ```no_run
//! use pinbridge::command::CommandHandler;
//! use pinbridge::protocol::{Broker, MqttBroker, TlsMaterial};
//! use pinbridge::types::TopicScheme;
//!
//! # async fn example() -> pinbridge::Result<()> {
//! let (handler, _commands) =
//!     CommandHandler::new(&TopicScheme::new("living_room"), ["Output_01"]);
//!
//! let broker = MqttBroker::builder(handler)
//!     .host("server.lan")
//!     .port(8883)
//!     .credentials("username", "password")
//!     .tls(TlsMaterial::new(std::fs::read("/root/your_ca.crt").unwrap()))
//!     .build()?;
//!
//! broker.connect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, SubAck, SubscribeReasonCode, Transport};
use tokio::task::JoinHandle;

use super::{Broker, DEFAULT_TLS_PORT, Qos};
use crate::command::CommandHandler;
use crate::error::ProtocolError;

/// How long a disconnect waits for the event loop to flush.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Certificates for the TLS transport, already loaded into memory.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    ca: Vec<u8>,
    client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterial {
    /// Creates TLS material trusting the given PEM CA bundle.
    #[must_use]
    pub fn new(ca: Vec<u8>) -> Self {
        Self {
            ca,
            client_auth: None,
        }
    }

    /// Adds a PEM client certificate and key for mutual TLS.
    #[must_use]
    pub fn with_client_auth(mut self, cert: Vec<u8>, key: Vec<u8>) -> Self {
        self.client_auth = Some((cert, key));
        self
    }

    /// Returns whether a client certificate is configured.
    #[must_use]
    pub fn has_client_auth(&self) -> bool {
        self.client_auth.is_some()
    }

    fn transport(&self) -> Transport {
        Transport::tls(self.ca.clone(), self.client_auth.clone(), None)
    }
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_bytes", &self.ca.len())
            .field("client_auth", &self.has_client_auth())
            .finish()
    }
}

/// Settings for an MQTT broker session, filled in by the builder.
#[derive(Debug, Clone)]
struct MqttBrokerConfig {
    host: String,
    port: u16,
    client_id: String,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    tls: Option<TlsMaterial>,
    request_capacity: usize,
}

impl Default for MqttBrokerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_TLS_PORT,
            client_id: format!("pinbridge-{}", uuid::Uuid::new_v4().simple()),
            credentials: None,
            keep_alive: Duration::from_secs(30),
            tls: None,
            request_capacity: 64,
        }
    }
}

impl MqttBrokerConfig {
    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        if let Some((ref username, ref password)) = self.credentials {
            options.set_credentials(username, password);
        }
        if let Some(ref tls) = self.tls {
            options.set_transport(tls.transport());
        }
        options
    }
}

/// One `rumqttc` client and the task driving its event loop.
struct Session {
    client: AsyncClient,
    event_task: JoinHandle<()>,
}

/// A reconnectable MQTT session.
///
/// Cheaply cloneable; clones share the same session.
#[derive(Clone)]
pub struct MqttBroker {
    inner: Arc<MqttBrokerInner>,
}

struct MqttBrokerInner {
    config: MqttBrokerConfig,
    handler: CommandHandler,
    session: Mutex<Option<Session>>,
    connected: AtomicBool,
    subscription_rejected: AtomicBool,
}

impl MqttBroker {
    /// Creates a builder; inbound messages will be given to `handler`.
    #[must_use]
    pub fn builder(handler: CommandHandler) -> MqttBrokerBuilder {
        MqttBrokerBuilder {
            config: MqttBrokerConfig::default(),
            handler,
        }
    }

    fn uses_tls(&self) -> bool {
        self.inner.config.tls.is_some()
    }

    fn client(&self) -> Result<AsyncClient, ProtocolError> {
        self.inner
            .session
            .lock()
            .as_ref()
            .map(|session| session.client.clone())
            .ok_or_else(|| ProtocolError::ConnectionFailed("no active session".to_string()))
    }
}

impl Broker for MqttBroker {
    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        let mut session = self.inner.session.lock();
        if let Some(current) = session.as_ref()
            && !current.event_task.is_finished()
        {
            tracing::debug!("MQTT connection attempt already in progress");
            return Ok(());
        }

        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            tls = self.uses_tls(),
            client_id = %self.inner.config.client_id,
            "Connecting to MQTT broker"
        );

        let options = self.inner.config.mqtt_options();
        let (client, event_loop) = AsyncClient::new(options, self.inner.config.request_capacity);
        let event_task = tokio::spawn(handle_broker_events(event_loop, Arc::clone(&self.inner)));
        *session = Some(Session { client, event_task });
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), ProtocolError> {
        self.client()?
            .subscribe(topic, qos.into())
            .await
            .map_err(ProtocolError::Mqtt)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        qos: Qos,
        retain: bool,
    ) -> Result<(), ProtocolError> {
        self.client()?
            .publish(topic, qos.into(), retain, payload.as_bytes().to_vec())
            .await
            .map_err(ProtocolError::Mqtt)
    }

    fn take_subscription_rejection(&self) -> bool {
        self.inner.subscription_rejected.swap(false, Ordering::AcqRel)
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        let session = self.inner.session.lock().take();
        self.inner.connected.store(false, Ordering::Release);
        let Some(mut session) = session else {
            return Ok(());
        };

        tracing::info!(
            host = %self.inner.config.host,
            port = %self.inner.config.port,
            "Disconnecting from MQTT broker"
        );

        let result = session.client.disconnect().await;
        if tokio::time::timeout(DISCONNECT_GRACE, &mut session.event_task)
            .await
            .is_err()
        {
            session.event_task.abort();
        }
        result.map_err(ProtocolError::Mqtt)
    }
}

impl std::fmt::Debug for MqttBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBroker")
            .field("host", &self.inner.config.host)
            .field("port", &self.inner.config.port)
            .field("tls", &self.uses_tls())
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Builder for an [`MqttBroker`].
///
/// Building does not connect; the synchronization loop does that on its
/// first tick.
#[derive(Debug)]
pub struct MqttBrokerBuilder {
    config: MqttBrokerConfig,
    handler: CommandHandler,
}

impl MqttBrokerBuilder {
    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Sets the broker port (default: 8883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the MQTT client id (default: `pinbridge-<uuid>`).
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.config.keep_alive = duration;
        self
    }

    /// Enables TLS with the given certificates.
    ///
    /// Without this the session runs over plain TCP.
    #[must_use]
    pub fn tls(mut self, tls: TlsMaterial) -> Self {
        self.config.tls = Some(tls);
        self
    }

    /// Builds the broker without connecting.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::InvalidAddress` if no host is set.
    pub fn build(self) -> Result<MqttBroker, ProtocolError> {
        if self.config.host.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }
        if self.config.tls.is_none() {
            tracing::warn!(host = %self.config.host, "MQTT session will not be encrypted");
        }

        Ok(MqttBroker {
            inner: Arc::new(MqttBrokerInner {
                config: self.config,
                handler: self.handler,
                session: Mutex::new(None),
                connected: AtomicBool::new(false),
                subscription_rejected: AtomicBool::new(false),
            }),
        })
    }
}

/// Returns `true` if the broker refused any filter in the request.
fn refuses_subscription(suback: &SubAck) -> bool {
    suback
        .return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
}

/// Drives one session's event loop until it fails or is closed.
async fn handle_broker_events(mut event_loop: EventLoop, inner: Arc<MqttBrokerInner>) {
    use rumqttc::{Event, Packet};

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::info!(?connack, "Connected to MQTT broker");
                inner.connected.store(true, Ordering::Release);
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                if refuses_subscription(&suback) {
                    tracing::warn!(pkid = suback.pkid, "MQTT broker refused a subscription");
                    inner.subscription_rejected.store(true, Ordering::Release);
                } else {
                    tracing::debug!(pkid = suback.pkid, "MQTT subscription acknowledged");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(topic = %publish.topic, "MQTT message received");
                inner.handler.handle(&publish.topic, &publish.payload);
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker closed the session");
                inner.connected.store(false, Ordering::Release);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "MQTT event loop stopped");
                inner.connected.store(false, Ordering::Release);
                break;
            }
        }
    }
}
