// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker communication.
//!
//! The synchronization loop only sees the [`Broker`] trait. [`MqttBroker`]
//! implements it on top of `rumqttc` with TLS; tests substitute scripted
//! fakes.

#[cfg(feature = "mqtt")]
mod mqtt_broker;

#[cfg(feature = "mqtt")]
pub use mqtt_broker::{MqttBroker, MqttBrokerBuilder, TlsMaterial};

use crate::error::ProtocolError;

/// Default secured MQTT port.
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Delivery assurance for publish and subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qos {
    /// Fire and forget.
    AtMostOnce,
    /// Delivered, possibly more than once.
    AtLeastOnce,
    /// Delivered exactly once.
    #[default]
    ExactlyOnce,
}

#[cfg(feature = "mqtt")]
impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => Self::AtMostOnce,
            Qos::AtLeastOnce => Self::AtLeastOnce,
            Qos::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

/// A publish/subscribe session as seen by the synchronization loop.
///
/// Inbound messages do not flow through this trait; implementations hand
/// them to the [`CommandHandler`](crate::command::CommandHandler) they were
/// built with.
#[allow(async_fn_in_trait)]
pub trait Broker {
    /// Returns whether the session is currently established.
    fn is_connected(&self) -> bool;

    /// Initiates a connection and starts inbound delivery.
    ///
    /// Returning `Ok` only means the attempt is under way; callers poll
    /// [`Broker::is_connected`] for the outcome.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the attempt cannot even be started.
    async fn connect(&self) -> Result<(), ProtocolError>;

    /// Requests a subscription.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the request is rejected locally.
    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), ProtocolError>;

    /// Publishes a payload.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the message cannot be queued.
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        qos: Qos,
        retain: bool,
    ) -> Result<(), ProtocolError>;

    /// Returns `true` once if the broker refused a subscription since the
    /// last call.
    fn take_subscription_rejection(&self) -> bool;

    /// Closes the session.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if the disconnect request fails.
    async fn disconnect(&self) -> Result<(), ProtocolError>;
}
