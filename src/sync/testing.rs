// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scripted broker for exercising the loop without a network.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ProtocolError;
use crate::protocol::{Broker, Qos};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Published {
    pub topic: String,
    pub payload: String,
    pub qos: Qos,
    pub retain: bool,
}

#[derive(Debug, Default)]
struct State {
    connected: bool,
    /// Polls that still report "down" after a connect; `None` never comes up.
    comes_up_after: Option<u32>,
    pending_polls: Option<u32>,
    fail_connect: bool,
    connect_calls: usize,
    disconnect_calls: usize,
    failing_subscribes: HashSet<String>,
    failing_publishes: HashSet<String>,
    subscriptions: Vec<(String, Qos)>,
    published: Vec<Published>,
    rejection: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedBroker {
    state: Mutex<State>,
}

impl ScriptedBroker {
    /// A broker that never comes up unless told to.
    pub fn new() -> Self {
        Self::default()
    }

    /// A broker with a session already established.
    pub fn connected() -> Self {
        let broker = Self::new();
        {
            let mut state = broker.state.lock();
            state.connected = true;
            state.comes_up_after = Some(0);
        }
        broker
    }

    /// After the next connect, report "down" for `polls` polls, then up.
    pub fn connect_after_polls(&self, polls: u32) {
        self.state.lock().comes_up_after = Some(polls);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    /// Simulates the session dropping.
    pub fn drop_session(&self) {
        self.state.lock().connected = false;
    }

    pub fn fail_subscribe(&self, topic: &str) {
        self.state.lock().failing_subscribes.insert(topic.to_string());
    }

    pub fn heal_subscribe(&self, topic: &str) {
        self.state.lock().failing_subscribes.remove(topic);
    }

    pub fn fail_publish(&self, topic: &str) {
        self.state.lock().failing_publishes.insert(topic.to_string());
    }

    pub fn reject_subscriptions(&self) {
        self.state.lock().rejection = true;
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().connect_calls
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.lock().disconnect_calls
    }

    pub fn subscriptions(&self) -> Vec<(String, Qos)> {
        self.state.lock().subscriptions.clone()
    }

    pub fn published(&self) -> Vec<Published> {
        self.state.lock().published.clone()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.subscriptions.clear();
        state.published.clear();
    }
}

impl Broker for ScriptedBroker {
    fn is_connected(&self) -> bool {
        let mut state = self.state.lock();
        if state.connected {
            return true;
        }
        match state.pending_polls {
            Some(0) => {
                state.connected = true;
                state.pending_polls = None;
                true
            }
            Some(remaining) => {
                state.pending_polls = Some(remaining - 1);
                false
            }
            None => false,
        }
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        state.connect_calls += 1;
        if state.fail_connect {
            return Err(ProtocolError::ConnectionFailed("scripted".to_string()));
        }
        state.pending_polls = state.comes_up_after;
        Ok(())
    }

    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        if state.failing_subscribes.contains(topic) {
            return Err(ProtocolError::ConnectionFailed("scripted".to_string()));
        }
        state.subscriptions.push((topic.to_string(), qos));
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        qos: Qos,
        retain: bool,
    ) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        if state.failing_publishes.contains(topic) {
            return Err(ProtocolError::ConnectionFailed("scripted".to_string()));
        }
        state.published.push(Published {
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos,
            retain,
        });
        Ok(())
    }

    fn take_subscription_rejection(&self) -> bool {
        std::mem::take(&mut self.state.lock().rejection)
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        state.disconnect_calls += 1;
        state.connected = false;
        Ok(())
    }
}

/// Lets a test keep a handle on a broker the bridge owns.
impl Broker for Arc<ScriptedBroker> {
    fn is_connected(&self) -> bool {
        self.as_ref().is_connected()
    }

    async fn connect(&self) -> Result<(), ProtocolError> {
        self.as_ref().connect().await
    }

    async fn subscribe(&self, topic: &str, qos: Qos) -> Result<(), ProtocolError> {
        self.as_ref().subscribe(topic, qos).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        qos: Qos,
        retain: bool,
    ) -> Result<(), ProtocolError> {
        self.as_ref().publish(topic, payload, qos, retain).await
    }

    fn take_subscription_rejection(&self) -> bool {
        self.as_ref().take_subscription_rejection()
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        self.as_ref().disconnect().await
    }
}
