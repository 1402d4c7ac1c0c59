// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command-topic subscriptions.

use crate::protocol::{Broker, Qos};

/// Tracks whether every output's command topic is subscribed.
///
/// State is a single flag rather than per-topic bookkeeping: any failure
/// clears it and the next tick sweeps every topic again.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    subscribed: bool,
}

impl SubscriptionManager {
    /// Creates a manager in the unsubscribed state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the last sweep covered every topic.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Forces a full sweep on the next tick.
    pub fn reset(&mut self) {
        self.subscribed = false;
    }

    /// Subscribes to every topic at [`Qos::ExactlyOnce`].
    ///
    /// All topics are attempted even after a failure. Returns the resulting
    /// state, `true` only if every request succeeded.
    pub async fn sweep<B, I, T>(&mut self, broker: &B, topics: I) -> bool
    where
        B: Broker,
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.subscribed = true;
        for topic in topics {
            let topic = topic.as_ref();
            tracing::debug!(topic = %topic, "Subscribing");
            if let Err(e) = broker.subscribe(topic, Qos::ExactlyOnce).await {
                tracing::warn!(topic = %topic, error = %e, "Subscribing failed");
                self.subscribed = false;
            }
        }
        if self.subscribed {
            tracing::info!("Subscribed to all command topics");
        }
        self.subscribed
    }
}
