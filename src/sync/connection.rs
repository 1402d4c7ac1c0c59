// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded connect-and-wait.

use std::time::Duration;

use crate::error::ProtocolError;
use crate::protocol::Broker;

/// Default number of connection polls per attempt.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// Default pause between connection polls.
pub const DEFAULT_CONNECT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of a successful [`ConnectionManager::ensure_connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// The session was already up; nothing was done.
    Established,
    /// A new session was brought up; subscriptions must be renewed.
    Fresh,
}

/// Brings the broker session up without blocking the loop indefinitely.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionManager {
    attempts: u32,
    poll_interval: Duration,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_POLL_INTERVAL)
    }
}

impl ConnectionManager {
    /// Creates a manager polling `attempts` times, `poll_interval` apart.
    #[must_use]
    pub fn new(attempts: u32, poll_interval: Duration) -> Self {
        Self {
            attempts,
            poll_interval,
        }
    }

    /// Makes sure the session is up.
    ///
    /// Returns immediately if the broker already reports a session. Otherwise
    /// starts a connection and polls it for a bounded time. The cause of a
    /// failure is not distinguished; the caller retries on a later tick.
    ///
    /// # Errors
    ///
    /// Returns the broker's error if the attempt cannot start, and
    /// `ProtocolError::NotConnected` if the session is still down after the
    /// polling budget.
    pub async fn ensure_connected<B: Broker>(
        &self,
        broker: &B,
    ) -> Result<Connectivity, ProtocolError> {
        if broker.is_connected() {
            return Ok(Connectivity::Established);
        }

        broker.connect().await?;

        for attempt in 1..=self.attempts {
            if broker.is_connected() {
                tracing::debug!(attempt, "Broker session established");
                return Ok(Connectivity::Fresh);
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        Err(ProtocolError::NotConnected {
            attempts: self.attempts,
        })
    }
}
