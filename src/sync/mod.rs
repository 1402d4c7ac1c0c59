// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reconciling hardware, cached state and broker topics.
//!
//! [`Bridge`] drives everything from a single task. It leans on
//! [`ConnectionManager`] to keep the broker session up and on
//! [`SubscriptionManager`] to keep every command topic subscribed. Neither
//! failure is fatal; both are retried on a later tick.

mod bridge;
mod connection;
mod subscription;
#[cfg(test)]
pub(crate) mod testing;

pub use bridge::{Bridge, TickReport};
pub use connection::{
    ConnectionManager, Connectivity, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_CONNECT_POLL_INTERVAL,
};
pub use subscription::SubscriptionManager;
