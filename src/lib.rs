// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `pinbridge` - Mirror single-board computer GPIO pins to an MQTT broker.
//!
//! Every configured pin gets a retained state topic. Outputs can also be
//! commanded remotely:
//!
//! | Topic                          | Direction | Payload       |
//! |--------------------------------|-----------|---------------|
//! | `<prefix>/output/<name>`       | publish   | `ON` / `OFF`  |
//! | `<prefix>/output/<name>/set`   | subscribe | `ON` / `OFF`  |
//! | `<prefix>/input/<name>`        | publish   | `ON` / `OFF`  |
//!
//! State is published with QoS 2 and the retain flag, so late subscribers
//! see the last known level immediately.
//!
//! # Architecture
//!
//! - [`pin`]: output and input pins with a cached logical state
//! - [`gpio`]: the hardware seam, [`gpio::PinDriver`], with a Raspberry Pi
//!   and an in-memory implementation
//! - [`protocol`]: the broker seam, [`protocol::Broker`], implemented by
//!   [`MqttBroker`]
//! - [`command`]: decodes inbound messages into staged commands
//! - [`sync`]: the polling loop tying it all together
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pinbridge::gpio::MemoryDriver;
//! use pinbridge::{Bridge, Config, MqttBroker};
//!
//! #[tokio::main]
//! async fn main() -> pinbridge::Result<()> {
//!     let config = Config::load("pinbridge.toml")?;
//!     let (handler, commands) = config.command_handler();
//!
//!     let broker = MqttBroker::builder(handler)
//!         .host(config.broker.host.as_str())
//!         .port(config.broker.port)
//!         .build()?;
//!
//!     let mut bridge = Bridge::new(&config, Arc::new(MemoryDriver::new()), broker, commands)?;
//!     bridge.tick().await;
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod gpio;
pub mod pin;
pub mod protocol;
pub mod sync;
pub mod types;

pub use command::{CommandHandler, CommandReceiver, StagedCommand};
pub use config::Config;
pub use error::{
    CommandError, ConfigError, Error, HardwareError, ProtocolError, Result, ValueError,
};
pub use gpio::{MemoryDriver, PinDriver, PinNumbering, Pull};
pub use pin::{InputPin, OutputPin};
#[cfg(feature = "mqtt")]
pub use protocol::{MqttBroker, MqttBrokerBuilder, TlsMaterial};
pub use protocol::{Broker, DEFAULT_TLS_PORT, Qos};
pub use sync::{Bridge, TickReport};
pub use types::{PinState, TopicScheme};
