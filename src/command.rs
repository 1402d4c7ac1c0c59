// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Inbound command handling.
//!
//! Messages arrive on the MQTT delivery task, concurrently with the
//! synchronization loop. The [`CommandHandler`] never touches a pin: it
//! resolves the topic, decodes the payload and parks the requested state in
//! the target output's slot. The loop drains every slot at the start of each
//! detect/publish phase and stages the states on its own outputs.
//!
//! Each output holds at most one pending state, so a burst of commands
//! between two ticks collapses to the last one received.
//!
//! ```text
//! MQTT: living_room/output/Output_01/set → ON
//!                     ↓
//!          CommandHandler::handle()
//!                     ↓
//!          slots[0] = Some(On)            (latest wins)
//!                     ↓
//!     Bridge tick: outputs[0].set(true)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::CommandError;
use crate::types::{PinState, TopicScheme};

/// A decoded command waiting to be applied by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedCommand {
    /// Index of the target output in configuration order.
    pub output: usize,
    /// Requested state.
    pub state: PinState,
}

type Slots = Arc<Mutex<Vec<Option<PinState>>>>;

/// Loop side of the pending commands.
#[derive(Debug)]
pub struct CommandReceiver {
    slots: Slots,
}

impl CommandReceiver {
    /// Takes every pending command, in output order.
    pub fn drain(&self) -> Vec<StagedCommand> {
        self.slots
            .lock()
            .iter_mut()
            .enumerate()
            .filter_map(|(output, slot)| {
                slot.take().map(|state| StagedCommand { output, state })
            })
            .collect()
    }
}

/// Resolves command topics and records the latest requested state per
/// output.
///
/// Cheap to clone; every clone feeds the same slots.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    routes: Arc<HashMap<String, usize>>,
    slots: Slots,
}

impl CommandHandler {
    /// Creates a handler for the given outputs and its receiving side.
    ///
    /// `outputs` lists output names in configuration order; the position of
    /// each name becomes [`StagedCommand::output`].
    #[must_use]
    pub fn new<'a>(
        topics: &TopicScheme,
        outputs: impl IntoIterator<Item = &'a str>,
    ) -> (Self, CommandReceiver) {
        let routes: HashMap<String, usize> = outputs
            .into_iter()
            .enumerate()
            .map(|(index, name)| (topics.output_command(name), index))
            .collect();
        let slots = Arc::new(Mutex::new(vec![None; routes.len()]));
        (
            Self {
                routes: Arc::new(routes),
                slots: Arc::clone(&slots),
            },
            CommandReceiver { slots },
        )
    }

    /// Resolves and decodes a message without staging it.
    ///
    /// # Errors
    ///
    /// Returns `CommandError::UnknownTopic` when no output listens on
    /// `topic`, and `CommandError::Payload` when the payload is not `ON` or
    /// `OFF`.
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<StagedCommand, CommandError> {
        let output = *self
            .routes
            .get(topic)
            .ok_or_else(|| CommandError::UnknownTopic(topic.to_string()))?;
        let state = PinState::from_payload(payload)?;
        Ok(StagedCommand { output, state })
    }

    /// Decodes a message and stages it for the loop, replacing any state
    /// still pending for the same output.
    ///
    /// # Errors
    ///
    /// Returns the decode error.
    pub fn stage(&self, topic: &str, payload: &[u8]) -> Result<StagedCommand, CommandError> {
        let command = self.decode(topic, payload)?;
        let replaced = self
            .slots
            .lock()
            .get_mut(command.output)
            .and_then(|slot| slot.replace(command.state));
        if let Some(previous) = replaced {
            tracing::debug!(
                output = command.output,
                previous = %previous,
                "Pending command superseded"
            );
        }
        Ok(command)
    }

    /// Handles one delivered message, logging and dropping anything that
    /// cannot be staged.
    ///
    /// Returns `true` if the command was staged.
    pub fn handle(&self, topic: &str, payload: &[u8]) -> bool {
        match self.stage(topic, payload) {
            Ok(command) => {
                tracing::debug!(
                    topic = %topic,
                    output = command.output,
                    state = %command.state,
                    "Command staged"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    topic = %topic,
                    payload = %String::from_utf8_lossy(payload),
                    error = %e,
                    "Dropping inbound message"
                );
                false
            }
        }
    }

    /// Returns the number of routable command topics.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}
