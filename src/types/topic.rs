// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic naming for pin state and commands.
//!
//! ```text
//! <prefix>/output/<name>       published, retained: output state
//! <prefix>/output/<name>/set   subscribed: output commands
//! <prefix>/input/<name>        published, retained: input state
//! ```

/// Derives the MQTT topics for every pin from a common prefix.
///
/// # Examples
///
/// ```
/// use pinbridge::types::TopicScheme;
///
/// let topics = TopicScheme::new("living_room");
/// assert_eq!(topics.output_state("Output_01"), "living_room/output/Output_01");
/// assert_eq!(topics.output_command("Output_01"), "living_room/output/Output_01/set");
/// assert_eq!(topics.input_state("Schalter_01"), "living_room/input/Schalter_01");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: String,
}

impl TopicScheme {
    /// Creates a scheme rooted at `prefix`.
    ///
    /// A trailing `/` is ignored.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        while prefix.ends_with('/') {
            prefix.pop();
        }
        Self { prefix }
    }

    /// Returns the topic prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Topic carrying the state of an output.
    #[must_use]
    pub fn output_state(&self, name: &str) -> String {
        format!("{}/output/{name}", self.prefix)
    }

    /// Topic on which commands for an output arrive.
    #[must_use]
    pub fn output_command(&self, name: &str) -> String {
        format!("{}/output/{name}/set", self.prefix)
    }

    /// Topic carrying the state of an input.
    #[must_use]
    pub fn input_state(&self, name: &str) -> String {
        format!("{}/input/{name}", self.prefix)
    }
}

/// Returns `true` if `name` can be embedded as a single topic level.
#[must_use]
pub fn is_valid_topic_level(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '+', '#'])
}
