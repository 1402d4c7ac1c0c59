// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value types shared by the pins and the broker side.
//!
//! - [`PinState`] - the `ON`/`OFF` payload vocabulary
//! - [`TopicScheme`] - topic naming derived from the configured prefix

mod pin_state;
mod topic;

pub use pin_state::PinState;
pub use topic::{TopicScheme, is_valid_topic_level};
