// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logical pin state and its wire vocabulary.

use std::fmt;
use std::str::FromStr;

use crate::error::ValueError;

/// Logical state of a pin as exchanged with the broker.
///
/// The wire vocabulary is closed: exactly `ON` and `OFF`, case-sensitive.
///
/// # Examples
///
/// ```
/// use pinbridge::types::PinState;
///
/// assert_eq!(PinState::from(true).as_str(), "ON");
/// assert_eq!("OFF".parse::<PinState>().unwrap(), PinState::Off);
/// assert!("on".parse::<PinState>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinState {
    /// Electrical level low.
    Off,
    /// Electrical level high.
    On,
}

impl PinState {
    /// Returns the payload published for this state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
        }
    }

    /// Returns `true` for [`PinState::On`].
    #[must_use]
    pub const fn is_on(&self) -> bool {
        matches!(self, Self::On)
    }

    /// Decodes a raw MQTT payload.
    ///
    /// # Errors
    ///
    /// Returns `ValueError::InvalidPinState` unless the payload is exactly
    /// `ON` or `OFF`.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ValueError> {
        match payload {
            b"ON" => Ok(Self::On),
            b"OFF" => Ok(Self::Off),
            other => Err(ValueError::InvalidPinState(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PinState {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_payload(s.as_bytes())
    }
}

impl From<bool> for PinState {
    fn from(value: bool) -> Self {
        if value { Self::On } else { Self::Off }
    }
}

impl From<PinState> for bool {
    fn from(state: PinState) -> Self {
        state.is_on()
    }
}
