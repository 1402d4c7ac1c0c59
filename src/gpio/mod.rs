// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hardware pin drivers.
//!
//! The bridge never talks to GPIO registers itself. It goes through a
//! [`PinDriver`], which claims a line as input or output and reads or writes
//! its electrical level.
//!
//! # Drivers
//!
//! - [`RppalDriver`]: Raspberry Pi GPIO through `rppal` (feature `rppal`)
//! - [`MemoryDriver`]: in-memory lines for tests and dry runs
//!
//! Hardware ids are always BCM GPIO numbers. Configurations written with
//! physical header numbers are translated by [`PinNumbering::to_bcm`].

mod memory;
#[cfg(feature = "rppal")]
mod raspberry;

pub use memory::MemoryDriver;
#[cfg(feature = "rppal")]
pub use raspberry::RppalDriver;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, HardwareError};

/// Bias applied to a line configured as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    /// Internal pull-down resistor.
    #[default]
    Down,
    /// Internal pull-up resistor.
    Up,
    /// Floating input.
    None,
}

/// Access to the electrical level of individual GPIO lines.
///
/// Implementations must be shareable between the pins of one bridge; every
/// method takes `&self` and serializes access internally.
pub trait PinDriver: Send + Sync + fmt::Debug {
    /// Claims `id` as an output line.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError` if the line cannot be claimed.
    fn configure_output(&self, id: u8) -> Result<(), HardwareError>;

    /// Claims `id` as an input line with the given bias.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError` if the line cannot be claimed.
    fn configure_input(&self, id: u8, pull: Pull) -> Result<(), HardwareError>;

    /// Reads the electrical level, `true` meaning high.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError` if the line is not configured or unreadable.
    fn read_level(&self, id: u8) -> Result<bool, HardwareError>;

    /// Drives an output line high (`true`) or low.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError` if the line is not an output or unwritable.
    fn write_level(&self, id: u8, level: bool) -> Result<(), HardwareError>;

    /// Releases the claim on `id`, restoring the line to its previous mode.
    fn release(&self, id: u8);
}

/// How hardware ids in the configuration are numbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinNumbering {
    /// Broadcom GPIO numbers.
    #[default]
    Bcm,
    /// Physical pin numbers on the 40-pin header.
    Board,
}

/// Physical header pin to BCM GPIO number, for the 40-pin header.
/// Power and ground pins map to `None`.
const BOARD_TO_BCM: [Option<u8>; 41] = [
    None,     // 0 (unused)
    None,     // 1  3V3
    None,     // 2  5V
    Some(2),  // 3
    None,     // 4  5V
    Some(3),  // 5
    None,     // 6  GND
    Some(4),  // 7
    Some(14), // 8
    None,     // 9  GND
    Some(15), // 10
    Some(17), // 11
    Some(18), // 12
    Some(27), // 13
    None,     // 14 GND
    Some(22), // 15
    Some(23), // 16
    None,     // 17 3V3
    Some(24), // 18
    Some(10), // 19
    None,     // 20 GND
    Some(9),  // 21
    Some(25), // 22
    Some(11), // 23
    Some(8),  // 24
    None,     // 25 GND
    Some(7),  // 26
    Some(0),  // 27
    Some(1),  // 28
    Some(5),  // 29
    None,     // 30 GND
    Some(6),  // 31
    Some(12), // 32
    Some(13), // 33
    None,     // 34 GND
    Some(19), // 35
    Some(16), // 36
    Some(26), // 37
    Some(20), // 38
    None,     // 39 GND
    Some(21), // 40
];

/// Highest BCM GPIO number exposed on the header.
const MAX_BCM: u8 = 27;

impl PinNumbering {
    /// Translates a configured pin number into a BCM GPIO number.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownBoardPin` for header pins without a GPIO
    /// line, and `ConfigError::Invalid` for BCM numbers beyond the header.
    ///
    /// # Examples
    ///
    /// ```
    /// use pinbridge::gpio::PinNumbering;
    ///
    /// assert_eq!(PinNumbering::Board.to_bcm(23).unwrap(), 11);
    /// assert_eq!(PinNumbering::Bcm.to_bcm(11).unwrap(), 11);
    /// assert!(PinNumbering::Board.to_bcm(6).is_err());
    /// ```
    pub fn to_bcm(self, pin: u8) -> Result<u8, ConfigError> {
        match self {
            Self::Bcm if pin <= MAX_BCM => Ok(pin),
            Self::Bcm => Err(ConfigError::Invalid(format!(
                "BCM GPIO {pin} is out of range [0, {MAX_BCM}]"
            ))),
            Self::Board => BOARD_TO_BCM
                .get(usize::from(pin))
                .copied()
                .flatten()
                .ok_or(ConfigError::UnknownBoardPin(pin)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn board_numbering_matches_header() {
        let expected = [
            (3, 2),
            (5, 3),
            (7, 4),
            (8, 14),
            (10, 15),
            (11, 17),
            (12, 18),
            (13, 27),
            (15, 22),
            (16, 23),
            (18, 24),
            (19, 10),
            (21, 9),
            (22, 25),
            (23, 11),
            (24, 8),
            (26, 7),
            (40, 21),
        ];
        for (board, bcm) in expected {
            assert_eq!(PinNumbering::Board.to_bcm(board).unwrap(), bcm, "board {board}");
        }
    }

    #[test]
    fn board_power_pins_are_rejected() {
        for pin in [0, 1, 2, 4, 6, 9, 14, 17, 20, 25, 30, 34, 39, 41, 200] {
            assert!(
                matches!(
                    PinNumbering::Board.to_bcm(pin),
                    Err(ConfigError::UnknownBoardPin(p)) if p == pin
                ),
                "board {pin}"
            );
        }
    }

    #[test]
    fn every_bcm_line_appears_once_on_header() {
        let mut seen: Vec<u8> = BOARD_TO_BCM.iter().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..=MAX_BCM).collect::<Vec<_>>());
    }

    #[test]
    fn bcm_numbering_is_identity_within_range() {
        assert_eq!(PinNumbering::Bcm.to_bcm(0).unwrap(), 0);
        assert_eq!(PinNumbering::Bcm.to_bcm(27).unwrap(), 27);
        assert!(PinNumbering::Bcm.to_bcm(28).is_err());
    }

    #[test]
    fn pull_defaults_to_down() {
        assert_eq!(Pull::default(), Pull::Down);
    }
}
