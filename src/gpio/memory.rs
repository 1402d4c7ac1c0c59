// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory pin driver.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::{PinDriver, Pull};
use crate::error::HardwareError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Output,
    Input(Pull),
}

#[derive(Debug)]
struct Line {
    mode: Option<Mode>,
    level: bool,
    faulty: bool,
}

impl Line {
    fn new(level: bool) -> Self {
        Self {
            mode: None,
            level,
            faulty: false,
        }
    }
}

/// A driver backed by plain memory.
///
/// Lines start low unless preset with [`MemoryDriver::set_level`], which also
/// stands in for external influence: a switch closing on an input, or
/// someone toggling an output behind the bridge's back. Inputs configured
/// with [`Pull::Up`] and never preset start high.
///
/// # Examples
///
/// ```
/// use pinbridge::gpio::{MemoryDriver, PinDriver, Pull};
///
/// let driver = MemoryDriver::new();
/// driver.configure_input(8, Pull::Down).unwrap();
/// assert!(!driver.read_level(8).unwrap());
///
/// driver.set_level(8, true);
/// assert!(driver.read_level(8).unwrap());
/// ```
#[derive(Debug, Default)]
pub struct MemoryDriver {
    lines: Mutex<HashMap<u8, Line>>,
}

impl MemoryDriver {
    /// Creates a driver with no lines.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the level of a line, configured or not.
    pub fn set_level(&self, id: u8, level: bool) {
        self.lines
            .lock()
            .entry(id)
            .and_modify(|line| line.level = level)
            .or_insert_with(|| Line::new(level));
    }

    /// Returns the current level of a line, if it exists.
    #[must_use]
    pub fn level(&self, id: u8) -> Option<bool> {
        self.lines.lock().get(&id).map(|line| line.level)
    }

    /// Makes every access to `id` fail until [`MemoryDriver::repair`].
    pub fn break_line(&self, id: u8) {
        self.lines
            .lock()
            .entry(id)
            .or_insert_with(|| Line::new(false))
            .faulty = true;
    }

    /// Undoes [`MemoryDriver::break_line`].
    pub fn repair(&self, id: u8) {
        if let Some(line) = self.lines.lock().get_mut(&id) {
            line.faulty = false;
        }
    }

    /// Returns `true` while `id` is claimed as input or output.
    #[must_use]
    pub fn is_claimed(&self, id: u8) -> bool {
        self.lines
            .lock()
            .get(&id)
            .is_some_and(|line| line.mode.is_some())
    }

    /// Returns `true` if `id` is claimed as an output.
    #[must_use]
    pub fn is_output(&self, id: u8) -> bool {
        self.lines
            .lock()
            .get(&id)
            .is_some_and(|line| line.mode == Some(Mode::Output))
    }
}

impl PinDriver for MemoryDriver {
    fn configure_output(&self, id: u8) -> Result<(), HardwareError> {
        let mut lines = self.lines.lock();
        let line = lines.entry(id).or_insert_with(|| Line::new(false));
        if line.faulty {
            return Err(HardwareError::Unavailable(id));
        }
        line.mode = Some(Mode::Output);
        Ok(())
    }

    fn configure_input(&self, id: u8, pull: Pull) -> Result<(), HardwareError> {
        let mut lines = self.lines.lock();
        let line = lines
            .entry(id)
            .or_insert_with(|| Line::new(pull == Pull::Up));
        if line.faulty {
            return Err(HardwareError::Unavailable(id));
        }
        line.mode = Some(Mode::Input(pull));
        Ok(())
    }

    fn read_level(&self, id: u8) -> Result<bool, HardwareError> {
        let lines = self.lines.lock();
        match lines.get(&id) {
            Some(line) if line.faulty => Err(HardwareError::Unavailable(id)),
            Some(line) if line.mode.is_some() => Ok(line.level),
            _ => Err(HardwareError::NotConfigured(id)),
        }
    }

    fn write_level(&self, id: u8, level: bool) -> Result<(), HardwareError> {
        let mut lines = self.lines.lock();
        match lines.get_mut(&id) {
            Some(line) if line.faulty => Err(HardwareError::Unavailable(id)),
            Some(line) => match line.mode {
                Some(Mode::Output) => {
                    line.level = level;
                    Ok(())
                }
                Some(Mode::Input(_)) => Err(HardwareError::NotAnOutput(id)),
                None => Err(HardwareError::NotConfigured(id)),
            },
            None => Err(HardwareError::NotConfigured(id)),
        }
    }

    fn release(&self, id: u8) {
        if let Some(line) = self.lines.lock().get_mut(&id) {
            line.mode = None;
        }
    }
}
