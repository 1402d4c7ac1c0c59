// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Raspberry Pi GPIO driver.

use std::collections::HashMap;

use parking_lot::Mutex;
use rppal::gpio::{Gpio, InputPin, OutputPin};

use super::{PinDriver, Pull};
use crate::error::HardwareError;

/// A line claimed through `rppal`.
///
/// Dropping the claim restores the line's original mode.
#[derive(Debug)]
enum Claim {
    Output(OutputPin),
    Input(InputPin),
}

/// Pin driver for the Raspberry Pi GPIO peripheral.
///
/// Ids are BCM GPIO numbers. Claims are held until [`PinDriver::release`] is
/// called or the driver is dropped, at which point `rppal` resets each line
/// to the mode it had before.
#[derive(Debug)]
pub struct RppalDriver {
    gpio: Gpio,
    claims: Mutex<HashMap<u8, Claim>>,
}

impl RppalDriver {
    /// Opens the GPIO peripheral.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError::Gpio` when the peripheral is not accessible,
    /// for example off-target or without permission on `/dev/gpiomem`.
    pub fn new() -> Result<Self, HardwareError> {
        let gpio = Gpio::new()?;
        tracing::debug!("Opened GPIO peripheral");
        Ok(Self {
            gpio,
            claims: Mutex::new(HashMap::new()),
        })
    }
}

impl PinDriver for RppalDriver {
    fn configure_output(&self, id: u8) -> Result<(), HardwareError> {
        let pin = self.gpio.get(id)?.into_output();
        tracing::debug!(pin = id, "Claimed GPIO line as output");
        self.claims.lock().insert(id, Claim::Output(pin));
        Ok(())
    }

    fn configure_input(&self, id: u8, pull: Pull) -> Result<(), HardwareError> {
        let pin = self.gpio.get(id)?;
        let pin = match pull {
            Pull::Down => pin.into_input_pulldown(),
            Pull::Up => pin.into_input_pullup(),
            Pull::None => pin.into_input(),
        };
        tracing::debug!(pin = id, ?pull, "Claimed GPIO line as input");
        self.claims.lock().insert(id, Claim::Input(pin));
        Ok(())
    }

    fn read_level(&self, id: u8) -> Result<bool, HardwareError> {
        match self.claims.lock().get(&id) {
            Some(Claim::Output(pin)) => Ok(pin.is_set_high()),
            Some(Claim::Input(pin)) => Ok(pin.is_high()),
            None => Err(HardwareError::NotConfigured(id)),
        }
    }

    fn write_level(&self, id: u8, level: bool) -> Result<(), HardwareError> {
        match self.claims.lock().get_mut(&id) {
            Some(Claim::Output(pin)) => {
                if level {
                    pin.set_high();
                } else {
                    pin.set_low();
                }
                Ok(())
            }
            Some(Claim::Input(_)) => Err(HardwareError::NotAnOutput(id)),
            None => Err(HardwareError::NotConfigured(id)),
        }
    }

    fn release(&self, id: u8) {
        if self.claims.lock().remove(&id).is_some() {
            tracing::debug!(pin = id, "Released GPIO line");
        }
    }
}
