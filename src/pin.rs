// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Output and input pins with a cached logical state.
//!
//! Each pin keeps the state it had at the last commit next to the live
//! electrical level behind its driver. The gap between the two is what
//! [`OutputPin::changed`] and [`InputPin::changed`] report.
//!
//! Commit direction differs by kind:
//!
//! ```text
//! OutputPin::commit   cache ──write──▶ hardware   (software is of record)
//! InputPin::commit    cache ◀──read─── hardware   (hardware is of record)
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::HardwareError;
use crate::gpio::{PinDriver, Pull};

/// A commandable pin.
///
/// Commands only stage a new cached state through [`OutputPin::set`]; the
/// hardware follows on the next [`OutputPin::commit`]. A line toggled
/// externally is reported by [`OutputPin::changed`] and then driven back to
/// the cached state on commit.
#[derive(Debug)]
pub struct OutputPin {
    name: String,
    id: u8,
    driver: Arc<dyn PinDriver>,
    cached: bool,
}

impl OutputPin {
    /// Claims `id` as output and seeds the cache with its current level.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError` if the line cannot be claimed or read.
    pub fn new(
        name: impl Into<String>,
        id: u8,
        driver: Arc<dyn PinDriver>,
    ) -> Result<Self, HardwareError> {
        let name = name.into();
        driver.configure_output(id)?;
        let cached = driver.read_level(id)?;
        tracing::debug!(pin = %name, gpio = id, state = cached, "Output configured");
        Ok(Self {
            name,
            id,
            driver,
            cached,
        })
    }

    /// Returns the pin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the cached state.
    #[must_use]
    pub fn get(&self) -> bool {
        tracing::trace!(pin = %self.name, state = self.cached, "Output get");
        self.cached
    }

    /// Stages a new state without touching hardware.
    pub fn set(&mut self, state: bool) {
        tracing::debug!(pin = %self.name, state, "Output set");
        self.cached = state;
    }

    fn live_level(&self) -> Result<bool, HardwareError> {
        self.driver.read_level(self.id)
    }

    /// Returns `true` if the live level differs from the cached state.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError` if the line cannot be read.
    pub fn changed(&self) -> Result<bool, HardwareError> {
        let changed = self.live_level()? != self.cached;
        if changed {
            tracing::debug!(pin = %self.name, "Output changed");
        }
        Ok(changed)
    }

    /// Drives the line to the cached state.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError` if the line cannot be written.
    pub fn commit(&self) -> Result<(), HardwareError> {
        tracing::trace!(pin = %self.name, state = self.cached, "Output commit");
        self.driver.write_level(self.id, self.cached)
    }

    /// Releases the hardware claim.
    pub fn release(&self) {
        self.driver.release(self.id);
    }
}

/// A level first seen diverging from the cache, awaiting the debounce window.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    level: bool,
    since: Instant,
    reported: bool,
}

/// An observed pin.
///
/// With a zero debounce window (the default) a new level is reported and
/// adopted on the first tick it is seen. With a non-zero window the level
/// must hold for the whole window first; bounces shorter than that never
/// reach the broker.
#[derive(Debug)]
pub struct InputPin {
    name: String,
    id: u8,
    driver: Arc<dyn PinDriver>,
    debounce: Duration,
    cached: bool,
    candidate: Option<Candidate>,
}

impl InputPin {
    /// Claims `id` as input and seeds the cache with its current level.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError` if the line cannot be claimed or read.
    pub fn new(
        name: impl Into<String>,
        id: u8,
        pull: Pull,
        debounce: Duration,
        driver: Arc<dyn PinDriver>,
    ) -> Result<Self, HardwareError> {
        let name = name.into();
        driver.configure_input(id, pull)?;
        let cached = driver.read_level(id)?;
        tracing::debug!(
            pin = %name,
            gpio = id,
            ?pull,
            ?debounce,
            state = cached,
            "Input configured"
        );
        Ok(Self {
            name,
            id,
            driver,
            debounce,
            cached,
            candidate: None,
        })
    }

    /// Returns the pin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the cached state.
    #[must_use]
    pub fn get(&self) -> bool {
        tracing::trace!(pin = %self.name, state = self.cached, "Input get");
        self.cached
    }

    fn live_level(&self) -> Result<bool, HardwareError> {
        self.driver.read_level(self.id)
    }

    /// Returns `true` if the live level differs from the cached state and
    /// has held for the debounce window.
    ///
    /// The cached state is left untouched; only the debounce bookkeeping
    /// advances.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError` if the line cannot be read.
    pub fn changed(&mut self) -> Result<bool, HardwareError> {
        let live = self.live_level()?;
        let changed = self.settled(live, Instant::now());
        if changed {
            if let Some(candidate) = self.candidate.as_mut() {
                candidate.reported = true;
            }
            tracing::debug!(pin = %self.name, "Input changed");
        }
        Ok(changed)
    }

    /// Adopts the live level into the cache.
    ///
    /// With a debounce window, a diverging level is only adopted once
    /// [`InputPin::changed`] has reported it.
    ///
    /// # Errors
    ///
    /// Returns `HardwareError` if the line cannot be read.
    pub fn commit(&mut self) -> Result<(), HardwareError> {
        let live = self.live_level()?;
        let adopt = if self.debounce.is_zero() {
            true
        } else {
            self.settled(live, Instant::now());
            self.candidate
                .is_some_and(|candidate| candidate.reported && candidate.level == live)
        };
        if adopt {
            self.cached = live;
            self.candidate = None;
        }
        tracing::trace!(pin = %self.name, state = self.cached, "Input commit");
        Ok(())
    }

    /// Releases the hardware claim.
    pub fn release(&self) {
        self.driver.release(self.id);
    }

    /// Tracks `live` against the cache and reports whether a diverging level
    /// has been stable for the debounce window.
    fn settled(&mut self, live: bool, now: Instant) -> bool {
        if live == self.cached {
            self.candidate = None;
            return false;
        }
        if self.debounce.is_zero() {
            return true;
        }
        match self.candidate {
            Some(candidate) if candidate.level == live => {
                candidate.reported || now.duration_since(candidate.since) >= self.debounce
            }
            _ => {
                self.candidate = Some(Candidate {
                    level: live,
                    since: now,
                    reported: false,
                });
                false
            }
        }
    }
}
