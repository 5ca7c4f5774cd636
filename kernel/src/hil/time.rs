// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! HIL for time keeping.

use core::cell::Cell;

/// A monotonic microsecond clock.
pub trait Clock {
    fn now_us(&self) -> u64;
}

/// A software one-shot timer over a [`Clock`].
///
/// Cooperative state machines arm a `Timer` at a suspension point and poll
/// [`Timer::expired`] on subsequent steps. There is no callback; the port
/// process is polled from the main loop anyway.
pub struct Timer<'a> {
    clock: &'a dyn Clock,
    start: Cell<u64>,
    duration_us: Cell<u64>,
}

impl<'a> Timer<'a> {
    pub fn new(clock: &'a dyn Clock) -> Timer<'a> {
        Timer {
            clock,
            start: Cell::new(0),
            duration_us: Cell::new(0),
        }
    }

    pub fn set_ms(&self, ms: u32) {
        self.set_us(ms as u64 * 1000);
    }

    pub fn set_us(&self, us: u64) {
        self.start.set(self.clock.now_us());
        self.duration_us.set(us);
    }

    pub fn expired(&self) -> bool {
        self.clock.now_us().wrapping_sub(self.start.get()) >= self.duration_us.get()
    }

    /// Pushes the deadline out by one full period from the previous
    /// deadline, keeping a periodic timer drift-free.
    pub fn extend(&self) {
        self.start
            .set(self.start.get().wrapping_add(self.duration_us.get()));
    }

    pub fn now_us(&self) -> u64 {
        self.clock.now_us()
    }
}
