// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! A GPIO pin on a line with realistic drive strengths.
//!
//! Three things act on the line: the pin under test (strong low, or a
//! high that an external strong low still wins over, which is how the
//! open-drain I2C bus behaves), an external device that may pull the line
//! hard low (an I2C slave's SDA), and a weak pull that sets the level
//! when nobody drives (a port's pull-up, or the pull-down inside an NXT
//! sensor).

use core::cell::Cell;

use kernel::hil::gpio::{Pin, PinFunction};

pub struct SimGpio {
    /// Level the pin under test drives, `None` when released.
    master: Cell<Option<bool>>,
    /// External device pulling the line hard low.
    external_low: Cell<bool>,
    /// Line level when nobody drives. Ports idle high.
    pull: Cell<bool>,
    function: Cell<PinFunction>,
}

impl SimGpio {
    pub fn new() -> SimGpio {
        SimGpio {
            master: Cell::new(None),
            external_low: Cell::new(false),
            pull: Cell::new(true),
            function: Cell::new(PinFunction::Input),
        }
    }

    /// Externally pull the line hard low (true) or release it (false).
    pub fn set_external_low(&self, low: bool) {
        self.external_low.set(low);
    }

    /// Externally drive a logic level, open-drain style: low is driven,
    /// high is released.
    pub fn set_external_level(&self, level: bool) {
        self.external_low.set(!level);
    }

    /// Sets the level the line floats to when nobody drives it.
    pub fn set_external_pull(&self, level: bool) {
        self.pull.set(level);
    }

    /// The live line level.
    pub fn level(&self) -> bool {
        if self.external_low.get() || self.master.get() == Some(false) {
            return false;
        }
        match self.master.get() {
            Some(true) => true,
            _ => self.pull.get(),
        }
    }

    /// Whether the pin under test is currently pulling the line low.
    pub fn master_pulls_low(&self) -> bool {
        self.master.get() == Some(false)
    }

    /// Whether the pin under test is actively driving the line high.
    pub fn master_drives_high(&self) -> bool {
        self.master.get() == Some(true)
    }

    pub fn function(&self) -> PinFunction {
        self.function.get()
    }
}

impl Pin for SimGpio {
    fn out_high(&self) {
        self.master.set(Some(true));
    }

    fn out_low(&self) {
        self.master.set(Some(false));
    }

    fn input(&self) -> bool {
        self.level()
    }

    fn set_function(&self, function: PinFunction) {
        self.function.set(function);
        if function != PinFunction::Output {
            // Handing the pin away releases our drive.
            self.master.set(None);
        }
    }
}
