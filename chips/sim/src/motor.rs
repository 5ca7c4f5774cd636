// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Recording motor driver and a settable position counter.

use core::cell::Cell;

use kernel::hil::motor::{Angle, Counter, MotorDriver};
use kernel::ErrorCode;

/// H-bridge driver that records the last command for assertions.
pub struct SimMotor {
    /// `None` while coasting, otherwise the commanded duty.
    duty: Cell<Option<i16>>,
    /// When set, every command fails; for exercising acquisition errors.
    fail: Cell<bool>,
}

impl SimMotor {
    pub fn new() -> SimMotor {
        SimMotor {
            duty: Cell::new(None),
            fail: Cell::new(false),
        }
    }

    pub fn duty(&self) -> Option<i16> {
        self.duty.get()
    }

    pub fn is_coasting(&self) -> bool {
        self.duty.get().is_none()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.set(fail);
    }
}

impl MotorDriver for SimMotor {
    fn coast(&self) -> Result<(), ErrorCode> {
        if self.fail.get() {
            return Err(ErrorCode::IO);
        }
        self.duty.set(None);
        Ok(())
    }

    fn set_duty(&self, duty: i16) -> Result<(), ErrorCode> {
        if self.fail.get() {
            return Err(ErrorCode::IO);
        }
        self.duty.set(Some(duty));
        Ok(())
    }
}

/// Quadrature counter with test-settable state.
pub struct SimCounter {
    angle: Cell<Angle>,
    abs_mdeg: Cell<Option<i32>>,
    type_id: Cell<Option<u8>>,
}

impl SimCounter {
    pub fn new(type_id: Option<u8>) -> SimCounter {
        SimCounter {
            angle: Cell::new(Angle::default()),
            abs_mdeg: Cell::new(None),
            type_id: Cell::new(type_id),
        }
    }

    pub fn set_angle(&self, angle: Angle) {
        self.angle.set(angle);
    }

    pub fn set_abs_mdeg(&self, mdeg: Option<i32>) {
        self.abs_mdeg.set(mdeg);
    }
}

impl Counter for SimCounter {
    fn angle(&self) -> Result<Angle, ErrorCode> {
        Ok(self.angle.get())
    }

    fn abs_angle(&self) -> Result<i32, ErrorCode> {
        self.abs_mdeg.get().ok_or(ErrorCode::NOSUPPORT)
    }

    fn type_id(&self) -> Option<u8> {
        self.type_id.get()
    }
}
