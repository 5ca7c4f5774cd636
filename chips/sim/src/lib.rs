// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Host-simulation chip.
//!
//! Implements the kernel HIL against plain in-memory state so the entire
//! port stack runs and is tested on a development machine: pins whose
//! lines tests can drive, ADC channels with settable readings, a manually
//! advanced clock, paired UART FIFOs, and recording motor drivers. On top
//! of those sit scripted peripherals: a UART smart device, an I2C register
//! slave, and an NXT color sensor.

pub mod adc;
pub mod clock;
pub mod gpio;
pub mod i2c_slave;
pub mod lump_peer;
pub mod motor;
pub mod nxt_color;
pub mod uart;

pub use adc::SimAdc;
pub use clock::SimClock;
pub use gpio::SimGpio;
pub use i2c_slave::SimI2cSlave;
pub use lump_peer::{LumpSensorSim, SimMode};
pub use motor::{SimCounter, SimMotor};
pub use nxt_color::NxtColorSensorSim;
pub use uart::SimUart;
