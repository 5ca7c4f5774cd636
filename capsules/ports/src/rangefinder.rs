// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Driver for the LEGO ultrasonic rangefinder.
//!
//! The rangefinder is an I2C register file at address 0x01 behind the
//! [`crate::i2c_soft`] master, and the canonical user of the
//! `lego_compat` quirks: it needs the reclocked repeated start and the
//! inter-operation pauses or it stops acknowledging.
//!
//! All operations are split-phase: `start_*` queues the bus exchange and
//! `poll_*` reports the outcome. Multi-register burst reads are wired up
//! but unreliable on first-party hardware; prefer reading registers one at
//! a time.

use core::cell::Cell;
use core::task::Poll;

use kernel::hil::time::{Clock, Timer};
use kernel::ErrorCode;

use crate::i2c_soft::{I2cSoftMac, TxnStatus};

/// Factory I2C address of the rangefinder.
pub const RANGEFINDER_ADDRESS: u8 = 0x01;

/// Readings the sensor continuously refreshes, 0..8.
pub const NUM_READINGS: usize = 8;

/// Sensor type string reported by first-party hardware.
const LEGO_SENSOR_TYPE: &[u8; 5] = b"Sonar";

/// A warm reset reboots the sensor; it will not acknowledge again until
/// it has settled.
const RESET_SETTLE_MS: u32 = 100;

/// Factory measurement interval for continuous mode.
const DEFAULT_INTERVAL: u8 = 1;

/// Memory slots of the rangefinder's register file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Version,
    ProductId,
    SensorType,
    FactoryZero,
    FactoryScaleFactor,
    FactoryScaleDivisor,
    MeasurementUnits,
    Interval,
    OpMode,
    /// Continuous reading `n`, 0..8.
    Reading(u8),
    CurrentZero,
    CurrentScaleFactor,
    CurrentScaleDivisor,
}

impl Slot {
    /// Register address and returned length of each slot.
    fn cmd(&self) -> (u8, usize) {
        match *self {
            Slot::Version => (0x00, 8),
            Slot::ProductId => (0x08, 8),
            Slot::SensorType => (0x10, 8),
            Slot::FactoryZero => (0x11, 1),
            Slot::FactoryScaleFactor => (0x12, 1),
            Slot::FactoryScaleDivisor => (0x13, 1),
            Slot::MeasurementUnits => (0x14, 7),
            Slot::Interval => (0x40, 1),
            Slot::OpMode => (0x41, 1),
            Slot::Reading(n) => (0x42 + n, 1),
            Slot::CurrentZero => (0x50, 1),
            Slot::CurrentScaleFactor => (0x51, 1),
            Slot::CurrentScaleDivisor => (0x52, 1),
        }
    }
}

/// Operating modes written to [`Slot::OpMode`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OpMode {
    Off = 0x00,
    SingleShot = 0x01,
    Continuous = 0x02,
    EventCapture = 0x03,
    Reset = 0x04,
}

/// Steps of the warm-reset sequence: reset the sensor, wait out its
/// reboot, copy each factory calibration value over the current one, and
/// restore the default measurement interval.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ResetPhase {
    WriteReset,
    Settle,
    ReadFactoryZero,
    WriteZero(u8),
    ReadFactoryScale,
    WriteScale(u8),
    ReadFactoryDivisor,
    WriteDivisor(u8),
    WriteInterval,
}

pub struct Rangefinder<'a, const N: usize> {
    i2c: &'a I2cSoftMac<'a, N>,
    channel: usize,
    timer: Timer<'a>,
    reset_phase: Cell<Option<ResetPhase>>,
}

impl<'a, const N: usize> Rangefinder<'a, N> {
    pub fn new(
        i2c: &'a I2cSoftMac<'a, N>,
        channel: usize,
        clock: &'a dyn Clock,
    ) -> Rangefinder<'a, N> {
        Rangefinder {
            i2c,
            channel,
            timer: Timer::new(clock),
            reset_phase: Cell::new(None),
        }
    }

    /// Binds the rangefinder to its bus channel, in compatibility mode.
    pub fn init(&self) -> Result<(), ErrorCode> {
        self.i2c
            .channel(self.channel)
            .ok_or(ErrorCode::INVAL)?
            .register(RANGEFINDER_ADDRESS, true)
    }

    fn status(&self) -> TxnStatus {
        self.i2c
            .channel(self.channel)
            .map_or(TxnStatus::None, |ch| ch.txn_status())
    }

    /// Queues a read of one memory slot.
    pub fn start_read(&self, slot: Slot) -> Result<(), ErrorCode> {
        let (addr, len) = slot.cmd();
        self.i2c.mem_read(self.channel, addr, len)
    }

    /// Queues a write of one memory slot.
    pub fn start_write(&self, slot: Slot, value: &[u8]) -> Result<(), ErrorCode> {
        let (addr, len) = slot.cmd();
        if value.len() != len {
            return Err(ErrorCode::SIZE);
        }
        self.i2c.mem_write(self.channel, addr, value)
    }

    /// Completes the outstanding read, copying the slot contents into
    /// `buf`.
    pub fn poll_read(&self, buf: &mut [u8]) -> Poll<Result<usize, ErrorCode>> {
        match self.status() {
            TxnStatus::InProgress => Poll::Pending,
            TxnStatus::Success => {
                let n = self
                    .i2c
                    .channel(self.channel)
                    .map_or(0, |ch| ch.read_received(buf));
                Poll::Ready(Ok(n))
            }
            TxnStatus::Failed => Poll::Ready(Err(ErrorCode::IO)),
            TxnStatus::None => Poll::Ready(Err(ErrorCode::INVALOP)),
        }
    }

    /// Completes the outstanding write.
    pub fn poll_write(&self) -> Poll<Result<(), ErrorCode>> {
        match self.status() {
            TxnStatus::InProgress => Poll::Pending,
            TxnStatus::Success => Poll::Ready(Ok(())),
            TxnStatus::Failed => Poll::Ready(Err(ErrorCode::IO)),
            TxnStatus::None => Poll::Ready(Err(ErrorCode::INVALOP)),
        }
    }

    /// Queues the sensor-type read used for presence detection.
    pub fn start_detect(&self) -> Result<(), ErrorCode> {
        self.start_read(Slot::SensorType)
    }

    /// True when the attached device identifies as a first-party
    /// rangefinder.
    pub fn poll_detect(&self) -> Poll<Result<bool, ErrorCode>> {
        let mut buf = [0u8; 8];
        match self.poll_read(&mut buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(n)) => {
                Poll::Ready(Ok(n >= LEGO_SENSOR_TYPE.len() && buf.starts_with(LEGO_SENSOR_TYPE)))
            }
        }
    }

    /// Queues a distance read from continuous reading slot 0, in cm.
    pub fn start_distance(&self) -> Result<(), ErrorCode> {
        self.start_read(Slot::Reading(0))
    }

    pub fn poll_distance(&self) -> Poll<Result<u8, ErrorCode>> {
        let mut buf = [0u8; 1];
        match self.poll_read(&mut buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(_)) => Poll::Ready(Ok(buf[0])),
        }
    }

    /// Queues a burst read of all eight continuous readings.
    ///
    /// First-party sensors do not reliably serve multi-register reads;
    /// this exists for the clones that do.
    pub fn start_read_all(&self) -> Result<(), ErrorCode> {
        let (addr, _) = Slot::Reading(0).cmd();
        self.i2c.mem_read(self.channel, addr, NUM_READINGS)
    }

    pub fn poll_read_all(&self, readings: &mut [u8; NUM_READINGS]) -> Poll<Result<(), ErrorCode>> {
        match self.poll_read(readings) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(n)) if n == NUM_READINGS => Poll::Ready(Ok(())),
            Poll::Ready(Ok(_)) => Poll::Ready(Err(ErrorCode::SIZE)),
        }
    }

    /// Begins a warm reset back to factory calibration.
    pub fn start_reset(&self) -> Result<(), ErrorCode> {
        self.start_write(Slot::OpMode, &[OpMode::Reset as u8])?;
        self.reset_phase.set(Some(ResetPhase::WriteReset));
        Ok(())
    }

    /// Advances the reset sequence; call until it resolves.
    pub fn poll_reset(&self) -> Poll<Result<(), ErrorCode>> {
        let Some(phase) = self.reset_phase.get() else {
            return Poll::Ready(Err(ErrorCode::INVALOP));
        };

        // No bus traffic while the sensor reboots.
        if phase == ResetPhase::Settle {
            if !self.timer.expired() {
                return Poll::Pending;
            }
            self.start_read(Slot::FactoryZero)?;
            self.reset_phase.set(Some(ResetPhase::ReadFactoryZero));
            return Poll::Pending;
        }

        let step: Poll<Result<Option<u8>, ErrorCode>> = match phase {
            ResetPhase::WriteReset
            | ResetPhase::WriteZero(_)
            | ResetPhase::WriteScale(_)
            | ResetPhase::WriteDivisor(_)
            | ResetPhase::WriteInterval => match self.poll_write() {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                Poll::Ready(Ok(())) => Poll::Ready(Ok(None)),
            },
            _ => {
                let mut buf = [0u8; 1];
                match self.poll_read(&mut buf) {
                    Poll::Pending => Poll::Pending,
                    Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
                    Poll::Ready(Ok(_)) => Poll::Ready(Ok(Some(buf[0]))),
                }
            }
        };

        let value = match step {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(e)) => {
                self.reset_phase.set(None);
                return Poll::Ready(Err(e));
            }
            Poll::Ready(Ok(v)) => v,
        };

        let next = match (phase, value) {
            (ResetPhase::WriteReset, _) => {
                self.timer.set_ms(RESET_SETTLE_MS);
                Some(ResetPhase::Settle)
            }
            (ResetPhase::ReadFactoryZero, Some(v)) => {
                self.start_write(Slot::CurrentZero, &[v])?;
                Some(ResetPhase::WriteZero(v))
            }
            (ResetPhase::WriteZero(_), _) => {
                self.start_read(Slot::FactoryScaleFactor)?;
                Some(ResetPhase::ReadFactoryScale)
            }
            (ResetPhase::ReadFactoryScale, Some(v)) => {
                self.start_write(Slot::CurrentScaleFactor, &[v])?;
                Some(ResetPhase::WriteScale(v))
            }
            (ResetPhase::WriteScale(_), _) => {
                self.start_read(Slot::FactoryScaleDivisor)?;
                Some(ResetPhase::ReadFactoryDivisor)
            }
            (ResetPhase::ReadFactoryDivisor, Some(v)) => {
                self.start_write(Slot::CurrentScaleDivisor, &[v])?;
                Some(ResetPhase::WriteDivisor(v))
            }
            (ResetPhase::WriteDivisor(_), _) => {
                self.start_write(Slot::Interval, &[DEFAULT_INTERVAL])?;
                Some(ResetPhase::WriteInterval)
            }
            (ResetPhase::WriteInterval, _) => None,
            _ => None,
        };

        self.reset_phase.set(next);
        match next {
            Some(_) => Poll::Pending,
            None => Poll::Ready(Ok(())),
        }
    }

    /// Queues a measurement-interval change, for continuous mode.
    pub fn start_set_interval(&self, interval: u8) -> Result<(), ErrorCode> {
        self.start_write(Slot::Interval, &[interval])
    }

    /// Queues an operating-mode change.
    pub fn start_set_mode(&self, mode: OpMode) -> Result<(), ErrorCode> {
        self.start_write(Slot::OpMode, &[mode as u8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_table_matches_register_map() {
        assert_eq!(Slot::SensorType.cmd(), (0x10, 8));
        assert_eq!(Slot::Interval.cmd(), (0x40, 1));
        assert_eq!(Slot::OpMode.cmd(), (0x41, 1));
        assert_eq!(Slot::Reading(0).cmd(), (0x42, 1));
        assert_eq!(Slot::Reading(7).cmd(), (0x49, 1));
        assert_eq!(Slot::CurrentScaleDivisor.cmd(), (0x52, 1));
    }
}
