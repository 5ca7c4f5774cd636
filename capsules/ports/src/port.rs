// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! The per-port process.
//!
//! Owns the pin mux and UART assignment of one connector for its lifetime
//! and sequences detection, synchronization, data exchange and disconnect,
//! forever:
//!
//! ```text
//!   enter LegoDcm
//!     pins = GPIO+ADC, power = none
//!     run connection manager until a category settles
//!     if UART device:
//!       pins = UART, run sync handshake
//!       power per device requirements
//!       run send and recv interleaved until the link drops
//!       power = none
//!     (passive categories are serviced inside the manager)
//!   loop
//! ```
//!
//! The motor H-bridge is shared with the servo layer: this process owns it
//! exactly while the power policy is not `None`.

use core::cell::Cell;
use core::task::Poll;

use kernel::hil::motor::{Angle, MotorDriver, MAX_DUTY};
use kernel::hil::time::Clock;
use kernel::hil::uart::UartDevice;
use kernel::ErrorCode;

use crate::dcm::{Dcm, DeviceCategory, Rgba};
use crate::ioport::{P5P6Mode, PortCapabilities, PortId, PortMode, PortPlatformData, PowerPolicy};
use crate::lego::DeviceTypeId;
use crate::lump::LumpDevice;

/// Progress of the LEGO-mode main loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PupPhase {
    Scan,
    Sync,
    Data,
}

/// One external connector and its cooperative process.
pub struct Port<'a> {
    pdata: &'a PortPlatformData<'a>,
    mode: Cell<PortMode>,
    power: Cell<PowerPolicy>,
    phase: Cell<PupPhase>,
    dcm: Option<Dcm<'a>>,
    lump: Option<LumpDevice<'a>>,
}

impl<'a> Port<'a> {
    /// Builds a port from its platform data. Children exist iff the
    /// capabilities call for them; the initial mode follows what the port
    /// can do, with quadrature-only ports (built-in motor ports) going
    /// straight to quadrature.
    pub fn new(pdata: &'a PortPlatformData<'a>, clock: &'a dyn Clock) -> Port<'a> {
        let wants_dcm = pdata.capabilities.supports(PortCapabilities::LEGO_DCM)
            && pdata.pins.is_some()
            && pdata.uart.is_some();
        let port = Port {
            pdata,
            mode: Cell::new(PortMode::None),
            power: Cell::new(PowerPolicy::None),
            phase: Cell::new(PupPhase::Scan),
            dcm: wants_dcm.then(|| Dcm::new(clock)),
            lump: wants_dcm.then(|| LumpDevice::new(clock)),
        };

        if pdata.capabilities.is_quadrature_only() {
            let _ = port.set_mode(PortMode::QuadraturePassive);
        } else if wants_dcm {
            let _ = port.set_mode(PortMode::LegoDcm);
        } else if pdata.capabilities.supports(PortCapabilities::UART) && pdata.uart.is_some() {
            let _ = port.set_mode(PortMode::Uart);
        }
        port
    }

    pub fn id(&self) -> PortId {
        self.pdata.id
    }

    pub fn mode(&self) -> PortMode {
        self.mode.get()
    }

    pub fn power_policy(&self) -> PowerPolicy {
        self.power.get()
    }

    fn mode_supported(&self, mode: PortMode) -> bool {
        match mode {
            PortMode::None => true,
            PortMode::QuadraturePassive => self
                .pdata
                .capabilities
                .supports(PortCapabilities::QUADRATURE_PASSIVE),
            PortMode::LegoDcm => self.dcm.is_some(),
            PortMode::Uart => {
                self.pdata.capabilities.supports(PortCapabilities::UART)
                    && self.pdata.uart.is_some()
            }
        }
    }

    /// Switches the port's operating mode.
    ///
    /// Setting the mode it already has is a no-op. Entering `LegoDcm`
    /// restarts detection and returns `AGAIN` so callers can wait for the
    /// port to become ready instead of seeing spurious `NODEV` from the
    /// getters right after the switch.
    pub fn set_mode(&self, mode: PortMode) -> Result<(), ErrorCode> {
        if self.mode.get() == mode {
            return Ok(());
        }
        if !self.mode_supported(mode) {
            return Err(ErrorCode::NOSUPPORT);
        }

        // Cancel whatever the process was doing.
        self.phase.set(PupPhase::Scan);
        if let Some(dcm) = &self.dcm {
            dcm.restart();
        }
        if let Some(lump) = &self.lump {
            lump.invalidate();
        }
        self.mode.set(mode);

        match mode {
            PortMode::None => {
                if let Some(pins) = self.pdata.pins {
                    pins.set_p5p6_mode(P5P6Mode::GpioAdc);
                }
                let _ = self.set_power(PowerPolicy::None);
                Ok(())
            }
            PortMode::QuadraturePassive => Ok(()),
            PortMode::LegoDcm => {
                if let Some(pins) = self.pdata.pins {
                    pins.set_p5p6_mode(P5P6Mode::GpioAdc);
                }
                self.poll();
                Err(ErrorCode::AGAIN)
            }
            PortMode::Uart => {
                let _ = self.set_power(PowerPolicy::None);
                if let Some(pins) = self.pdata.pins {
                    pins.set_p5p6_mode(P5P6Mode::Uart);
                }
                Ok(())
            }
        }
    }

    /// One cooperative step. Never blocks; does nothing outside `LegoDcm`
    /// mode.
    pub fn poll(&self) {
        if self.mode.get() != PortMode::LegoDcm {
            return;
        }
        let (Some(dcm), Some(lump), Some(pins), Some(uart)) =
            (&self.dcm, &self.lump, self.pdata.pins, self.pdata.uart)
        else {
            return;
        };

        match self.phase.get() {
            PupPhase::Scan => {
                if dcm.poll(pins).is_ready() {
                    // A UART device: hand the pins to the UART and sync.
                    pins.set_p5p6_mode(P5P6Mode::Uart);
                    lump.start_sync(uart);
                    self.phase.set(PupPhase::Sync);
                }
            }

            PupPhase::Sync => match lump.poll_sync(uart) {
                Poll::Pending => {}
                Poll::Ready(Ok(())) => {
                    // Power the sensor the way it asked to be powered.
                    // Failure to acquire the bridge is not fatal; the
                    // device may still work unpowered.
                    if let Err(e) = self.set_power(lump.power_requirements()) {
                        log::warn!("port {:?}: no power for sensor ({:?})", self.id(), e);
                    }
                    lump.start_data();
                    self.phase.set(PupPhase::Data);
                }
                Poll::Ready(Err(e)) => {
                    log::debug!("port {:?}: sync failed ({:?})", self.id(), e);
                    self.back_to_scan(pins);
                }
            },

            PupPhase::Data => {
                let recv = lump.poll_recv(uart);
                let send = lump.poll_send(uart);
                let send_failed = matches!(send, Poll::Ready(Err(_)));
                if recv.is_ready() || send_failed {
                    let _ = self.set_power(PowerPolicy::None);
                    self.back_to_scan(pins);
                }
            }
        }
    }

    fn back_to_scan(&self, pins: &crate::ioport::IoPortPins) {
        pins.set_p5p6_mode(P5P6Mode::GpioAdc);
        if let Some(dcm) = &self.dcm {
            dcm.restart();
        }
        self.phase.set(PupPhase::Scan);
    }

    /// Angle reported by the attached device: the UART device when this
    /// port detects devices, the position counter otherwise.
    pub fn angle(&self) -> Result<Angle, ErrorCode> {
        if let Some(lump) = &self.lump {
            return lump.angle();
        }
        if let Some(counter) = self.pdata.counter {
            return counter.angle();
        }
        Err(ErrorCode::NODEV)
    }

    /// Absolute angle, for devices with an absolute encoder.
    pub fn abs_angle(&self) -> Result<Angle, ErrorCode> {
        if let Some(lump) = &self.lump {
            return lump.abs_angle();
        }
        if let Some(counter) = self.pdata.counter {
            let mdeg = counter.abs_angle()?;
            return Ok(Angle {
                rotations: 0,
                millidegrees: mdeg,
            });
        }
        Err(ErrorCode::NODEV)
    }

    /// The DC motor (or light) output of this port, after checking that
    /// whatever is attached matches `expected`.
    pub fn dcmotor(&self, expected: &mut u8) -> Result<&'a dyn MotorDriver, ErrorCode> {
        let motor = self.pdata.motor.ok_or(ErrorCode::NODEV)?;
        if self.mode.get() == PortMode::LegoDcm {
            if let Some(dcm) = &self.dcm {
                dcm.assert_category(expected)?;
            }
        }
        Ok(motor)
    }

    /// The motor output of this port for servo use, which additionally
    /// requires some source of angle feedback of the expected type.
    pub fn servo(&self, expected: &mut u8) -> Result<&'a dyn MotorDriver, ErrorCode> {
        let motor = self.pdata.motor.ok_or(ErrorCode::NODEV)?;

        if self.mode.get() == PortMode::LegoDcm {
            if let Some(lump) = &self.lump {
                lump.assert_type_id(expected)?;
                return Ok(motor);
            }
        }

        if let Some(counter) = self.pdata.counter {
            let actual = counter.type_id().ok_or(ErrorCode::NODEV)?;
            let matches = *expected == actual
                || *expected == DeviceTypeId::AnyEncodedMotor as u8
                || *expected == DeviceTypeId::AnyDcMotor as u8;
            if !matches {
                return Err(ErrorCode::NODEV);
            }
            *expected = actual;
            return Ok(motor);
        }

        Err(ErrorCode::NODEV)
    }

    /// The UART device attached to a smart sensor, after checking its
    /// type.
    pub fn lump_device(&self, expected: &mut u8) -> Result<&LumpDevice<'a>, ErrorCode> {
        if self.mode.get() != PortMode::LegoDcm {
            return Err(ErrorCode::INVALOP);
        }
        let lump = self.lump.as_ref().ok_or(ErrorCode::NOSUPPORT)?;
        lump.assert_type_id(expected)?;
        Ok(lump)
    }

    /// Passive analog reading of the attached device, in mV.
    pub fn analog_value(&self, type_id: u8, active: bool) -> Result<u32, ErrorCode> {
        if self.mode.get() != PortMode::LegoDcm {
            return Err(ErrorCode::INVALOP);
        }
        let (Some(dcm), Some(pins)) = (&self.dcm, self.pdata.pins) else {
            return Err(ErrorCode::INVALOP);
        };
        let mut expected = type_id;
        dcm.assert_category(&mut expected)?;
        Ok(dcm.analog_value(pins, active))
    }

    /// Calibrated color channels of the attached passive color device.
    pub fn analog_rgba(&self, type_id: u8) -> Result<Rgba, ErrorCode> {
        if self.mode.get() != PortMode::LegoDcm {
            return Err(ErrorCode::INVALOP);
        }
        let dcm = self.dcm.as_ref().ok_or(ErrorCode::INVALOP)?;
        let rgba = dcm.analog_rgba().ok_or(ErrorCode::INVALOP)?;
        let mut expected = type_id;
        dcm.assert_category(&mut expected)?;
        Ok(rgba)
    }

    /// The raw UART handle, in UART mode only.
    pub fn uart(&self) -> Result<&'a dyn UartDevice, ErrorCode> {
        if self.mode.get() != PortMode::Uart {
            return Err(ErrorCode::INVALOP);
        }
        self.pdata.uart.ok_or(ErrorCode::NOSUPPORT)
    }

    /// Drives battery power across pins 1 and 2 through the H-bridge, or
    /// releases it.
    pub fn set_power(&self, policy: PowerPolicy) -> Result<(), ErrorCode> {
        let motor = self.pdata.motor.ok_or(ErrorCode::NODEV)?;
        match policy {
            PowerPolicy::BatteryToP1Pos => motor.set_duty(-MAX_DUTY)?,
            PowerPolicy::BatteryToP2Pos => motor.set_duty(MAX_DUTY)?,
            PowerPolicy::None => motor.coast()?,
        }
        self.power.set(policy);
        Ok(())
    }

    /// The latched device category, for diagnostics.
    pub fn device_category(&self) -> DeviceCategory {
        self.dcm
            .as_ref()
            .map_or(DeviceCategory::None, |dcm| dcm.category())
    }

    /// Permanent power need of the attached device, if any. Used to skip
    /// powered sensors when stopping user actions.
    pub fn sensor_power_requirements(&self) -> PowerPolicy {
        self.lump
            .as_ref()
            .map_or(PowerPolicy::None, |lump| lump.power_requirements())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim::{SimClock, SimCounter, SimMotor};

    fn quadrature_pdata<'a>(
        motor: &'a SimMotor,
        counter: &'a SimCounter,
    ) -> PortPlatformData<'a> {
        PortPlatformData {
            id: PortId::B,
            external_index: 1,
            capabilities: PortCapabilities::QUADRATURE_PASSIVE.union(PortCapabilities::MOTOR),
            pins: None,
            uart: None,
            motor: Some(motor),
            counter: Some(counter),
        }
    }

    #[test]
    fn quadrature_port_reads_the_counter() {
        let clock = SimClock::new();
        let motor = SimMotor::new();
        let counter = SimCounter::new(Some(DeviceTypeId::InteractiveMotor as u8));
        let pdata = quadrature_pdata(&motor, &counter);
        let port = Port::new(&pdata, &clock);
        assert_eq!(port.mode(), PortMode::QuadraturePassive);

        counter.set_angle(Angle {
            rotations: 3,
            millidegrees: 45_000,
        });
        let angle = port.angle().unwrap();
        assert_eq!(angle.rotations, 3);
        assert_eq!(angle.millidegrees, 45_000);

        counter.set_abs_mdeg(Some(-90_000));
        assert_eq!(port.abs_angle().unwrap().millidegrees, -90_000);
        counter.set_abs_mdeg(None);
        assert_eq!(port.abs_angle(), Err(ErrorCode::NOSUPPORT));
    }

    #[test]
    fn servo_getter_resolves_wildcards_via_counter() {
        let clock = SimClock::new();
        let motor = SimMotor::new();
        let counter = SimCounter::new(Some(DeviceTypeId::InteractiveMotor as u8));
        let pdata = quadrature_pdata(&motor, &counter);
        let port = Port::new(&pdata, &clock);

        let mut expected = DeviceTypeId::AnyEncodedMotor as u8;
        port.servo(&mut expected).unwrap();
        assert_eq!(expected, DeviceTypeId::InteractiveMotor as u8);

        let mut wrong = DeviceTypeId::TechnicLMotor as u8;
        assert!(matches!(port.servo(&mut wrong), Err(ErrorCode::NODEV)));
    }

    #[test]
    fn power_maps_to_bridge_commands() {
        let clock = SimClock::new();
        let motor = SimMotor::new();
        let counter = SimCounter::new(None);
        let pdata = quadrature_pdata(&motor, &counter);
        let port = Port::new(&pdata, &clock);

        port.set_power(PowerPolicy::BatteryToP1Pos).unwrap();
        assert_eq!(motor.duty(), Some(-MAX_DUTY));
        port.set_power(PowerPolicy::BatteryToP2Pos).unwrap();
        assert_eq!(motor.duty(), Some(MAX_DUTY));
        port.set_power(PowerPolicy::None).unwrap();
        assert!(motor.is_coasting());
    }

    #[test]
    fn unsupported_modes_are_refused() {
        let clock = SimClock::new();
        let motor = SimMotor::new();
        let counter = SimCounter::new(None);
        let pdata = quadrature_pdata(&motor, &counter);
        let port = Port::new(&pdata, &clock);

        assert_eq!(port.set_mode(PortMode::Uart), Err(ErrorCode::NOSUPPORT));
        assert_eq!(port.set_mode(PortMode::LegoDcm), Err(ErrorCode::NOSUPPORT));
        assert!(matches!(port.uart(), Err(ErrorCode::INVALOP)));
        assert_eq!(port.analog_value(0, false), Err(ErrorCode::INVALOP));
    }
}
