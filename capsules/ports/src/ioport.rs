// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Static description of one external connector.
//!
//! A port is a 6-pin connector: pin 1 (power +/signal, ADC), pin 2
//! (power −/signal, GPIO), pin 3 (GND), pin 4 (VCC), pin 5 (GPIO/UART RX),
//! pin 6 (GPIO/ADC/UART TX). The board constructs one immutable
//! [`PortPlatformData`] per connector at wiring time; everything the port
//! process touches hangs off that record.

use kernel::hil::adc::AdcChannel;
use kernel::hil::gpio::{Pin, PinFunction};
use kernel::hil::motor::{Counter, MotorDriver};
use kernel::hil::uart::UartDevice;

/// Identifier of a physical external connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortId {
    A,
    B,
    C,
    D,
    S1,
    S2,
    S3,
    S4,
}

/// The operating mode of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortMode {
    /// Inactive; pins parked as GPIO inputs.
    None,
    /// Plain quadrature input, no device detection (built-in motor ports).
    QuadraturePassive,
    /// Full device detection and smart-device operation.
    LegoDcm,
    /// Raw UART handed to user code.
    Uart,
}

/// How the H-bridge on pins 1/2 is driven to power an attached sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PowerPolicy {
    None,
    /// Battery voltage with pin 1 positive.
    BatteryToP1Pos,
    /// Battery voltage with pin 2 positive.
    BatteryToP2Pos,
}

/// Bit set of the modes a port supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortCapabilities(pub u8);

impl PortCapabilities {
    pub const QUADRATURE_PASSIVE: PortCapabilities = PortCapabilities(1 << 0);
    pub const LEGO_DCM: PortCapabilities = PortCapabilities(1 << 1);
    pub const UART: PortCapabilities = PortCapabilities(1 << 2);
    pub const MOTOR: PortCapabilities = PortCapabilities(1 << 3);

    pub const fn union(self, other: PortCapabilities) -> PortCapabilities {
        PortCapabilities(self.0 | other.0)
    }

    pub fn supports(&self, other: PortCapabilities) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when quadrature input is the only thing this port can do.
    pub fn is_quadrature_only(&self) -> bool {
        self.0 == Self::QUADRATURE_PASSIVE.0
    }
}

/// Multiplexer setting for pins 5 and 6.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum P5P6Mode {
    /// Pin 5/6 under GPIO control, pin 6 also sampled by the ADC.
    GpioAdc,
    /// Pins routed to the UART peripheral.
    Uart,
}

/// The data-carrying pins of one connector.
pub struct IoPortPins<'a> {
    pub adc_p1: &'a dyn AdcChannel,
    pub adc_p6: &'a dyn AdcChannel,
    pub p2: &'a dyn Pin,
    pub p5: &'a dyn Pin,
    pub p6: &'a dyn Pin,
}

impl IoPortPins<'_> {
    /// Switches pins 5/6 between GPIO/ADC sensing and the UART function.
    pub fn set_p5p6_mode(&self, mode: P5P6Mode) {
        match mode {
            P5P6Mode::GpioAdc => {
                self.p5.set_function(PinFunction::Input);
                self.p6.set_function(PinFunction::Input);
            }
            P5P6Mode::Uart => {
                self.p5.set_function(PinFunction::Alternate);
                self.p6.set_function(PinFunction::Alternate);
            }
        }
    }
}

/// Immutable per-port wiring, built by the board.
pub struct PortPlatformData<'a> {
    pub id: PortId,
    /// Index of this port among the externally visible connectors; used to
    /// index shared per-port driver state.
    pub external_index: u8,
    pub capabilities: PortCapabilities,
    /// Data pins; absent on internal motor-only ports.
    pub pins: Option<&'a IoPortPins<'a>>,
    pub uart: Option<&'a dyn UartDevice>,
    pub motor: Option<&'a dyn MotorDriver>,
    pub counter: Option<&'a dyn Counter>,
}
