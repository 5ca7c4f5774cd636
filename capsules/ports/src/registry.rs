// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Registry of all ports on a hub.
//!
//! Boards construct every [`Port`] once at wiring time and hand the slice
//! here. Everything else looks ports up by id and never holds raw
//! references across layers, so the motor/servo/port relationships stay
//! acyclic.

use kernel::hil::gpio::Pin;
use kernel::utilities::cells::OptionalCell;
use kernel::ErrorCode;

use crate::ioport::{PortId, PortMode, PowerPolicy};
use crate::port::Port;

pub struct PortRegistry<'a> {
    ports: &'a [Port<'a>],
    /// VCC enable for sensor logic power, when the hub has one.
    vcc: OptionalCell<&'a dyn Pin>,
}

impl<'a> PortRegistry<'a> {
    pub fn new(ports: &'a [Port<'a>]) -> PortRegistry<'a> {
        PortRegistry {
            ports,
            vcc: OptionalCell::empty(),
        }
    }

    pub fn set_vcc_pin(&self, vcc: &'a dyn Pin) {
        self.vcc.set(vcc);
    }

    pub fn get(&self, id: PortId) -> Result<&Port<'a>, ErrorCode> {
        self.ports
            .iter()
            .find(|p| p.id() == id)
            .ok_or(ErrorCode::NODEV)
    }

    pub fn ports(&self) -> &'a [Port<'a>] {
        self.ports
    }

    /// Steps every port process once. Call from the main loop.
    pub fn poll(&self) {
        for port in self.ports {
            port.poll();
        }
    }

    /// Stops all user-level background activity on the ports.
    ///
    /// Sensors that need permanent power keep it, so a powered sensor
    /// does not lose its state every time a user program ends. With
    /// `reset`, ports are also returned to an inactive state rather than
    /// just having their outputs stopped.
    pub fn stop_user_actions(&self, reset: bool) {
        for port in self.ports {
            if port.sensor_power_requirements() != PowerPolicy::None {
                continue;
            }
            let _ = port.set_power(PowerPolicy::None);
            if reset {
                let _ = port.set_mode(PortMode::None);
            }
        }
    }

    /// Prepares for power off: stops everything, drops each port to the
    /// inactive mode (including powered sensors), and cuts VCC.
    pub fn power_off(&self) {
        self.stop_user_actions(true);
        for port in self.ports {
            let _ = port.set_mode(PortMode::None);
        }
        self.vcc.map(|vcc| vcc.out_low());
    }
}
