// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Board file for a simulated two-port hub.
//!
//! Wires the port stack to the host-simulation chip and plays out a
//! short scripted session: a motor attaches to port A over the UART
//! protocol and reports angles, while an NXT light sensor on port B is
//! read through the passive protocol. Run with `RUST_LOG=debug` to watch
//! the state machines.

use capsules_ports::ioport::{
    IoPortPins, PortCapabilities, PortId, PortPlatformData,
};
use capsules_ports::lego::DeviceTypeId;
use capsules_ports::lump::codec::DataType;
use capsules_ports::port::Port;
use capsules_ports::registry::PortRegistry;
use kernel::static_init;
use sim::{LumpSensorSim, SimAdc, SimClock, SimGpio, SimMode, SimMotor, SimUart};

/// One simulated connector's worth of chip resources.
struct PortHardware {
    adc1: SimAdc,
    adc6: SimAdc,
    p2: SimGpio,
    p5: SimGpio,
    p6: SimGpio,
    uart: SimUart,
    motor: SimMotor,
}

impl PortHardware {
    fn new() -> PortHardware {
        PortHardware {
            adc1: SimAdc::new(),
            adc6: SimAdc::new(),
            p2: SimGpio::new(),
            p5: SimGpio::new(),
            p6: SimGpio::new(),
            uart: SimUart::new(),
            motor: SimMotor::new(),
        }
    }
}

const MOTOR_FLAGS: [u8; 6] = [0x26, 0x00, 0x00, 0x00, 0x01, 0x04];

const MOTOR_MODES: &[SimMode] = &[
    SimMode {
        name: "POWER",
        units: "pct",
        data_type: DataType::I8,
        num_values: 1,
        flags: Some(MOTOR_FLAGS),
        writable: true,
    },
    SimMode {
        name: "SPEED",
        units: "pct",
        data_type: DataType::I8,
        num_values: 1,
        flags: Some(MOTOR_FLAGS),
        writable: false,
    },
    SimMode {
        name: "POS",
        units: "deg",
        data_type: DataType::I32,
        num_values: 1,
        flags: Some(MOTOR_FLAGS),
        writable: true,
    },
];

fn main() {
    env_logger::init();

    let clock: &'static SimClock = static_init!(SimClock, SimClock::new());
    let hw_a: &'static PortHardware = static_init!(PortHardware, PortHardware::new());
    let hw_b: &'static PortHardware = static_init!(PortHardware, PortHardware::new());

    let pins_a: &'static IoPortPins<'static> = static_init!(
        IoPortPins<'static>,
        IoPortPins {
            adc_p1: &hw_a.adc1,
            adc_p6: &hw_a.adc6,
            p2: &hw_a.p2,
            p5: &hw_a.p5,
            p6: &hw_a.p6,
        }
    );
    let pins_b: &'static IoPortPins<'static> = static_init!(
        IoPortPins<'static>,
        IoPortPins {
            adc_p1: &hw_b.adc1,
            adc_p6: &hw_b.adc6,
            p2: &hw_b.p2,
            p5: &hw_b.p5,
            p6: &hw_b.p6,
        }
    );

    let pdata_a: &'static PortPlatformData<'static> = static_init!(
        PortPlatformData<'static>,
        PortPlatformData {
            id: PortId::A,
            external_index: 0,
            capabilities: PortCapabilities::LEGO_DCM
                .union(PortCapabilities::UART)
                .union(PortCapabilities::MOTOR),
            pins: Some(pins_a),
            uart: Some(&hw_a.uart),
            motor: Some(&hw_a.motor),
            counter: None,
        }
    );
    let pdata_b: &'static PortPlatformData<'static> = static_init!(
        PortPlatformData<'static>,
        PortPlatformData {
            id: PortId::B,
            external_index: 1,
            capabilities: PortCapabilities::LEGO_DCM.union(PortCapabilities::UART),
            pins: Some(pins_b),
            uart: Some(&hw_b.uart),
            motor: None,
            counter: None,
        }
    );

    let ports: &'static [Port<'static>; 2] = static_init!(
        [Port<'static>; 2],
        [Port::new(pdata_a, clock), Port::new(pdata_b, clock)]
    );
    let registry: &'static PortRegistry<'static> = static_init!(PortRegistry<'static>, PortRegistry::new(ports));

    // Plug a motor into port A: ground pin 1, leave pins 2/5 idle high.
    hw_a.adc1.set_mv(50);
    let motor_dev = LumpSensorSim::new(&hw_a.uart, 46, 115_200, MOTOR_MODES);
    motor_dev.set_mode_data(0, &[0]);

    // Plug an NXT light sensor into port B: every GPIO reads low.
    hw_b.p2.set_external_pull(false);
    hw_b.p5.set_external_pull(false);
    hw_b.p6.set_external_pull(false);
    hw_b.adc1.set_mv(3800);

    let port_a = registry.get(PortId::A).unwrap();
    let port_b = registry.get(PortId::B).unwrap();

    let mut announced = false;
    let mut selected = false;
    let mut position_deg = 0i32;

    // Main loop: one millisecond per iteration, three simulated seconds.
    for ms in 0..3000u64 {
        clock.advance_ms(1);
        registry.poll();

        // The motor can only announce itself once the port hands the
        // pins to the UART.
        if !announced && ms > 250 {
            motor_dev.announce();
            announced = true;
        }
        motor_dev.step();

        // The light sensor's reading depends on whether the floodlight
        // (pin 5) is on.
        if hw_b.p5.level() {
            hw_b.adc1.set_mv(1300);
        } else {
            hw_b.adc1.set_mv(3800);
        }

        // Once the motor is up, stream a slowly advancing position.
        let mut expected = DeviceTypeId::AnyEncodedMotor as u8;
        if let Ok(dev) = port_a.lump_device(&mut expected) {
            if !selected {
                dev.set_mode(2).unwrap();
                selected = true;
                log::info!("port A: motor type {} online", expected);
            }
            position_deg += 90;
            motor_dev.set_mode_data(2, &(position_deg * 1000).to_le_bytes());
        }

        if ms % 500 == 0 && ms > 0 {
            match port_a.angle() {
                Ok(angle) => println!(
                    "t={}ms port A angle: {} rotations {} mdeg",
                    ms, angle.rotations, angle.millidegrees
                ),
                Err(e) => println!("t={}ms port A: {:?}", ms, e),
            }
            match port_b.analog_rgba(DeviceTypeId::NxtLightSensor as u8) {
                Ok(rgba) => println!(
                    "t={}ms port B reflectivity: {} ambient: {}",
                    ms, rgba.r, rgba.a
                ),
                Err(e) => println!("t={}ms port B: {:?}", ms, e),
            }
        }
    }

    registry.power_off();
    println!("hub powered off");
}
