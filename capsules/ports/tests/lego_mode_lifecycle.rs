// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! End-to-end lifecycle of a port in LEGO mode against scripted UART
//! devices: classification, synchronization, data exchange, power
//! handling, mode switching, and link loss.

use capsules_ports::ioport::{
    IoPortPins, PortCapabilities, PortId, PortMode, PortPlatformData,
};
use capsules_ports::lego::DeviceTypeId;
use capsules_ports::lump::codec::DataType;
use capsules_ports::port::Port;
use capsules_ports::registry::PortRegistry;
use kernel::hil::gpio::PinFunction;
use sim::{LumpSensorSim, SimAdc, SimClock, SimGpio, SimMotor, SimUart, SimMode};

/// All the simulated hardware for one port.
struct Bench {
    clock: SimClock,
    adc1: SimAdc,
    adc6: SimAdc,
    p2: SimGpio,
    p5: SimGpio,
    p6: SimGpio,
    uart: SimUart,
    motor: SimMotor,
}

impl Bench {
    fn new() -> Bench {
        Bench {
            clock: SimClock::new(),
            adc1: SimAdc::new(),
            adc6: SimAdc::new(),
            p2: SimGpio::new(),
            p5: SimGpio::new(),
            p6: SimGpio::new(),
            uart: SimUart::new(),
            motor: SimMotor::new(),
        }
    }

    fn pins(&self) -> IoPortPins<'_> {
        IoPortPins {
            adc_p1: &self.adc1,
            adc_p6: &self.adc6,
            p2: &self.p2,
            p5: &self.p5,
            p6: &self.p6,
        }
    }

    /// Presents the pin pattern of an attached UART device: pin 1 pulled
    /// to ground, pins 2 and 5 idle high.
    fn attach_uart_device(&self) {
        self.adc1.set_mv(50);
        self.p2.set_external_pull(true);
        self.p5.set_external_pull(true);
    }
}

fn pdata<'a>(bench_pins: &'a IoPortPins<'a>, bench: &'a Bench) -> PortPlatformData<'a> {
    PortPlatformData {
        id: PortId::A,
        external_index: 0,
        capabilities: PortCapabilities::LEGO_DCM
            .union(PortCapabilities::UART)
            .union(PortCapabilities::MOTOR),
        pins: Some(bench_pins),
        uart: Some(&bench.uart),
        motor: Some(&bench.motor),
        counter: None,
    }
}

/// Runs detection until the port hands the pins to the UART.
fn run_detection(bench: &Bench, port: &Port) {
    for _ in 0..30 {
        bench.clock.advance_ms(10);
        port.poll();
    }
    assert_eq!(bench.p5.function(), PinFunction::Alternate);
    assert_eq!(bench.p6.function(), PinFunction::Alternate);
}

/// Runs the handshake and the first data exchanges.
fn run_until_synced(bench: &Bench, port: &Port, peer: &LumpSensorSim) {
    peer.announce();
    for _ in 0..300 {
        bench.clock.advance_ms(1);
        port.poll();
        peer.step();
        let mut expected = DeviceTypeId::AnyLumpUart as u8;
        if port.lump_device(&mut expected).is_ok() {
            return;
        }
    }
    panic!("device never synchronized");
}

const SENSOR_MODES: &[SimMode] = &[
    SimMode {
        name: "PROX",
        units: "pct",
        data_type: DataType::I8,
        num_values: 1,
        flags: None,
        writable: false,
    },
    SimMode {
        name: "COUNT",
        units: "cnt",
        data_type: DataType::I32,
        num_values: 1,
        flags: None,
        writable: false,
    },
    SimMode {
        name: "RGB I",
        units: "raw",
        data_type: DataType::I16,
        num_values: 3,
        flags: None,
        writable: false,
    },
];

// Speed/position feedback flags plus H-bridge use, but no battery-power
// requirement: motors are powered by the servo layer, not the port.
const MOTOR_FLAGS: [u8; 6] = [0x26, 0x00, 0x00, 0x00, 0x01, 0x04];

// A sensor that asks for battery power across pins 1/2, pin 2 positive.
const POWERED_FLAGS: [u8; 6] = [0x40, 0x00, 0x00, 0x00, 0x00, 0x00];

const POWERED_MODES: &[SimMode] = &[SimMode {
    name: "LIGHT",
    units: "pct",
    data_type: DataType::I8,
    num_values: 4,
    flags: Some(POWERED_FLAGS),
    writable: true,
}];

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
    SimMode {
        name: "APOS",
        units: "deg",
        data_type: DataType::I32,
        num_values: 1,
        flags: Some(MOTOR_FLAGS),
        writable: false,
    },
];

#[test]
fn classifies_and_syncs_color_distance_sensor() {
    let bench = Bench::new();
    bench.attach_uart_device();
    let pins = bench.pins();
    let pdata = pdata(&pins, &bench);
    let port = Port::new(&pdata, &bench.clock);
    assert_eq!(port.mode(), PortMode::LegoDcm);

    let peer = LumpSensorSim::new(&bench.uart, 37, 115_200, SENSOR_MODES);
    peer.set_mode_data(0, &[0x17]);

    run_detection(&bench, &port);
    run_until_synced(&bench, &port, &peer);

    // One acknowledgement, then both sides at the negotiated rate.
    assert_eq!(peer.acks_seen.get(), 1);
    assert_eq!(bench.uart.baud(), 115_200);

    let mut expected = DeviceTypeId::AnyLumpUart as u8;
    let dev = port.lump_device(&mut expected).unwrap();
    assert_eq!(expected, 37);
    assert_eq!(dev.num_modes(), 3);
    dev.with_mode_info(0, |info| {
        assert_eq!(info.name.as_str(), "PROX");
        assert_eq!(info.units.as_str(), "pct");
        assert_eq!(info.num_values, 1);
    })
    .unwrap();

    // A wrong expectation is refused without disturbing the device.
    let mut wrong = 29u8;
    assert!(port.lump_device(&mut wrong).is_err());
}

#[test]
fn keep_alive_cadence_holds() {
    let bench = Bench::new();
    bench.attach_uart_device();
    let pins = bench.pins();
    let pdata = pdata(&pins, &bench);
    let port = Port::new(&pdata, &bench.clock);
    let peer = LumpSensorSim::new(&bench.uart, 37, 115_200, SENSOR_MODES);
    peer.set_mode_data(0, &[0x17]);
    run_detection(&bench, &port);
    run_until_synced(&bench, &port, &peer);

    peer.nacks_seen.set(0);
    for _ in 0..1000 {
        bench.clock.advance_ms(1);
        port.poll();
        peer.step();
    }
    // At least one keep-alive per period over a full second, and data
    // keeps flowing back in response.
    assert!(peer.nacks_seen.get() >= 9, "got {}", peer.nacks_seen.get());

    let mut expected = DeviceTypeId::AnyLumpUart as u8;
    let dev = port.lump_device(&mut expected).unwrap();
    assert!(dev.is_ready());
    dev.with_data(0, |data| assert_eq!(data[0], 0x17)).unwrap();
}

#[test]
fn mode_switch_emits_ext_mode_then_select() {
    let bench = Bench::new();
    bench.attach_uart_device();
    let pins = bench.pins();
    let pdata = pdata(&pins, &bench);
    let port = Port::new(&pdata, &bench.clock);
    let peer = LumpSensorSim::new(&bench.uart, 46, 115_200, MOTOR_MODES);
    peer.set_mode_data(0, &[0x00]);
    run_detection(&bench, &port);
    run_until_synced(&bench, &port, &peer);

    // Quiesce, then capture the exact bytes of a mode switch.
    let _ = bench.uart.peer_take_tx();
    let mut expected = DeviceTypeId::AnyEncodedMotor as u8;
    port.lump_device(&mut expected).unwrap().set_mode(2).unwrap();
    port.poll();

    let tx = bench.uart.peer_take_tx();
    assert!(
        tx.windows(6)
            .any(|w| w == [0x46, 0x00, 0xB9, 0x43, 0x02, 0xBE]),
        "mode switch bytes missing from {:02X?}",
        tx
    );
}

#[test]
fn motor_reports_angle_and_recovers_from_link_loss() {
    let bench = Bench::new();
    bench.attach_uart_device();
    let pins = bench.pins();
    let pdata = pdata(&pins, &bench);
    let port = Port::new(&pdata, &bench.clock);
    let peer = LumpSensorSim::new(&bench.uart, 46, 115_200, MOTOR_MODES);
    peer.set_mode_data(0, &[0x00]);
    run_detection(&bench, &port);
    run_until_synced(&bench, &port, &peer);

    // Motors do not draw sensor power from the port process.
    assert!(bench.motor.is_coasting());

    // Select the position mode and stream a reading: two whole turns.
    let mut expected = DeviceTypeId::AnyEncodedMotor as u8;
    peer.set_mode_data(2, &720_000i32.to_le_bytes());
    port.lump_device(&mut expected).unwrap().set_mode(2).unwrap();
    for _ in 0..5 {
        bench.clock.advance_ms(1);
        port.poll();
        peer.step();
    }

    let angle = port.angle().unwrap();
    assert_eq!(angle.rotations, 2);
    assert_eq!(angle.millidegrees, 0);

    // Unplug: the peer goes silent, the link watchdog fires, and
    // detection restarts on the GPIO mux.
    for _ in 0..300 {
        bench.clock.advance_ms(1);
        port.poll();
    }
    assert!(bench.motor.is_coasting());
    assert_eq!(bench.p5.function(), PinFunction::Input);
    assert!(port.angle().is_err());
}

#[test]
fn powered_sensor_gets_bridge_power_until_gone() {
    let bench = Bench::new();
    bench.attach_uart_device();
    let pins = bench.pins();
    let pdata = pdata(&pins, &bench);
    let port = Port::new(&pdata, &bench.clock);
    let peer = LumpSensorSim::new(&bench.uart, 61, 115_200, POWERED_MODES);
    peer.set_mode_data(0, &[1, 2, 3, 4]);
    run_detection(&bench, &port);
    run_until_synced(&bench, &port, &peer);

    // Battery to pin 2 positive is full forward duty.
    assert_eq!(bench.motor.duty(), Some(kernel::hil::motor::MAX_DUTY));

    // Link loss releases the bridge.
    for _ in 0..300 {
        bench.clock.advance_ms(1);
        port.poll();
    }
    assert!(bench.motor.is_coasting());
}

#[test]
fn set_mode_is_idempotent() {
    let bench = Bench::new();
    bench.attach_uart_device();
    let pins = bench.pins();
    let pdata = pdata(&pins, &bench);
    let port = Port::new(&pdata, &bench.clock);

    assert_eq!(port.set_mode(PortMode::Uart), Ok(()));
    assert_eq!(port.set_mode(PortMode::LegoDcm), Err(kernel::ErrorCode::AGAIN));
    // Re-setting the active mode is a no-op.
    assert_eq!(port.set_mode(PortMode::LegoDcm), Ok(()));
    assert_eq!(port.mode(), PortMode::LegoDcm);

    // Detection still settles normally afterwards.
    let peer = LumpSensorSim::new(&bench.uart, 37, 115_200, SENSOR_MODES);
    run_detection(&bench, &port);
    run_until_synced(&bench, &port, &peer);
}

#[test]
fn leaving_lego_mode_releases_device_and_power() {
    let bench = Bench::new();
    bench.attach_uart_device();
    let pins = bench.pins();
    let pdata = pdata(&pins, &bench);
    let port = Port::new(&pdata, &bench.clock);
    let peer = LumpSensorSim::new(&bench.uart, 61, 115_200, POWERED_MODES);
    run_detection(&bench, &port);
    run_until_synced(&bench, &port, &peer);
    assert!(bench.motor.duty().is_some());

    assert_eq!(port.set_mode(PortMode::None), Ok(()));
    assert!(bench.motor.is_coasting());
    let mut expected = DeviceTypeId::AnyLumpUart as u8;
    assert!(port.lump_device(&mut expected).is_err());
    assert!(port.angle().is_err());
}

#[test]
fn registry_stop_skips_powered_sensors() {
    let bench = Bench::new();
    bench.attach_uart_device();
    let pins = bench.pins();
    let pdata = pdata(&pins, &bench);
    let ports = [Port::new(&pdata, &bench.clock)];
    let registry = PortRegistry::new(&ports);

    let peer = LumpSensorSim::new(&bench.uart, 61, 115_200, POWERED_MODES);
    let port = registry.get(PortId::A).unwrap();
    run_detection(&bench, port);
    run_until_synced(&bench, port, &peer);
    assert!(bench.motor.duty().is_some());

    // The attached device needs permanent power, so a user-program stop
    // leaves it alone.
    registry.stop_user_actions(true);
    assert!(bench.motor.duty().is_some());
    assert_eq!(port.mode(), PortMode::LegoDcm);

    // Power off overrides that and drops everything.
    registry.power_off();
    assert!(bench.motor.is_coasting());
    assert_eq!(port.mode(), PortMode::None);
}
