// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Device detection hysteresis and the two NXT passive-sensor protocols,
//! driven entirely through simulated pins.

use capsules_ports::dcm::{
    adc_to_mv, DeviceCategory, Dcm, COLOR_CALIBRATION_SIZE, DCM_DISCONNECT_TICKS,
};
use capsules_ports::ioport::IoPortPins;
use capsules_ports::lego::DeviceTypeId;
use sim::{NxtColorSensorSim, SimAdc, SimClock, SimGpio};

struct Bench {
    clock: SimClock,
    adc1: SimAdc,
    adc6: SimAdc,
    p2: SimGpio,
    p5: SimGpio,
    p6: SimGpio,
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

    /// One detection sample period.
    fn sample(&self, dcm: &Dcm, pins: &IoPortPins) {
        self.clock.advance_ms(10);
        let _ = dcm.poll(pins);
    }
}

#[test]
fn nineteen_samples_do_not_latch() {
    let bench = Bench::new();
    let pins = bench.pins();
    let dcm = Dcm::new(&bench.clock);

    // UART-device pattern: pin 1 grounded, pins 2/5 idle high.
    bench.adc1.set_mv(50);
    let _ = dcm.poll(&pins); // init step

    for _ in 0..19 {
        bench.sample(&dcm, &pins);
        assert!(!dcm.connected());
    }
    // Revert to the empty-port pattern before the 20th sample.
    bench.adc1.set_mv(4950);
    bench.sample(&dcm, &pins);
    assert!(!dcm.connected());
    assert_eq!(dcm.category(), DeviceCategory::None);

    // Holding the pattern for the full window does latch.
    bench.adc1.set_mv(50);
    for _ in 0..20 {
        bench.sample(&dcm, &pins);
    }
    assert!(dcm.connected());
    assert_eq!(dcm.category(), DeviceCategory::Lump);
}

#[test]
fn ev3_analog_disconnects_after_five_released_samples() {
    let bench = Bench::new();
    let pins = bench.pins();
    let dcm = Dcm::new(&bench.clock);

    // EV3 analog: pin 1 in the middle band, pin 2 high, pin 5 low.
    bench.adc1.set_mv(1500);
    bench.p5.set_external_pull(false);
    let _ = dcm.poll(&pins);
    for _ in 0..25 {
        bench.sample(&dcm, &pins);
    }
    assert!(dcm.connected());
    assert_eq!(dcm.category(), DeviceCategory::Ev3Analog);

    let mut expected = DeviceTypeId::Ev3TouchSensor as u8;
    dcm.assert_category(&mut expected).unwrap();
    // The touch value reads on pin 6.
    bench.adc6.set_mv(320);
    assert_eq!(
        dcm.analog_value(&pins, false),
        adc_to_mv((320u32 * 1000 / 4888) as u16)
    );

    // Release pin 5 for the disconnect window.
    bench.p5.set_external_pull(true);
    for _ in 0..DCM_DISCONNECT_TICKS {
        bench.sample(&dcm, &pins);
    }
    assert!(!dcm.connected());
    assert_eq!(dcm.category(), DeviceCategory::None);
    assert!(dcm.assert_category(&mut expected).is_err());
}

#[test]
fn nxt_light_sensor_alternates_and_calibrates() {
    let bench = Bench::new();
    let pins = bench.pins();
    let dcm = Dcm::new(&bench.clock);

    // Light sensor wiring: every GPIO reads low, pin 1 carries the
    // measurement.
    bench.p2.set_external_pull(false);
    bench.p5.set_external_pull(false);
    bench.p6.set_external_pull(false);
    bench.adc1.set_mv(3800);

    let _ = dcm.poll(&pins);
    for _ in 0..25 {
        bench.sample(&dcm, &pins);
    }
    assert!(dcm.connected());
    assert_eq!(dcm.category(), DeviceCategory::NxtLight);

    // Run the floodlight loop: reflected reading with pin 5 driven
    // high, ambient with it low.
    for _ in 0..100 {
        bench.clock.advance_us(100);
        if bench.p5.level() {
            bench.adc1.set_mv(1300);
        } else {
            bench.adc1.set_mv(3800);
        }
        let _ = dcm.poll(&pins);
    }

    let raw = dcm.raw_rgba();
    assert_eq!(raw.r, adc_to_mv((1300u32 * 1000 / 4888) as u16));
    assert_eq!(raw.a, adc_to_mv((3800u32 * 1000 / 4888) as u16));

    let out = dcm.analog_rgba().unwrap();
    // reflection 3700ish, ambient 1200ish; scaled by (ambient - 825)
    // and normalized. The exact value follows the ADC quantization.
    let ambient = 5000 - raw.a;
    let reflection = 5000 - raw.r;
    let expected = (reflection - ambient) * (ambient - 825) / 1200;
    assert_eq!(out.r, expected.min(1000));
    assert_eq!(out.g, 0);

    // Unplugging shows as pin 2 going high.
    bench.p2.set_external_pull(true);
    for _ in 0..50 {
        bench.clock.advance_us(100);
        let _ = dcm.poll(&pins);
    }
    assert!(!dcm.connected());
}

#[test]
fn nxt_color_sensor_full_protocol() {
    let bench = Bench::new();
    let pins = bench.pins();
    let dcm = Dcm::new(&bench.clock);

    // Color sensor wiring: pin 1 grounded, pin 5 idle high, pin 2 low.
    bench.adc1.set_mv(50);
    bench.p2.set_external_pull(false);

    let mut calibration = [0u8; COLOR_CALIBRATION_SIZE];
    // High-ambient row: identity-ish scales for red and green.
    calibration[0..4].copy_from_slice(&57000u32.to_le_bytes());
    calibration[4..8].copy_from_slice(&114000u32.to_le_bytes());
    calibration[8..12].copy_from_slice(&57000u32.to_le_bytes());
    calibration[12..16].copy_from_slice(&4000u32.to_le_bytes());
    // Thresholds in raw counts: low 100, high 300.
    calibration[48..50].copy_from_slice(&300u16.to_le_bytes());
    calibration[50..52].copy_from_slice(&100u16.to_le_bytes());
    let sensor = NxtColorSensorSim::new(&bench.p5, &bench.p6, &bench.adc6, calibration);

    let _ = dcm.poll(&pins);
    // Detection, reset byte, pause, mode byte, then 54 calibration
    // bytes at 2ms per bit.
    for _ in 0..16000 {
        bench.clock.advance_us(100);
        let _ = dcm.poll(&pins);
        sensor.step();
        if sensor.calibrated() {
            break;
        }
    }
    assert!(sensor.calibrated(), "calibration download never finished");
    assert_eq!(sensor.mode_byte.get(), 13);

    // Let the manager finish storing the final byte and enter the
    // measurement loop.
    for _ in 0..50 {
        bench.clock.advance_us(100);
        let _ = dcm.poll(&pins);
        sensor.step();
    }

    let cal = dcm.color_calibration();
    assert_eq!(cal.calibration[0][0], 57000);
    assert_eq!(cal.calibration[0][3], 4000);
    assert_eq!(cal.threshold_high, 300);
    assert_eq!(cal.threshold_low, 100);

    // Serve one measurement cycle: ambient 2000mV, red 2800mV,
    // green 2300mV, blue 1500mV.
    sensor.set_channels_mv([2000, 2800, 2300, 1500]);
    for _ in 0..100 {
        bench.clock.advance_us(100);
        let _ = dcm.poll(&pins);
        sensor.step();
    }

    let raw = dcm.raw_rgba();
    // One full cycle has refreshed every channel (quantized by the ADC).
    assert!(raw.a.abs_diff(2000) < 10, "ambient {}", raw.a);
    assert!(raw.r.abs_diff(2800) < 10, "red {}", raw.r);
    assert!(raw.g.abs_diff(2300) < 10, "green {}", raw.g);
    assert!(raw.b.abs_diff(1500) < 10, "blue {}", raw.b);

    // Ambient above both thresholds selects the first calibration row:
    // red scales 1:1, green 2:1, and blue sits below ambient.
    let out = dcm.analog_rgba().unwrap();
    assert!(out.r.abs_diff(800) < 20, "red out {}", out.r);
    assert!(out.g.abs_diff(600) < 40, "green out {}", out.g);
    assert_eq!(out.b, 0);
    assert!(out.r <= 1000 && out.g <= 1000);
}
