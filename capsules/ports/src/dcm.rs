// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Device connection manager.
//!
//! Watches the passive state of a port's pins to decide what is plugged in,
//! and runs the two NXT passive sensor protocols that need continuous
//! bit-banging (Light and Color). UART devices are only detected here; the
//! port process hands them to the LUMP engine and re-enters this manager
//! when the device goes away.
//!
//! Classification reads a 7-bit pin-state vector every
//! [`DCM_SAMPLE_MS`] milliseconds: a one-hot bucket for the pin 1 analog
//! voltage plus the logic levels of pins 2, 5 and 6. A category must stay
//! stable for [`DCM_STEADY_STATE_TICKS`] samples to latch, and a
//! category-specific release pin must read high for
//! [`DCM_DISCONNECT_TICKS`] samples to unlatch.

use core::cell::Cell;
use core::task::Poll;

use kernel::hil::time::{Clock, Timer};
use kernel::ErrorCode;

use crate::ioport::IoPortPins;
use crate::lego::DeviceTypeId;

pub const DCM_SAMPLE_MS: u32 = 10;
pub const DCM_STEADY_STATE_TICKS: u32 = 20;
pub const DCM_DISCONNECT_TICKS: u32 = 5;

/// ADC settle time after changing an output pin, before trusting a reading.
const ADC_SETTLE_US: u64 = 200;

// Pin-state flags. Exactly one ADC1 bucket bit is set in a sampled state.
pub const ADC1_0_TO_100: u8 = 1 << 0;
pub const ADC1_100_TO_3100: u8 = 1 << 1;
pub const ADC1_3100_TO_4800: u8 = 1 << 2;
pub const ADC1_4800_TO_5000: u8 = 1 << 3;
pub const P2_HIGH: u8 = 1 << 4;
pub const P5_HIGH: u8 = 1 << 5;
pub const P6_HIGH: u8 = 1 << 6;

/// All pin 1 bucket bits; set when pin 1 is irrelevant for a device.
pub const MASK_P1: u8 = ADC1_0_TO_100 | ADC1_100_TO_3100 | ADC1_3100_TO_4800 | ADC1_4800_TO_5000;
/// Pin 6 bit; set when pin 6 is irrelevant for a device.
pub const MASK_P6: u8 = P6_HIGH;

/// Device categories distinguishable from passive pin state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceCategory {
    /// Nothing (recognizable) connected.
    None,
    /// UART smart device; pin 6 is its TX so it may be in any state.
    Lump,
    /// EV3 analog sensor.
    Ev3Analog,
    /// NXT Color sensor; pin 6 is its data line.
    NxtColor,
    /// NXT I2C sensor.
    NxtI2c,
    /// NXT Temperature sensor, a special case of I2C wiring.
    NxtTemperature,
    /// NXT Light sensor.
    NxtLight,
    /// First-iteration NXT Touch sensor, pressed. Released looks like
    /// nothing connected, which is why touch assertions also accept None.
    NxtTouch1Pressed,
    /// Other NXT analog sensors (sound, auto-id touch).
    NxtAnalogOther,
}

// Category pin patterns.
const PATTERN_LUMP: u8 = ADC1_0_TO_100 | P2_HIGH | P5_HIGH | MASK_P6;
const PATTERN_EV3_ANALOG: u8 = ADC1_100_TO_3100 | P2_HIGH;
const PATTERN_NONE: u8 = ADC1_4800_TO_5000 | P2_HIGH | P5_HIGH;
const PATTERN_NXT_COLOR: u8 = ADC1_0_TO_100 | P5_HIGH | MASK_P6;
const PATTERN_NXT_I2C: u8 = ADC1_4800_TO_5000 | P5_HIGH | MASK_P6;
const PATTERN_NXT_TEMPERATURE: u8 = PATTERN_NXT_I2C | P2_HIGH;
const PATTERN_NXT_LIGHT: u8 = MASK_P1;
const PATTERN_NXT_TOUCH1_PRESSED: u8 = ADC1_100_TO_3100 | P2_HIGH | P5_HIGH;
const PATTERN_NXT_ANALOG_OTHER: u8 = MASK_P1 | P5_HIGH;

/// Converts a 10-bit ADC reading to millivolts on the 0--5000mV scale.
pub fn adc_to_mv(adc_10bit: u16) -> u32 {
    adc_10bit as u32 * 4888 / 1000
}

/// Maps a sampled pin state to a device category.
///
/// Most patterns are exact matches; for devices that drive some pins with
/// data, those pins are masked off. Total: every possible state maps to a
/// category, with unrecognized combinations reading as `None`.
pub fn classify(state: u8) -> DeviceCategory {
    if state | MASK_P6 == PATTERN_LUMP {
        return DeviceCategory::Lump;
    }
    if state | MASK_P6 == PATTERN_NXT_COLOR {
        return DeviceCategory::NxtColor;
    }
    if state | MASK_P1 == PATTERN_NXT_ANALOG_OTHER {
        return DeviceCategory::NxtAnalogOther;
    }
    if state | MASK_P1 == PATTERN_NXT_LIGHT {
        return DeviceCategory::NxtLight;
    }
    // Everything else matches exactly, unrecognized states read as None.
    match state {
        PATTERN_NONE => DeviceCategory::None,
        PATTERN_EV3_ANALOG => DeviceCategory::Ev3Analog,
        PATTERN_NXT_I2C => DeviceCategory::NxtI2c,
        PATTERN_NXT_TEMPERATURE => DeviceCategory::NxtTemperature,
        PATTERN_NXT_TOUCH1_PRESSED => DeviceCategory::NxtTouch1Pressed,
        _ => DeviceCategory::None,
    }
}

/// Raw or calibrated analog color channels, in mV or normalized units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rgba {
    pub r: u32,
    pub g: u32,
    pub b: u32,
    pub a: u32,
}

/// Calibration block the NXT Color sensor transfers after reset.
#[derive(Clone, Copy, Debug, Default)]
pub struct ColorCalibration {
    pub calibration: [[u32; 4]; 3],
    pub threshold_high: u16,
    pub threshold_low: u16,
    pub crc: u16,
}

/// Size of the serialized calibration block.
pub const COLOR_CALIBRATION_SIZE: usize = 54;

const CAL_ROW_HIGH_AMBIENT: usize = 0;
const CAL_ROW_MEDIUM_AMBIENT: usize = 1;
const CAL_ROW_LOW_AMBIENT: usize = 2;

impl ColorCalibration {
    pub fn parse(raw: &[u8; COLOR_CALIBRATION_SIZE]) -> ColorCalibration {
        let mut cal = ColorCalibration::default();
        for row in 0..3 {
            for col in 0..4 {
                let o = (row * 4 + col) * 4;
                cal.calibration[row][col] =
                    u32::from_le_bytes([raw[o], raw[o + 1], raw[o + 2], raw[o + 3]]);
            }
        }
        cal.threshold_high = u16::from_le_bytes([raw[48], raw[49]]);
        cal.threshold_low = u16::from_le_bytes([raw[50], raw[51]]);
        cal.crc = u16::from_le_bytes([raw[52], raw[53]]);
        cal
    }
}

fn clamp1000(value: u32) -> u32 {
    value.min(1000)
}

fn bind1000(value: i64) -> u32 {
    value.clamp(0, 1000) as u32
}

/// Scales one color channel against ambient light with a calibration
/// factor, normalized to 0--1000.
fn scale_rgb(value: u32, ambient: u32, scale: u32) -> u32 {
    if value <= ambient {
        0
    } else {
        clamp1000(((value - ambient) as u64 * scale as u64 / 57000) as u32)
    }
}

/// Calibrated output for the NXT Light sensor from raw pin-1 readings.
///
/// Intensity is inverted on the wire (more light pulls the voltage down).
/// With higher ambient light, contrast is less pronounced due to the
/// nonlinearity of the sensor, so the difference is scaled up by the
/// ambient level and normalized to approximately 0--1000.
pub fn nxt_light_calibrated(raw: Rgba) -> Rgba {
    let ambient = 5000u32.saturating_sub(raw.a);
    let reflection = 5000u32.saturating_sub(raw.r);
    let difference = reflection.saturating_sub(ambient);
    let scale = ambient.saturating_sub(825);
    Rgba {
        r: clamp1000(difference * scale / 1200),
        g: 0,
        b: 0,
        a: bind1000((ambient as i64 - 1200) / 4),
    }
}

/// Calibrated output for the NXT Color sensor: pick a calibration row by
/// ambient bucket, then scale each channel.
pub fn nxt_color_calibrated(raw: Rgba, data: &ColorCalibration) -> Rgba {
    let row = if raw.a < adc_to_mv(data.threshold_low) {
        CAL_ROW_LOW_AMBIENT
    } else if raw.a < adc_to_mv(data.threshold_high) {
        CAL_ROW_MEDIUM_AMBIENT
    } else {
        CAL_ROW_HIGH_AMBIENT
    };
    Rgba {
        r: scale_rgb(raw.r, raw.a, data.calibration[row][0]),
        g: scale_rgb(raw.g, raw.a, data.calibration[row][1]),
        b: scale_rgb(raw.b, raw.a, data.calibration[row][2]),
        a: scale_rgb(raw.a, 220, data.calibration[row][3] / 4),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    ScanInit,
    Scan,
    WatchRelease,
    LightReflectSettle,
    LightAmbientSettle,
    ColorTxFirstBit,
    ColorTxHigh,
    ColorTxLow,
    ColorResetWait,
    ColorRxHigh,
    ColorRxLow,
    ColorLoopA,
    ColorLoopR,
    ColorLoopG,
    ColorLoopB,
}

/// What the color-sensor bit transmitter does once the byte is out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ColorTxNext {
    ResetDone,
    ModeDone,
}

/// Device connection manager state for one port.
pub struct Dcm<'a> {
    timer: Timer<'a>,
    phase: Cell<Phase>,
    count: Cell<u32>,
    connected: Cell<bool>,
    category: Cell<DeviceCategory>,
    rgba: Cell<Rgba>,
    // NXT Color sensor protocol state.
    tx_byte: Cell<u8>,
    tx_next: Cell<ColorTxNext>,
    bit: Cell<u8>,
    byte_index: Cell<usize>,
    rx_byte: Cell<u8>,
    cal_raw: Cell<[u8; COLOR_CALIBRATION_SIZE]>,
    cal: Cell<ColorCalibration>,
}

impl<'a> Dcm<'a> {
    pub fn new(clock: &'a dyn Clock) -> Dcm<'a> {
        Dcm {
            timer: Timer::new(clock),
            phase: Cell::new(Phase::ScanInit),
            count: Cell::new(0),
            connected: Cell::new(false),
            category: Cell::new(DeviceCategory::None),
            rgba: Cell::new(Rgba::default()),
            tx_byte: Cell::new(0),
            tx_next: Cell::new(ColorTxNext::ResetDone),
            bit: Cell::new(0),
            byte_index: Cell::new(0),
            rx_byte: Cell::new(0),
            cal_raw: Cell::new([0; COLOR_CALIBRATION_SIZE]),
            cal: Cell::new(ColorCalibration::default()),
        }
    }

    /// Drops any latched device and restarts classification on the next
    /// poll.
    pub fn restart(&self) {
        self.phase.set(Phase::ScanInit);
        self.connected.set(false);
        self.category.set(DeviceCategory::None);
        self.count.set(0);
    }

    pub fn connected(&self) -> bool {
        self.connected.get()
    }

    pub fn category(&self) -> DeviceCategory {
        self.category.get()
    }

    /// Latest calibration block received from an NXT Color sensor.
    pub fn color_calibration(&self) -> ColorCalibration {
        self.cal.get()
    }

    fn sample_mv(&self, pins: &IoPortPins, pin1: bool) -> u32 {
        let adc = if pin1 { pins.adc_p1 } else { pins.adc_p6 };
        adc_to_mv(adc.read_10bit())
    }

    /// Samples the full pin-state vector.
    fn sample_state(&self, pins: &IoPortPins) -> u8 {
        let mv = self.sample_mv(pins, true);
        let mut state = if mv < 100 {
            ADC1_0_TO_100
        } else if mv < 3100 {
            ADC1_100_TO_3100
        } else if mv < 4800 {
            ADC1_3100_TO_4800
        } else {
            ADC1_4800_TO_5000
        };
        if pins.p2.input() {
            state |= P2_HIGH;
        }
        if pins.p5.input() {
            state |= P5_HIGH;
        }
        if pins.p6.input() {
            state |= P6_HIGH;
        }
        state
    }

    /// Starts clocking one byte out to the NXT Color sensor, LSB first,
    /// pin 5 as clock and pin 6 as data, 1 ms per clock phase.
    fn color_tx_start(&self, pins: &IoPortPins, byte: u8, next: ColorTxNext) {
        self.tx_byte.set(byte);
        self.tx_next.set(next);
        self.bit.set(0);
        // Park the clock low for a full phase first so the sensor sees a
        // clean rising edge on the first bit.
        pins.p5.out_low();
        pins.p6.out_low();
        self.timer.set_ms(1);
        self.phase.set(Phase::ColorTxFirstBit);
    }

    fn color_tx_drive_bit(&self, pins: &IoPortPins) {
        if self.tx_byte.get() & (1 << self.bit.get()) != 0 {
            pins.p6.out_high();
        } else {
            pins.p6.out_low();
        }
        pins.p5.out_high();
        self.timer.set_ms(1);
        self.phase.set(Phase::ColorTxHigh);
    }

    fn color_rx_clock_high(&self, pins: &IoPortPins) {
        pins.p5.out_high();
        self.timer.set_ms(1);
        self.phase.set(Phase::ColorRxHigh);
    }

    fn disconnect(&self) {
        log::debug!("dcm: device disconnected");
        self.restart();
    }

    /// Runs one cooperative step. Returns `Ready` exactly once, when a
    /// UART device has been latched; passive devices are serviced in here
    /// until they disconnect.
    pub fn poll(&self, pins: &IoPortPins) -> Poll<()> {
        if !self.timer.expired() {
            return Poll::Pending;
        }

        match self.phase.get() {
            Phase::ScanInit => {
                self.connected.set(false);
                self.category.set(DeviceCategory::None);
                self.count.set(0);
                self.phase.set(Phase::Scan);
                // Fall straight into the first sample on the next poll.
                self.timer.set_us(0);
                Poll::Pending
            }

            Phase::Scan => {
                let category = classify(self.sample_state(pins));
                if category != self.category.get() || category == DeviceCategory::None {
                    self.count.set(1);
                    self.category.set(category);
                } else {
                    self.count.set(self.count.get() + 1);
                }
                self.timer.set_ms(DCM_SAMPLE_MS);

                if self.count.get() < DCM_STEADY_STATE_TICKS
                    || self.category.get() == DeviceCategory::None
                {
                    return Poll::Pending;
                }

                self.connected.set(true);
                log::debug!("dcm: detected {:?}", self.category.get());

                match self.category.get() {
                    DeviceCategory::Lump => {
                        // Hand over to the UART engine; classification
                        // restarts when the port process comes back.
                        self.phase.set(Phase::ScanInit);
                        Poll::Ready(())
                    }
                    DeviceCategory::NxtLight => {
                        pins.p5.out_high();
                        self.timer.set_us(ADC_SETTLE_US);
                        self.phase.set(Phase::LightReflectSettle);
                        Poll::Pending
                    }
                    DeviceCategory::NxtColor => {
                        // The stock reset sequence toggles the clock twice
                        // with the data line high; clocking out 0xFF has
                        // the same effect.
                        self.color_tx_start(pins, 0xFF, ColorTxNext::ResetDone);
                        Poll::Pending
                    }
                    _ => {
                        self.count.set(0);
                        self.phase.set(Phase::WatchRelease);
                        Poll::Pending
                    }
                }
            }

            Phase::WatchRelease => {
                // Disconnection shows on a single pin going high; other
                // pins carry data and may toggle in normal operation.
                let release = match self.category.get() {
                    DeviceCategory::Ev3Analog => pins.p5,
                    _ => pins.p2,
                };
                if release.input() {
                    self.count.set(self.count.get() + 1);
                } else {
                    self.count.set(0);
                }
                if self.count.get() >= DCM_DISCONNECT_TICKS {
                    self.disconnect();
                } else {
                    self.timer.set_ms(DCM_SAMPLE_MS);
                }
                Poll::Pending
            }

            Phase::LightReflectSettle => {
                let mut rgba = self.rgba.get();
                rgba.r = self.sample_mv(pins, true);
                self.rgba.set(rgba);
                pins.p5.out_low();
                self.timer.set_us(ADC_SETTLE_US);
                self.phase.set(Phase::LightAmbientSettle);
                Poll::Pending
            }

            Phase::LightAmbientSettle => {
                let mut rgba = self.rgba.get();
                rgba.a = self.sample_mv(pins, true);
                self.rgba.set(rgba);
                if pins.p2.input() {
                    self.disconnect();
                } else {
                    pins.p5.out_high();
                    self.timer.set_us(ADC_SETTLE_US);
                    self.phase.set(Phase::LightReflectSettle);
                }
                Poll::Pending
            }

            Phase::ColorTxFirstBit => {
                self.color_tx_drive_bit(pins);
                Poll::Pending
            }

            Phase::ColorTxHigh => {
                pins.p5.out_low();
                self.timer.set_ms(1);
                self.phase.set(Phase::ColorTxLow);
                Poll::Pending
            }

            Phase::ColorTxLow => {
                self.bit.set(self.bit.get() + 1);
                if self.bit.get() < 8 {
                    self.color_tx_drive_bit(pins);
                    return Poll::Pending;
                }
                match self.tx_next.get() {
                    ColorTxNext::ResetDone => {
                        self.timer.set_ms(100);
                        self.phase.set(Phase::ColorResetWait);
                    }
                    ColorTxNext::ModeDone => {
                        // Calibration download: 54 bytes, LSB first, one
                        // bit per clock-high phase on pin 6.
                        pins.p6.set_function(kernel::hil::gpio::PinFunction::Input);
                        self.byte_index.set(0);
                        self.bit.set(0);
                        self.rx_byte.set(0);
                        self.color_rx_clock_high(pins);
                    }
                }
                Poll::Pending
            }

            Phase::ColorResetWait => {
                // Full-color mode.
                self.color_tx_start(pins, 13, ColorTxNext::ModeDone);
                Poll::Pending
            }

            Phase::ColorRxHigh => {
                if pins.p6.input() {
                    self.rx_byte.set(self.rx_byte.get() | (1 << self.bit.get()));
                }
                pins.p5.out_low();
                self.timer.set_ms(1);
                self.phase.set(Phase::ColorRxLow);
                Poll::Pending
            }

            Phase::ColorRxLow => {
                self.bit.set(self.bit.get() + 1);
                if self.bit.get() < 8 {
                    self.color_rx_clock_high(pins);
                    return Poll::Pending;
                }
                let mut raw = self.cal_raw.get();
                raw[self.byte_index.get()] = self.rx_byte.get();
                self.cal_raw.set(raw);
                self.rx_byte.set(0);
                self.bit.set(0);
                self.byte_index.set(self.byte_index.get() + 1);
                if self.byte_index.get() < COLOR_CALIBRATION_SIZE {
                    self.color_rx_clock_high(pins);
                    return Poll::Pending;
                }
                // REVISIT: verify the trailing CRC and restart on failure.
                self.cal.set(ColorCalibration::parse(&raw));
                log::debug!("dcm: color sensor calibrated");
                pins.p5.out_low();
                self.timer.set_us(ADC_SETTLE_US);
                self.phase.set(Phase::ColorLoopA);
                Poll::Pending
            }

            Phase::ColorLoopA => {
                let mut rgba = self.rgba.get();
                rgba.a = self.sample_mv(pins, false);
                self.rgba.set(rgba);
                pins.p5.out_high();
                self.timer.set_us(ADC_SETTLE_US);
                self.phase.set(Phase::ColorLoopR);
                Poll::Pending
            }

            Phase::ColorLoopR => {
                let mut rgba = self.rgba.get();
                rgba.r = self.sample_mv(pins, false);
                self.rgba.set(rgba);
                pins.p5.out_low();
                // Green needs noticeably longer to stabilize.
                self.timer.set_us(2000);
                self.phase.set(Phase::ColorLoopG);
                Poll::Pending
            }

            Phase::ColorLoopG => {
                let mut rgba = self.rgba.get();
                rgba.g = self.sample_mv(pins, false);
                self.rgba.set(rgba);
                pins.p5.out_high();
                self.timer.set_us(ADC_SETTLE_US);
                self.phase.set(Phase::ColorLoopB);
                Poll::Pending
            }

            Phase::ColorLoopB => {
                let mut rgba = self.rgba.get();
                rgba.b = self.sample_mv(pins, false);
                self.rgba.set(rgba);
                if pins.p2.input() {
                    pins.p5.out_low();
                    self.disconnect();
                } else {
                    pins.p5.out_low();
                    self.timer.set_us(ADC_SETTLE_US);
                    self.phase.set(Phase::ColorLoopA);
                }
                Poll::Pending
            }
        }
    }

    /// Checks the latched category against an expected device type,
    /// resolving category wildcards. `expected` is updated to reflect what
    /// is actually attached when the check passes.
    pub fn assert_category(&self, expected: &mut u8) -> Result<(), ErrorCode> {
        use DeviceCategory as C;

        // First-iteration touch sensors cannot be detected definitively:
        // released looks like an empty port. Only fail when something else
        // is definitively connected.
        if *expected == DeviceTypeId::NxtTouchSensor as u8 {
            return match self.category.get() {
                C::None | C::NxtTouch1Pressed | C::NxtAnalogOther => Ok(()),
                _ => Err(ErrorCode::NODEV),
            };
        }

        if !self.connected.get() || self.category.get() == C::None {
            return Err(ErrorCode::NODEV);
        }

        let matches = match self.category.get() {
            C::Lump => *expected == DeviceTypeId::AnyLumpUart as u8,
            C::Ev3Analog => *expected == DeviceTypeId::Ev3TouchSensor as u8,
            C::NxtColor => *expected == DeviceTypeId::NxtColorSensor as u8,
            C::NxtTemperature => {
                *expected == DeviceTypeId::NxtTemperatureSensor as u8
                    || *expected == DeviceTypeId::NxtI2c as u8
            }
            C::NxtI2c => *expected == DeviceTypeId::NxtI2c as u8,
            C::NxtLight => {
                *expected == DeviceTypeId::NxtLightSensor as u8
                    || *expected == DeviceTypeId::NxtAnalog as u8
            }
            C::NxtAnalogOther => {
                *expected == DeviceTypeId::NxtSoundSensor as u8
                    || *expected == DeviceTypeId::NxtAnalog as u8
            }
            C::NxtTouch1Pressed | C::None => false,
        };
        if matches {
            Ok(())
        } else {
            Err(ErrorCode::NODEV)
        }
    }

    /// Reads the passive analog value of the attached device, in mV.
    ///
    /// EV3 analog sensors report on pin 6; NXT sensors report on pin 1,
    /// with pin 5 selecting active mode where the sensor supports it.
    pub fn analog_value(&self, pins: &IoPortPins, active: bool) -> u32 {
        if self.category.get() == DeviceCategory::Ev3Analog {
            return self.sample_mv(pins, false);
        }
        if active {
            pins.p5.out_high();
        } else {
            pins.p5.out_low();
        }
        self.sample_mv(pins, true)
    }

    /// Raw channel readings from the passive color loops, in mV.
    pub fn raw_rgba(&self) -> Rgba {
        self.rgba.get()
    }

    /// Calibrated color output, when the attached device produces one.
    pub fn analog_rgba(&self) -> Option<Rgba> {
        match self.category.get() {
            DeviceCategory::NxtLight => Some(nxt_light_calibrated(self.rgba.get())),
            DeviceCategory::NxtColor => {
                Some(nxt_color_calibrated(self.rgba.get(), &self.cal.get()))
            }
            _ => None,
        }
    }
}
