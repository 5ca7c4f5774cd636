// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! LEGO-assigned device type identifiers.
//!
//! UART devices report their id during synchronization; everything else is
//! assigned a synthetic id here so that the port getters can take one
//! `expected type` parameter for every device class. Ids above
//! [`WILDCARD_BASE`] are category wildcards that match a set of devices.

use num_derive::FromPrimitive;

/// Known type identifiers.
///
/// Values below 100 are wire values reported by UART devices; other ids are
/// allowed and flow through the stack as plain `u8`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum DeviceTypeId {
    None = 0,

    // UART devices (wire values).
    Ev3ColorSensor = 29,
    Ev3UltrasonicSensor = 30,
    Ev3GyroSensor = 32,
    Ev3IrSensor = 33,
    Wedo2TiltSensor = 34,
    Wedo2MotionSensor = 35,
    ColorDistSensor = 37,
    InteractiveMotor = 38,
    TechnicLMotor = 46,
    TechnicXlMotor = 47,
    SpikeMMotor = 48,
    SpikeLMotor = 49,
    SpikeColorSensor = 61,
    SpikeUltrasonicSensor = 62,
    SpikeForceSensor = 63,
    TechnicMAngularMotor = 75,
    TechnicLAngularMotor = 76,

    // Devices identified by pin wiring rather than a reported id.
    NxtTouchSensor = 100,
    NxtLightSensor = 101,
    NxtSoundSensor = 102,
    NxtColorSensor = 103,
    NxtUltrasonicSensor = 104,
    NxtTemperatureSensor = 105,
    Ev3TouchSensor = 106,
    NxtAnalog = 110,
    NxtI2c = 111,
    CustomI2c = 112,
    CustomUart = 113,

    // Category wildcards used as `expected type` arguments.
    AnyLumpUart = 120,
    AnyDcMotor = 121,
    AnyEncodedMotor = 122,
}

/// First id that is a category wildcard rather than a concrete device.
pub const WILDCARD_BASE: u8 = DeviceTypeId::AnyLumpUart as u8;

/// Whether a UART-reported type id is a motor with position feedback.
pub fn is_encoded_motor(type_id: u8) -> bool {
    matches!(type_id, 38 | 46 | 47 | 48 | 49 | 75 | 76)
}

/// Whether a UART-reported type id is any kind of DC output.
pub fn is_dc_output(type_id: u8) -> bool {
    // Simple lights (8) are outputs without feedback.
    is_encoded_motor(type_id) || type_id == 8
}
