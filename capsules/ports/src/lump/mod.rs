// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! LEGO UART Messaging Protocol (LUMP).
//!
//! [`codec`] handles the byte-level framing; [`device`] runs the
//! synchronization handshake and steady-state data exchange with one
//! attached smart device.

pub mod codec;
pub mod device;

pub use device::LumpDevice;
