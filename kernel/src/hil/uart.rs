// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! HIL for UART devices.

use crate::ErrorCode;

/// A buffered UART.
///
/// Both directions are non-blocking: the chip driver owns the FIFOs and
/// the ISR work. `send` queues a complete frame or fails; received bytes
/// accumulate until drained with `recv_into`. This polled shape is what a
/// cooperative protocol engine wants; there are no completion callbacks to
/// re-enter the engine from interrupt context.
pub trait UartDevice {
    /// Reconfigures the line rate. Any queued TX bytes are sent at the new
    /// rate; RX bytes already buffered are unaffected.
    fn set_baud(&self, baud: u32);

    /// Queues `data` for transmission. Fails with `BUSY` when the TX FIFO
    /// cannot accept the whole frame, `IO` when the line is down.
    fn send(&self, data: &[u8]) -> Result<(), ErrorCode>;

    /// Drains up to `buf.len()` received bytes, returning how many were
    /// copied.
    fn recv_into(&self, buf: &mut [u8]) -> usize;

    /// Discards all buffered RX bytes.
    fn flush(&self);

    /// True once every queued TX byte has left the wire.
    fn tx_idle(&self) -> bool;

    /// Convenience single-byte read.
    fn recv_byte(&self) -> Option<u8> {
        let mut byte = [0u8; 1];
        if self.recv_into(&mut byte) == 1 {
            Some(byte[0])
        } else {
            None
        }
    }
}
