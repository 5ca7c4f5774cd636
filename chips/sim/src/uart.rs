// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! A UART endpoint backed by in-memory FIFOs.
//!
//! The controller under test sits on the [`kernel::hil::uart::UartDevice`]
//! side; the scripted peripheral drains `peer_take_tx` and pushes with
//! `peer_write`. Bytes are considered on the wire the moment they are
//! queued; a baud mismatch between the two sides turns writes into
//! garbage exactly like a real line would, which the peer models by
//! checking [`SimUart::baud`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use kernel::hil::uart::UartDevice;
use kernel::ErrorCode;

pub struct SimUart {
    tx: RefCell<VecDeque<u8>>,
    rx: RefCell<VecDeque<u8>>,
    baud: Cell<u32>,
    fail_sends: Cell<bool>,
}

impl SimUart {
    pub fn new() -> SimUart {
        SimUart {
            tx: RefCell::new(VecDeque::new()),
            rx: RefCell::new(VecDeque::new()),
            baud: Cell::new(0),
            fail_sends: Cell::new(false),
        }
    }

    pub fn baud(&self) -> u32 {
        self.baud.get()
    }

    /// Makes subsequent `send` calls fail with an I/O error.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.set(fail);
    }

    /// Peripheral side: take everything the controller transmitted.
    pub fn peer_take_tx(&self) -> Vec<u8> {
        self.tx.borrow_mut().drain(..).collect()
    }

    /// Peripheral side: queue bytes for the controller to receive.
    pub fn peer_write(&self, data: &[u8]) {
        self.rx.borrow_mut().extend(data.iter().copied());
    }

    pub fn peer_tx_len(&self) -> usize {
        self.tx.borrow().len()
    }
}

impl UartDevice for SimUart {
    fn set_baud(&self, baud: u32) {
        self.baud.set(baud);
    }

    fn send(&self, data: &[u8]) -> Result<(), ErrorCode> {
        if self.fail_sends.get() {
            return Err(ErrorCode::IO);
        }
        self.tx.borrow_mut().extend(data.iter().copied());
        Ok(())
    }

    fn recv_into(&self, buf: &mut [u8]) -> usize {
        let mut rx = self.rx.borrow_mut();
        let mut n = 0;
        while n < buf.len() {
            match rx.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    fn flush(&self) {
        self.rx.borrow_mut().clear();
    }

    fn tx_idle(&self) -> bool {
        self.tx.borrow().is_empty()
    }
}
