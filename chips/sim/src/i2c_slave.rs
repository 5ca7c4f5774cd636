// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! A register-file I2C slave on two simulated lines.
//!
//! Behaves like the memory-mapped LEGO sensors: the first byte written
//! after addressing sets the register pointer; subsequent writes store at
//! the pointer, reads return from it, both auto-incrementing. The pointer
//! survives a stop so the degraded write-stop-start-read sequence the
//! first-party sensors need works the same as a repeated start.
//!
//! Call [`SimI2cSlave::step`] after every master timer tick; the slave is
//! purely edge-driven off the shared lines.

use std::cell::{Cell, RefCell};

use crate::gpio::SimGpio;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    /// Shifting a byte in, MSB first.
    Receive { is_addr: bool },
    /// Driving the acknowledgement until the clock falls again.
    AckHold { read: bool },
    /// Driving data bits out; `left` bits remain.
    Send { left: u8 },
    /// Byte sent; watching the 9th clock for the master's acknowledgement.
    WaitMasterAck,
    /// Master acknowledged; start the next byte on the clock fall.
    SendNext,
}

pub struct SimI2cSlave<'a> {
    scl: &'a SimGpio,
    sda: &'a SimGpio,
    address: u8,
    /// When false the device is absent: it never acknowledges.
    present: Cell<bool>,
    memory: RefCell<[u8; 256]>,

    state: Cell<State>,
    shift: Cell<u8>,
    bit: Cell<u8>,
    current: Cell<u8>,
    pointer: Cell<u8>,
    have_pointer: Cell<bool>,
    prev_scl: Cell<bool>,
    prev_sda: Cell<bool>,
}

impl<'a> SimI2cSlave<'a> {
    pub fn new(scl: &'a SimGpio, sda: &'a SimGpio, address: u8) -> SimI2cSlave<'a> {
        SimI2cSlave {
            scl,
            sda,
            address,
            present: Cell::new(true),
            memory: RefCell::new([0; 256]),
            state: Cell::new(State::Idle),
            shift: Cell::new(0),
            bit: Cell::new(0),
            current: Cell::new(0),
            pointer: Cell::new(0),
            have_pointer: Cell::new(false),
            prev_scl: Cell::new(true),
            prev_sda: Cell::new(true),
        }
    }

    /// Unplugs or replugs the device.
    pub fn set_present(&self, present: bool) {
        self.present.set(present);
    }

    pub fn load_memory(&self, offset: u8, data: &[u8]) {
        let mut mem = self.memory.borrow_mut();
        for (i, &b) in data.iter().enumerate() {
            mem[offset as usize + i] = b;
        }
    }

    pub fn read_memory(&self, offset: u8, buf: &mut [u8]) {
        let mem = self.memory.borrow();
        for (i, b) in buf.iter_mut().enumerate() {
            *b = mem[offset as usize + i];
        }
    }

    fn drive_bit(&self, byte: u8, index: u8) {
        // Open drain: a one is the released line.
        self.sda.set_external_low(byte & (1 << index) == 0);
    }

    fn start_send(&self) {
        let byte = self.memory.borrow()[self.pointer.get() as usize];
        self.current.set(byte);
        self.pointer.set(self.pointer.get().wrapping_add(1));
        self.drive_bit(byte, 7);
        self.state.set(State::Send { left: 7 });
    }

    pub fn step(&self) {
        let scl = self.scl.level();
        let sda = self.sda.level();
        let prev_scl = self.prev_scl.get();
        let prev_sda = self.prev_sda.get();

        // Start/stop: SDA edges while the clock is high.
        if prev_scl && scl {
            if prev_sda && !sda {
                self.sda.set_external_low(false);
                self.state.set(State::Receive { is_addr: true });
                self.shift.set(0);
                self.bit.set(0);
            } else if !prev_sda && sda {
                self.sda.set_external_low(false);
                self.state.set(State::Idle);
                self.have_pointer.set(false);
            }
        }

        if scl && !prev_scl {
            // Rising edge: data is valid.
            match self.state.get() {
                State::Receive { .. } => {
                    self.shift.set(self.shift.get() << 1 | sda as u8);
                    self.bit.set(self.bit.get() + 1);
                }
                State::WaitMasterAck => {
                    if !sda {
                        self.state.set(State::SendNext);
                    } else {
                        // Master is done with us.
                        self.state.set(State::Idle);
                    }
                }
                _ => {}
            }
        }

        if !scl && prev_scl {
            // Falling edge: time to change SDA.
            match self.state.get() {
                State::Receive { is_addr } if self.bit.get() >= 8 => {
                    let byte = self.shift.get();
                    self.shift.set(0);
                    self.bit.set(0);
                    if is_addr {
                        if self.present.get() && byte >> 1 == self.address {
                            self.sda.set_external_low(true);
                            self.state.set(State::AckHold {
                                read: byte & 1 == 1,
                            });
                        } else {
                            self.state.set(State::Idle);
                        }
                    } else {
                        if self.have_pointer.get() {
                            let ptr = self.pointer.get();
                            self.memory.borrow_mut()[ptr as usize] = byte;
                            self.pointer.set(ptr.wrapping_add(1));
                        } else {
                            self.pointer.set(byte);
                            self.have_pointer.set(true);
                        }
                        self.sda.set_external_low(true);
                        self.state.set(State::AckHold { read: false });
                    }
                }
                State::AckHold { read } => {
                    self.sda.set_external_low(false);
                    if read {
                        self.start_send();
                    } else {
                        self.state.set(State::Receive { is_addr: false });
                    }
                }
                State::Send { left } => {
                    if left > 0 {
                        self.drive_bit(self.current.get(), left - 1);
                        self.state.set(State::Send { left: left - 1 });
                    } else {
                        self.sda.set_external_low(false);
                        self.state.set(State::WaitMasterAck);
                    }
                }
                State::SendNext => {
                    self.start_send();
                }
                _ => {}
            }
        }

        self.prev_scl.set(scl);
        self.prev_sda.set(sda);
    }
}
