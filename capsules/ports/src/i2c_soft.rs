// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Bit-banged multi-channel I2C master.
//!
//! Each sensor port gets one software channel over its two GPIOs. A single
//! hardware timer ticks all channels at four times the bus frequency, so
//! every SCL period has four sub-phases: prepare while SCL is low, raise,
//! sample, lower. All bus state lives in per-channel records that only
//! [`I2cSoftMac::tick`] mutates while a transaction runs; the application
//! API touches a channel only when it is idle, which is what makes the
//! ISR/application split safe without locks.
//!
//! An exchange is queued as up to [`I2C_MAX_TXN`] sub-transactions. A
//! register read is four: write the address, write the register index,
//! re-address in read mode after a repeated start, read the data. A write
//! is two. First-party LEGO sensors (the ultrasonic rangefinder) are not
//! fully I2C compliant and need the `lego_compat` quirks: a reclock before
//! every repeated start and a forced pause between bus operations.

use core::cell::Cell;

use kernel::hil::gpio::Pin;
use kernel::ErrorCode;

/// Sensor-port bus frequency, in Hz.
pub const I2C_BUS_SPEED: u32 = 9600;

/// Timer tick rate driving [`I2cSoftMac::tick`]: four phases per bit.
pub const I2C_TICK_HZ: u32 = I2C_BUS_SPEED * 4;

/// Most sub-transactions one exchange can queue.
pub const I2C_MAX_TXN: usize = 4;

/// Longest payload of a single sub-transaction.
pub const I2C_MAX_DATA_SIZE: usize = 16;

/// Quirk pause length, in ticks (quarter bits).
const I2C_PAUSE_TICKS: u8 = 3;

/// Bus control action around a sub-transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    None,
    Start,
    Restart,
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Write,
    Read,
}

/// Externally visible result of a (sub-)transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnStatus {
    /// Nothing queued yet.
    None,
    InProgress,
    Success,
    /// The slave withheld an acknowledgement; remaining sub-transactions
    /// were skipped.
    Failed,
}

/// Fine-grained bus state, advanced one step per timer tick. The
/// declaration order matters: everything above `Idle` counts as busy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum BusState {
    Off,
    Idle,
    /// Bus locked while the application queues sub-transactions.
    Config,
    Pause,
    Reclock0,
    Reclock1,
    ReadAck0,
    ReadAck1,
    ReadAck2,
    WriteAck0,
    WriteAck1,
    WriteAck2,
    SendStartBit0,
    SendStartBit1,
    SclLow,
    Sample0,
    Sample1,
    Sample2,
    SendStopBit0,
    SendStopBit1,
}

/// What the byte pump is doing within the current sub-transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxnPhase {
    None,
    Waiting,
    Start,
    TransmitByte,
    WriteAck,
    ReadAck,
    Stop,
}

/// One queued sub-transaction.
struct SubTxn {
    pre: Cell<Control>,
    post: Cell<Control>,
    dir: Cell<Direction>,
    data: Cell<[u8; I2C_MAX_DATA_SIZE + 1]>,
    len: Cell<u8>,
    result: Cell<TxnStatus>,
}

impl SubTxn {
    const fn new() -> SubTxn {
        SubTxn {
            pre: Cell::new(Control::None),
            post: Cell::new(Control::None),
            dir: Cell::new(Direction::Write),
            data: Cell::new([0; I2C_MAX_DATA_SIZE + 1]),
            len: Cell::new(0),
            result: Cell::new(TxnStatus::None),
        }
    }

    fn reset(&self) {
        self.pre.set(Control::None);
        self.post.set(Control::None);
        self.dir.set(Direction::Write);
        self.data.set([0; I2C_MAX_DATA_SIZE + 1]);
        self.len.set(0);
        self.result.set(TxnStatus::None);
    }
}

/// Per-port bus state.
pub struct I2cChannel<'a> {
    scl: &'a dyn Pin,
    sda: &'a dyn Pin,

    bus_state: Cell<BusState>,
    txn_phase: Cell<TxnPhase>,

    device_addr: Cell<u8>,
    lego_compat: Cell<bool>,

    txns: [SubTxn; I2C_MAX_TXN],
    current_txn: Cell<usize>,
    n_txns: Cell<usize>,

    /// Bytes of the current sub-transaction fully processed.
    processed: Cell<u8>,
    current_byte: Cell<u8>,
    /// Bit currently on the wire, counting 7 down to 0.
    bit_pos: Cell<i8>,

    pause_ticks: Cell<u8>,
    pause_next: Cell<BusState>,
}

impl<'a> I2cChannel<'a> {
    pub fn new(scl: &'a dyn Pin, sda: &'a dyn Pin) -> I2cChannel<'a> {
        I2cChannel {
            scl,
            sda,
            bus_state: Cell::new(BusState::Off),
            txn_phase: Cell::new(TxnPhase::None),
            device_addr: Cell::new(0),
            lego_compat: Cell::new(false),
            txns: [SubTxn::new(), SubTxn::new(), SubTxn::new(), SubTxn::new()],
            current_txn: Cell::new(0),
            n_txns: Cell::new(0),
            processed: Cell::new(0),
            current_byte: Cell::new(0),
            bit_pos: Cell::new(7),
            pause_ticks: Cell::new(0),
            pause_next: Cell::new(BusState::Idle),
        }
    }

    /// Binds a slave address to this channel and releases the bus lines.
    ///
    /// Address 0 is the general call address and is rejected.
    pub fn register(&self, address: u8, lego_compat: bool) -> Result<(), ErrorCode> {
        if address == 0 || address > 0x7F {
            return Err(ErrorCode::INVAL);
        }
        if self.busy() {
            return Err(ErrorCode::BUSY);
        }
        self.scl.out_high();
        self.sda.out_high();
        self.bus_state.set(BusState::Idle);
        self.txn_phase.set(TxnPhase::None);
        self.device_addr.set(address);
        self.lego_compat.set(lego_compat);
        self.current_txn.set(0);
        self.n_txns.set(0);
        Ok(())
    }

    /// Turns the channel off; lines float.
    pub fn unregister(&self) {
        self.bus_state.set(BusState::Off);
        self.txn_phase.set(TxnPhase::None);
        self.current_txn.set(0);
        self.n_txns.set(0);
        self.device_addr.set(0);
    }

    pub fn busy(&self) -> bool {
        self.bus_state.get() > BusState::Idle || self.current_txn.get() < self.n_txns.get()
    }

    /// Current transaction status. Exactly one of
    /// `InProgress`/`Success`/`Failed` is reported from the moment a
    /// transaction is queued until the next one replaces it.
    pub fn txn_status(&self) -> TxnStatus {
        let n = self.n_txns.get();
        if n == 0 {
            return TxnStatus::None;
        }
        if self.txns[..n]
            .iter()
            .any(|t| t.result.get() == TxnStatus::Failed)
        {
            return TxnStatus::Failed;
        }
        if self.busy() {
            return TxnStatus::InProgress;
        }
        if self.txns[..n]
            .iter()
            .all(|t| t.result.get() == TxnStatus::Success)
        {
            TxnStatus::Success
        } else {
            TxnStatus::InProgress
        }
    }

    fn add_txn(
        &self,
        dir: Direction,
        data: &[u8],
        len: usize,
        pre: Control,
        post: Control,
    ) -> Result<(), ErrorCode> {
        let n = self.n_txns.get();
        if n == I2C_MAX_TXN {
            return Err(ErrorCode::SIZE);
        }
        let txn = &self.txns[n];
        txn.reset();
        txn.pre.set(pre);
        txn.post.set(post);
        txn.dir.set(dir);
        let mut buf = [0u8; I2C_MAX_DATA_SIZE + 1];
        buf[..data.len()].copy_from_slice(data);
        txn.data.set(buf);
        txn.len.set(len as u8);
        self.n_txns.set(n + 1);
        Ok(())
    }

    /// Queues a complete exchange with the registered device.
    ///
    /// For a write, `data` carries the register index and payload. For a
    /// read, `data` carries the register index and `recv_len` bytes come
    /// back, collected afterwards with [`I2cChannel::read_received`].
    pub fn start_transaction(
        &self,
        dir: Direction,
        data: &[u8],
        recv_len: usize,
    ) -> Result<(), ErrorCode> {
        if self.bus_state.get() == BusState::Off {
            return Err(ErrorCode::INVALOP);
        }
        if self.busy() {
            return Err(ErrorCode::BUSY);
        }
        if data.is_empty() || data.len() > I2C_MAX_DATA_SIZE {
            return Err(ErrorCode::INVAL);
        }
        if dir == Direction::Read && (recv_len == 0 || recv_len > I2C_MAX_DATA_SIZE) {
            return Err(ErrorCode::INVAL);
        }

        self.bus_state.set(BusState::Config);
        self.current_txn.set(0);
        self.n_txns.set(0);

        let addr_write = [(self.device_addr.get() << 1) | 0];
        let addr_read = [(self.device_addr.get() << 1) | 1];

        // Address the device in write mode, then push the payload. A
        // degraded-mode device, or a plain write, closes with a stop.
        self.add_txn(Direction::Write, &addr_write, 1, Control::Start, Control::None)?;
        self.add_txn(
            Direction::Write,
            data,
            data.len(),
            Control::None,
            if self.lego_compat.get() || dir == Direction::Write {
                Control::Stop
            } else {
                Control::None
            },
        )?;

        // A read re-addresses the device in read mode and collects the
        // reply, closing with a stop.
        if dir == Direction::Read {
            self.add_txn(Direction::Write, &addr_read, 1, Control::Restart, Control::None)?;
            self.add_txn(Direction::Read, &[], recv_len, Control::None, Control::Stop)?;
        }

        // Release the bus to the tick handler.
        self.txn_phase.set(TxnPhase::Waiting);
        self.bus_state.set(BusState::Idle);
        Ok(())
    }

    /// Copies out the bytes a finished read transaction collected.
    pub fn read_received(&self, buf: &mut [u8]) -> usize {
        let n = self.n_txns.get();
        if n == 0 || self.busy() {
            return 0;
        }
        let last = &self.txns[n - 1];
        if last.dir.get() != Direction::Read || last.result.get() != TxnStatus::Success {
            return 0;
        }
        let len = (last.len.get() as usize).min(buf.len());
        buf[..len].copy_from_slice(&last.data.get()[..len]);
        len
    }

    /// Moves to `next`, inserting the compatibility pause when the
    /// attached device needs one. Only transitions that tolerate the
    /// pause route through here.
    fn set_bus_state(&self, next: BusState) {
        if self.lego_compat.get() {
            self.pause_ticks.set(if next == BusState::Idle {
                10 * I2C_PAUSE_TICKS
            } else {
                I2C_PAUSE_TICKS
            });
            self.pause_next.set(next);
            self.bus_state.set(BusState::Pause);
        } else {
            self.bus_state.set(next);
        }
    }

    /// One timer tick for this channel.
    fn step(&self) {
        let txn = &self.txns[self.current_txn.get().min(I2C_MAX_TXN - 1)];

        match self.bus_state.get() {
            BusState::Off | BusState::Config => {}

            BusState::Pause => {
                let remaining = self.pause_ticks.get() - 1;
                self.pause_ticks.set(remaining);
                if remaining == 0 {
                    self.bus_state.set(self.pause_next.get());
                }
            }

            BusState::Reclock0 => {
                // First half of reclocking: SCL low.
                self.scl.out_low();
                self.bus_state.set(BusState::Reclock1);
            }

            BusState::Reclock1 => {
                // SCL high again, then retry the start.
                self.scl.out_high();
                self.bus_state.set(BusState::SendStartBit0);
            }

            BusState::Idle => {
                if self.txn_phase.get() == TxnPhase::Waiting
                    && self.current_txn.get() < self.n_txns.get()
                {
                    txn.result.set(TxnStatus::InProgress);
                    if txn.pre.get() == Control::None {
                        self.txn_phase.set(TxnPhase::TransmitByte);
                        self.bus_state.set(BusState::SclLow);
                    } else {
                        // Release both lines before a (re)start.
                        self.sda.out_high();
                        self.scl.out_high();
                        if txn.pre.get() == Control::Restart && self.lego_compat.get() {
                            self.bus_state.set(BusState::Reclock0);
                        } else {
                            self.bus_state.set(BusState::SendStartBit0);
                        }
                        self.txn_phase.set(TxnPhase::Start);
                    }
                    self.processed.set(0);
                    self.current_byte.set(txn.data.get()[0]);
                    self.bit_pos.set(7);
                } else if self.current_txn.get() == self.n_txns.get() {
                    self.txn_phase.set(TxnPhase::None);
                }
            }

            BusState::SendStartBit0 => {
                if self.sda.input() {
                    self.sda.out_low();
                    self.set_bus_state(BusState::SendStartBit1);
                } else {
                    // Something is holding SDA low; reclock until the
                    // line comes back.
                    self.bus_state.set(BusState::Reclock0);
                }
            }

            BusState::SendStartBit1 => {
                self.scl.out_low();
                self.set_bus_state(BusState::SclLow);
                self.txn_phase.set(TxnPhase::TransmitByte);
            }

            BusState::SclLow => match self.txn_phase.get() {
                TxnPhase::TransmitByte => {
                    if txn.dir.get() == Direction::Write {
                        if self.current_byte.get() & (1 << self.bit_pos.get()) != 0 {
                            self.sda.out_high();
                        } else {
                            self.sda.out_low();
                        }
                        self.bit_pos.set(self.bit_pos.get() - 1);
                    } else {
                        // Reading: the slave owns SDA.
                        self.sda.out_high();
                    }
                    self.bus_state.set(BusState::Sample0);
                }

                TxnPhase::WriteAck => {
                    // Wait for the slave to release SDA, then drive the
                    // acknowledgement ourselves.
                    if self.sda.input() {
                        self.sda.out_low();
                        self.bus_state.set(BusState::WriteAck0);
                    }
                }

                TxnPhase::ReadAck => {
                    self.sda.out_high();
                    self.scl.out_low();
                    self.bus_state.set(BusState::ReadAck0);
                }

                TxnPhase::Stop => {
                    // SDA low now so it can rise after SCL does.
                    self.sda.out_low();
                    self.set_bus_state(BusState::SendStopBit0);
                }

                _ => {}
            },

            BusState::Sample0 => {
                self.scl.out_high();
                self.bus_state.set(BusState::Sample1);
            }

            BusState::Sample1 => {
                if txn.dir.get() == Direction::Read {
                    let bit = self.sda.input() as u8;
                    let mut data = txn.data.get();
                    data[self.processed.get() as usize] |= bit << self.bit_pos.get();
                    txn.data.set(data);
                    self.bit_pos.set(self.bit_pos.get() - 1);
                }
                self.bus_state.set(BusState::Sample2);
            }

            BusState::Sample2 => {
                self.scl.out_low();

                if self.bit_pos.get() < 0 {
                    self.processed.set(self.processed.get() + 1);
                    self.bit_pos.set(7);

                    if txn.dir.get() == Direction::Write {
                        if (self.processed.get() as usize) < txn.len.get() as usize {
                            self.current_byte
                                .set(txn.data.get()[self.processed.get() as usize]);
                        }
                        self.txn_phase.set(TxnPhase::ReadAck);
                    } else {
                        if (self.processed.get() as usize) < txn.len.get() as usize {
                            self.txn_phase.set(TxnPhase::WriteAck);
                        } else {
                            txn.result.set(TxnStatus::Success);
                            self.current_txn.set(self.current_txn.get() + 1);
                            if txn.post.get() == Control::Stop {
                                self.txn_phase.set(TxnPhase::Stop);
                            } else {
                                self.bus_state.set(BusState::Idle);
                                self.txn_phase.set(TxnPhase::Waiting);
                                return;
                            }
                        }
                    }
                }

                self.bus_state.set(BusState::SclLow);
            }

            BusState::ReadAck0 => {
                // Clock pulse for the slave's acknowledgement.
                self.scl.out_high();
                self.bus_state.set(BusState::ReadAck1);
            }

            BusState::ReadAck1 => {
                // Let SCL stabilize high before sampling.
                if self.scl.input() {
                    self.bus_state.set(BusState::ReadAck2);
                }
            }

            BusState::ReadAck2 => {
                if self.sda.input() {
                    // SDA still high: acknowledgement fault. Fail the
                    // whole exchange and put a stop on the wire.
                    txn.result.set(TxnStatus::Failed);
                    self.bus_state.set(BusState::SendStopBit0);
                    self.txn_phase.set(TxnPhase::Stop);
                    self.current_txn.set(self.n_txns.get());
                } else {
                    if (self.processed.get() as usize) < txn.len.get() as usize {
                        self.txn_phase.set(TxnPhase::TransmitByte);
                        self.bus_state.set(BusState::SclLow);
                    } else {
                        txn.result.set(TxnStatus::Success);
                        self.current_txn.set(self.current_txn.get() + 1);
                        if txn.post.get() == Control::Stop {
                            self.bus_state.set(BusState::SclLow);
                            self.txn_phase.set(TxnPhase::Stop);
                        } else {
                            self.bus_state.set(BusState::Idle);
                            self.txn_phase.set(TxnPhase::Waiting);
                        }
                    }
                    self.scl.out_low();
                }
            }

            BusState::WriteAck0 => {
                self.scl.out_high();
                self.bus_state.set(BusState::WriteAck1);
            }

            BusState::WriteAck1 => {
                self.scl.out_low();
                self.bus_state.set(BusState::WriteAck2);
            }

            BusState::WriteAck2 => {
                // Give SDA back to the slave.
                self.sda.out_high();
                self.bus_state.set(BusState::SclLow);
                self.txn_phase.set(TxnPhase::TransmitByte);
            }

            BusState::SendStopBit0 => {
                self.scl.out_high();
                self.set_bus_state(BusState::SendStopBit1);
            }

            BusState::SendStopBit1 => {
                self.sda.out_high();
                self.set_bus_state(BusState::Idle);
                self.txn_phase.set(TxnPhase::Waiting);
            }
        }
    }
}

/// All software I2C channels of a hub, stepped together from one timer.
pub struct I2cSoftMac<'a, const N: usize> {
    channels: [I2cChannel<'a>; N],
}

impl<'a, const N: usize> I2cSoftMac<'a, N> {
    pub fn new(channels: [I2cChannel<'a>; N]) -> I2cSoftMac<'a, N> {
        I2cSoftMac { channels }
    }

    pub fn channel(&self, index: usize) -> Option<&I2cChannel<'a>> {
        self.channels.get(index)
    }

    /// Timer tick, called at [`I2C_TICK_HZ`] from interrupt context. This
    /// is the only place live transaction state is mutated.
    pub fn tick(&self) {
        for channel in self.channels.iter() {
            channel.step();
        }
    }

    /// Reads `buf.len()` bytes from a register of the device on `channel`.
    /// Non-blocking; poll [`I2cChannel::txn_status`] for the outcome and
    /// collect with [`I2cChannel::read_received`].
    pub fn mem_read(&self, channel: usize, reg: u8, len: usize) -> Result<(), ErrorCode> {
        let ch = self.channels.get(channel).ok_or(ErrorCode::INVAL)?;
        ch.start_transaction(Direction::Read, &[reg], len)
    }

    /// Writes `data` to a register of the device on `channel`.
    pub fn mem_write(&self, channel: usize, reg: u8, data: &[u8]) -> Result<(), ErrorCode> {
        let ch = self.channels.get(channel).ok_or(ErrorCode::INVAL)?;
        if data.len() + 1 > I2C_MAX_DATA_SIZE {
            return Err(ErrorCode::SIZE);
        }
        let mut buf = [0u8; I2C_MAX_DATA_SIZE];
        buf[0] = reg;
        buf[1..1 + data.len()].copy_from_slice(data);
        ch.start_transaction(Direction::Write, &buf[..1 + data.len()], 0)
    }
}
