// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! A scripted UART smart device.
//!
//! Plays the peripheral side of the messaging protocol against the engine
//! under test: announces itself at 2400 baud, waits for the controller's
//! acknowledgement, then answers every keep-alive with the current mode's
//! data and follows mode selections. Tests configure the identity and
//! per-mode data and inspect the counters.

use std::cell::{Cell, RefCell};

use capsules_ports::lump::codec::{
    self, CmdKind, DataType, InfoKind, Message, Payload, SysKind,
};

use crate::uart::SimUart;

/// Static description of one mode of the simulated device.
#[derive(Clone, Copy)]
pub struct SimMode {
    pub name: &'static str,
    pub units: &'static str,
    pub data_type: DataType,
    pub num_values: u8,
    /// Six flag bytes announced with the name, for devices that have
    /// them.
    pub flags: Option<[u8; 6]>,
    pub writable: bool,
}

pub struct LumpSensorSim<'a> {
    uart: &'a SimUart,
    type_id: u8,
    baud: u32,
    modes: Vec<SimMode>,

    current_mode: Cell<u8>,
    ext_mode: Cell<u8>,
    acked: Cell<bool>,
    /// Data blob served for each mode.
    data: RefCell<Vec<Vec<u8>>>,
    rx: RefCell<Vec<u8>>,

    pub nacks_seen: Cell<u32>,
    pub acks_seen: Cell<u32>,
    pub selects_seen: Cell<u32>,
    pub last_write: RefCell<Option<Vec<u8>>>,
}

impl<'a> LumpSensorSim<'a> {
    pub fn new(
        uart: &'a SimUart,
        type_id: u8,
        baud: u32,
        modes: &[SimMode],
    ) -> LumpSensorSim<'a> {
        LumpSensorSim {
            uart,
            type_id,
            baud,
            modes: modes.to_vec(),
            current_mode: Cell::new(0),
            ext_mode: Cell::new(0),
            acked: Cell::new(false),
            data: RefCell::new(vec![Vec::new(); modes.len()]),
            rx: RefCell::new(Vec::new()),
            nacks_seen: Cell::new(0),
            acks_seen: Cell::new(0),
            selects_seen: Cell::new(0),
            last_write: RefCell::new(None),
        }
    }

    pub fn set_mode_data(&self, mode: u8, data: &[u8]) {
        self.data.borrow_mut()[mode as usize] = data.to_vec();
    }

    pub fn current_mode(&self) -> u8 {
        self.current_mode.get()
    }

    pub fn acked(&self) -> bool {
        self.acked.get()
    }

    fn push(&self, msg: &Message) {
        let mut frame = [0u8; codec::MAX_FRAME];
        let n = codec::encode(msg, &mut frame);
        self.uart.peer_write(&frame[..n]);
    }

    /// Queues the whole power-up announcement: sync, identity, one info
    /// block per mode, and the final acknowledgement.
    pub fn announce(&self) {
        self.acked.set(false);
        self.uart.peer_write(&[SysKind::Sync as u8]);

        self.push(&Message::Cmd {
            cmd: CmdKind::Type,
            payload: Payload::new(&[self.type_id]).unwrap(),
        });

        let last = (self.modes.len() - 1) as u8;
        self.push(&Message::Cmd {
            cmd: CmdKind::Modes,
            payload: Payload::new(&[last, last]).unwrap(),
        });

        self.push(&Message::Cmd {
            cmd: CmdKind::Speed,
            payload: Payload::new(&self.baud.to_le_bytes()).unwrap(),
        });

        // Firmware 1.0.0.0, hardware 1.0.0.0, BCD-encoded.
        let mut version = [0u8; 8];
        version[3] = 0x10;
        version[7] = 0x10;
        self.push(&Message::Cmd {
            cmd: CmdKind::Version,
            payload: Payload::new(&version).unwrap(),
        });

        // Devices enumerate their highest mode first.
        for (index, mode) in self.modes.iter().enumerate().rev() {
            let index = index as u8;
            self.push_mode_info(index, mode);
        }

        self.uart.peer_write(&[SysKind::Ack as u8]);
    }

    fn push_mode_info(&self, index: u8, mode: &SimMode) {
        let name_payload: Payload = match mode.flags {
            Some(flags) => {
                let mut p = [0u8; 12];
                let name = mode.name.as_bytes();
                p[..name.len().min(5)].copy_from_slice(&name[..name.len().min(5)]);
                p[6..12].copy_from_slice(&flags);
                Payload::new(&p).unwrap()
            }
            None => Payload::new(&mode.name.as_bytes()[..mode.name.len().min(11)]).unwrap(),
        };
        self.push(&Message::Info {
            mode: index,
            info: InfoKind::Name,
            payload: name_payload,
        });

        let mut range = [0u8; 8];
        range[4..8].copy_from_slice(&1023.0f32.to_le_bytes());
        self.push(&Message::Info {
            mode: index,
            info: InfoKind::Raw,
            payload: Payload::new(&range).unwrap(),
        });
        range[4..8].copy_from_slice(&100.0f32.to_le_bytes());
        self.push(&Message::Info {
            mode: index,
            info: InfoKind::Pct,
            payload: Payload::new(&range).unwrap(),
        });

        if !mode.units.is_empty() {
            self.push(&Message::Info {
                mode: index,
                info: InfoKind::Units,
                payload: Payload::new(mode.units.as_bytes()).unwrap(),
            });
        }

        self.push(&Message::Info {
            mode: index,
            info: InfoKind::Mapping,
            payload: Payload::new(&[0x10, if mode.writable { 0x10 } else { 0 }]).unwrap(),
        });

        self.push(&Message::Info {
            mode: index,
            info: InfoKind::Format,
            payload: Payload::new(&[mode.num_values, mode.data_type as u8, 5, 0]).unwrap(),
        });
    }

    /// Sends the current mode's data message, prefixed with the extended
    /// mode command when the mode is out of the header's reach.
    pub fn send_data_now(&self) {
        let mode = self.current_mode.get();
        let data = self.data.borrow();
        let blob = &data[mode as usize];
        if blob.is_empty() {
            return;
        }
        if mode > codec::MAX_MODE {
            self.push(&Message::Cmd {
                cmd: CmdKind::ExtMode,
                payload: Payload::new(&[8]).unwrap(),
            });
        }
        self.push(&Message::Data {
            mode: mode & codec::MAX_MODE,
            payload: Payload::new(blob).unwrap(),
        });
    }

    /// Consumes controller traffic and reacts to it.
    pub fn step(&self) {
        {
            let mut rx = self.rx.borrow_mut();
            rx.extend(self.uart.peer_take_tx());
        }

        loop {
            let frame = {
                let mut rx = self.rx.borrow_mut();
                if rx.is_empty() {
                    return;
                }
                let need = codec::frame_len(rx[0]);
                if rx.len() < need {
                    return;
                }
                let frame: Vec<u8> = rx.drain(..need).collect();
                frame
            };

            match codec::decode(&frame) {
                Ok(Message::Sys(SysKind::Ack)) => {
                    // Controller accepted our info; both sides are now at
                    // the negotiated rate.
                    self.acked.set(true);
                    self.acks_seen.set(self.acks_seen.get() + 1);
                }
                Ok(Message::Sys(SysKind::Nack)) => {
                    self.nacks_seen.set(self.nacks_seen.get() + 1);
                    self.send_data_now();
                }
                Ok(Message::Cmd { cmd, ref payload }) => match cmd {
                    CmdKind::ExtMode => {
                        self.ext_mode.set(payload.bytes()[0]);
                    }
                    CmdKind::Select => {
                        self.selects_seen.set(self.selects_seen.get() + 1);
                        self.current_mode
                            .set(payload.bytes()[0] + self.ext_mode.get());
                        // A real device starts streaming the new mode
                        // right away.
                        self.send_data_now();
                    }
                    CmdKind::Write => {
                        *self.last_write.borrow_mut() = Some(payload.bytes().to_vec());
                    }
                    _ => {}
                },
                Ok(_) => {}
                Err(e) => {
                    log::warn!("lump peer: controller sent a bad frame ({:?})", e);
                    self.rx.borrow_mut().clear();
                    return;
                }
            }
        }
    }
}
