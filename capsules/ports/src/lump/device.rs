// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! One attached LEGO UART smart device.
//!
//! The engine runs three cooperative machines on behalf of the port
//! process. [`LumpDevice::poll_sync`] performs the 2400-baud handshake
//! where the device announces its type and enumerates its modes, and ends
//! by acknowledging and switching to the negotiated rate.
//! [`LumpDevice::poll_recv`] then consumes the data stream, caching the
//! latest blob per mode and watching for link silence, while
//! [`LumpDevice::poll_send`] transmits the periodic keep-alive and any
//! queued mode selections or data writes. The port process interleaves
//! send and recv on the same step and tears both down when either ends.

use core::cell::Cell;
use core::task::Poll;

use heapless::{String, Vec};
use kernel::hil::motor::Angle;
use kernel::hil::time::{Clock, Timer};
use kernel::hil::uart::UartDevice;
use kernel::utilities::cells::{MapCell, OptionalCell};
use kernel::ErrorCode;

use super::codec::{self, CmdKind, DataType, InfoKind, Message, Payload, Scalar, SysKind};
use crate::ioport::PowerPolicy;
use crate::lego::{self, DeviceTypeId};

/// Baud rate every device synchronizes at before negotiating up.
pub const SYNC_BAUD: u32 = 2400;

/// Give up synchronization after this much line silence.
pub const SYNC_TIMEOUT_MS: u32 = 500;

/// Declare the link lost after this much silence in steady state.
pub const LINK_TIMEOUT_MS: u32 = 200;

/// Keep-alive transmit period. Devices reset themselves when the
/// controller goes quiet for much longer than this.
pub const KEEP_ALIVE_PERIOD_MS: u32 = 100;

/// Modes a single device can expose.
pub const MAX_MODES: usize = codec::MAX_EXT_MODE as usize + 1;

// Mode indices shared by all motors with position feedback.
const MOTOR_MODE_POS: u8 = 2;
const MOTOR_MODE_APOS: u8 = 3;

// Mode flags: group 0 declares the need for battery (not just logic)
// voltage, group 4 whether the device sits across the H-bridge pins.
const FLAGS0_REQUIRES_POWER: u8 = 1 << 6;
const FLAGS4_USES_HBRIDGE: u8 = 1 << 0;

/// Everything a device reports about one mode during synchronization.
#[derive(Clone, Debug)]
pub struct ModeInfo {
    pub name: String<11>,
    pub units: String<4>,
    pub num_values: u8,
    pub data_type: DataType,
    pub digits: u8,
    pub decimals: u8,
    pub raw: (f32, f32),
    pub pct: (f32, f32),
    pub si: (f32, f32),
    pub mapping_in: u8,
    pub mapping_out: u8,
    /// Six flag bytes from the name+flags message variant. Group 5 has
    /// bits of unknown meaning; they are kept but never interpreted.
    pub flags: [u8; 6],
    pub has_flags: bool,
    pub writable: bool,
    /// Set once the format message arrives; a mode without it is
    /// incomplete and fails the handshake.
    pub complete: bool,
}

impl Default for ModeInfo {
    fn default() -> ModeInfo {
        ModeInfo {
            name: String::new(),
            units: String::new(),
            num_values: 0,
            data_type: DataType::I8,
            digits: 0,
            decimals: 0,
            raw: (0.0, 1023.0),
            pct: (0.0, 100.0),
            si: (0.0, 1023.0),
            mapping_in: 0,
            mapping_out: 0,
            flags: [0; 6],
            has_flags: false,
            writable: false,
            complete: false,
        }
    }
}

impl ModeInfo {
    /// Bytes one data message for this mode must carry.
    pub fn data_size(&self) -> usize {
        self.num_values as usize * self.data_type.size()
    }
}

/// Latest data blob received for one mode.
#[derive(Clone, Copy)]
struct ModeData {
    buf: [u8; codec::MAX_PAYLOAD],
    len: u8,
    valid: bool,
}

impl ModeData {
    const EMPTY: ModeData = ModeData {
        buf: [0; codec::MAX_PAYLOAD],
        len: 0,
        valid: false,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SyncPhase {
    /// Draining the line until the sync byte shows up.
    WaitSync,
    /// Collecting type, modes, speed, version and per-mode info.
    Info,
    /// Our acknowledgement is queued; waiting for it to leave the wire
    /// before switching baud.
    AckFlush,
}

/// State for one LEGO UART device attached to a port.
pub struct LumpDevice<'a> {
    clock: &'a dyn Clock,
    /// Keep-alive cadence (send machine).
    keepalive_timer: Timer<'a>,
    /// Sync silence deadline.
    sync_timer: Timer<'a>,

    sync_phase: Cell<SyncPhase>,
    synced: Cell<bool>,

    type_id: Cell<u8>,
    num_modes: Cell<u8>,
    num_view_modes: Cell<u8>,
    target_baud: Cell<u32>,
    fw_version: Cell<u32>,
    hw_version: Cell<u32>,
    modes: MapCell<Vec<ModeInfo, MAX_MODES>>,
    current_mode: Cell<u8>,

    // Frame assembly off the byte stream.
    rx_buf: Cell<[u8; codec::MAX_FRAME]>,
    rx_len: Cell<usize>,
    /// Extended-mode offset last announced by the device for its data.
    rx_ext_mode: Cell<u8>,

    data: Cell<[ModeData; MAX_MODES]>,
    last_rx_us: Cell<u64>,
    /// Data received for the currently selected mode since selection.
    awaiting_new_data: Cell<bool>,

    pending_select: OptionalCell<u8>,
    pending_write: OptionalCell<([u8; codec::MAX_PAYLOAD], u8)>,
}

impl<'a> LumpDevice<'a> {
    pub fn new(clock: &'a dyn Clock) -> LumpDevice<'a> {
        LumpDevice {
            clock,
            keepalive_timer: Timer::new(clock),
            sync_timer: Timer::new(clock),
            sync_phase: Cell::new(SyncPhase::WaitSync),
            synced: Cell::new(false),
            type_id: Cell::new(0),
            num_modes: Cell::new(0),
            num_view_modes: Cell::new(0),
            target_baud: Cell::new(SYNC_BAUD),
            fw_version: Cell::new(0),
            hw_version: Cell::new(0),
            modes: MapCell::new(Vec::new()),
            current_mode: Cell::new(0),
            rx_buf: Cell::new([0; codec::MAX_FRAME]),
            rx_len: Cell::new(0),
            rx_ext_mode: Cell::new(0),
            data: Cell::new([ModeData::EMPTY; MAX_MODES]),
            last_rx_us: Cell::new(0),
            awaiting_new_data: Cell::new(false),
            pending_select: OptionalCell::empty(),
            pending_write: OptionalCell::empty(),
        }
    }

    /// Begins a fresh handshake. The port process calls this right after
    /// the connection manager saw a UART device and the pins were muxed
    /// over.
    pub fn start_sync(&self, uart: &dyn UartDevice) {
        self.synced.set(false);
        self.type_id.set(0);
        self.num_modes.set(0);
        self.num_view_modes.set(0);
        self.target_baud.set(SYNC_BAUD);
        self.modes.map(|modes| modes.clear());
        self.current_mode.set(0);
        self.rx_len.set(0);
        self.rx_ext_mode.set(0);
        self.data.set([ModeData::EMPTY; MAX_MODES]);
        self.pending_select.clear();
        self.pending_write.clear();
        self.sync_phase.set(SyncPhase::WaitSync);
        self.sync_timer.set_ms(SYNC_TIMEOUT_MS);
        uart.set_baud(SYNC_BAUD);
        uart.flush();
    }

    /// Drops the synchronized device state without touching the UART.
    /// Used when the port leaves LEGO mode while a device is attached.
    pub fn invalidate(&self) {
        self.synced.set(false);
        self.pending_select.clear();
        self.pending_write.clear();
        self.rx_len.set(0);
    }

    /// Prepares the steady-state exchange after a successful handshake.
    pub fn start_data(&self) {
        self.rx_len.set(0);
        self.rx_ext_mode.set(0);
        self.last_rx_us.set(self.clock.now_us());
        // First keep-alive goes out immediately.
        self.keepalive_timer.set_us(0);
    }

    /// Pulls one complete frame off the UART, if enough bytes arrived.
    fn rx_pump(&self, uart: &dyn UartDevice) -> Option<Result<Message, codec::DecodeError>> {
        while let Some(byte) = uart.recv_byte() {
            // Any line activity resets the silence deadline.
            self.sync_timer.set_ms(SYNC_TIMEOUT_MS);

            let mut buf = self.rx_buf.get();
            let mut len = self.rx_len.get();
            buf[len] = byte;
            len += 1;

            let need = codec::frame_len(buf[0]);
            if len >= need {
                self.rx_len.set(0);
                self.rx_buf.set(buf);
                return Some(codec::decode(&buf[..need]));
            }
            self.rx_len.set(len);
            self.rx_buf.set(buf);
        }
        None
    }

    fn with_mode_slot<R>(&self, mode: u8, f: impl FnOnce(&mut ModeInfo) -> R) -> Option<R> {
        if mode as usize >= MAX_MODES {
            return None;
        }
        self.modes.map(|modes| {
            while modes.len() <= mode as usize {
                let _ = modes.push(ModeInfo::default());
            }
            f(&mut modes[mode as usize])
        })
    }

    /// Applies one handshake message. Returns `Ok(true)` when the device
    /// acknowledged and the handshake can complete.
    fn apply_sync_message(&self, msg: &Message) -> Result<bool, ErrorCode> {
        match *msg {
            Message::Sys(SysKind::Sync) => Ok(false),
            Message::Sys(SysKind::Ack) => {
                if self.type_id.get() == 0 || self.num_modes.get() == 0 {
                    log::warn!("lump: ack before type or modes");
                    return Err(ErrorCode::IO);
                }
                let all_complete = self.modes.map_or(false, |modes| {
                    modes.len() == self.num_modes.get() as usize
                        && modes.iter().all(|m| m.complete)
                });
                if !all_complete {
                    log::warn!("lump: ack with incomplete mode info");
                    return Err(ErrorCode::IO);
                }
                Ok(true)
            }
            Message::Cmd { cmd, ref payload } => {
                let p = payload.bytes();
                match cmd {
                    CmdKind::Type => {
                        if p[0] == 0 {
                            return Err(ErrorCode::IO);
                        }
                        self.type_id.set(p[0]);
                    }
                    CmdKind::Modes => {
                        // Payload bytes are the *last* index, not counts.
                        // The 4-byte variant's trailing pair is not
                        // limited to mode 7.
                        let (modes, views) = match p.len() {
                            1 => (p[0] as usize + 1, p[0] as usize + 1),
                            2 => (p[0] as usize + 1, p[1] as usize + 1),
                            _ => (p[2] as usize + 1, p[3] as usize + 1),
                        };
                        if modes > MAX_MODES || views > modes {
                            return Err(ErrorCode::IO);
                        }
                        self.num_modes.set(modes as u8);
                        self.num_view_modes.set(views as u8);
                    }
                    CmdKind::Speed => {
                        if p.len() < 4 {
                            return Err(ErrorCode::IO);
                        }
                        self.target_baud
                            .set(u32::from_le_bytes([p[0], p[1], p[2], p[3]]));
                    }
                    CmdKind::Version => {
                        if p.len() >= 8 {
                            self.fw_version
                                .set(u32::from_le_bytes([p[0], p[1], p[2], p[3]]));
                            self.hw_version
                                .set(u32::from_le_bytes([p[4], p[5], p[6], p[7]]));
                        }
                    }
                    _ => {
                        log::warn!("lump: unexpected command {:?} during sync", cmd);
                    }
                }
                Ok(false)
            }
            Message::Info {
                mode,
                info,
                ref payload,
            } => {
                let p = payload.bytes();
                let applied = self.with_mode_slot(mode, |slot| match info {
                    InfoKind::Name => {
                        slot.name.clear();
                        // Newer devices pack six flag bytes after a short,
                        // zero-terminated name.
                        if p.len() >= 12 && p[5] == 0 {
                            for &b in p[..5].iter().take_while(|&&b| b != 0) {
                                let _ = slot.name.push(b as char);
                            }
                            slot.flags.copy_from_slice(&p[6..12]);
                            slot.has_flags = true;
                        } else {
                            for &b in p.iter().take(11).take_while(|&&b| b != 0) {
                                let _ = slot.name.push(b as char);
                            }
                        }
                        true
                    }
                    InfoKind::Raw => {
                        slot.raw = parse_range(p);
                        true
                    }
                    InfoKind::Pct => {
                        slot.pct = parse_range(p);
                        true
                    }
                    InfoKind::Si => {
                        slot.si = parse_range(p);
                        true
                    }
                    InfoKind::Units => {
                        slot.units.clear();
                        for &b in p.iter().take(4).take_while(|&&b| b != 0) {
                            let _ = slot.units.push(b as char);
                        }
                        true
                    }
                    InfoKind::Mapping => {
                        slot.mapping_in = p[0];
                        slot.mapping_out = if p.len() > 1 { p[1] } else { 0 };
                        slot.writable = slot.mapping_out != 0;
                        true
                    }
                    InfoKind::ModeCombos => true,
                    InfoKind::Format => {
                        if p.len() < 4 {
                            return false;
                        }
                        slot.num_values = p[0];
                        slot.data_type = match num_traits::FromPrimitive::from_u8(p[1]) {
                            Some(t) => t,
                            None => return false,
                        };
                        slot.digits = p[2];
                        slot.decimals = p[3];
                        slot.complete = slot.num_values > 0;
                        slot.complete
                    }
                });
                match applied {
                    Some(true) => Ok(false),
                    _ => {
                        log::warn!("lump: bad info message for mode {}", mode);
                        Err(ErrorCode::IO)
                    }
                }
            }
            Message::Data { .. } => {
                // Early data before the handshake finishes; harmless.
                Ok(false)
            }
            Message::Sys(_) => Ok(false),
        }
    }

    /// Runs the handshake. Resolves `Ok` once the device is enumerated and
    /// both sides switched to the negotiated baud rate, `Err` when the
    /// line is silent, garbled, or inconsistent; the caller then falls
    /// back to device detection.
    pub fn poll_sync(&self, uart: &dyn UartDevice) -> Poll<Result<(), ErrorCode>> {
        loop {
            match self.sync_phase.get() {
                SyncPhase::WaitSync => match uart.recv_byte() {
                    Some(0x00) => {
                        self.sync_timer.set_ms(SYNC_TIMEOUT_MS);
                        self.sync_phase.set(SyncPhase::Info);
                    }
                    Some(_) => continue,
                    None => {
                        if self.sync_timer.expired() {
                            return Poll::Ready(Err(ErrorCode::TIMEDOUT));
                        }
                        return Poll::Pending;
                    }
                },

                SyncPhase::Info => match self.rx_pump(uart) {
                    Some(Ok(msg)) => match self.apply_sync_message(&msg) {
                        Ok(false) => continue,
                        Ok(true) => {
                            // Acknowledge and drain our side at 2400
                            // before the rate changes.
                            if uart.send(&[SysKind::Ack as u8]).is_err() {
                                return Poll::Ready(Err(ErrorCode::IO));
                            }
                            self.sync_phase.set(SyncPhase::AckFlush);
                        }
                        Err(e) => return Poll::Ready(Err(e)),
                    },
                    Some(Err(e)) => {
                        log::warn!("lump: sync framing error {:?}", e);
                        return Poll::Ready(Err(ErrorCode::IO));
                    }
                    None => {
                        if self.sync_timer.expired() {
                            return Poll::Ready(Err(ErrorCode::TIMEDOUT));
                        }
                        return Poll::Pending;
                    }
                },

                SyncPhase::AckFlush => {
                    if !uart.tx_idle() {
                        return Poll::Pending;
                    }
                    uart.set_baud(self.target_baud.get());
                    self.synced.set(true);
                    log::info!(
                        "lump: synced type {} with {} modes at {} baud",
                        self.type_id.get(),
                        self.num_modes.get(),
                        self.target_baud.get()
                    );
                    return Poll::Ready(Ok(()));
                }
            }
        }
    }

    /// Consumes the steady-state data stream. Resolves when the device
    /// goes silent for [`LINK_TIMEOUT_MS`]; the caller treats that as a
    /// disconnect.
    pub fn poll_recv(&self, uart: &dyn UartDevice) -> Poll<()> {
        loop {
            match self.rx_pump(uart) {
                Some(Ok(msg)) => {
                    self.last_rx_us.set(self.clock.now_us());
                    match msg {
                        Message::Data { mode, ref payload } => {
                            self.store_data(mode + self.rx_ext_mode.get(), payload);
                        }
                        Message::Cmd { cmd, ref payload } => {
                            if cmd == CmdKind::ExtMode {
                                let ext = payload.bytes()[0];
                                if ext == 0 || ext == 8 {
                                    self.rx_ext_mode.set(ext);
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Some(Err(e)) => {
                    // Bad frame: drop it and stay on the stream.
                    log::warn!("lump: dropped frame ({:?})", e);
                }
                None => {
                    let silence_us =
                        self.clock.now_us().wrapping_sub(self.last_rx_us.get());
                    if silence_us > LINK_TIMEOUT_MS as u64 * 1000 {
                        log::info!("lump: signal lost");
                        self.synced.set(false);
                        return Poll::Ready(());
                    }
                    return Poll::Pending;
                }
            }
        }
    }

    /// Transmit side of the steady state: keep-alives plus queued mode
    /// selections and data writes. Resolves only on a transmit error,
    /// which the caller treats like a lost link.
    pub fn poll_send(&self, uart: &dyn UartDevice) -> Poll<Result<(), ErrorCode>> {
        let mut frame = [0u8; codec::MAX_FRAME];

        if let Some(mode) = self.pending_select.take() {
            let ext = if mode > codec::MAX_MODE { 8 } else { 0 };
            let n = codec::encode(
                &Message::Cmd {
                    cmd: CmdKind::ExtMode,
                    payload: Payload::new(&[ext]).unwrap(),
                },
                &mut frame,
            );
            if uart.send(&frame[..n]).is_err() {
                return Poll::Ready(Err(ErrorCode::IO));
            }
            let n = codec::encode(
                &Message::Cmd {
                    cmd: CmdKind::Select,
                    payload: Payload::new(&[mode & codec::MAX_MODE]).unwrap(),
                },
                &mut frame,
            );
            if uart.send(&frame[..n]).is_err() {
                return Poll::Ready(Err(ErrorCode::IO));
            }
            self.current_mode.set(mode);
            self.awaiting_new_data.set(true);
        }

        if let Some((data, len)) = self.pending_write.take() {
            let n = codec::encode(
                &Message::Cmd {
                    cmd: CmdKind::Write,
                    payload: Payload::new(&data[..len as usize]).unwrap(),
                },
                &mut frame,
            );
            if uart.send(&frame[..n]).is_err() {
                return Poll::Ready(Err(ErrorCode::IO));
            }
        }

        if self.keepalive_timer.expired() {
            if uart.send(&[SysKind::Nack as u8]).is_err() {
                return Poll::Ready(Err(ErrorCode::IO));
            }
            self.keepalive_timer.set_ms(KEEP_ALIVE_PERIOD_MS);
        }

        Poll::Pending
    }

    fn store_data(&self, mode: u8, payload: &Payload) {
        if mode >= self.num_modes.get() {
            log::warn!("lump: data for unknown mode {}", mode);
            return;
        }
        // The padded wire size must cover the declared format.
        let needed = self
            .with_mode_info(mode, |info| info.data_size())
            .unwrap_or(0);
        if payload.len() < needed {
            log::warn!("lump: short data for mode {}", mode);
            return;
        }
        let mut table = self.data.get();
        let slot = &mut table[mode as usize];
        slot.buf[..payload.len()].copy_from_slice(payload.bytes());
        slot.len = payload.len() as u8;
        slot.valid = true;
        self.data.set(table);
        if mode == self.current_mode.get() {
            self.awaiting_new_data.set(false);
        }
    }

    // --- Introspection and control, used by the port getters. ---

    pub fn synced(&self) -> bool {
        self.synced.get()
    }

    pub fn type_id(&self) -> u8 {
        self.type_id.get()
    }

    pub fn num_modes(&self) -> u8 {
        self.num_modes.get()
    }

    pub fn num_view_modes(&self) -> u8 {
        self.num_view_modes.get()
    }

    pub fn current_mode(&self) -> u8 {
        self.current_mode.get()
    }

    pub fn baud(&self) -> u32 {
        self.target_baud.get()
    }

    pub fn versions(&self) -> (u32, u32) {
        (self.fw_version.get(), self.hw_version.get())
    }

    /// True once data for the selected mode has arrived.
    pub fn is_ready(&self) -> bool {
        self.synced.get() && !self.awaiting_new_data.get()
    }

    /// Runs a closure over the info of one mode.
    pub fn with_mode_info<R>(&self, mode: u8, f: impl FnOnce(&ModeInfo) -> R) -> Option<R> {
        if mode >= self.num_modes.get() {
            return None;
        }
        self.modes.map(|modes| {
            modes.get(mode as usize).map(|info| f(info))
        })?
    }

    /// Checks the attached device against an expected type id, resolving
    /// category wildcards. On success `expected` is set to the actual id.
    pub fn assert_type_id(&self, expected: &mut u8) -> Result<(), ErrorCode> {
        if !self.synced.get() {
            return Err(ErrorCode::NODEV);
        }
        let actual = self.type_id.get();
        let matches = if *expected == DeviceTypeId::AnyLumpUart as u8 {
            true
        } else if *expected == DeviceTypeId::AnyEncodedMotor as u8 {
            lego::is_encoded_motor(actual)
        } else if *expected == DeviceTypeId::AnyDcMotor as u8 {
            lego::is_dc_output(actual)
        } else {
            *expected == actual
        };
        if matches {
            *expected = actual;
            Ok(())
        } else {
            Err(ErrorCode::NODEV)
        }
    }

    /// Queues a mode switch; the send machine emits the extended-mode and
    /// select commands on its next step.
    pub fn set_mode(&self, mode: u8) -> Result<(), ErrorCode> {
        if !self.synced.get() {
            return Err(ErrorCode::NODEV);
        }
        if mode >= self.num_modes.get() {
            return Err(ErrorCode::INVAL);
        }
        self.pending_select.set(mode);
        Ok(())
    }

    /// Queues a data write to the currently selected mode.
    pub fn write_mode_data(&self, data: &[u8]) -> Result<(), ErrorCode> {
        if !self.synced.get() {
            return Err(ErrorCode::NODEV);
        }
        if data.is_empty() || data.len() > codec::MAX_PAYLOAD {
            return Err(ErrorCode::SIZE);
        }
        let writable = self
            .with_mode_info(self.current_mode.get(), |info| info.writable)
            .unwrap_or(false);
        if !writable {
            return Err(ErrorCode::NOSUPPORT);
        }
        let mut buf = [0u8; codec::MAX_PAYLOAD];
        buf[..data.len()].copy_from_slice(data);
        self.pending_write.set((buf, data.len() as u8));
        Ok(())
    }

    /// Runs a closure over the latest data blob for a mode.
    pub fn with_data<R>(
        &self,
        mode: u8,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, ErrorCode> {
        if !self.synced.get() {
            return Err(ErrorCode::NODEV);
        }
        if mode as usize >= MAX_MODES {
            return Err(ErrorCode::INVAL);
        }
        let table = self.data.get();
        let slot = &table[mode as usize];
        if !slot.valid {
            return Err(ErrorCode::AGAIN);
        }
        Ok(f(&slot.buf[..slot.len as usize]))
    }

    /// Decodes one value of a mode's data using its declared type.
    pub fn read_value(&self, mode: u8, index: usize) -> Result<Scalar, ErrorCode> {
        let data_type = self
            .with_mode_info(mode, |info| info.data_type)
            .ok_or(ErrorCode::INVAL)?;
        self.with_data(mode, |data| codec::decode_value(data, data_type, index))?
            .ok_or(ErrorCode::SIZE)
    }

    /// Power the attached device asks for, from its mode flags.
    pub fn power_requirements(&self) -> PowerPolicy {
        if !self.synced.get() {
            return PowerPolicy::None;
        }
        self.modes.map_or(PowerPolicy::None, |modes| {
            for info in modes.iter().filter(|m| m.has_flags) {
                if info.flags[0] & FLAGS0_REQUIRES_POWER != 0 {
                    // The H-bridge flag picks the supply orientation;
                    // observed powered devices default to pin 2 positive.
                    return if info.flags[4] & FLAGS4_USES_HBRIDGE != 0 {
                        PowerPolicy::BatteryToP1Pos
                    } else {
                        PowerPolicy::BatteryToP2Pos
                    };
                }
            }
            PowerPolicy::None
        })
    }

    /// Accumulated angle reported by a motor, from its position mode.
    pub fn angle(&self) -> Result<Angle, ErrorCode> {
        if !self.synced.get() || !lego::is_encoded_motor(self.type_id.get()) {
            return Err(ErrorCode::NODEV);
        }
        let mdeg = self
            .read_value(MOTOR_MODE_POS, 0)?
            .to_i32()
            .ok_or(ErrorCode::FAIL)?;
        Ok(Angle::from_millidegrees(mdeg as i64))
    }

    /// Absolute shaft angle reported by a motor, when it has that mode.
    pub fn abs_angle(&self) -> Result<Angle, ErrorCode> {
        if !self.synced.get() || !lego::is_encoded_motor(self.type_id.get()) {
            return Err(ErrorCode::NODEV);
        }
        if self.num_modes.get() <= MOTOR_MODE_APOS {
            return Err(ErrorCode::NOSUPPORT);
        }
        let mdeg = self
            .read_value(MOTOR_MODE_APOS, 0)?
            .to_i32()
            .ok_or(ErrorCode::FAIL)?;
        Ok(Angle::from_millidegrees(mdeg as i64))
    }
}

fn parse_range(p: &[u8]) -> (f32, f32) {
    if p.len() < 8 {
        return (0.0, 0.0);
    }
    (
        f32::from_le_bytes([p[0], p[1], p[2], p[3]]),
        f32::from_le_bytes([p[4], p[5], p[6], p[7]]),
    )
}

impl core::fmt::Debug for LumpDevice<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LumpDevice")
            .field("synced", &self.synced.get())
            .field("type_id", &self.type_id.get())
            .field("num_modes", &self.num_modes.get())
            .field("mode", &self.current_mode.get())
            .finish()
    }
}
