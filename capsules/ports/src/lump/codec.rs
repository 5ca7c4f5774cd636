// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2024.

//! Byte-level framing for the LEGO UART Messaging Protocol.
//!
//! Every message starts with one header byte:
//!
//! ```text
//!   7 6   5 4 3   2 1 0
//!  [type][ size ][cmd/mode]
//! ```
//!
//! `type` selects system/command/info/data, `size` encodes the payload
//! length as a power of two (1..=32 bytes), and the low bits carry the
//! command id or the mode number. System messages are the bare header;
//! everything else is followed by the payload (info messages insert an
//! info-type byte first) and a final XOR checksum.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Largest message payload, in bytes.
pub const MAX_PAYLOAD: usize = 32;

/// Largest encoded frame: header, info-type byte, payload, checksum.
pub const MAX_FRAME: usize = 1 + 1 + MAX_PAYLOAD + 1;

/// Highest mode index reachable without the extended mode command.
pub const MAX_MODE: u8 = 7;

/// Highest mode index reachable with the extended mode command.
pub const MAX_EXT_MODE: u8 = 15;

const MSG_TYPE_MASK: u8 = 0xC0;
const MSG_SIZE_MASK: u8 = 0x38;
const MSG_CMD_MASK: u8 = 0x07;

/// Info-type flag marking the mode as 8 plus the header mode bits.
pub const INFO_MODE_PLUS_8: u8 = 0x20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum MsgType {
    Sys = 0,
    Cmd = 1,
    Info = 2,
    Data = 3,
}

/// System messages, sent as a bare header byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum SysKind {
    /// First byte a device emits on power up, at 2400 baud.
    Sync = 0x0,
    /// Keep-alive. The controller must send this periodically or the
    /// device resets itself.
    Nack = 0x2,
    /// Handshake acknowledgement, sent by both sides.
    Ack = 0x4,
    /// Defined by the protocol but never observed.
    Esc = 0x6,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum CmdKind {
    /// Device type id, 1 byte.
    Type = 0x0,
    /// Mode counts: 1, 2, or 4 bytes.
    Modes = 0x1,
    /// Negotiated baud rate, 4 bytes little-endian (an 8-byte variant
    /// exists whose trailing word quiets the Color-Distance sensor's
    /// light show during sync).
    Speed = 0x2,
    /// Select the mode in the low 3 bits; combined with `ExtMode`.
    Select = 0x3,
    /// Write mode data to the device.
    Write = 0x4,
    /// Unknown, seen from some newer devices.
    Unk1 = 0x5,
    /// Extended mode: payload 0 or 8, added to the next `Select`.
    ExtMode = 0x6,
    /// Firmware and hardware versions, 8 bytes BCD.
    Version = 0x7,
}

/// Mode-information message types, carried in the byte after the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum InfoKind {
    Name = 0x00,
    Raw = 0x01,
    Pct = 0x02,
    Si = 0x03,
    Units = 0x04,
    Mapping = 0x05,
    ModeCombos = 0x06,
    /// Always the last info message for a mode: value count, data type,
    /// display digits, decimals.
    Format = 0x80,
}

/// Data types used in mode data, from the format message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum DataType {
    I8 = 0x00,
    I16 = 0x01,
    I32 = 0x02,
    F32 = 0x03,
}

impl DataType {
    pub fn size(&self) -> usize {
        match self {
            DataType::I8 => 1,
            DataType::I16 => 2,
            DataType::I32 => 4,
            DataType::F32 => 4,
        }
    }
}

/// A single decoded value from a mode data blob.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    I8(i8),
    I16(i16),
    I32(i32),
    F32(f32),
}

impl Scalar {
    /// The value widened to `i32`, for integer types.
    pub fn to_i32(&self) -> Option<i32> {
        match *self {
            Scalar::I8(v) => Some(v as i32),
            Scalar::I16(v) => Some(v as i32),
            Scalar::I32(v) => Some(v),
            Scalar::F32(_) => None,
        }
    }
}

/// A parsed message. Payloads are padded out to their encoded power-of-two
/// length with zeros, exactly as they travel on the wire.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Message {
    Sys(SysKind),
    Cmd {
        cmd: CmdKind,
        payload: Payload,
    },
    /// Mode info during sync. `mode` already includes the plus-8 flag.
    Info {
        mode: u8,
        info: InfoKind,
        payload: Payload,
    },
    /// Mode data. `mode` is the raw header value 0..=7; the receiver
    /// combines it with the extended mode it last saw.
    Data {
        mode: u8,
        payload: Payload,
    },
}

/// Fixed-capacity payload storage.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Payload {
    buf: [u8; MAX_PAYLOAD],
    len: u8,
}

impl Payload {
    pub fn new(data: &[u8]) -> Option<Payload> {
        if data.len() > MAX_PAYLOAD {
            return None;
        }
        let mut buf = [0; MAX_PAYLOAD];
        buf[..data.len()].copy_from_slice(data);
        Some(Payload {
            buf,
            len: data.len() as u8,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }
}

/// Reasons a frame fails to decode. All of them are recovered by dropping
/// the frame and resynchronizing on the byte stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    Truncated,
    BadChecksum,
    BadHeader,
}

/// XOR checksum over everything before it in the frame.
pub fn checksum(frame_without_checksum: &[u8]) -> u8 {
    frame_without_checksum.iter().fold(0xFF, |c, b| c ^ b)
}

/// Encoded payload length for `len` bytes: the next power of two, max 32.
pub fn padded_len(len: usize) -> usize {
    let mut padded = 1;
    while padded < len {
        padded *= 2;
    }
    padded
}

fn size_code(padded: usize) -> u8 {
    match padded {
        1 => 0,
        2 => 1,
        4 => 2,
        8 => 3,
        16 => 4,
        _ => 5,
    }
}

/// Payload length encoded in a header byte.
pub fn header_payload_len(header: u8) -> usize {
    1 << ((header & MSG_SIZE_MASK) >> 3)
}

/// Total frame length implied by a header byte: 1 for system messages,
/// otherwise header + optional info-type byte + payload + checksum.
pub fn frame_len(header: u8) -> usize {
    match (header & MSG_TYPE_MASK) >> 6 {
        0 => 1,
        2 => 2 + header_payload_len(header) + 1,
        _ => 1 + header_payload_len(header) + 1,
    }
}

/// Encodes `msg` into `out`, returning the number of bytes written.
///
/// `out` must hold at least [`MAX_FRAME`] bytes. Payloads shorter than
/// their padded length are zero-filled.
pub fn encode(msg: &Message, out: &mut [u8]) -> usize {
    match msg {
        Message::Sys(kind) => {
            out[0] = *kind as u8;
            1
        }
        Message::Cmd { cmd, payload } => {
            let padded = padded_len(payload.len().max(1));
            out[0] = ((MsgType::Cmd as u8) << 6) | (size_code(padded) << 3) | (*cmd as u8);
            out[1..1 + padded].fill(0);
            out[1..1 + payload.len()].copy_from_slice(payload.bytes());
            out[1 + padded] = checksum(&out[..1 + padded]);
            1 + padded + 1
        }
        Message::Info {
            mode,
            info,
            payload,
        } => {
            let padded = padded_len(payload.len().max(1));
            out[0] = ((MsgType::Info as u8) << 6) | (size_code(padded) << 3) | (mode & MSG_CMD_MASK);
            out[1] = (*info as u8) | if *mode > MAX_MODE { INFO_MODE_PLUS_8 } else { 0 };
            out[2..2 + padded].fill(0);
            out[2..2 + payload.len()].copy_from_slice(payload.bytes());
            out[2 + padded] = checksum(&out[..2 + padded]);
            2 + padded + 1
        }
        Message::Data { mode, payload } => {
            let padded = padded_len(payload.len().max(1));
            out[0] = ((MsgType::Data as u8) << 6) | (size_code(padded) << 3) | (mode & MSG_CMD_MASK);
            out[1..1 + padded].fill(0);
            out[1..1 + payload.len()].copy_from_slice(payload.bytes());
            out[1 + padded] = checksum(&out[..1 + padded]);
            1 + padded + 1
        }
    }
}

/// Decodes one complete frame.
///
/// `frame` must be exactly `frame_len(frame[0])` bytes; the caller
/// assembles that many bytes off the UART before calling in.
pub fn decode(frame: &[u8]) -> Result<Message, DecodeError> {
    if frame.is_empty() {
        return Err(DecodeError::Truncated);
    }
    let header = frame[0];
    if frame.len() < frame_len(header) {
        return Err(DecodeError::Truncated);
    }
    let msg_type = MsgType::from_u8((header & MSG_TYPE_MASK) >> 6).ok_or(DecodeError::BadHeader)?;

    if msg_type == MsgType::Sys {
        let kind = SysKind::from_u8(header & MSG_CMD_MASK).ok_or(DecodeError::BadHeader)?;
        return Ok(Message::Sys(kind));
    }

    let total = frame_len(header);
    if checksum(&frame[..total - 1]) != frame[total - 1] {
        return Err(DecodeError::BadChecksum);
    }

    let payload_len = header_payload_len(header);
    match msg_type {
        MsgType::Cmd => {
            let cmd = CmdKind::from_u8(header & MSG_CMD_MASK).ok_or(DecodeError::BadHeader)?;
            let payload = Payload::new(&frame[1..1 + payload_len]).ok_or(DecodeError::BadHeader)?;
            Ok(Message::Cmd { cmd, payload })
        }
        MsgType::Info => {
            let info_byte = frame[1];
            let info =
                InfoKind::from_u8(info_byte & !INFO_MODE_PLUS_8).ok_or(DecodeError::BadHeader)?;
            let mode = (header & MSG_CMD_MASK)
                + if info_byte & INFO_MODE_PLUS_8 != 0 {
                    8
                } else {
                    0
                };
            let payload = Payload::new(&frame[2..2 + payload_len]).ok_or(DecodeError::BadHeader)?;
            Ok(Message::Info {
                mode,
                info,
                payload,
            })
        }
        MsgType::Data => {
            let payload = Payload::new(&frame[1..1 + payload_len]).ok_or(DecodeError::BadHeader)?;
            Ok(Message::Data {
                mode: header & MSG_CMD_MASK,
                payload,
            })
        }
        MsgType::Sys => unreachable!(),
    }
}

/// Decodes one scalar of `data_type` at `index` from a mode data blob.
pub fn decode_value(data: &[u8], data_type: DataType, index: usize) -> Option<Scalar> {
    let size = data_type.size();
    let offset = index * size;
    if offset + size > data.len() {
        return None;
    }
    let bytes = &data[offset..offset + size];
    Some(match data_type {
        DataType::I8 => Scalar::I8(bytes[0] as i8),
        DataType::I16 => Scalar::I16(i16::from_le_bytes([bytes[0], bytes[1]])),
        DataType::I32 => Scalar::I32(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        DataType::F32 => Scalar::F32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_examples() {
        let mut out = [0u8; MAX_FRAME];

        // Sync and keep-alive are bare headers.
        assert_eq!(encode(&Message::Sys(SysKind::Sync), &mut out), 1);
        assert_eq!(out[0], 0x00);
        assert_eq!(encode(&Message::Sys(SysKind::Nack), &mut out), 1);
        assert_eq!(out[0], 0x02);
        assert_eq!(encode(&Message::Sys(SysKind::Ack), &mut out), 1);
        assert_eq!(out[0], 0x04);

        // Type id 38 (Interactive Motor).
        let n = encode(
            &Message::Cmd {
                cmd: CmdKind::Type,
                payload: Payload::new(&[0x26]).unwrap(),
            },
            &mut out,
        );
        assert_eq!(&out[..n], &[0x40, 0x26, 0x99]);

        // Select mode 2.
        let n = encode(
            &Message::Cmd {
                cmd: CmdKind::Select,
                payload: Payload::new(&[0x02]).unwrap(),
            },
            &mut out,
        );
        assert_eq!(&out[..n], &[0x43, 0x02, 0xBE]);

        // Extended mode 0.
        let n = encode(
            &Message::Cmd {
                cmd: CmdKind::ExtMode,
                payload: Payload::new(&[0x00]).unwrap(),
            },
            &mut out,
        );
        assert_eq!(&out[..n], &[0x46, 0x00, 0xB9]);

        // Data, mode 0, one byte 0x17.
        let n = encode(
            &Message::Data {
                mode: 0,
                payload: Payload::new(&[0x17]).unwrap(),
            },
            &mut out,
        );
        assert_eq!(&out[..n], &[0xC0, 0x17, 0x28]);
    }

    #[test]
    fn round_trip_all_sizes() {
        let mut out = [0u8; MAX_FRAME];
        for size_code in 0..6u8 {
            let len = 1usize << size_code;
            let payload_bytes: Vec<u8> = (0..len as u8).map(|b| b.wrapping_mul(37)).collect();
            let payload = Payload::new(&payload_bytes).unwrap();

            for cmd in [
                CmdKind::Type,
                CmdKind::Modes,
                CmdKind::Speed,
                CmdKind::Select,
                CmdKind::Write,
                CmdKind::Unk1,
                CmdKind::ExtMode,
                CmdKind::Version,
            ] {
                let msg = Message::Cmd { cmd, payload };
                let n = encode(&msg, &mut out);
                assert_eq!(n, frame_len(out[0]));
                assert_eq!(decode(&out[..n]), Ok(msg));
            }

            for mode in 0..8u8 {
                let msg = Message::Data { mode, payload };
                let n = encode(&msg, &mut out);
                assert_eq!(decode(&out[..n]), Ok(msg));
            }

            for mode in [0u8, 3, 7, 8, 11, 15] {
                let msg = Message::Info {
                    mode,
                    info: InfoKind::Name,
                    payload,
                };
                let n = encode(&msg, &mut out);
                assert_eq!(decode(&out[..n]), Ok(msg));
            }
        }
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut out = [0u8; MAX_FRAME];
        let n = encode(
            &Message::Cmd {
                cmd: CmdKind::Type,
                payload: Payload::new(&[0x25]).unwrap(),
            },
            &mut out,
        );
        out[n - 1] ^= 0x01;
        assert_eq!(decode(&out[..n]), Err(DecodeError::BadChecksum));
    }

    #[test]
    fn info_mode_plus_8_flag() {
        let mut out = [0u8; MAX_FRAME];
        let msg = Message::Info {
            mode: 10,
            info: InfoKind::Format,
            payload: Payload::new(&[2, 1, 4, 0]).unwrap(),
        };
        let n = encode(&msg, &mut out);
        // Header carries mode & 7, the info byte carries the flag.
        assert_eq!(out[0] & 0x07, 2);
        assert_eq!(out[1] & INFO_MODE_PLUS_8, INFO_MODE_PLUS_8);
        assert_eq!(decode(&out[..n]), Ok(msg));
    }

    #[test]
    fn short_payload_pads_to_power_of_two() {
        let mut out = [0u8; MAX_FRAME];
        let n = encode(
            &Message::Cmd {
                cmd: CmdKind::Write,
                payload: Payload::new(&[1, 2, 3]).unwrap(),
            },
            &mut out,
        );
        // 3 bytes encode as 4 with a zero pad.
        assert_eq!(n, 1 + 4 + 1);
        assert_eq!(out[4], 0);
    }

    #[test]
    fn decode_value_types() {
        let data = [0xFE, 0xFF, 0x00, 0x00];
        assert_eq!(
            decode_value(&data, DataType::I8, 0),
            Some(Scalar::I8(-2i8))
        );
        assert_eq!(
            decode_value(&data, DataType::I16, 0),
            Some(Scalar::I16(-2i16))
        );
        assert_eq!(
            decode_value(&data, DataType::I32, 0),
            Some(Scalar::I32(0xFFFE))
        );
        assert_eq!(decode_value(&data, DataType::I16, 2), None);
    }
}
