//! # Modem Host Link
//!
//! Framing for the UART between the host and the packet radio modem.
//! This is a separate layer from the radio frame itself; only this link
//! carries a checksum.
//!
//! ```text
//! +------+--------+--------+------+-----------+-----+
//! | 0xC8 | len_hi | len_lo | type | body (N)  | crc |
//! +------+--------+--------+------+-----------+-----+
//! len = 1 (type) + N + 1 (crc), big-endian
//! crc = CRC-8/DVB-S2 over len_hi, len_lo, type, body
//! ```

use bytes::{Buf, BytesMut};

use super::RawPacket;
use crate::settings::RadioConfig;

/// Link sync byte
pub const LINK_SYNC_BYTE: u8 = 0xC8;

/// Largest body the modem accepts (RSSI + full radio frame)
pub const LINK_MAX_BODY: usize = 2 + 4 + 255;

/// Host → modem: enter standby
pub const CMD_IDLE: u8 = 0x01;
/// Host → modem: enter continuous receive
pub const CMD_RECEIVE: u8 = 0x02;
/// Host → modem: transmit the body as one packet
pub const CMD_TRANSMIT: u8 = 0x03;
/// Host → modem: set modulation parameters
pub const CMD_CONFIGURE: u8 = 0x04;

/// Modem → host: packet received (rssi i16 BE + frame bytes)
pub const EVT_PACKET: u8 = 0x81;
/// Modem → host: transmit finished
pub const EVT_TX_DONE: u8 = 0x82;
/// Modem → host: command failed (one status byte)
pub const EVT_ERROR: u8 = 0x8F;

/// CRC-8/DVB-S2 polynomial
const CRC8_POLY: u8 = 0xD5;

/// Precomputed CRC8 lookup table
const CRC8_TABLE: [u8; 256] = generate_crc8_table();

const fn generate_crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u8;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// CRC-8/DVB-S2 over `data`
pub fn crc8_dvb_s2(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |crc, &byte| CRC8_TABLE[(crc ^ byte) as usize])
}

/// Commands sent to the modem
#[derive(Debug, Clone, PartialEq)]
pub enum ModemCommand {
    Idle,
    Receive,
    Transmit(Vec<u8>),
    Configure(RadioConfig),
}

/// Events reported by the modem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEvent {
    Packet(RawPacket),
    TxDone,
    Error(u8),
}

/// Errors while decoding the host link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDecodeError {
    CrcMismatch { expected: u8, got: u8 },
    BadLength(usize),
    UnknownType(u8),
    ShortBody(u8),
}

impl std::fmt::Display for LinkDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CrcMismatch { expected, got } => {
                write!(f, "CRC mismatch: expected 0x{:02X}, got 0x{:02X}", expected, got)
            }
            Self::BadLength(len) => write!(f, "invalid link frame length {}", len),
            Self::UnknownType(t) => write!(f, "unknown link frame type 0x{:02X}", t),
            Self::ShortBody(t) => write!(f, "body too short for type 0x{:02X}", t),
        }
    }
}

fn encode_link_frame(frame_type: u8, body: &[u8]) -> Vec<u8> {
    let length = (1 + body.len() + 1) as u16;

    let mut frame = Vec::with_capacity(3 + length as usize);
    frame.push(LINK_SYNC_BYTE);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.push(frame_type);
    frame.extend_from_slice(body);

    let crc = crc8_dvb_s2(&frame[1..]);
    frame.push(crc);
    frame
}

/// Encode a host command
pub fn encode_command(command: &ModemCommand) -> Vec<u8> {
    match command {
        ModemCommand::Idle => encode_link_frame(CMD_IDLE, &[]),
        ModemCommand::Receive => encode_link_frame(CMD_RECEIVE, &[]),
        ModemCommand::Transmit(packet) => encode_link_frame(CMD_TRANSMIT, packet),
        ModemCommand::Configure(config) => {
            let mut body = Vec::with_capacity(7);
            body.push(config.tx_power as u8);
            body.push(config.spreading_factor as u8);
            body.push(config.coding_rate_denominator as u8);
            body.extend_from_slice(&(config.signal_bandwidth.hz() as u32).to_be_bytes());
            encode_link_frame(CMD_CONFIGURE, &body)
        }
    }
}

/// Encode a modem event (modem side; used by tests and bench tools)
pub fn encode_event(event: &ModemEvent) -> Vec<u8> {
    match event {
        ModemEvent::Packet(packet) => {
            let mut body = Vec::with_capacity(2 + packet.bytes.len());
            body.extend_from_slice(&packet.rssi.to_be_bytes());
            body.extend_from_slice(&packet.bytes);
            encode_link_frame(EVT_PACKET, &body)
        }
        ModemEvent::TxDone => encode_link_frame(EVT_TX_DONE, &[]),
        ModemEvent::Error(status) => encode_link_frame(EVT_ERROR, &[*status]),
    }
}

/// Pull the next modem event out of a receive buffer
///
/// Returns `None` until a whole link frame is buffered. Garbage before a
/// sync byte is skipped; a frame failing its CRC is consumed and reported.
pub fn next_event(buf: &mut BytesMut) -> Option<Result<ModemEvent, LinkDecodeError>> {
    // Resynchronise on the sync byte
    match buf.iter().position(|&b| b == LINK_SYNC_BYTE) {
        Some(0) => {}
        Some(skip) => buf.advance(skip),
        None => {
            buf.clear();
            return None;
        }
    }

    if buf.len() < 3 {
        return None;
    }

    let length = u16::from_be_bytes([buf[1], buf[2]]) as usize;
    if length < 2 || length > LINK_MAX_BODY + 2 {
        // Not a real frame start, drop the sync byte and retry later
        buf.advance(1);
        return Some(Err(LinkDecodeError::BadLength(length)));
    }

    if buf.len() < 3 + length {
        return None;
    }

    let frame = buf.split_to(3 + length);
    let expected = crc8_dvb_s2(&frame[1..2 + length]);
    let got = frame[2 + length];
    if expected != got {
        return Some(Err(LinkDecodeError::CrcMismatch { expected, got }));
    }

    let frame_type = frame[3];
    let body = &frame[4..2 + length];

    let event = match frame_type {
        EVT_PACKET => {
            if body.len() < 2 {
                return Some(Err(LinkDecodeError::ShortBody(frame_type)));
            }
            ModemEvent::Packet(RawPacket {
                rssi: i16::from_be_bytes([body[0], body[1]]),
                bytes: body[2..].to_vec(),
            })
        }
        EVT_TX_DONE => ModemEvent::TxDone,
        EVT_ERROR => ModemEvent::Error(body.first().copied().unwrap_or(0)),
        other => return Some(Err(LinkDecodeError::UnknownType(other))),
    };

    Some(Ok(event))
}
