//! # Radio Frame Constants and Types
//!
//! Core definitions for the addressed radio packet exchanged between the
//! Transmitter and the Receiver.
//!
//! ```text
//! +------+-----+-----+-----+----------------+
//! | dst  | src | id  | len | payload (len)  |
//! +------+-----+-----+-----+----------------+
//!   1 B    1 B   1 B   1 B        N B
//! ```
//!
//! There is no checksum. Integrity rests on the declared length matching
//! the payload and on the radio's own packet boundary detection.

use std::fmt;

use thiserror::Error;

/// Frame header size: destination + source + message id + payload length
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum payload size (single-byte length field)
pub const MAX_PAYLOAD_SIZE: usize = u8::MAX as usize;

/// Message id used by the Receiver on every reply
pub const REPLY_MESSAGE_ID: u8 = 0xAA;

/// Single-byte node address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeAddress(pub u8);

impl NodeAddress {
    /// Transmitter (initiator) address
    pub const TRANSMITTER: NodeAddress = NodeAddress(0x01);

    /// Receiver (responder) address
    pub const RECEIVER: NodeAddress = NodeAddress(0x02);

    /// Broadcast address, honoured only by the terminal endpoint
    pub const BROADCAST: NodeAddress = NodeAddress(0xFF);

    /// Raw address byte
    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Codec-level frame errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer than four header bytes available
    #[error("header too short: {0} bytes")]
    HeaderTooShort(usize),

    /// Declared payload length differs from the bytes actually present
    #[error("declared {declared} payload bytes, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Payload does not fit the single-byte length field
    #[error("payload size {0} exceeds maximum {MAX_PAYLOAD_SIZE}")]
    PayloadTooLarge(usize),
}

/// One addressed radio packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination node address
    pub destination: NodeAddress,

    /// Sender's node address
    pub source: NodeAddress,

    /// Opaque, caller-assigned sequence counter
    pub message_id: u8,

    /// Payload bytes (at most 255)
    pub payload: Vec<u8>,
}

/// Destination filter applied to every inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressFilter {
    /// This node's address
    pub local: NodeAddress,

    /// Whether broadcast frames are accepted
    pub accept_broadcast: bool,
}

impl AddressFilter {
    /// Filter for the Transmitter: local address only
    pub fn initiator(local: NodeAddress) -> Self {
        Self {
            local,
            accept_broadcast: false,
        }
    }

    /// Filter for the Receiver: local address or broadcast
    pub fn responder(local: NodeAddress) -> Self {
        Self {
            local,
            accept_broadcast: true,
        }
    }

    /// Check whether a frame addressed to `destination` is for us
    pub fn accepts(&self, destination: NodeAddress) -> bool {
        destination == self.local
            || (self.accept_broadcast && destination == NodeAddress::BROADCAST)
    }
}
