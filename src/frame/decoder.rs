//! # Frame Decoder
//!
//! Parses raw radio packets back into addressed frames.

use super::protocol::*;

/// Decode a complete radio packet
///
/// # Arguments
///
/// * `raw` - Packet bytes as delivered by the radio (header + payload)
///
/// # Returns
///
/// * `Result<Frame, FrameError>` - Decoded frame, or error if invalid
///
/// # Errors
///
/// Returns error if:
/// - Fewer than four header bytes are present
/// - The declared payload length differs from the bytes that follow
///
/// A mismatching frame is rejected whole; no partial payload is returned.
pub fn decode(raw: &[u8]) -> Result<Frame, FrameError> {
    if raw.len() < FRAME_HEADER_SIZE {
        return Err(FrameError::HeaderTooShort(raw.len()));
    }

    let declared = raw[3] as usize;
    let payload = &raw[FRAME_HEADER_SIZE..];

    if payload.len() != declared {
        return Err(FrameError::LengthMismatch {
            declared,
            actual: payload.len(),
        });
    }

    Ok(Frame {
        destination: NodeAddress(raw[0]),
        source: NodeAddress(raw[1]),
        message_id: raw[2],
        payload: payload.to_vec(),
    })
}
