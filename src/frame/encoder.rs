//! # Frame Encoder
//!
//! Serialises addressed frames into the bytes handed to the radio.

use super::protocol::*;

/// Encode a frame from its parts
///
/// # Arguments
///
/// * `destination` - Recipient address (or broadcast)
/// * `source` - Sender address
/// * `message_id` - Opaque sequence counter
/// * `payload` - Payload bytes (max 255)
///
/// # Returns
///
/// * `Result<Vec<u8>, FrameError>` - Header followed by the raw payload
///
/// # Errors
///
/// Returns `FrameError::PayloadTooLarge` if the payload exceeds 255 bytes
///
/// # Examples
///
/// ```
/// use biodry_link::frame::encoder::encode;
/// use biodry_link::frame::protocol::NodeAddress;
///
/// let bytes = encode(NodeAddress::RECEIVER, NodeAddress::TRANSMITTER, 3, b"{}").unwrap();
/// assert_eq!(bytes, vec![0x02, 0x01, 3, 2, b'{', b'}']);
/// ```
pub fn encode(
    destination: NodeAddress,
    source: NodeAddress,
    message_id: u8,
    payload: &[u8],
) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let mut bytes = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    bytes.push(destination.value());
    bytes.push(source.value());
    bytes.push(message_id);
    bytes.push(payload.len() as u8);
    bytes.extend_from_slice(payload);

    Ok(bytes)
}
