//! Trait abstraction for radio hardware operations to enable testing

use async_trait::async_trait;

use crate::error::Result;
use crate::settings::RadioConfig;

/// One packet as delivered by the radio, with its signal strength
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    /// Raw frame bytes (header + payload)
    pub bytes: Vec<u8>,

    /// Received signal strength in dBm
    pub rssi: i16,
}

/// Trait for half-duplex packet radio operations
///
/// Implementations only execute mode changes; the ordering rules
/// (never transmit while listening, return to listening after a send)
/// are enforced by [`super::RadioSession`].
#[async_trait]
pub trait RadioDriver: Send {
    /// Put the radio in standby (neither transmitting nor receiving)
    async fn idle(&mut self) -> Result<()>;

    /// Enter continuous receive mode
    async fn start_receive(&mut self) -> Result<()>;

    /// Transmit one packet, returning once it has left the radio
    async fn transmit(&mut self, packet: &[u8]) -> Result<()>;

    /// Non-blocking check for a received packet
    async fn poll_packet(&mut self) -> Result<Option<RawPacket>>;

    /// Apply modulation parameters
    async fn configure(&mut self, config: &RadioConfig) -> Result<()>;
}
