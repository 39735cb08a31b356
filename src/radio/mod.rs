//! # Radio Session Module
//!
//! Owns the half-duplex radio and the order in which its modes change.
//!
//! This module handles:
//! - Mode tracking (idle / transmitting / listening)
//! - Forcing the radio out of receive before every transmit
//! - Returning to receive after every transmit, successful or not
//! - Bounded waits for an inbound packet
//! - Signal strength of the last accepted frame
//!
//! Drivers:
//! - [`modem::SerialModem`]: UART-attached packet radio modem
//! - [`sim::SimulatedAir`]: linked in-memory radios for tests and bench runs

pub mod driver;
pub mod modem;
pub mod modem_link;
pub mod sim;

pub use driver::{RadioDriver, RawPacket};

use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

use crate::error::Result;
use crate::settings::RadioConfig;

/// Delay between two polls while waiting for a packet
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Current radio mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioMode {
    /// Powered, neither transmitting nor receiving (parked)
    Idle,
    /// A transmit has been prepared or is in progress
    Transmitting,
    /// Continuous receive
    Listening,
}

/// Result of a bounded wait for an inbound packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A packet arrived before the deadline
    Received(RawPacket),
    /// The deadline passed without a packet
    TimedOut,
}

/// Half-duplex radio session
pub struct RadioSession<D: RadioDriver> {
    driver: D,
    mode: RadioMode,
    last_rssi: Option<i16>,
}

impl<D: RadioDriver> std::fmt::Debug for RadioSession<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadioSession")
            .field("mode", &self.mode)
            .field("last_rssi", &self.last_rssi)
            .finish_non_exhaustive()
    }
}

impl<D: RadioDriver> RadioSession<D> {
    /// Wrap a driver; the session starts parked
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            mode: RadioMode::Idle,
            last_rssi: None,
        }
    }

    pub fn mode(&self) -> RadioMode {
        self.mode
    }

    /// Signal strength of the last accepted frame, `None` when there is no link
    pub fn last_rssi(&self) -> Option<i16> {
        self.last_rssi
    }

    /// Record the signal strength of an accepted frame
    pub fn record_rssi(&mut self, rssi: i16) {
        self.last_rssi = Some(rssi);
    }

    /// Reset the signal strength to "no link"
    pub fn clear_rssi(&mut self) {
        self.last_rssi = None;
    }

    /// Apply modulation parameters immediately
    pub async fn apply_config(&mut self, config: &RadioConfig) -> Result<()> {
        self.driver.configure(config).await?;
        debug!(
            tx_power = config.tx_power,
            spreading_factor = config.spreading_factor,
            coding_rate = config.coding_rate_denominator,
            bandwidth_hz = config.signal_bandwidth.hz(),
            "Radio parameters applied"
        );
        Ok(())
    }

    /// Leave receive mode and get ready to transmit
    pub async fn prepare_to_send(&mut self) -> Result<()> {
        // Always drop to standby first: transmitting mid-receive is undefined
        self.driver.idle().await?;
        self.mode = RadioMode::Transmitting;
        Ok(())
    }

    /// Transmit one packet, then return to listening
    ///
    /// The return to listening happens whether or not the transmit succeeded,
    /// so inbound frames are never missed between cycles.
    ///
    /// # Errors
    ///
    /// Returns the transmit error if the send failed, otherwise any error
    /// from re-entering receive mode
    pub async fn send(&mut self, packet: &[u8]) -> Result<()> {
        if self.mode != RadioMode::Transmitting {
            self.prepare_to_send().await?;
        }

        let sent = self.driver.transmit(packet).await;
        if sent.is_ok() {
            debug!("Transmitted {} bytes", packet.len());
        }

        let listening = self.listen().await;
        sent.and(listening)
    }

    /// Enter receive mode
    pub async fn listen(&mut self) -> Result<()> {
        match self.driver.start_receive().await {
            Ok(()) => {
                self.mode = RadioMode::Listening;
                Ok(())
            }
            Err(e) => {
                self.mode = RadioMode::Idle;
                Err(e)
            }
        }
    }

    /// Park the radio until the next cycle
    pub async fn park(&mut self) -> Result<()> {
        self.driver.idle().await?;
        self.mode = RadioMode::Idle;
        Ok(())
    }

    /// Single non-blocking poll, only meaningful while listening
    pub async fn poll(&mut self) -> Result<Option<RawPacket>> {
        if self.mode != RadioMode::Listening {
            return Ok(None);
        }
        self.driver.poll_packet().await
    }

    /// Wait for a packet until `deadline`, yielding between polls
    ///
    /// Enters receive mode first if the radio is not already listening.
    /// Poll errors are logged and polling continues; the wait stays bounded.
    /// A packet polled at or after `deadline` is dropped.
    pub async fn wait_for_packet_until(&mut self, deadline: Instant) -> Result<WaitOutcome> {
        if self.mode != RadioMode::Listening {
            self.listen().await?;
        }

        loop {
            match self.driver.poll_packet().await {
                Ok(Some(packet)) => {
                    if Instant::now() >= deadline {
                        debug!(bytes = packet.bytes.len(), "Packet arrived after the deadline, dropped");
                        return Ok(WaitOutcome::TimedOut);
                    }
                    return Ok(WaitOutcome::Received(packet));
                }
                Ok(None) => {}
                Err(e) => warn!("Radio poll failed: {}", e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}
