//! # Biodry Link Library
//!
//! Two-node LoRa telemetry link for a biodrying monitor.
//!
//! The Transmitter periodically sends sensor readings to the Receiver and
//! waits for a classification verdict; the Receiver forwards each reading
//! to an HTTP backend and relays the verdict back over the radio.

pub mod config;
pub mod error;
pub mod frame;
pub mod link;
pub mod node;
pub mod radio;
pub mod settings;
pub mod telemetry;
