//! # Error Types
//!
//! Custom error types for the telemetry link using `thiserror`.
//!
//! None of these are fatal on the protocol path: the initiator and the
//! responder log them and fall back to a safe default. Only startup
//! (config, serial port, settings file) surfaces them to `main`.

use thiserror::Error;

use crate::frame::protocol::FrameError;

/// Main error type for the telemetry link
#[derive(Debug, Error)]
pub enum LinkError {
    /// Frame codec errors (short header, declared length mismatch)
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Frame addressed to neither this node nor broadcast
    #[error("Invalid destination address: 0x{0:02X}")]
    InvalidDestinationAddress(u8),

    /// Structured payload could not be parsed
    #[error("Payload parse error: {0}")]
    PayloadParse(#[from] serde_json::Error),

    /// Backend unreachable or answered with a non-success status
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// No response inside the receive window
    #[error("No response within {0} ms")]
    ResponseTimeout(u64),

    /// Radio could not start a send or a listen
    #[error("Radio begin failure: {0}")]
    RadioBeginFailure(String),

    /// Serial link to the radio modem failed
    #[error("Serial port error: {0}")]
    Serial(String),

    /// No radio modem found on any candidate path
    #[error("Radio modem not found on: {0}")]
    SerialPortNotFound(String),

    /// Persisted settings store errors
    #[error("Settings store error: {0}")]
    Settings(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the telemetry link
pub type Result<T> = std::result::Result<T, LinkError>;
