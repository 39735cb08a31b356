//! # Telemetry Module
//!
//! Exchange journal written as JSONL files with rotation.
//!
//! This module handles:
//! - One record per initiator cycle or responder relay
//! - Formatting as JSONL (JSON Lines)
//! - Rotating files after N records
//! - Retaining only the last M files

pub mod logger;
pub mod types;

pub use logger::TelemetryLogger;
pub use types::{ExchangeRecord, Outcome, Role};

use std::sync::{Arc, Mutex};

use tracing::warn;

/// Cloneable handle shared by the tasks that write the journal
///
/// A disabled journal accepts records and drops them.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    inner: Option<Arc<Mutex<TelemetryLogger>>>,
}

impl Journal {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn new(logger: TelemetryLogger) -> Self {
        Self {
            inner: Some(Arc::new(Mutex::new(logger))),
        }
    }

    /// Append a record; write failures are logged, never returned
    pub fn record(&self, record: ExchangeRecord) {
        let Some(inner) = &self.inner else {
            return;
        };

        let mut logger = inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = logger.log(&record) {
            warn!("Failed to write telemetry record: {}", e);
        }
    }
}
