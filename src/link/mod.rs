//! # Link Module
//!
//! The request/response protocol between the two nodes.
//!
//! This module handles:
//! - The initiator exchange cycle (send, bounded listen, timeout recovery)
//! - The responder relay (validate, forward to backend, reply)
//! - The backend classification contract

pub mod backend;
pub mod exchange;
pub mod relay;

pub use backend::{Classifier, HttpClassifier};
pub use exchange::{CycleReport, ExchangeOutcome, Initiator, RESPONSE_TIMEOUT};
pub use relay::{RelayOutcome, Responder};
