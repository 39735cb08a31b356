//! # Frame Codec Module
//!
//! Addressed radio frames and the JSON documents they carry.
//!
//! This module handles:
//! - Frame encoding (4-byte header + payload)
//! - Frame decoding with declared-length validation
//! - Destination filtering (local address, broadcast)
//! - Uplink (sensor) and downlink (verdict) payload documents

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod payload;
