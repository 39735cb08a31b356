//! # Shared Node State
//!
//! Scalars shared between the periodic tasks of one node.
//!
//! Every field has exactly one writer task; readers may see a field that
//! is one update behind its neighbours. No multi-field snapshot is atomic.
//!
//! | Field | Writer |
//! |-------|--------|
//! | temperature | temperature sensor task (Transmitter), radio task (Receiver) |
//! | humidity | humidity sensor task (Transmitter), radio task (Receiver) |
//! | ph | pH sensor task (Transmitter), radio task (Receiver) |
//! | verdict | radio task (initiator exchange / responder relay) |
//! | rssi | radio task |
//! | backend_online | radio task (responder only) |
//! | paused | input task |

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use crate::frame::payload::{SensorSnapshot, Verdict};

/// RSSI value meaning "no link", outside the range of a real `i16` reading
pub const NO_LINK_RSSI: i32 = i32::MIN;

/// An `f32` stored in an `AtomicU32`
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// State shared by all tasks of one node
#[derive(Debug)]
pub struct SharedState {
    temperature: AtomicF32,
    humidity: AtomicF32,
    ph: AtomicF32,
    classification: AtomicBool,
    buzzer_active: AtomicBool,
    rssi: AtomicI32,
    paused: AtomicBool,
    backend_online: AtomicBool,
}

impl Default for SharedState {
    fn default() -> Self {
        Self {
            temperature: AtomicF32::default(),
            humidity: AtomicF32::default(),
            ph: AtomicF32::default(),
            classification: AtomicBool::new(false),
            buzzer_active: AtomicBool::new(false),
            rssi: AtomicI32::new(NO_LINK_RSSI),
            paused: AtomicBool::new(false),
            backend_online: AtomicBool::new(false),
        }
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_temperature(&self, value: f32) {
        self.temperature.store(value);
    }

    pub fn set_humidity(&self, value: f32) {
        self.humidity.store(value);
    }

    pub fn set_ph(&self, value: f32) {
        self.ph.store(value);
    }

    /// Read each sensor field independently
    pub fn sensors(&self) -> SensorSnapshot {
        SensorSnapshot {
            humidity: self.humidity.load(),
            temperature: self.temperature.load(),
            ph: self.ph.load(),
        }
    }

    /// Store every sensor field (the Receiver's radio task owns all three)
    pub fn set_sensors(&self, snapshot: &SensorSnapshot) {
        self.set_humidity(snapshot.humidity);
        self.set_temperature(snapshot.temperature);
        self.set_ph(snapshot.ph);
    }

    pub fn verdict(&self) -> Verdict {
        Verdict {
            classification: self.classification.load(Ordering::Relaxed),
            buzzer_active: self.buzzer_active.load(Ordering::Relaxed),
        }
    }

    pub fn set_verdict(&self, verdict: Verdict) {
        self.classification.store(verdict.classification, Ordering::Relaxed);
        self.buzzer_active.store(verdict.buzzer_active, Ordering::Relaxed);
    }

    /// Last link RSSI, `None` when there is no link
    pub fn rssi(&self) -> Option<i16> {
        match self.rssi.load(Ordering::Relaxed) {
            NO_LINK_RSSI => None,
            rssi => Some(rssi as i16),
        }
    }

    pub fn set_rssi(&self, rssi: Option<i16>) {
        let raw = rssi.map(i32::from).unwrap_or(NO_LINK_RSSI);
        self.rssi.store(raw, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Flip the pause flag, returning the new value
    pub fn toggle_paused(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn backend_online(&self) -> bool {
        self.backend_online.load(Ordering::Relaxed)
    }

    pub fn set_backend_online(&self, online: bool) {
        self.backend_online.store(online, Ordering::Relaxed);
    }
}
