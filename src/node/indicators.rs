//! # Indicator Outputs and Alarm Timer
//!
//! Discrete outputs (TX LED, RX LED, buzzer) and the timer that decides how
//! long the buzzer sounds after the backend asks for it.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::time::{Duration, Instant};
use tracing::trace;

/// How long the alarm sounds after `buzzer_on` rises
pub const ALARM_DURATION: Duration = Duration::from_millis(3000);

/// A single on/off output
#[derive(Debug)]
pub struct Led {
    name: &'static str,
    on: AtomicBool,
}

impl Led {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            on: AtomicBool::new(false),
        }
    }

    pub fn set(&self, on: bool) {
        if self.on.swap(on, Ordering::SeqCst) != on {
            trace!(output = self.name, on, "Output changed");
        }
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }
}

/// The node's indicator outputs
#[derive(Debug)]
pub struct Indicators {
    /// Lit while a transmit is in progress
    pub tx: Led,
    /// Lit while an inbound frame is processed
    pub rx: Led,
    /// Physical alarm output
    pub buzzer: Led,
}

impl Default for Indicators {
    fn default() -> Self {
        Self {
            tx: Led::new("tx_led"),
            rx: Led::new("rx_led"),
            buzzer: Led::new("buzzer"),
        }
    }
}

impl Indicators {
    /// Both LEDs on: the node is paused
    pub fn show_paused(&self) {
        self.tx.set(true);
        self.rx.set(true);
    }

    pub fn clear_paused(&self) {
        self.tx.set(false);
        self.rx.set(false);
    }
}

/// Edge-triggered alarm timer
///
/// A false→true edge of `buzzer_active` arms a deadline `now + 3000 ms`.
/// The output is asserted only while `buzzer_active` stays true and the
/// deadline has not passed.
#[derive(Debug, Default)]
pub struct AlarmTimer {
    last_buzzer: bool,
    deadline: Option<Instant>,
}

impl AlarmTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the latest `buzzer_active` value, returning the output state
    pub fn update(&mut self, buzzer_active: bool, now: Instant) -> bool {
        if buzzer_active && !self.last_buzzer {
            self.deadline = Some(now + ALARM_DURATION);
        }
        self.last_buzzer = buzzer_active;

        buzzer_active && self.deadline.is_some_and(|deadline| now < deadline)
    }
}
