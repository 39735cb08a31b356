//! # Settings Module
//!
//! Radio parameters and the telemetry period, edited through bounded
//! steps and persisted to a flat byte-addressed store.
//!
//! This module handles:
//! - [`RadioConfig`] and its valid ranges
//! - Bounded up/down edits per [`SettingField`]
//! - Persistence through [`store::EepromImage`] and [`store::SlotLayout`]

pub mod store;

/// Selectable LoRa signal bandwidths in Hz
pub const BANDWIDTHS_HZ: [f32; 10] = [
    7.8e3, 10.4e3, 15.6e3, 20.8e3, 31.25e3, 41.7e3, 62.5e3, 125e3, 250e3, 500e3,
];

/// Transmit power range (dBm)
pub const TX_POWER_MIN: i32 = 2;
pub const TX_POWER_MAX: i32 = 20;

/// Spreading factor range
pub const SPREADING_FACTOR_MIN: i32 = 7;
pub const SPREADING_FACTOR_MAX: i32 = 12;

/// Coding rate denominator range (4/5 .. 4/8)
pub const CODING_RATE_MIN: i32 = 5;
pub const CODING_RATE_MAX: i32 = 8;

/// Telemetry period range and edit step (ms)
pub const TELEMETRY_PERIOD_MIN_MS: u32 = 100;
pub const TELEMETRY_PERIOD_MAX_MS: u32 = 3_600_000;
pub const TELEMETRY_PERIOD_STEP_MS: u32 = 100;

/// One of the ten fixed signal bandwidths, stored as an index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalBandwidth(usize);

impl SignalBandwidth {
    /// 125 kHz, the LoRa default
    pub const DEFAULT: SignalBandwidth = SignalBandwidth(7);

    /// Bandwidth at `index`, if it is one of the ten fixed values
    pub fn from_index(index: usize) -> Option<Self> {
        (index < BANDWIDTHS_HZ.len()).then_some(Self(index))
    }

    /// Match a persisted Hz value exactly against the fixed table
    pub fn from_hz(hz: f32) -> Option<Self> {
        BANDWIDTHS_HZ.iter().position(|&bw| bw == hz).map(Self)
    }

    pub fn index(self) -> usize {
        self.0
    }

    pub fn hz(self) -> f32 {
        BANDWIDTHS_HZ[self.0]
    }

    fn step(self, step: Step) -> Self {
        match step {
            Step::Up => Self((self.0 + 1).min(BANDWIDTHS_HZ.len() - 1)),
            Step::Down => Self(self.0.saturating_sub(1)),
        }
    }
}

/// Radio parameters plus the telemetry period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioConfig {
    pub tx_power: i32,
    pub spreading_factor: i32,
    pub coding_rate_denominator: i32,
    pub signal_bandwidth: SignalBandwidth,
    pub telemetry_period_ms: u32,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            tx_power: 17,
            spreading_factor: 7,
            coding_rate_denominator: 5,
            signal_bandwidth: SignalBandwidth::DEFAULT,
            telemetry_period_ms: 5000,
        }
    }
}

/// Editable fields, in menu order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingField {
    TelemetryPeriod,
    TxPower,
    SpreadingFactor,
    CodingRate,
    Bandwidth,
}

impl SettingField {
    /// Parse the short name used on the input console
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "period" => Some(Self::TelemetryPeriod),
            "power" => Some(Self::TxPower),
            "sf" => Some(Self::SpreadingFactor),
            "cr" => Some(Self::CodingRate),
            "bw" => Some(Self::Bandwidth),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::TelemetryPeriod => "period",
            Self::TxPower => "power",
            Self::SpreadingFactor => "sf",
            Self::CodingRate => "cr",
            Self::Bandwidth => "bw",
        }
    }

    /// Whether committing this field must be applied to the radio
    pub fn is_radio_parameter(self) -> bool {
        !matches!(self, Self::TelemetryPeriod)
    }
}

/// Edit direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Up,
    Down,
}

impl RadioConfig {
    /// Apply one bounded edit step to `field`
    pub fn step(&mut self, field: SettingField, step: Step) {
        let delta = match step {
            Step::Up => 1,
            Step::Down => -1,
        };

        match field {
            SettingField::TelemetryPeriod => {
                let next = match step {
                    Step::Up => self.telemetry_period_ms.saturating_add(TELEMETRY_PERIOD_STEP_MS),
                    Step::Down => self.telemetry_period_ms.saturating_sub(TELEMETRY_PERIOD_STEP_MS),
                };
                self.telemetry_period_ms = next.clamp(TELEMETRY_PERIOD_MIN_MS, TELEMETRY_PERIOD_MAX_MS);
            }
            SettingField::TxPower => {
                self.tx_power = (self.tx_power + delta).clamp(TX_POWER_MIN, TX_POWER_MAX);
            }
            SettingField::SpreadingFactor => {
                self.spreading_factor = (self.spreading_factor + delta)
                    .clamp(SPREADING_FACTOR_MIN, SPREADING_FACTOR_MAX);
            }
            SettingField::CodingRate => {
                self.coding_rate_denominator = (self.coding_rate_denominator + delta)
                    .clamp(CODING_RATE_MIN, CODING_RATE_MAX);
            }
            SettingField::Bandwidth => {
                self.signal_bandwidth = self.signal_bandwidth.step(step);
            }
        }
    }

    /// Check every field against its valid range
    pub fn is_valid(&self) -> bool {
        (TX_POWER_MIN..=TX_POWER_MAX).contains(&self.tx_power)
            && (SPREADING_FACTOR_MIN..=SPREADING_FACTOR_MAX).contains(&self.spreading_factor)
            && (CODING_RATE_MIN..=CODING_RATE_MAX).contains(&self.coding_rate_denominator)
            && (TELEMETRY_PERIOD_MIN_MS..=TELEMETRY_PERIOD_MAX_MS).contains(&self.telemetry_period_ms)
    }

    /// Take the value of `field` from `other`, leaving the rest untouched
    pub fn copy_field(&mut self, other: &RadioConfig, field: SettingField) {
        match field {
            SettingField::TelemetryPeriod => self.telemetry_period_ms = other.telemetry_period_ms,
            SettingField::TxPower => self.tx_power = other.tx_power,
            SettingField::SpreadingFactor => self.spreading_factor = other.spreading_factor,
            SettingField::CodingRate => self.coding_rate_denominator = other.coding_rate_denominator,
            SettingField::Bandwidth => self.signal_bandwidth = other.signal_bandwidth,
        }
    }

    /// Human-readable value of one field
    pub fn describe(&self, field: SettingField) -> String {
        match field {
            SettingField::TelemetryPeriod => format!("{} ms", self.telemetry_period_ms),
            SettingField::TxPower => format!("{} dBm", self.tx_power),
            SettingField::SpreadingFactor => format!("SF{}", self.spreading_factor),
            SettingField::CodingRate => format!("4/{}", self.coding_rate_denominator),
            SettingField::Bandwidth => format!("{} kHz", self.signal_bandwidth.hz() / 1000.0),
        }
    }
}
