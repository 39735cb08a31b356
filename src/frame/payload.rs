//! # Structured Payloads
//!
//! JSON documents carried inside frames and posted to the backend.
//!
//! - **Uplink** (Transmitter → Receiver → backend): `humidity`, `temperature`, `ph`
//! - **Downlink** (backend → Receiver → Transmitter): `classification`, `buzzer_on`
//!
//! Missing keys read as zero / `false`, and the boolean fields also accept
//! the integers `0`/`1` the classification backend emits.

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Latest sensor readings
///
/// Field order matches the uplink document: humidity, temperature, pH.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// Relative humidity in %
    #[serde(default)]
    pub humidity: f32,

    /// Temperature in °C
    #[serde(default)]
    pub temperature: f32,

    /// pH (0-14)
    #[serde(default, rename = "ph")]
    pub ph: f32,
}

/// Classification decision relayed back to the Transmitter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Material judged ready ("layak")
    #[serde(default, deserialize_with = "lenient_bool")]
    pub classification: bool,

    /// Alarm requested by the backend
    #[serde(default, rename = "buzzer_on", deserialize_with = "lenient_bool")]
    pub buzzer_active: bool,
}

impl Verdict {
    /// Safe default used whenever the backend or payload fails
    pub const SAFE_DEFAULT: Verdict = Verdict {
        classification: false,
        buzzer_active: false,
    };

    pub fn new(classification: bool, buzzer_active: bool) -> Self {
        Self {
            classification,
            buzzer_active,
        }
    }
}

/// Serialise a sensor snapshot as the uplink document
pub fn encode_uplink(snapshot: &SensorSnapshot) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(snapshot)
}

/// Parse an uplink document
pub fn decode_uplink(bytes: &[u8]) -> serde_json::Result<SensorSnapshot> {
    serde_json::from_slice(bytes)
}

/// Serialise a verdict as the downlink document
pub fn encode_downlink(verdict: &Verdict) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(verdict)
}

/// Parse a downlink (or backend response) document
pub fn decode_downlink(bytes: &[u8]) -> serde_json::Result<Verdict> {
    serde_json::from_slice(bytes)
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct LenientBool;

    impl<'de> Visitor<'de> for LenientBool {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a boolean or an integer flag")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<bool, E> {
            Ok(v != 0.0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<bool, E> {
            Ok(false)
        }
    }

    deserializer.deserialize_any(LenientBool)
}
