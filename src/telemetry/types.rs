//! Journal record types

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::frame::payload::{SensorSnapshot, Verdict};

/// Which side of the link wrote the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Initiator,
    Responder,
}

/// How an exchange or relayed frame ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Initiator received a valid response
    Completed,
    /// Initiator heard nothing valid inside the window
    TimedOut,
    /// Responder sent the verdict back
    Replied,
    /// Responder processed the frame but stayed silent while paused
    ReplySuppressed,
}

/// One JSONL line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRecord {
    /// RFC 3339 UTC timestamp, millisecond precision
    pub timestamp: String,
    pub role: Role,
    pub outcome: Outcome,
    pub message_id: u8,
    /// `None` when there is no link
    pub rssi: Option<i16>,
    pub sensors: SensorSnapshot,
    pub verdict: Verdict,
}

impl ExchangeRecord {
    /// Build a record stamped with the current time
    pub fn now(
        role: Role,
        outcome: Outcome,
        message_id: u8,
        rssi: Option<i16>,
        sensors: SensorSnapshot,
        verdict: Verdict,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            role,
            outcome,
            message_id,
            rssi,
            sensors,
            verdict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_snake_case() {
        let record = ExchangeRecord::now(
            Role::Initiator,
            Outcome::TimedOut,
            7,
            None,
            SensorSnapshot::default(),
            Verdict::SAFE_DEFAULT,
        );
        let line = serde_json::to_string(&record).unwrap();

        assert!(line.contains(r#""role":"initiator""#));
        assert!(line.contains(r#""outcome":"timed_out""#));
        assert!(line.contains(r#""rssi":null"#));
        assert!(record.timestamp.ends_with('Z'));
    }
}
