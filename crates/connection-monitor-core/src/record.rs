//! Connection records and derived status.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key identifying one (arriving, departing) flight pair.
pub type ConnectionKey = String;

/// Status tag value carried by at-risk records.
pub const STATUS_AT_RISK: &str = "AT RISK";

/// Status tag value carried by records with enough connection time.
pub const STATUS_OK: &str = "OK";

/// Build the composite key for a flight pair: arriving id followed by
/// departing id.
#[must_use]
pub fn connection_key(arriving: &str, departing: &str) -> ConnectionKey {
    format!("{arriving}{departing}")
}

/// Derived connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Enough time between arrival and departure.
    Ok,
    /// Less time than the minimum connection threshold.
    AtRisk,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ok => STATUS_OK,
            Self::AtRisk => STATUS_AT_RISK,
        })
    }
}

/// One observed version of a flight connection.
///
/// Records are immutable once observed; a mutation in the backing store
/// arrives as a fresh event carrying a new record, never as a patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub arriving_flight: String,
    pub arrival_gate: String,
    /// Wall-clock arrival time string (date plus `HH:MM`).
    pub arrival_time: String,
    pub departing_flight: String,
    pub departure_gate: String,
    pub departure_time: String,
    pub connection_minutes: i64,
    /// Minimum connection time threshold, in minutes.
    pub mct: i64,
    pub connection_status: String,
}

impl ConnectionRecord {
    /// Decode a raw JSON payload into a record.
    ///
    /// # Errors
    /// Returns a [`DecodeError`] carrying the offending payload when the
    /// JSON is malformed or fields are missing.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(raw).map_err(|source| DecodeError {
            payload: raw.to_owned(),
            source,
        })
    }

    /// Status derived from the record itself: a connection shorter than
    /// its threshold is at risk. Exactly the threshold is enough time.
    #[must_use]
    pub const fn derived_status(&self) -> ConnectionStatus {
        if self.connection_minutes < self.mct {
            ConnectionStatus::AtRisk
        } else {
            ConnectionStatus::Ok
        }
    }

    /// Key under which this record lives in the live-status collection.
    #[must_use]
    pub fn key(&self) -> ConnectionKey {
        connection_key(&self.arriving_flight, &self.departing_flight)
    }
}

/// Trailing `HH:MM` component of a wall-clock time string.
///
/// Strings shorter than five characters are returned unchanged.
#[must_use]
pub fn time_of_day(timestamp: &str) -> &str {
    timestamp
        .char_indices()
        .rev()
        .nth(4)
        .map_or(timestamp, |(i, _)| &timestamp[i..])
}

/// Malformed record payload. Per-event and non-fatal: the subscription
/// that delivered the payload keeps running.
#[derive(Debug, Error)]
#[error("malformed connection record ({source}): {payload}")]
pub struct DecodeError {
    /// The raw payload that failed to decode.
    pub payload: String,
    #[source]
    pub source: serde_json::Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(minutes: i64, mct: i64) -> ConnectionRecord {
        ConnectionRecord {
            arriving_flight: "AA100".into(),
            arrival_gate: "B2".into(),
            arrival_time: "2024-03-01 09:05".into(),
            departing_flight: "BB200".into(),
            departure_gate: "C4".into(),
            departure_time: "2024-03-01 09:45".into(),
            connection_minutes: minutes,
            mct,
            connection_status: STATUS_OK.into(),
        }
    }

    #[test]
    fn short_connection_is_at_risk() {
        assert_eq!(record(30, 45).derived_status(), ConnectionStatus::AtRisk);
    }

    #[test]
    fn exactly_mct_is_ok() {
        assert_eq!(record(45, 45).derived_status(), ConnectionStatus::Ok);
    }

    #[test]
    fn longer_than_mct_is_ok() {
        assert_eq!(record(90, 45).derived_status(), ConnectionStatus::Ok);
    }

    #[test]
    fn decode_roundtrip() {
        let raw = serde_json::to_string(&record(40, 45)).unwrap();
        let decoded = ConnectionRecord::decode(&raw).unwrap();
        assert_eq!(decoded.arriving_flight, "AA100");
        assert_eq!(decoded.key(), "AA100BB200");
    }

    #[test]
    fn decode_failure_keeps_payload() {
        let err = ConnectionRecord::decode("{not json").unwrap_err();
        assert_eq!(err.payload, "{not json");
    }

    #[test]
    fn time_of_day_trims_to_trailing_component() {
        assert_eq!(time_of_day("2024-03-01 09:05"), "09:05");
        assert_eq!(time_of_day("09:05"), "09:05");
        assert_eq!(time_of_day("9:05"), "9:05");
        assert_eq!(time_of_day(""), "");
    }
}
