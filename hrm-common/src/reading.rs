//! Heart-rate reading model and payload normalization
//!
//! The backing store does not enforce a schema for readings. Devices have
//! written several shapes over time, so every raw payload is normalized into
//! a [`Reading`] and never rejected: a malformed entry must not break the
//! relay for everyone else.
//!
//! Recognized shapes, in priority order:
//! 1. Mapping containing `bpm`: `bpm` is taken as-is, the timestamp is the
//!    value of the first other key in stored order.
//! 2. Bare integer: treated as `bpm` with no timestamp.
//! 3. Anything else: empty reading.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// A single heart-rate sample
///
/// Both fields are optional: a payload that cannot be interpreted produces an
/// empty reading rather than an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// Beats per minute
    pub bpm: Option<i64>,
    /// ISO-8601 timestamp as written by the device
    pub timestamp: Option<String>,
}

impl Reading {
    /// Create a reading from known values
    pub fn new(bpm: Option<i64>, timestamp: Option<String>) -> Self {
        Self { bpm, timestamp }
    }

    /// Normalize an arbitrary raw payload into a reading
    ///
    /// Total: never fails, never panics.
    pub fn from_raw(raw: &Value) -> Self {
        match raw {
            Value::Object(map) if map.contains_key("bpm") => {
                let bpm = map.get("bpm").and_then(coerce_bpm);
                // Legacy device shape stores the timestamp under an arbitrary
                // key next to `bpm`, so this relies on stored key order.
                let timestamp = map
                    .iter()
                    .find(|(key, _)| key.as_str() != "bpm")
                    .and_then(|(_, value)| coerce_timestamp(value));
                Self { bpm, timestamp }
            }
            Value::Number(n) => Self {
                bpm: n.as_i64(),
                timestamp: None,
            },
            _ => Self::default(),
        }
    }

    /// True when neither field could be recovered
    pub fn is_empty(&self) -> bool {
        self.bpm.is_none() && self.timestamp.is_none()
    }

    /// Sort key for "latest" ordering: absent timestamps sort as ""
    fn sort_key(&self) -> &str {
        self.timestamp.as_deref().unwrap_or("")
    }
}

/// Integer values pass through; integral floats and numeric strings are coerced
fn coerce_bpm(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_timestamp(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A reading paired with its backing-store key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifiedReading {
    /// Store-generated key (opaque; push ids sort by insertion time)
    pub id: String,
    /// Normalized reading
    #[serde(rename = "data")]
    pub reading: Reading,
}

impl IdentifiedReading {
    pub fn new(id: impl Into<String>, reading: Reading) -> Self {
        Self {
            id: id.into(),
            reading,
        }
    }

    /// Normalize a raw payload stored under `id`
    pub fn from_raw(id: impl Into<String>, raw: &Value) -> Self {
        Self::new(id, Reading::from_raw(raw))
    }
}

/// Newest `count` readings, ordered by timestamp string descending
///
/// The comparison is lexicographic, not date-aware. The sort is stable, so
/// readings with equal timestamps keep their stored order.
pub fn sort_latest(mut readings: Vec<IdentifiedReading>, count: usize) -> Vec<IdentifiedReading> {
    readings.sort_by(|a, b| compare_desc(a.reading.sort_key(), b.reading.sort_key()));
    readings.truncate(count);
    readings
}

fn compare_desc(a: &str, b: &str) -> Ordering {
    b.cmp(a)
}
