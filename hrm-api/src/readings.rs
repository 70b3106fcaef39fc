//! Readings collection access
//!
//! Direct reads and writes against the readings collection. These bypass
//! the relay entirely; the stream session uses [`ReadingService::get_latest_readings`]
//! for its history replay.

use hrm_common::reading::sort_latest;
use hrm_common::{Error, IdentifiedReading, Reading, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::store::{child_path, RealtimeStore};

/// Characters the real-time database does not allow in keys
const INVALID_KEY_CHARS: &[char] = &['.', '#', '$', '[', ']', '/'];

#[derive(Clone)]
pub struct ReadingService {
    store: Arc<dyn RealtimeStore>,
    path: String,
}

impl ReadingService {
    pub fn new(store: Arc<dyn RealtimeStore>, path: impl Into<String>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    /// Every reading in stored order
    pub async fn get_all_readings(&self) -> Result<Vec<IdentifiedReading>> {
        let raw = self.store.get(&self.path).await?;
        let readings = match raw {
            Value::Object(map) => map
                .iter()
                .map(|(id, value)| IdentifiedReading::from_raw(id.clone(), value))
                .collect(),
            // Collections keyed 0..n come back as arrays with null gaps
            Value::Array(items) => items
                .iter()
                .enumerate()
                .filter(|(_, value)| !value.is_null())
                .map(|(index, value)| IdentifiedReading::from_raw(index.to_string(), value))
                .collect(),
            Value::Null => Vec::new(),
            other => {
                warn!("Readings collection holds a non-collection value: {}", other);
                Vec::new()
            }
        };
        debug!("Loaded {} readings", readings.len());
        Ok(readings)
    }

    /// Reading stored under `id`, or `None` when the node is empty
    pub async fn get_reading_by_id(&self, id: &str) -> Result<Option<IdentifiedReading>> {
        validate_key(id)?;
        let raw = self.store.get(&child_path(&self.path, id)).await?;
        if is_falsy(&raw) {
            return Ok(None);
        }
        Ok(Some(IdentifiedReading::from_raw(id, &raw)))
    }

    /// Newest `count` readings by timestamp, newest first
    pub async fn get_latest_readings(&self, count: usize) -> Result<Vec<IdentifiedReading>> {
        Ok(sort_latest(self.get_all_readings().await?, count))
    }

    /// Append a reading under a new generated key
    pub async fn add_reading(&self, reading: &Reading) -> Result<String> {
        let id = self.store.push(&self.path, reading_body(reading)).await?;
        debug!("Stored reading {}", id);
        Ok(id)
    }
}

fn validate_key(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(INVALID_KEY_CHARS) {
        return Err(Error::InvalidInput(format!("Invalid reading id: {:?}", id)));
    }
    Ok(())
}

/// Empty-ish node values that count as "no reading"
fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Stored shape of a reading: `bpm` first so the timestamp is the next key
fn reading_body(reading: &Reading) -> Value {
    let mut body = Map::new();
    if let Some(bpm) = reading.bpm {
        body.insert("bpm".to_string(), Value::from(bpm));
    }
    if let Some(timestamp) = &reading.timestamp {
        body.insert("timestamp".to_string(), Value::from(timestamp.clone()));
    }
    Value::Object(body)
}
