//! SSE event types for the live readings stream
//!
//! A stream session emits `initial_reading` events while replaying history and
//! `new_reading` events for readings relayed from the change feed. Each event
//! carries the reading id as the SSE `id` and a JSON `{id, bpm, timestamp}`
//! object as `data`.

use axum::response::sse::Event;
use serde::Serialize;

use crate::reading::IdentifiedReading;

/// Which phase of a stream session produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingEventKind {
    /// Replayed from history when the session opened
    Initial,
    /// Relayed live from the change feed
    New,
}

impl ReadingEventKind {
    /// SSE `event:` field value
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingEventKind::Initial => "initial_reading",
            ReadingEventKind::New => "new_reading",
        }
    }
}

/// JSON body of a reading event
///
/// An absent timestamp is sent as `""`; existing dashboards expect a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadingPayload {
    pub id: String,
    pub bpm: Option<i64>,
    pub timestamp: String,
}

/// One event on the readings stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingEvent {
    pub kind: ReadingEventKind,
    pub reading: IdentifiedReading,
}

impl ReadingEvent {
    pub fn initial(reading: IdentifiedReading) -> Self {
        Self {
            kind: ReadingEventKind::Initial,
            reading,
        }
    }

    pub fn new_reading(reading: IdentifiedReading) -> Self {
        Self {
            kind: ReadingEventKind::New,
            reading,
        }
    }

    pub fn id(&self) -> &str {
        &self.reading.id
    }

    pub fn payload(&self) -> ReadingPayload {
        ReadingPayload {
            id: self.reading.id.clone(),
            bpm: self.reading.reading.bpm,
            timestamp: self.reading.reading.timestamp.clone().unwrap_or_default(),
        }
    }

    /// Serialized `data` field
    pub fn data_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.payload())
    }

    /// Convert to an axum SSE event
    ///
    /// Ids that cannot be carried on an SSE `id:` line are left off the event
    /// (the id is still present in the JSON data).
    pub fn to_sse_event(&self) -> serde_json::Result<Event> {
        let event = Event::default()
            .event(self.kind.as_str())
            .data(self.data_json()?);
        if is_valid_sse_id(self.id()) {
            Ok(event.id(self.id()))
        } else {
            Ok(event)
        }
    }
}

fn is_valid_sse_id(id: &str) -> bool {
    !id.contains(|c: char| matches!(c, '\n' | '\r' | '\0'))
}
