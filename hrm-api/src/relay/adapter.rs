//! Change listener adapter
//!
//! Turns raw change-feed notifications into `(id, raw reading)` pairs. The
//! feed describes the readings collection in several shapes:
//!
//! - `put`/`patch` at `/` with a mapping: a snapshot (or multi-key patch) of
//!   the collection, one entry per reading. The first notification after
//!   subscribing is always such a snapshot.
//! - `put`/`patch` at `/<id>`: one reading written under its key.
//!
//! Any mapping at `/` is treated as a snapshot, even one that looks like a
//! bare reading body; its keys become the ids. Everything else is dropped.

use hrm_common::Result;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

use crate::store::{ChangeCallback, ChangeKind, ChangeNotification, ListenHandle, RealtimeStore};

/// Split a notification into the readings it carries
///
/// Snapshot entries keep the mapping's order.
pub fn classify(notification: &ChangeNotification) -> Vec<(String, Value)> {
    if !matches!(notification.kind, ChangeKind::Put | ChangeKind::Patch) {
        return Vec::new();
    }

    let path = notification.path.as_str();
    let data = &notification.data;

    if path == "/" {
        return match data {
            Value::Object(map) => map
                .iter()
                .map(|(id, raw)| (id.clone(), raw.clone()))
                .collect(),
            _ => Vec::new(),
        };
    }

    match path.strip_prefix('/') {
        Some(id) if !id.is_empty() => vec![(id.to_string(), data.clone())],
        _ => Vec::new(),
    }
}

/// Subscribe once to the change feed below `path`
///
/// `on_reading` is called for every reading the feed delivers, on the store's
/// delivery context. A panic while handling one reading is logged and does
/// not end the subscription.
pub fn subscribe<F>(store: &dyn RealtimeStore, path: &str, on_reading: F) -> Result<ListenHandle>
where
    F: Fn(String, Value) + Send + Sync + 'static,
{
    let on_reading = Arc::new(on_reading);
    let callback: ChangeCallback = Arc::new(move |notification: ChangeNotification| {
        debug!(
            "Change notification received: kind={:?}, path={}",
            notification.kind, notification.path
        );
        for (id, raw) in classify(&notification) {
            let handler = on_reading.clone();
            let reading_id = id.clone();
            if panic::catch_unwind(AssertUnwindSafe(move || handler(reading_id, raw))).is_err() {
                error!("Error processing reading {}", id);
            }
        }
    });

    store.listen(path, callback)
}
