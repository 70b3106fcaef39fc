//! Listener lifecycle
//!
//! [`ListenerService`] owns the one change-feed subscription of the process.
//! It is created by the application root, started before the server accepts
//! connections and stopped on shutdown. Stream sessions call
//! [`ListenerService::ensure_listening`], which is a no-op while the
//! subscription is live.

use hrm_common::{IdentifiedReading, Result};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use super::adapter;
use super::dedup::Deduplicator;
use super::hub::RelayHub;
use crate::store::{ListenHandle, RealtimeStore};

pub struct ListenerService {
    store: Arc<dyn RealtimeStore>,
    readings_path: String,
    hub: RelayHub,
    dedup: Arc<Deduplicator>,
    handle: Mutex<Option<ListenHandle>>,
}

impl ListenerService {
    pub fn new(store: Arc<dyn RealtimeStore>, readings_path: impl Into<String>, hub: RelayHub) -> Self {
        Self {
            store,
            readings_path: readings_path.into(),
            hub,
            dedup: Arc::new(Deduplicator::new()),
            handle: Mutex::new(None),
        }
    }

    /// Subscribe to the change feed unless already subscribed
    ///
    /// Returns `true` when this call created the subscription.
    pub fn ensure_listening(&self) -> Result<bool> {
        let mut handle = self.lock_handle();
        if handle.as_ref().is_some_and(|h| !h.is_closed()) {
            return Ok(false);
        }

        let hub = self.hub.clone();
        let dedup = self.dedup.clone();
        let listen = adapter::subscribe(self.store.as_ref(), &self.readings_path, move |id, raw| {
            relay_reading(&hub, &dedup, id, &raw);
        })?;

        *handle = Some(listen);
        info!("Listening for new readings at '{}'", self.readings_path);
        Ok(true)
    }

    /// Start the listener at application startup
    pub fn start(&self) -> Result<()> {
        self.ensure_listening().map(|_| ())
    }

    /// Close the subscription; a later `ensure_listening` subscribes again
    pub fn stop(&self) {
        if let Some(handle) = self.lock_handle().take() {
            handle.close();
            info!("Reading listener stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock_handle().as_ref().is_some_and(|h| !h.is_closed())
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<ListenHandle>> {
        self.handle.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Normalize one change-feed item and hand it to the hub
///
/// A null payload is a deletion: it is forwarded as an empty reading and the
/// id is no longer tracked for duplicates.
fn relay_reading(hub: &RelayHub, dedup: &Deduplicator, id: String, raw: &Value) {
    let item = IdentifiedReading::from_raw(id, raw);
    if raw.is_null() {
        dedup.forget(&item.id);
        hub.publish(item);
        return;
    }
    if item.reading.is_empty() {
        debug!("Unrecognized reading payload for {}: {}", item.id, raw);
    }
    if !dedup.admit(&item) {
        debug!("Suppressed duplicate delivery of {}", item.id);
        return;
    }
    hub.publish(item);
}
