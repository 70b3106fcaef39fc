//! hrm-api library - heart-rate readings service
//!
//! Serves readings from a real-time backing store over HTTP and relays new
//! readings to connected clients as Server-Sent Events.

use axum::Router;
use hrm_common::config::{RelayConfig, TomlConfig};
use std::sync::Arc;

pub mod api;
pub mod error;
pub mod measurement;
pub mod readings;
pub mod relay;
pub mod store;

use measurement::MeasurementService;
use readings::ReadingService;
use relay::{ListenerService, RelayHub};
use store::RealtimeStore;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub readings: ReadingService,
    pub measurement: MeasurementService,
    /// Owner of the change-feed subscription
    pub listener: Arc<ListenerService>,
    /// Fan-out to stream sessions
    pub hub: RelayHub,
    pub relay: RelayConfig,
}

impl AppState {
    /// Wire services onto `store` according to `config`
    ///
    /// The listener is created but not started.
    pub fn new(store: Arc<dyn RealtimeStore>, config: &TomlConfig) -> Self {
        let hub = RelayHub::new(config.relay.channel_capacity);
        let listener = ListenerService::new(store.clone(), config.store.readings_path.clone(), hub.clone());

        Self {
            readings: ReadingService::new(store.clone(), config.store.readings_path.clone()),
            measurement: MeasurementService::new(store, config.store.control_path.clone()),
            listener: Arc::new(listener),
            hub,
            relay: config.relay.clone(),
        }
    }

    /// Stop relaying and end every open stream
    pub fn shutdown(&self) {
        self.hub.close();
        self.listener.stop();
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    api::router(state)
}
