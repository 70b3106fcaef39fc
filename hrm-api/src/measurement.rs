//! Measurement pause/resume control
//!
//! A single control node tells the sensor firmware whether to pause
//! sampling. The API only reads and writes it.

use hrm_common::time::now_rfc3339;
use hrm_common::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::store::RealtimeStore;

pub const DEFAULT_UPDATED_BY: &str = "api";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementControl {
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl Default for MeasurementControl {
    fn default() -> Self {
        Self {
            is_paused: false,
            last_updated: None,
            updated_by: Some(DEFAULT_UPDATED_BY.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct MeasurementService {
    store: Arc<dyn RealtimeStore>,
    path: String,
}

impl MeasurementService {
    pub fn new(store: Arc<dyn RealtimeStore>, path: impl Into<String>) -> Self {
        Self {
            store,
            path: path.into(),
        }
    }

    /// Current control state; defaults when the node is absent or unreadable
    pub async fn get_status(&self) -> Result<MeasurementControl> {
        let raw = self.store.get(&self.path).await?;
        if raw.is_null() {
            return Ok(MeasurementControl::default());
        }
        match serde_json::from_value(raw) {
            Ok(control) => Ok(control),
            Err(e) => {
                warn!("Malformed measurement control node '{}': {}", self.path, e);
                Ok(MeasurementControl::default())
            }
        }
    }

    /// Replace the control state, stamping the update time
    pub async fn set_status(&self, is_paused: bool, updated_by: Option<String>) -> Result<MeasurementControl> {
        let control = MeasurementControl {
            is_paused,
            last_updated: Some(now_rfc3339()),
            updated_by: Some(updated_by.unwrap_or_else(|| DEFAULT_UPDATED_BY.to_string())),
        };
        self.store.set(&self.path, serde_json::to_value(&control)?).await?;
        info!(
            "Measurement {} by {}",
            if is_paused { "paused" } else { "resumed" },
            control.updated_by.as_deref().unwrap_or(DEFAULT_UPDATED_BY)
        );
        Ok(control)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::{json, Value};

    fn service(root: Value) -> (MeasurementService, MemoryStore) {
        let store = MemoryStore::with_root(root);
        (MeasurementService::new(Arc::new(store.clone()), "measurement_control"), store)
    }

    #[tokio::test]
    async fn test_absent_node_defaults() {
        let (measurement, _) = service(json!({}));
        let status = measurement.get_status().await.unwrap();
        assert!(!status.is_paused);
        assert_eq!(status.updated_by.as_deref(), Some("api"));
        assert!(status.last_updated.is_none());
    }

    #[tokio::test]
    async fn test_malformed_node_defaults() {
        let (measurement, _) = service(json!({"measurement_control": "paused"}));
        assert_eq!(measurement.get_status().await.unwrap(), MeasurementControl::default());
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (measurement, store) = service(json!({}));

        let written = measurement.set_status(true, Some("device".into())).await.unwrap();
        assert!(written.is_paused);
        assert!(written.last_updated.is_some());

        let raw = store.get("measurement_control").await.unwrap();
        assert_eq!(raw["is_paused"], json!(true));
        assert_eq!(raw["updated_by"], json!("device"));
        assert_eq!(measurement.get_status().await.unwrap(), written);
    }

    #[tokio::test]
    async fn test_set_defaults_updated_by() {
        let (measurement, _) = service(json!({}));
        let written = measurement.set_status(false, None).await.unwrap();
        assert_eq!(written.updated_by.as_deref(), Some("api"));
    }
}
