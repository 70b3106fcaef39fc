//! Backing store abstraction
//!
//! The readings live in a remote real-time key-value tree. The service needs
//! four operations from it: read a subtree, replace a subtree, append a child
//! under a generated key, and subscribe to changes below a path.
//!
//! Change subscriptions follow the real-time database model: the first
//! notification is a `put` at `/` carrying the full subtree, later
//! notifications describe each write with a path relative to the listen root.

mod firebase;
mod memory;

pub use firebase::FirebaseStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use hrm_common::Result;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Kind of change reported by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Subtree at `path` replaced by `data`
    Put,
    /// Children of `path` merged with the keys in `data`
    Patch,
    /// Anything else the feed may send
    Other,
}

impl ChangeKind {
    /// Map a change-feed event name to a kind
    pub fn from_event_name(name: &str) -> Self {
        match name {
            "put" => ChangeKind::Put,
            "patch" => ChangeKind::Patch,
            _ => ChangeKind::Other,
        }
    }
}

/// One change-feed notification
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotification {
    pub kind: ChangeKind,
    /// Path relative to the listen root, always starting with `/`
    pub path: String,
    pub data: Value,
}

impl ChangeNotification {
    pub fn new(kind: ChangeKind, path: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            path: path.into(),
            data,
        }
    }
}

/// Callback invoked for every change notification
///
/// Runs on the store's delivery context (writer thread or feed task), so it
/// must not block or write to the same store.
pub type ChangeCallback = Arc<dyn Fn(ChangeNotification) + Send + Sync>;

/// Active change subscription
///
/// Closing or dropping the handle ends the subscription.
#[derive(Debug)]
pub struct ListenHandle {
    cancel: CancellationToken,
}

impl ListenHandle {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ListenHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Remote real-time key-value tree
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    /// Read the subtree at `path` (`Value::Null` when absent)
    async fn get(&self, path: &str) -> Result<Value>;

    /// Replace the subtree at `path`; writing `null` deletes it
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Store `value` under a new generated child key of `path`, returning the key
    async fn push(&self, path: &str, value: Value) -> Result<String>;

    /// Subscribe to changes at and below `path`
    fn listen(&self, path: &str, callback: ChangeCallback) -> Result<ListenHandle>;
}

/// Split a store path into its non-empty segments
pub(crate) fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join a collection path and a child key
pub(crate) fn child_path(parent: &str, key: &str) -> String {
    let parent = parent.trim_matches('/');
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", parent, key)
    }
}
