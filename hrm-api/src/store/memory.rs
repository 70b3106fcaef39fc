//! In-process real-time tree
//!
//! Used for local development, demos and tests. Notifications are delivered
//! synchronously on the writing thread after the tree lock is released.
//! Writes and the initial snapshot of a new listener are serialized by one
//! delivery lock, so every listener sees changes in the order they were
//! applied. Callbacks must therefore not write to the store.

use async_trait::async_trait;
use hrm_common::push_id;
use hrm_common::Result;
use serde_json::{Map, Value};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{
    child_path, path_segments, ChangeCallback, ChangeKind, ChangeNotification, ListenHandle,
    RealtimeStore,
};

struct Listener {
    segments: Vec<String>,
    callback: ChangeCallback,
    cancel: CancellationToken,
}

struct Inner {
    root: RwLock<Value>,
    listeners: Mutex<Vec<Listener>>,
    /// Held from a write until its notifications are delivered
    delivery: Mutex<()>,
}

/// Tree-structured store held in memory
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_root(Value::Object(Map::new()))
    }

    /// Create a store pre-populated with `root`
    pub fn with_root(root: Value) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: RwLock::new(root),
                listeners: Mutex::new(Vec::new()),
                delivery: Mutex::new(()),
            }),
        }
    }

    /// Number of subscriptions that have not been closed
    pub fn listener_count(&self) -> usize {
        let mut listeners = lock(&self.inner.listeners);
        listeners.retain(|l| !l.cancel.is_cancelled());
        listeners.len()
    }

    fn read_at(&self, segments: &[String]) -> Value {
        let root = self.inner.root.read().unwrap_or_else(|p| p.into_inner());
        lookup(&root, segments).cloned().unwrap_or(Value::Null)
    }

    fn write_at(&self, segments: &[String], value: Value) {
        let _delivery = lock(&self.inner.delivery);
        {
            let mut root = self.inner.root.write().unwrap_or_else(|p| p.into_inner());
            write_value(&mut root, segments, value.clone());
        }
        self.notify(segments, &value);
    }

    /// Deliver a write to every listener whose subtree it touches
    fn notify(&self, written: &[String], value: &Value) {
        let targets: Vec<(ChangeCallback, ChangeNotification)> = {
            let mut listeners = lock(&self.inner.listeners);
            listeners.retain(|l| !l.cancel.is_cancelled());
            listeners
                .iter()
                .filter_map(|listener| {
                    notification_for(&listener.segments, written, value)
                        .map(|n| (listener.callback.clone(), n))
                })
                .collect()
        };

        for (callback, notification) in targets {
            deliver(&callback, notification);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

fn deliver(callback: &ChangeCallback, notification: ChangeNotification) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback(notification))).is_err() {
        error!("Change listener callback panicked");
    }
}

fn lookup<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

fn write_value(root: &mut Value, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        *root = if value.is_null() {
            Value::Object(Map::new())
        } else {
            value
        };
        return;
    };

    let mut node = root;
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = match node {
            Value::Object(map) => map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new())),
            _ => return,
        };
    }

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        if value.is_null() {
            map.shift_remove(last);
        } else {
            map.insert(last.clone(), value);
        }
    }
}

/// Notification a listener at `listen` receives for a write at `written`
fn notification_for(listen: &[String], written: &[String], value: &Value) -> Option<ChangeNotification> {
    if written.starts_with(listen) {
        let relative = written[listen.len()..].join("/");
        return Some(ChangeNotification::new(
            ChangeKind::Put,
            format!("/{}", relative),
            value.clone(),
        ));
    }
    if listen.starts_with(written) {
        // Write replaced an ancestor: the whole listened subtree changed
        let data = lookup(value, &listen[written.len()..])
            .cloned()
            .unwrap_or(Value::Null);
        return Some(ChangeNotification::new(ChangeKind::Put, "/", data));
    }
    None
}

#[async_trait]
impl RealtimeStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Value> {
        Ok(self.read_at(&path_segments(path)))
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.write_at(&path_segments(path), value);
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String> {
        let key = push_id::generate();
        self.write_at(&path_segments(&child_path(path, &key)), value);
        Ok(key)
    }

    fn listen(&self, path: &str, callback: ChangeCallback) -> Result<ListenHandle> {
        let segments = path_segments(path);
        let cancel = CancellationToken::new();

        let _delivery = lock(&self.inner.delivery);
        let snapshot = {
            let root = self.inner.root.read().unwrap_or_else(|p| p.into_inner());
            lock(&self.inner.listeners).push(Listener {
                segments: segments.clone(),
                callback: callback.clone(),
                cancel: cancel.clone(),
            });
            lookup(&root, &segments).cloned().unwrap_or(Value::Null)
        };

        debug!("Memory store listener registered at '{}'", path);
        deliver(&callback, ChangeNotification::new(ChangeKind::Put, "/", snapshot));

        Ok(ListenHandle::new(cancel))
    }
}
