//! Firebase Realtime Database over its REST API
//!
//! Reads and writes map onto `GET`/`PUT`/`POST {database_url}/{path}.json`.
//! The change feed uses the REST streaming protocol: a long-lived
//! `text/event-stream` response whose `put` and `patch` events carry a
//! `{"path": ..., "data": ...}` body. The feed is an `eventsource-client`
//! stream on its own task; the client reconnects with exponential backoff
//! and each new connection starts with a fresh full snapshot.

use async_trait::async_trait;
use eventsource_client::{self as es, Client};
use futures::StreamExt;
use hrm_common::{Error, Result};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ChangeCallback, ChangeKind, ChangeNotification, ListenHandle, RealtimeStore};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reply to a `POST` (push)
#[derive(Debug, Deserialize)]
struct PushReply {
    name: String,
}

/// Body of a `put` / `patch` stream event
#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

/// Client for one Firebase Realtime Database
#[derive(Clone)]
pub struct FirebaseStore {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    max_reconnect_delay: Duration,
}

impl FirebaseStore {
    pub fn new(
        database_url: &str,
        auth_token: Option<String>,
        max_reconnect_delay: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Store(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: database_url.trim_end_matches('/').to_string(),
            auth_token,
            max_reconnect_delay: max_reconnect_delay.max(INITIAL_RECONNECT_DELAY),
        })
    }

    fn url(&self, path: &str) -> String {
        node_url(&self.base_url, path)
    }

    fn auth_query(&self) -> Vec<(&'static str, String)> {
        self.auth_token
            .iter()
            .map(|token| ("auth", token.clone()))
            .collect()
    }

    /// Change feed URL with the credential in the query string
    fn feed_url(&self, path: &str) -> Result<String> {
        let mut url = Url::parse(&self.url(path))
            .map_err(|e| Error::Config(format!("Invalid database URL: {}", e)))?;
        if let Some(token) = &self.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url.to_string())
    }
}

fn node_url(base_url: &str, path: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        format!("{}/.json", base_url)
    } else {
        format!("{}/{}.json", base_url, path)
    }
}

fn store_error(context: &str, err: reqwest::Error) -> Error {
    Error::Store(format!("{}: {}", context, err))
}

#[async_trait]
impl RealtimeStore for FirebaseStore {
    async fn get(&self, path: &str) -> Result<Value> {
        self.client
            .get(self.url(path))
            .query(&self.auth_query())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| store_error("GET failed", e))?
            .json()
            .await
            .map_err(|e| store_error("Invalid GET response", e))
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.client
            .put(self.url(path))
            .query(&self.auth_query())
            .json(&value)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| store_error("PUT failed", e))?;
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String> {
        let reply: PushReply = self
            .client
            .post(self.url(path))
            .query(&self.auth_query())
            .json(&value)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| store_error("POST failed", e))?
            .json()
            .await
            .map_err(|e| store_error("Invalid POST response", e))?;
        Ok(reply.name)
    }

    fn listen(&self, path: &str, callback: ChangeCallback) -> Result<ListenHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::Internal("Change feed requires a Tokio runtime".to_string()))?;

        let reconnect = es::ReconnectOptions::reconnect(true)
            .retry_initial(true)
            .delay(INITIAL_RECONNECT_DELAY)
            .backoff_factor(2)
            .delay_max(self.max_reconnect_delay)
            .build();
        let client = es::ClientBuilder::for_url(&self.feed_url(path)?)
            .map_err(|e| Error::Store(format!("Invalid change feed URL: {:?}", e)))?
            .reconnect(reconnect)
            .build();

        let cancel = CancellationToken::new();
        runtime.spawn(run_feed(client, callback, cancel.clone()));

        info!("Firebase change feed started for '{}'", path);
        Ok(ListenHandle::new(cancel))
    }
}

/// Drive the change feed until cancelled
///
/// Transport errors are retried inside the client. `cancel` and
/// `auth_revoked` drop the connection and open a new one.
async fn run_feed(client: impl Client, callback: ChangeCallback, cancel: CancellationToken) {
    'feed: loop {
        let mut stream = client.stream();

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break 'feed,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(es::SSE::Event(event))) => match handle_frame(&event.event_type, &event.data) {
                    FrameAction::Deliver(notification) => callback(notification),
                    FrameAction::Ignore => {}
                    FrameAction::Reconnect(reason) => {
                        warn!("Change feed revoked ({}), reconnecting", reason);
                        break;
                    }
                },
                Some(Ok(es::SSE::Comment(_))) => {}
                Some(Err(e)) => warn!("Change feed error: {}", e),
                None => {
                    info!("Change feed ended, reconnecting");
                    break;
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(INITIAL_RECONNECT_DELAY) => {}
        }
    }

    info!("Firebase change feed stopped");
}

#[derive(Debug, PartialEq)]
enum FrameAction {
    Deliver(ChangeNotification),
    Ignore,
    Reconnect(String),
}

fn handle_frame(event_type: &str, data: &str) -> FrameAction {
    match event_type {
        "put" | "patch" => match serde_json::from_str::<StreamPayload>(data) {
            Ok(payload) => FrameAction::Deliver(ChangeNotification::new(
                ChangeKind::from_event_name(event_type),
                payload.path,
                payload.data,
            )),
            Err(e) => {
                warn!("Malformed {} event on change feed: {}", event_type, e);
                FrameAction::Ignore
            }
        },
        "keep-alive" => FrameAction::Ignore,
        "cancel" | "auth_revoked" => FrameAction::Reconnect(event_type.to_string()),
        other => {
            debug!("Ignoring change feed event '{}'", other);
            FrameAction::Ignore
        }
    }
}
