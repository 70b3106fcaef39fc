//! Stream session: one per `/heartrate/stream` connection
//!
//! A session replays the newest readings as `initial_reading` events, then
//! relays live readings from its hub subscriber as `new_reading` events. It
//! ends when the client goes away (the stream is dropped) or the hub closes.

use async_stream::stream;
use futures::Stream;
use hrm_common::config::RelayConfig;
use hrm_common::events::ReadingEvent;
use hrm_common::IdentifiedReading;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hub::{RelaySubscriber, TryNext};
use crate::readings::ReadingService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    ReplayHistory,
    Live,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub replay_count: usize,
    pub replay_retries: u32,
    pub replay_backoff: Duration,
}

impl From<&RelayConfig> for SessionConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            replay_count: config.replay_count,
            replay_retries: config.replay_retries,
            replay_backoff: config.replay_backoff(),
        }
    }
}

/// Logs session end however the stream is torn down
struct SessionGuard {
    id: Uuid,
    phase: SessionPhase,
    emitted: usize,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        info!(
            "Stream session {} ended in {:?} after {} events",
            self.id, self.phase, self.emitted
        );
    }
}

/// Event stream for one session
///
/// `subscriber` must be taken before calling so that readings written while
/// the replay is fetched are not missed. Readings that arrive both in the
/// replay and in the subscriber backlog are sent once.
pub fn reading_stream(
    readings: ReadingService,
    mut subscriber: RelaySubscriber,
    config: SessionConfig,
) -> impl Stream<Item = ReadingEvent> + Send + 'static {
    stream! {
        let mut guard = SessionGuard {
            id: subscriber.id(),
            phase: SessionPhase::ReplayHistory,
            emitted: 0,
        };
        info!("Stream session {} opened", guard.id);

        let replay = fetch_replay(&readings, &config).await;
        for item in &replay {
            guard.emitted += 1;
            yield ReadingEvent::initial(item.clone());
        }

        guard.phase = SessionPhase::Live;

        // Backlog buffered during the replay may overlap it
        loop {
            match subscriber.try_next() {
                TryNext::Item(item) if replay.contains(&item) => {
                    debug!("Session {} skipping replayed reading {}", guard.id, item.id);
                }
                TryNext::Item(item) => {
                    guard.emitted += 1;
                    yield ReadingEvent::new_reading(item);
                }
                TryNext::Empty => break,
                TryNext::Closed => {
                    guard.phase = SessionPhase::Closed;
                    return;
                }
            }
        }

        while let Some(item) = subscriber.next().await {
            guard.emitted += 1;
            yield ReadingEvent::new_reading(item);
        }

        guard.phase = SessionPhase::Closed;
    }
}

/// Newest readings for the replay, or none if the store stays unavailable
async fn fetch_replay(readings: &ReadingService, config: &SessionConfig) -> Vec<IdentifiedReading> {
    let attempts = config.replay_retries.max(1);
    let mut delay = config.replay_backoff;

    for attempt in 1..=attempts {
        match readings.get_latest_readings(config.replay_count).await {
            Ok(latest) => return latest,
            Err(e) => {
                warn!("Replay fetch attempt {}/{} failed: {}", attempt, attempts, e);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    warn!("History unavailable, stream starts without replay");
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{ListenerService, RelayHub};
    use crate::store::{ChangeCallback, ListenHandle, MemoryStore, RealtimeStore};
    use async_trait::async_trait;
    use futures::StreamExt;
    use hrm_common::events::ReadingEventKind;
    use hrm_common::{Error, Reading, Result};
    use serde_json::{json, Map, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn config() -> SessionConfig {
        SessionConfig {
            replay_count: 10,
            replay_retries: 3,
            replay_backoff: Duration::from_millis(1),
        }
    }

    /// Twelve readings "r00".."r11" with increasing timestamps
    fn seeded_store() -> MemoryStore {
        let mut readings = Map::new();
        for i in 0..12 {
            readings.insert(
                format!("r{:02}", i),
                json!({"bpm": 60 + i, "timestamp": format!("2024-01-01T00:00:{:02}", i)}),
            );
        }
        MemoryStore::with_root(json!({ "heartrate": readings }))
    }

    fn reading(id: &str, bpm: i64) -> IdentifiedReading {
        IdentifiedReading::new(id, Reading::new(Some(bpm), None))
    }

    async fn next_event<S: Stream<Item = ReadingEvent> + Unpin>(stream: &mut S) -> ReadingEvent {
        tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("event within 100ms")
            .expect("stream still open")
    }

    #[tokio::test]
    async fn test_replays_newest_first_before_live_events() {
        let store = seeded_store();
        let hub = RelayHub::new(16);
        let readings = ReadingService::new(Arc::new(store), "heartrate");
        let subscriber = hub.subscribe();
        hub.publish(reading("live", 99));

        let mut stream = Box::pin(reading_stream(readings, subscriber, config()));

        for expected in (2..12).rev() {
            let event = next_event(&mut stream).await;
            assert_eq!(event.kind, ReadingEventKind::Initial);
            assert_eq!(event.id(), format!("r{:02}", expected));
        }
        let event = next_event(&mut stream).await;
        assert_eq!(event.kind, ReadingEventKind::New);
        assert_eq!(event.id(), "live");
    }

    #[tokio::test]
    async fn test_push_emits_exactly_one_new_reading() {
        let store = MemoryStore::with_root(json!({"heartrate": {"old": {"bpm": 60}}}));
        let hub = RelayHub::new(16);
        let listener = ListenerService::new(Arc::new(store.clone()), "heartrate", hub.clone());
        listener.start().unwrap();
        let readings = ReadingService::new(Arc::new(store.clone()), "heartrate");

        let mut stream = Box::pin(reading_stream(readings.clone(), hub.subscribe(), config()));
        let replayed = next_event(&mut stream).await;
        assert_eq!((replayed.kind, replayed.id()), (ReadingEventKind::Initial, "old"));

        let id = readings
            .add_reading(&Reading::new(Some(72), Some("2024-03-03T03:03:03".into())))
            .await
            .unwrap();

        let event = next_event(&mut stream).await;
        assert_eq!(event.kind, ReadingEventKind::New);
        assert_eq!(event.id(), id);
        assert_eq!(event.payload().bpm, Some(72));

        let extra = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(extra.is_err(), "no further events expected");
    }

    #[tokio::test]
    async fn test_backlog_overlapping_replay_sent_once() {
        let store = MemoryStore::with_root(json!({"heartrate": {"a": {"bpm": 70}}}));
        let hub = RelayHub::new(16);
        let readings = ReadingService::new(Arc::new(store), "heartrate");
        let subscriber = hub.subscribe();
        hub.publish(reading("a", 70));
        hub.publish(reading("b", 71));

        let mut stream = Box::pin(reading_stream(readings, subscriber, config()));

        let first = next_event(&mut stream).await;
        assert_eq!((first.kind, first.id()), (ReadingEventKind::Initial, "a"));
        let second = next_event(&mut stream).await;
        assert_eq!((second.kind, second.id()), (ReadingEventKind::New, "b"));
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_subscriber() {
        let hub = RelayHub::new(16);
        let readings = ReadingService::new(Arc::new(seeded_store()), "heartrate");
        let mut stream = Box::pin(reading_stream(readings, hub.subscribe(), config()));
        next_event(&mut stream).await;
        assert_eq!(hub.subscriber_count(), 1);

        drop(stream);

        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publish(reading("after", 1)), 0);
    }

    #[tokio::test]
    async fn test_hub_close_ends_stream() {
        let hub = RelayHub::new(16);
        let readings = ReadingService::new(Arc::new(MemoryStore::new()), "heartrate");
        let mut stream = Box::pin(reading_stream(readings, hub.subscribe(), config()));

        hub.close();

        let end = tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("stream ends promptly");
        assert!(end.is_none());
    }

    /// Store whose reads always fail
    #[derive(Default)]
    struct FailingStore {
        gets: AtomicUsize,
    }

    #[async_trait]
    impl RealtimeStore for FailingStore {
        async fn get(&self, _path: &str) -> Result<Value> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Err(Error::Store("unavailable".to_string()))
        }

        async fn set(&self, _path: &str, _value: Value) -> Result<()> {
            Ok(())
        }

        async fn push(&self, _path: &str, _value: Value) -> Result<String> {
            Err(Error::Store("unavailable".to_string()))
        }

        fn listen(&self, _path: &str, _callback: ChangeCallback) -> Result<ListenHandle> {
            Err(Error::Store("unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_replay_failure_falls_back_to_live() {
        let store = Arc::new(FailingStore::default());
        let hub = RelayHub::new(16);
        let readings = ReadingService::new(store.clone(), "heartrate");
        let subscriber = hub.subscribe();
        hub.publish(reading("live", 80));

        let mut stream = Box::pin(reading_stream(readings, subscriber, config()));

        let event = next_event(&mut stream).await;
        assert_eq!(event.kind, ReadingEventKind::New);
        assert_eq!(event.id(), "live");
        assert_eq!(store.gets.load(Ordering::SeqCst), 3);
    }
}
