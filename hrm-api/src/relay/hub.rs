//! Relay hub: fan-out of live readings to stream sessions
//!
//! Every stream session holds its own [`RelaySubscriber`], so each session
//! sees every reading published after it subscribed. Buffers are bounded: a
//! subscriber that falls more than `capacity` readings behind loses the
//! oldest ones and keeps going.

use hrm_common::IdentifiedReading;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Publish side of the relay, cheap to clone
#[derive(Clone)]
pub struct RelayHub {
    tx: broadcast::Sender<IdentifiedReading>,
    shutdown: CancellationToken,
}

impl RelayHub {
    /// Create a hub buffering up to `capacity` readings per subscriber
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        info!("Relay hub initialized with capacity {}", capacity);
        Self {
            tx,
            shutdown: CancellationToken::new(),
        }
    }

    /// Publish a reading to every current subscriber
    ///
    /// Returns the number of subscribers reached (0 when nobody listens).
    pub fn publish(&self, reading: IdentifiedReading) -> usize {
        match self.tx.send(reading) {
            Ok(count) => {
                debug!("Relayed reading to {} subscribers", count);
                count
            }
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> RelaySubscriber {
        RelaySubscriber {
            id: Uuid::new_v4(),
            rx: self.tx.subscribe(),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// End every subscriber; used on shutdown
    pub fn close(&self) {
        info!("Closing relay hub ({} subscribers)", self.subscriber_count());
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Outcome of a non-blocking poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TryNext {
    Item(IdentifiedReading),
    Empty,
    Closed,
}

/// One session's view of the relay
pub struct RelaySubscriber {
    id: Uuid,
    rx: broadcast::Receiver<IdentifiedReading>,
    shutdown: CancellationToken,
}

impl RelaySubscriber {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Take the next buffered reading without waiting
    pub fn try_next(&mut self) -> TryNext {
        if self.shutdown.is_cancelled() {
            return TryNext::Closed;
        }
        loop {
            match self.rx.try_recv() {
                Ok(reading) => return TryNext::Item(reading),
                Err(TryRecvError::Empty) => return TryNext::Empty,
                Err(TryRecvError::Lagged(skipped)) => self.log_lag(skipped),
                Err(TryRecvError::Closed) => return TryNext::Closed,
            }
        }
    }

    /// Wait for the next reading; `None` once the hub is closed
    pub async fn next(&mut self) -> Option<IdentifiedReading> {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                received = self.rx.recv() => match received {
                    Ok(reading) => return Some(reading),
                    Err(RecvError::Lagged(skipped)) => self.log_lag(skipped),
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }

    fn log_lag(&self, skipped: u64) {
        warn!(
            "Subscriber {} lagged, dropped {} oldest readings",
            self.id, skipped
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrm_common::Reading;
    use std::time::Duration;

    fn item(id: &str) -> IdentifiedReading {
        IdentifiedReading::new(id, Reading::new(Some(70), None))
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = RelayHub::new(4);
        assert_eq!(hub.publish(item("a")), 0);
    }

    #[test]
    fn test_every_subscriber_gets_every_reading() {
        let hub = RelayHub::new(8);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        assert_eq!(hub.publish(item("a")), 2);
        assert_eq!(hub.publish(item("b")), 2);

        for subscriber in [&mut first, &mut second] {
            assert_eq!(subscriber.try_next(), TryNext::Item(item("a")));
            assert_eq!(subscriber.try_next(), TryNext::Item(item("b")));
            assert_eq!(subscriber.try_next(), TryNext::Empty);
        }
    }

    #[test]
    fn test_lagging_subscriber_drops_oldest() {
        let hub = RelayHub::new(2);
        let mut subscriber = hub.subscribe();
        for id in ["a", "b", "c", "d"] {
            hub.publish(item(id));
        }

        assert_eq!(subscriber.try_next(), TryNext::Item(item("c")));
        assert_eq!(subscriber.try_next(), TryNext::Item(item("d")));
        assert_eq!(subscriber.try_next(), TryNext::Empty);
    }

    #[test]
    fn test_dropped_subscriber_unregisters() {
        let hub = RelayHub::new(4);
        let subscriber = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        drop(subscriber);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_next_wakes_on_publish() {
        let hub = RelayHub::new(4);
        let mut subscriber = hub.subscribe();

        let publisher = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(item("late"));
        });

        let received = tokio::time::timeout(Duration::from_secs(1), subscriber.next())
            .await
            .expect("Should wake on publish");
        assert_eq!(received, Some(item("late")));
    }

    #[tokio::test]
    async fn test_close_ends_subscribers() {
        let hub = RelayHub::new(4);
        let mut subscriber = hub.subscribe();
        hub.close();

        assert!(hub.is_closed());
        assert_eq!(subscriber.try_next(), TryNext::Closed);
        assert_eq!(subscriber.next().await, None);
    }
}
