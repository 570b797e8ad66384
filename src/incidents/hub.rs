//! Pub/sub relay from incident producers to live subscribers.

use crate::storage::connection::acquire_lock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Default per-subscriber queue depth.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Relays published messages to every registered subscriber.
///
/// Each subscriber owns a bounded queue. `publish` iterates a snapshot of the
/// subscriber set taken at call time; a subscriber whose queue is closed or
/// full is unregistered and the remaining subscribers still receive the
/// message.
pub struct IncidentHub {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Arc<str>>>>,
    next_id: AtomicU64,
    buffer: usize,
}

/// Registration returned by [`IncidentHub::subscribe`].
///
/// Dropping the handle closes its queue; the hub notices on the next publish.
#[derive(Debug)]
pub struct SubscriberHandle {
    id: u64,
    receiver: mpsc::Receiver<Arc<str>>,
}

impl SubscriberHandle {
    /// Identifier used with [`IncidentHub::unsubscribe`].
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next message. `None` once the hub dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.receiver.recv().await
    }
}

impl IncidentHub {
    /// Creates a hub whose subscribers buffer up to `buffer` messages.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Registers a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> SubscriberHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.buffer);
        let count = {
            let mut subscribers = acquire_lock(&self.subscribers);
            subscribers.insert(id, sender);
            subscribers.len()
        };
        record_subscribers(count);
        tracing::debug!(subscriber = id, subscribers = count, "Incident subscriber registered");
        SubscriberHandle { id, receiver }
    }

    /// Removes a subscriber. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let (removed, count) = {
            let mut subscribers = acquire_lock(&self.subscribers);
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };
        if removed {
            record_subscribers(count);
            tracing::debug!(subscriber = id, subscribers = count, "Incident subscriber removed");
        }
        removed
    }

    /// Delivers `message` to every current subscriber and returns how many
    /// accepted it. Zero subscribers is a no-op.
    pub fn publish(&self, message: &serde_json::Value) -> usize {
        self.publish_text(&message.to_string())
    }

    /// Delivers a pre-serialized message.
    pub fn publish_text(&self, message: &str) -> usize {
        let snapshot: Vec<(u64, mpsc::Sender<Arc<str>>)> = acquire_lock(&self.subscribers)
            .iter()
            .map(|(id, sender)| (*id, sender.clone()))
            .collect();
        if snapshot.is_empty() {
            return 0;
        }

        let payload: Arc<str> = Arc::from(message);
        let mut delivered = 0;
        let mut dropped = Vec::new();
        for (id, sender) in snapshot {
            match sender.try_send(Arc::clone(&payload)) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = id, "Incident subscriber queue full, dropping subscriber");
                    dropped.push(id);
                },
                Err(mpsc::error::TrySendError::Closed(_)) => dropped.push(id),
            }
        }

        for id in dropped {
            self.unsubscribe(id);
        }
        metrics::counter!("riskwatch_incident_broadcasts_total").increment(1);
        delivered
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        acquire_lock(&self.subscribers).len()
    }
}

impl Default for IncidentHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl std::fmt::Debug for IncidentHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncidentHub")
            .field("subscribers", &self.subscriber_count())
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_subscribers(count: usize) {
    metrics::gauge!("riskwatch_incident_subscribers").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let hub = IncidentHub::default();
        assert_eq!(hub.publish(&json!({"type": "incidents"})), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let hub = IncidentHub::default();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        assert_eq!(hub.publish(&json!({"id": 1})), 2);

        assert_eq!(a.recv().await.as_deref(), Some(r#"{"id":1}"#));
        assert_eq!(b.recv().await.as_deref(), Some(r#"{"id":1}"#));
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_unregistered() {
        let hub = IncidentHub::default();
        let gone = hub.subscribe();
        let mut alive = hub.subscribe();
        drop(gone);

        assert_eq!(hub.publish_text("ping"), 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(alive.recv().await.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn test_full_queue_unregisters_slow_subscriber() {
        let hub = IncidentHub::new(1);
        let mut slow = hub.subscribe();
        let mut fast = hub.subscribe();

        assert_eq!(hub.publish_text("one"), 2);
        assert_eq!(fast.recv().await.as_deref(), Some("one"));

        assert_eq!(hub.publish_text("two"), 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(fast.recv().await.as_deref(), Some("two"));

        assert_eq!(slow.recv().await.as_deref(), Some("one"));
        assert_eq!(slow.recv().await, None);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let hub = IncidentHub::default();
        let handle = hub.subscribe();
        assert!(hub.unsubscribe(handle.id()));
        assert!(!hub.unsubscribe(handle.id()));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_and_publish() {
        let hub = Arc::new(IncidentHub::new(256));
        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..8 {
            let hub = Arc::clone(&hub);
            tasks.spawn(async move {
                let handle = hub.subscribe();
                hub.publish(&json!({"from": i}));
                hub.unsubscribe(handle.id());
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.expect("task");
        }
        assert_eq!(hub.subscriber_count(), 0);
    }
}
