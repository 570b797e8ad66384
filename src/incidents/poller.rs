//! Periodic incident polling into the hub.

use super::feeds::IncidentFeed;
use super::hub::IncidentHub;
use crate::models::{Incident, IncidentSource};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Polls every feed and publishes to the hub when the combined set changes.
pub struct IncidentPoller {
    feeds: Vec<Arc<dyn IncidentFeed>>,
    hub: Arc<IncidentHub>,
    interval: Duration,
    previous: Option<Vec<Incident>>,
}

impl IncidentPoller {
    /// Creates a poller.
    #[must_use]
    pub fn new(feeds: Vec<Arc<dyn IncidentFeed>>, hub: Arc<IncidentHub>, interval: Duration) -> Self {
        Self {
            feeds,
            hub,
            interval,
            previous: None,
        }
    }

    /// Number of configured feeds.
    #[must_use]
    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    /// Runs one poll. Returns the number of subscribers reached, or `None`
    /// when nothing changed since the last poll.
    pub async fn poll_once(&mut self) -> Option<usize> {
        let mut current = Vec::new();
        for feed in &self.feeds {
            match feed.fetch().await {
                Ok(incidents) => current.extend(incidents),
                Err(e) => tracing::warn!(
                    source = %feed.source(),
                    error = %e,
                    "Incident fetch failed, treating as empty"
                ),
            }
        }

        if self.previous.as_ref() == Some(&current) {
            return None;
        }

        let message = incidents_message(&current);
        let delivered = self.hub.publish(&message);
        tracing::info!(
            incidents = current.len(),
            delivered,
            "Incident set changed, broadcast to subscribers"
        );
        self.previous = Some(current);
        Some(delivered)
    }

    /// Polls on the configured interval until `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Incident poller stopped");
    }
}

/// Builds the broadcast message, grouping incidents by source.
#[must_use]
pub fn incidents_message(incidents: &[Incident]) -> serde_json::Value {
    let by_source = |source: IncidentSource| {
        incidents
            .iter()
            .filter(|i| i.source == source)
            .collect::<Vec<_>>()
    };
    json!({
        "type": "incidents",
        "pagerduty": by_source(IncidentSource::PagerDuty),
        "servicenow": by_source(IncidentSource::ServiceNow),
        "polled_at": crate::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedFeed {
        responses: Mutex<Vec<Result<Vec<Incident>>>>,
    }

    impl ScriptedFeed {
        fn new(responses: Vec<Result<Vec<Incident>>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl IncidentFeed for ScriptedFeed {
        fn source(&self) -> IncidentSource {
            IncidentSource::PagerDuty
        }

        async fn fetch(&self) -> Result<Vec<Incident>> {
            let mut responses = self.responses.lock().expect("lock");
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                match responses.first() {
                    Some(Ok(incidents)) => Ok(incidents.clone()),
                    _ => Ok(Vec::new()),
                }
            }
        }
    }

    fn incident(id: &str) -> Incident {
        Incident {
            source: IncidentSource::PagerDuty,
            external_id: id.to_string(),
            title: format!("incident {id}"),
            status: "triggered".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publishes_only_on_change() {
        let hub = Arc::new(IncidentHub::default());
        let mut subscriber = hub.subscribe();
        let feed = ScriptedFeed::new(vec![
            Ok(vec![incident("P1")]),
            Ok(vec![incident("P1")]),
            Ok(vec![incident("P1"), incident("P2")]),
        ]);
        let mut poller = IncidentPoller::new(
            vec![Arc::new(feed)],
            Arc::clone(&hub),
            Duration::from_secs(5),
        );

        assert_eq!(poller.poll_once().await, Some(1));
        assert_eq!(poller.poll_once().await, None);
        assert_eq!(poller.poll_once().await, Some(1));

        let first: serde_json::Value =
            serde_json::from_str(&subscriber.recv().await.expect("first")).expect("json");
        assert_eq!(first["type"], "incidents");
        assert_eq!(first["pagerduty"][0]["external_id"], "P1");
        assert_eq!(first["servicenow"], json!([]));
        let second: serde_json::Value =
            serde_json::from_str(&subscriber.recv().await.expect("second")).expect("json");
        assert_eq!(second["pagerduty"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_feed_failure_counts_as_empty() {
        let hub = Arc::new(IncidentHub::default());
        let feed = ScriptedFeed::new(vec![
            Ok(vec![incident("P1")]),
            Err(Error::operation("fetch", "HTTP 503")),
            Ok(Vec::new()),
        ]);
        let mut poller =
            IncidentPoller::new(vec![Arc::new(feed)], hub, Duration::from_secs(5));

        assert!(poller.poll_once().await.is_some());
        assert!(poller.poll_once().await.is_some());
        assert_eq!(poller.poll_once().await, None);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let hub = Arc::new(IncidentHub::default());
        let poller = IncidentPoller::new(Vec::new(), hub, Duration::from_millis(10));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(poller.run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).expect("send");
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("stopped")
            .expect("join");
    }
}
