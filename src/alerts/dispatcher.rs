//! Concurrent, failure-isolated alert fan-out.

use super::AlertChannel;
use crate::Error;
use crate::models::Alert;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

/// Result of one channel's delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// The channel accepted the alert.
    Delivered,
    /// The channel returned an error.
    Failed(String),
    /// The channel did not finish within the per-channel bound.
    TimedOut,
    /// The alert was below the channel's minimum severity.
    Skipped,
}

impl DeliveryStatus {
    /// Metric label for this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Failed(_) => "failed",
            Self::TimedOut => "timed_out",
            Self::Skipped => "skipped",
        }
    }
}

/// Per-channel entry of a [`DispatchReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelOutcome {
    /// Channel name.
    pub channel: String,
    /// What happened.
    pub status: DeliveryStatus,
    /// Time spent on this channel.
    pub duration_ms: u64,
}

/// Outcome of one `notify` call, in channel configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// One entry per configured channel.
    pub outcomes: Vec<ChannelOutcome>,
}

impl DispatchReport {
    /// Number of channels that accepted the alert.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.count(|s| matches!(s, DeliveryStatus::Delivered))
    }

    /// Number of channels that failed or timed out.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, DeliveryStatus::Failed(_) | DeliveryStatus::TimedOut))
    }

    /// Outcome for a channel by name.
    #[must_use]
    pub fn outcome(&self, channel: &str) -> Option<&ChannelOutcome> {
        self.outcomes.iter().find(|o| o.channel == channel)
    }

    fn count(&self, pred: impl Fn(&DeliveryStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

/// Delivers alerts to every configured channel.
///
/// Cheap to clone; channels are shared.
#[derive(Clone)]
pub struct AlertDispatcher {
    channels: Vec<Arc<dyn AlertChannel>>,
    timeout: Duration,
}

impl AlertDispatcher {
    /// Creates a dispatcher over `channels` with a per-channel bound.
    #[must_use]
    pub fn new(channels: Vec<Arc<dyn AlertChannel>>, timeout: Duration) -> Self {
        Self { channels, timeout }
    }

    /// Creates a dispatcher with no channels.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Vec::new(), Duration::from_secs(1))
    }

    /// Number of configured channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Attempts delivery on every channel concurrently.
    ///
    /// Never fails: channel errors, timeouts and panics are recorded in the
    /// report and logged.
    pub async fn notify(&self, alert: &Alert) -> DispatchReport {
        let alert = Arc::new(alert.clone());
        let mut outcomes: Vec<Option<ChannelOutcome>> = vec![None; self.channels.len()];
        let mut tasks = JoinSet::new();
        let mut task_index = HashMap::new();

        for (index, channel) in self.channels.iter().enumerate() {
            if alert.severity < channel.min_severity() {
                outcomes[index] = Some(ChannelOutcome {
                    channel: channel.name().to_string(),
                    status: DeliveryStatus::Skipped,
                    duration_ms: 0,
                });
                continue;
            }

            let channel = Arc::clone(channel);
            let alert = Arc::clone(&alert);
            let timeout = self.timeout;
            let handle = tasks.spawn(async move {
                let start = Instant::now();
                let status = match tokio::time::timeout(timeout, channel.send(&alert)).await {
                    Ok(Ok(())) => DeliveryStatus::Delivered,
                    Ok(Err(e)) => DeliveryStatus::Failed(e.to_string()),
                    Err(_) => DeliveryStatus::TimedOut,
                };
                (index, status, elapsed_ms(start))
            });
            task_index.insert(handle.id(), index);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            let (index, status, duration_ms) = match joined {
                Ok((_, result)) => result,
                Err(e) => {
                    let Some(index) = task_index.get(&e.id()).copied() else {
                        continue;
                    };
                    (index, DeliveryStatus::Failed(format!("channel task failed: {e}")), 0)
                },
            };
            outcomes[index] = Some(ChannelOutcome {
                channel: self.channels[index].name().to_string(),
                status,
                duration_ms,
            });
        }

        let report = DispatchReport {
            outcomes: outcomes.into_iter().flatten().collect(),
        };
        for outcome in &report.outcomes {
            record_outcome(&alert, outcome);
        }
        report
    }

    /// Spawns [`AlertDispatcher::notify`] on the current runtime and returns
    /// immediately.
    ///
    /// Outside a runtime the alert is logged and dropped.
    pub fn notify_detached(&self, alert: Alert) {
        if self.channels.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let dispatcher = self.clone();
                handle.spawn(async move {
                    dispatcher.notify(&alert).await;
                });
            },
            Err(_) => {
                tracing::warn!(
                    alert_id = %alert.id,
                    kind = %alert.kind,
                    "No async runtime, alert dropped"
                );
            },
        }
    }
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field(
                "channels",
                &self.channels.iter().map(|c| c.name()).collect::<Vec<_>>(),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn record_outcome(alert: &Alert, outcome: &ChannelOutcome) {
    metrics::counter!(
        "riskwatch_alert_deliveries_total",
        "channel" => outcome.channel.clone(),
        "status" => outcome.status.as_str()
    )
    .increment(1);

    match &outcome.status {
        DeliveryStatus::Delivered => tracing::debug!(
            channel = %outcome.channel,
            alert_id = %alert.id,
            duration_ms = outcome.duration_ms,
            "Alert delivered"
        ),
        DeliveryStatus::Failed(cause) => {
            let err = Error::ChannelDelivery {
                channel: outcome.channel.clone(),
                cause: cause.clone(),
            };
            tracing::warn!(error = %err, alert_id = %alert.id, kind = %alert.kind, "Alert delivery failed");
        },
        DeliveryStatus::TimedOut => tracing::warn!(
            channel = %outcome.channel,
            alert_id = %alert.id,
            duration_ms = outcome.duration_ms,
            "Alert delivery timed out"
        ),
        DeliveryStatus::Skipped => {},
    }
}

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::testing::{FailingChannel, PanickingChannel, RecordingChannel, SlowChannel};
    use crate::models::{AlertKind, Severity};

    fn alert(severity: Severity) -> Alert {
        Alert::new("Model retrained to version 3", severity, AlertKind::Retrain)
    }

    #[tokio::test]
    async fn test_failing_channel_is_isolated() {
        let first = Arc::new(RecordingChannel::new("first"));
        let third = Arc::new(RecordingChannel::new("third"));
        let dispatcher = AlertDispatcher::new(
            vec![
                first.clone(),
                Arc::new(FailingChannel::new("second")),
                third.clone(),
            ],
            Duration::from_secs(1),
        );

        let report = dispatcher.notify(&alert(Severity::Info)).await;

        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.delivered(), 2);
        assert_eq!(report.failed(), 1);
        assert!(matches!(
            report.outcome("second").map(|o| &o.status),
            Some(DeliveryStatus::Failed(_))
        ));
        assert_eq!(first.received().len(), 1);
        assert_eq!(third.received().len(), 1);
    }

    #[tokio::test]
    async fn test_slow_channel_is_abandoned() {
        let fast = Arc::new(RecordingChannel::new("fast"));
        let dispatcher = AlertDispatcher::new(
            vec![
                Arc::new(SlowChannel::new("slow", Duration::from_secs(30))),
                fast.clone(),
            ],
            Duration::from_millis(50),
        );

        let start = Instant::now();
        let report = dispatcher.notify(&alert(Severity::Warning)).await;

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(
            report.outcome("slow").map(|o| &o.status),
            Some(&DeliveryStatus::TimedOut)
        );
        assert_eq!(
            report.outcome("fast").map(|o| &o.status),
            Some(&DeliveryStatus::Delivered)
        );
    }

    #[tokio::test]
    async fn test_min_severity_skips_channel() {
        let pager = Arc::new(RecordingChannel::with_min_severity("pager", Severity::Error));
        let chat = Arc::new(RecordingChannel::new("chat"));
        let dispatcher =
            AlertDispatcher::new(vec![pager.clone(), chat.clone()], Duration::from_secs(1));

        let report = dispatcher.notify(&alert(Severity::Info)).await;

        assert_eq!(report.outcomes[0].status, DeliveryStatus::Skipped);
        assert!(pager.received().is_empty());
        assert_eq!(chat.received().len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_channel_is_contained() {
        let ok = Arc::new(RecordingChannel::new("ok"));
        let dispatcher = AlertDispatcher::new(
            vec![Arc::new(PanickingChannel::new("boom")), ok.clone()],
            Duration::from_secs(1),
        );

        let report = dispatcher.notify(&alert(Severity::Critical)).await;

        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(report.outcomes[0].status, DeliveryStatus::Failed(_)));
        assert_eq!(report.outcomes[1].status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_no_channels_is_noop() {
        let report = AlertDispatcher::disabled().notify(&alert(Severity::Info)).await;
        assert!(report.outcomes.is_empty());
    }
}
