//! Periodic background tasks: retrain evaluation and fairness audits.

use super::{FairnessAuditor, RetrainOrchestrator};
use crate::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Spawns the periodic retrain loop.
///
/// Each tick runs [`RetrainOrchestrator::evaluate_and_maybe_retrain`]. A tick
/// that finds another lifecycle operation in flight is skipped. Failures are
/// already reported through alerts by the orchestrator. The first tick fires
/// one full interval after start.
pub fn spawn_retrain_loop(
    orchestrator: Arc<RetrainOrchestrator>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_every(interval, shutdown, "retrain", move || {
        let orchestrator = Arc::clone(&orchestrator);
        async move {
            match orchestrator.evaluate_and_maybe_retrain().await {
                Ok(outcome) => tracing::debug!(?outcome, "Scheduled retrain evaluation finished"),
                Err(Error::RetrainInProgress) => {
                    tracing::debug!("Scheduled retrain skipped, lifecycle busy");
                },
                Err(e) => tracing::warn!(error = %e, "Scheduled retrain failed"),
            }
        }
    }))
}

/// Spawns the periodic fairness audit loop.
pub fn spawn_audit_loop(
    auditor: Arc<FairnessAuditor>,
    attributes: Vec<String>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let attributes = Arc::new(attributes);
    tokio::spawn(run_every(interval, shutdown, "fairness_audit", move || {
        let auditor = Arc::clone(&auditor);
        let attributes = Arc::clone(&attributes);
        async move {
            if let Err(e) = auditor.audit(&attributes).await {
                tracing::warn!(error = %e, "Scheduled fairness audit failed");
            }
        }
    }))
}

async fn run_every<F, Fut>(
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    task: &'static str,
    mut job: F,
) where
    F: FnMut() -> Fut + Send,
    Fut: std::future::Future<Output = ()> + Send,
{
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    tracing::info!(task, interval_secs = interval.as_secs(), "Scheduled task started");

    loop {
        tokio::select! {
            _ = ticker.tick() => job().await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::info!(task, "Scheduled task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_run_every_ticks_until_shutdown() {
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = watch::channel(false);
        let counter = Arc::clone(&count);
        let task = tokio::spawn(run_every(Duration::from_millis(10), rx, "test", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        tokio::time::sleep(Duration::from_millis(80)).await;
        tx.send(true).expect("send");
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("stopped")
            .expect("join");

        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 1, "expected at least one tick, got {ticks}");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), ticks);
    }
}
