//! Retrain orchestration: drift decision, training, publication.
//!
//! # Lifecycle
//!
//! ```text
//! IDLE -> EVALUATING -> IDLE                           (policy says skip)
//!                    -> TRAINING -> PUBLISHING -> IDLE (new version active)
//!                    -> TRAINING -> IDLE               (trainer failed or cancelled)
//! ```
//!
//! One lifecycle lock serializes retrain cycles, rollbacks and reloads. A
//! request that finds the lock held is rejected with
//! [`Error::RetrainInProgress`], never queued.
//!
//! Publication is `VersionStore::publish_with_watermark`, then
//! `VersionStore::set_current`, then `ActiveVersionCache::swap`. Any failing
//! step aborts the cycle and the previously active version keeps serving.
//!
//! The drift window starts at the active version's feedback watermark: the
//! instant its training cycle read the feedback log. Feedback submitted while
//! a cycle is training therefore counts toward the next cycle.

use crate::alerts::AlertDispatcher;
use crate::models::{Alert, AlertKind, FeedbackRecord, ModelVersion, Severity};
use crate::serving::ActiveVersionCache;
use crate::storage::connection::acquire_lock;
use crate::storage::{FeedbackStore, VersionStore};
use crate::training::{Dataset, TrainedModel, Trainer};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedMutexGuard, oneshot};
use tokio::task::JoinHandle;

/// Where the orchestrator currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrainState {
    /// No cycle running.
    Idle,
    /// Reading feedback and consulting the drift policy.
    Evaluating,
    /// The trainer is fitting.
    Training,
    /// Writing and activating the new version.
    Publishing,
}

impl RetrainState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Evaluating,
            2 => Self::Training,
            3 => Self::Publishing,
            _ => Self::Idle,
        }
    }

    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Evaluating => "evaluating",
            Self::Training => "training",
            Self::Publishing => "publishing",
        }
    }
}

impl fmt::Display for RetrainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RetrainOutcome {
    /// The drift policy declined to retrain.
    Skipped {
        /// Why.
        reason: String,
    },
    /// A new version was published and activated.
    Retrained {
        /// The new version number.
        version: u64,
        /// Its decision threshold.
        threshold: f64,
    },
}

/// Verdict of a [`DriftPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftDecision {
    /// Proceed to training.
    Retrain,
    /// Do not retrain, with the reason.
    Skip(String),
}

/// Decides whether the feedback the active version has not been trained on
/// justifies retraining.
pub trait DriftPolicy: Send + Sync {
    /// Policy name, used in logs.
    fn name(&self) -> &'static str;

    /// Evaluates the feedback submitted since the active version's feedback
    /// watermark (all feedback when nothing is active).
    fn evaluate(&self, recent_feedback: &[FeedbackRecord]) -> DriftDecision;
}

/// Default policy: retrain once at least `min_records` feedback records exist
/// that the active version was not trained on.
///
/// No distribution statistic is computed; richer drift detection plugs in as
/// another [`DriftPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackCountPolicy {
    /// Minimum number of new feedback records. `0` behaves like `1`.
    pub min_records: usize,
}

impl Default for FeedbackCountPolicy {
    fn default() -> Self {
        Self { min_records: 1 }
    }
}

impl DriftPolicy for FeedbackCountPolicy {
    fn name(&self) -> &'static str {
        "feedback_count"
    }

    fn evaluate(&self, recent_feedback: &[FeedbackRecord]) -> DriftDecision {
        let required = self.min_records.max(1);
        if recent_feedback.len() >= required {
            DriftDecision::Retrain
        } else if recent_feedback.is_empty() {
            DriftDecision::Skip("no new feedback since the active version".to_string())
        } else {
            DriftDecision::Skip(format!(
                "{} new feedback records, {required} required",
                recent_feedback.len()
            ))
        }
    }
}

/// Exclusive hold on the lifecycle lock.
///
/// Obtained with [`RetrainOrchestrator::begin`] so a caller can learn
/// synchronously whether a cycle may start, then run it elsewhere.
pub struct RetrainTicket {
    _guard: OwnedMutexGuard<()>,
}

impl fmt::Debug for RetrainTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetrainTicket")
    }
}

/// Resets the state to `Idle` when a cycle ends by any path.
struct StateGuard<'a> {
    state: &'a AtomicU8,
}

impl<'a> StateGuard<'a> {
    fn enter(state: &'a AtomicU8, initial: RetrainState) -> Self {
        state.store(initial as u8, Ordering::SeqCst);
        Self { state }
    }

    fn set(&self, next: RetrainState) {
        self.state.store(next as u8, Ordering::SeqCst);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.state.store(RetrainState::Idle as u8, Ordering::SeqCst);
    }
}

/// Owns the retrain state machine and every writer path into the active
/// version: retrain, rollback, reload.
pub struct RetrainOrchestrator {
    store: Arc<dyn VersionStore>,
    cache: Arc<ActiveVersionCache>,
    feedback: Arc<dyn FeedbackStore>,
    trainer: Arc<dyn Trainer>,
    dispatcher: Arc<AlertDispatcher>,
    policy: Arc<dyn DriftPolicy>,
    base: Arc<Dataset>,
    lifecycle: Arc<tokio::sync::Mutex<()>>,
    state: AtomicU8,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
    /// Fit abandoned by a cancel, still running on the blocking pool.
    abandoned: Mutex<Option<JoinHandle<Result<TrainedModel>>>>,
}

impl RetrainOrchestrator {
    /// Creates an orchestrator with the default [`FeedbackCountPolicy`] and an
    /// empty base dataset.
    #[must_use]
    pub fn new(
        store: Arc<dyn VersionStore>,
        cache: Arc<ActiveVersionCache>,
        feedback: Arc<dyn FeedbackStore>,
        trainer: Arc<dyn Trainer>,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Self {
        Self {
            store,
            cache,
            feedback,
            trainer,
            dispatcher,
            policy: Arc::new(FeedbackCountPolicy::default()),
            base: Arc::new(Dataset::default()),
            lifecycle: Arc::new(tokio::sync::Mutex::new(())),
            state: AtomicU8::new(RetrainState::Idle as u8),
            cancel: Mutex::new(None),
            abandoned: Mutex::new(None),
        }
    }

    /// Replaces the drift policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn DriftPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the base training set that feedback is merged into.
    #[must_use]
    pub fn with_base_dataset(mut self, base: Dataset) -> Self {
        self.base = Arc::new(base);
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RetrainState {
        RetrainState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// The cache this orchestrator activates versions in.
    #[must_use]
    pub const fn cache(&self) -> &Arc<ActiveVersionCache> {
        &self.cache
    }

    /// The version store this orchestrator publishes to.
    #[must_use]
    pub const fn store(&self) -> &Arc<dyn VersionStore> {
        &self.store
    }

    /// Takes the lifecycle lock without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetrainInProgress`] if a cycle, rollback or reload is
    /// in flight.
    pub fn begin(&self) -> Result<RetrainTicket> {
        Arc::clone(&self.lifecycle)
            .try_lock_owned()
            .map(|guard| RetrainTicket { _guard: guard })
            .map_err(|_| Error::RetrainInProgress)
    }

    /// Runs one cycle, consulting the drift policy.
    ///
    /// # Errors
    ///
    /// - [`Error::RetrainInProgress`] if another lifecycle operation is in flight
    /// - [`Error::TrainerFailure`] if fitting fails
    /// - [`Error::Cancelled`] if an operator cancelled the cycle
    /// - [`Error::StorageFailure`] if reading feedback or publishing fails
    pub async fn evaluate_and_maybe_retrain(&self) -> Result<RetrainOutcome> {
        let ticket = self.begin()?;
        self.run(ticket, false).await
    }

    /// Runs one cycle without consulting the drift policy.
    ///
    /// # Errors
    ///
    /// Same as [`RetrainOrchestrator::evaluate_and_maybe_retrain`].
    pub async fn force_retrain(&self) -> Result<RetrainOutcome> {
        let ticket = self.begin()?;
        self.run(ticket, true).await
    }

    /// Runs one cycle under an already acquired ticket.
    ///
    /// The ticket is released before alerts go out, so alert delivery never
    /// holds up the next lifecycle operation. After a cancel it is held until
    /// the abandoned fit returns.
    ///
    /// # Errors
    ///
    /// Same as [`RetrainOrchestrator::evaluate_and_maybe_retrain`], minus
    /// `RetrainInProgress`.
    pub async fn run(&self, ticket: RetrainTicket, force: bool) -> Result<RetrainOutcome> {
        let result = self.cycle(force).await;
        let abandoned = acquire_lock(&self.abandoned).take();
        match abandoned {
            Some(fit) => {
                tokio::spawn(async move {
                    let _ = fit.await;
                    drop(ticket);
                    tracing::debug!("Abandoned fit returned, lifecycle lock released");
                });
            },
            None => drop(ticket),
        }
        self.report(&result).await;
        result
    }

    /// Cancels a cycle that is in `TRAINING`. Returns whether one was
    /// cancelled.
    ///
    /// The cycle ends at once with [`Error::Cancelled`], the state returns to
    /// `IDLE` and nothing is published. The trainer thread cannot be
    /// interrupted; its result is discarded, and retrain, rollback and reload
    /// keep failing with [`Error::RetrainInProgress`] until it returns, so two
    /// fits never run at once.
    pub fn cancel(&self) -> bool {
        let Some(sender) = acquire_lock(&self.cancel).take() else {
            return false;
        };
        let cancelled = sender.send(()).is_ok();
        if cancelled {
            tracing::info!("Retrain cancellation requested");
        }
        cancelled
    }

    /// Activates a previously published version.
    ///
    /// # Errors
    ///
    /// - [`Error::RetrainInProgress`] if another lifecycle operation is in flight
    /// - [`Error::VersionNotFound`] if `version` was never published; the
    ///   active version is unchanged
    /// - [`Error::StorageFailure`] if the pointer cannot be written
    pub async fn rollback(&self, version: u64) -> Result<Arc<ModelVersion>> {
        let (from, target) = self.activate(version)?;
        self.announce_rollback(from, version).await;
        Ok(target)
    }

    /// Synchronous half of [`RetrainOrchestrator::rollback`]: moves the
    /// pointer and swaps the cache without sending the alert. Returns the
    /// previously active version number and the new active version.
    ///
    /// Performs blocking store I/O; async callers run it on the blocking pool.
    ///
    /// # Errors
    ///
    /// Same as [`RetrainOrchestrator::rollback`].
    pub fn activate(&self, version: u64) -> Result<(Option<u64>, Arc<ModelVersion>)> {
        let _ticket = self.begin()?;
        let target = self.store.get(version)?;
        self.store.set_current(version)?;
        let previous = self.cache.swap(Arc::clone(&target));

        let from = previous.map(|v| v.version);
        tracing::info!(from = ?from, to = version, "Model rolled back");
        metrics::counter!("riskwatch_rollbacks_total").increment(1);
        Ok((from, target))
    }

    /// Sends the operational alert for a completed rollback.
    pub async fn announce_rollback(&self, from: Option<u64>, to: u64) {
        self.dispatcher
            .notify(
                &Alert::new(
                    format!("Model rolled back to version {to}"),
                    Severity::Info,
                    AlertKind::Operational,
                )
                .with_details(serde_json::json!({ "from": from, "to": to })),
            )
            .await;
    }

    /// Re-reads the durable current-version pointer into the cache.
    ///
    /// # Errors
    ///
    /// - [`Error::RetrainInProgress`] if another lifecycle operation is in flight
    /// - [`Error::NoActiveVersion`] if no pointer has ever been written
    /// - [`Error::VersionNotFound`] if the pointer names a missing artifact
    pub fn reload(&self) -> Result<Arc<ModelVersion>> {
        let _ticket = self.begin()?;
        let current = self.store.get_current()?;
        self.cache.swap(Arc::clone(&current));
        tracing::info!(version = current.version, "Model reloaded from pointer");
        Ok(current)
    }

    /// Brings the cache up at startup.
    ///
    /// Loads the durable pointer when there is one. With an empty store and a
    /// non-empty base dataset, trains and activates version 1. Returns the
    /// active version, if any.
    ///
    /// # Errors
    ///
    /// Propagates storage and trainer failures.
    pub async fn bootstrap(&self, train_if_empty: bool) -> Result<Option<Arc<ModelVersion>>> {
        match self.reload() {
            Ok(version) => return Ok(Some(version)),
            Err(Error::NoActiveVersion) => {},
            Err(e) => return Err(e),
        }

        let published = self.store.versions()?;
        if !published.is_empty() {
            tracing::warn!(
                versions = published.len(),
                "Versions exist but no current pointer is set; serving stays inactive until rollback"
            );
            return Ok(None);
        }
        if !train_if_empty || self.base.is_empty() {
            tracing::info!("No model published yet");
            return Ok(None);
        }

        tracing::info!(rows = self.base.len(), "Training initial model version");
        self.force_retrain().await?;
        Ok(self.cache.snapshot())
    }

    async fn cycle(&self, force: bool) -> Result<RetrainOutcome> {
        let state = StateGuard::enter(&self.state, RetrainState::Evaluating);

        if !force {
            let since = self.cache.snapshot().map(|v| v.feedback_window_start());
            let recent = self.feedback.feedback_since(since)?;
            if let DriftDecision::Skip(reason) = self.policy.evaluate(&recent) {
                tracing::debug!(policy = self.policy.name(), reason = %reason, "Retrain skipped");
                return Ok(RetrainOutcome::Skipped { reason });
            }
        }

        let (cancel_tx, cancel_rx) = oneshot::channel();
        *acquire_lock(&self.cancel) = Some(cancel_tx);
        state.set(RetrainState::Training);
        let trained = self.train(cancel_rx, force).await;
        acquire_lock(&self.cancel).take();
        let (trained, feedback_through) = trained?;

        state.set(RetrainState::Publishing);
        let version = self.store.publish_with_watermark(
            trained.scorer,
            trained.threshold,
            Some(feedback_through),
        )?;
        self.store.set_current(version.version)?;
        self.cache.swap(Arc::clone(&version));

        Ok(RetrainOutcome::Retrained {
            version: version.version,
            threshold: version.threshold,
        })
    }

    /// Reads the feedback snapshot and fits on it. Returns the model and the
    /// instant the snapshot was taken.
    async fn train(
        &self,
        mut cancel: oneshot::Receiver<()>,
        force: bool,
    ) -> Result<(TrainedModel, DateTime<Utc>)> {
        let feedback_through = crate::now();
        let feedback = self.feedback.feedback_since(None)?;
        let mut dataset = self.base.as_ref().clone();
        dataset.extend_with_feedback(&feedback);
        if cancel.try_recv().is_ok() {
            return Err(Error::Cancelled);
        }
        tracing::info!(
            trainer = self.trainer.name(),
            rows = dataset.len(),
            feedback = feedback.len(),
            force,
            "Training new model version"
        );

        let trainer = Arc::clone(&self.trainer);
        let mut fit = tokio::task::spawn_blocking(move || trainer.fit(&dataset));
        tokio::select! {
            joined = &mut fit => match joined {
                Ok(result) => result.map(|model| (model, feedback_through)),
                Err(e) => Err(Error::TrainerFailure(format!("trainer task failed: {e}"))),
            },
            Ok(()) = &mut cancel => {
                *acquire_lock(&self.abandoned) = Some(fit);
                Err(Error::Cancelled)
            },
        }
    }

    async fn report(&self, result: &Result<RetrainOutcome>) {
        let (outcome, alert) = match result {
            Ok(RetrainOutcome::Skipped { .. }) => ("skipped", None),
            Ok(RetrainOutcome::Retrained { version, threshold }) => {
                tracing::info!(version, threshold, "Model retrained and activated");
                let alert = Alert::new(
                    format!("Model retrained to version {version} with threshold {threshold:.2}"),
                    Severity::Info,
                    AlertKind::Retrain,
                )
                .with_details(serde_json::json!({
                    "version": version,
                    "threshold": threshold,
                    "trainer": self.trainer.name(),
                }));
                ("retrained", Some(alert))
            },
            Err(Error::Cancelled) => {
                tracing::info!("Retrain cancelled, active version unchanged");
                let alert = Alert::new(
                    "Model retrain cancelled by operator",
                    Severity::Info,
                    AlertKind::Operational,
                );
                ("cancelled", Some(alert))
            },
            Err(e) => {
                tracing::error!(error = %e, "Retrain failed, active version unchanged");
                let alert = Alert::new(
                    format!("Model retrain failed: {e}"),
                    Severity::Error,
                    AlertKind::Retrain,
                )
                .with_details(serde_json::json!({ "kind": e.kind() }));
                ("failed", Some(alert))
            },
        };

        metrics::counter!("riskwatch_retrain_total", "outcome" => outcome).increment(1);
        if let Some(alert) = alert {
            self.dispatcher.notify(&alert).await;
        }
    }
}

impl fmt::Debug for RetrainOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrainOrchestrator")
            .field("state", &self.state())
            .field("trainer", &self.trainer.name())
            .field("policy", &self.policy.name())
            .field("base_rows", &self.base.len())
            .finish_non_exhaustive()
    }
}
