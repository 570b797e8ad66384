//! Prediction service.

use super::ActiveVersionCache;
use crate::alerts::AlertDispatcher;
use crate::models::{Alert, AlertKind, Features, Prediction, PredictionRecord, Severity};
use crate::storage::PredictionLog;
use crate::{Error, Result};
use std::sync::Arc;

/// Scores requests against the active version and records every outcome.
pub struct PredictionService {
    cache: Arc<ActiveVersionCache>,
    history: Arc<dyn PredictionLog>,
    dispatcher: Arc<AlertDispatcher>,
    high_risk_probability: f64,
}

impl PredictionService {
    /// Creates a prediction service.
    ///
    /// Predictions whose probability exceeds `high_risk_probability` raise a
    /// fraud-spike alert.
    #[must_use]
    pub fn new(
        cache: Arc<ActiveVersionCache>,
        history: Arc<dyn PredictionLog>,
        dispatcher: Arc<AlertDispatcher>,
        high_risk_probability: f64,
    ) -> Self {
        Self {
            cache,
            history,
            dispatcher,
            high_risk_probability,
        }
    }

    /// Scores one feature mapping.
    ///
    /// The scorer and threshold come from one snapshot, so a concurrent swap
    /// can never mix two versions in one answer. The record is appended before
    /// returning; the high-risk alert is detached and never delays the caller.
    ///
    /// # Errors
    ///
    /// - [`Error::NoActiveVersion`] before any version has been activated
    /// - [`Error::InvalidInput`] if the scorer rejects the features
    /// - [`Error::StorageFailure`] if the prediction cannot be recorded
    pub fn predict(&self, features: Features) -> Result<Prediction> {
        let version = self.cache.snapshot().ok_or(Error::NoActiveVersion)?;
        let prediction = version.evaluate(&features)?;

        self.history.append_prediction(&PredictionRecord {
            features,
            predicted_label: prediction.label,
            predicted_probability: prediction.probability,
            version_used: prediction.version,
            timestamp: crate::now(),
        })?;

        metrics::counter!("riskwatch_predictions_total").increment(1);
        metrics::histogram!("riskwatch_fraud_probability").record(prediction.probability);
        if prediction.label == 1 {
            metrics::counter!("riskwatch_fraud_flags_total").increment(1);
        }

        if prediction.probability > self.high_risk_probability {
            tracing::warn!(
                probability = prediction.probability,
                version = prediction.version,
                "High-risk prediction"
            );
            let alert = Alert::new(
                format!("Fraud alert: probability {:.2}%", prediction.probability * 100.0),
                Severity::Warning,
                AlertKind::FraudSpike,
            )
            .with_details(serde_json::json!({
                "probability": prediction.probability,
                "threshold": prediction.threshold,
                "version": prediction.version,
            }));
            self.dispatcher.notify_detached(alert);
        }

        Ok(prediction)
    }

    /// Returns the cache this service reads from.
    #[must_use]
    pub const fn cache(&self) -> &Arc<ActiveVersionCache> {
        &self.cache
    }
}

impl std::fmt::Debug for PredictionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionService")
            .field("active_version", &self.cache.active_version())
            .field("high_risk_probability", &self.high_risk_probability)
            .finish_non_exhaustive()
    }
}
