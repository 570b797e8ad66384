//! Model versions and the predictions they produce.

use super::Features;
use crate::training::Scorer;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// An immutable, published version of the scoring model.
///
/// The scorer and threshold are fixed together at publication time; every
/// prediction reads both from the same `ModelVersion`, so a caller holding one
/// can never mix the scorer of one version with the threshold of another.
#[derive(Clone)]
pub struct ModelVersion {
    /// Monotonically increasing version number, starting at 1.
    pub version: u64,
    /// The scoring function.
    pub scorer: Arc<dyn Scorer>,
    /// Decision threshold in `[0, 1]`.
    pub threshold: f64,
    /// When this version was published.
    pub created_at: DateTime<Utc>,
    /// Instant the training cycle read its feedback snapshot. Feedback
    /// submitted from then on was not trained into this version. `None` for
    /// versions published outside a retrain cycle.
    pub feedback_through: Option<DateTime<Utc>>,
}

impl ModelVersion {
    /// Scores a feature mapping and applies this version's threshold.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the scorer rejects the features or
    /// produces a probability outside `[0, 1]`.
    pub fn evaluate(&self, features: &Features) -> Result<Prediction> {
        let probability = self.scorer.score(features)?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(Error::InvalidInput(format!(
                "scorer returned probability {probability} outside [0, 1]"
            )));
        }

        Ok(Prediction {
            label: u8::from(probability >= self.threshold),
            probability,
            threshold: self.threshold,
            version: self.version,
        })
    }

    /// Lower bound of the feedback this version has not been trained on.
    #[must_use]
    pub fn feedback_window_start(&self) -> DateTime<Utc> {
        self.feedback_through.unwrap_or(self.created_at)
    }

    /// Returns a serializable summary without the scorer.
    #[must_use]
    pub fn summary(&self) -> VersionSummary {
        VersionSummary {
            version: self.version,
            threshold: self.threshold,
            created_at: self.created_at,
            scorer_kind: self.scorer.kind().to_string(),
        }
    }
}

impl fmt::Debug for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelVersion")
            .field("version", &self.version)
            .field("scorer", &self.scorer.kind())
            .field("threshold", &self.threshold)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Scorer-free view of a [`ModelVersion`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionSummary {
    /// Version number.
    pub version: u64,
    /// Decision threshold.
    pub threshold: f64,
    /// Publication time.
    pub created_at: DateTime<Utc>,
    /// Scorer kind tag.
    pub scorer_kind: String,
}

/// Outcome of scoring one request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    /// `1` when `probability >= threshold`, else `0`.
    pub label: u8,
    /// Scorer output in `[0, 1]`.
    pub probability: f64,
    /// Threshold of the version used.
    pub threshold: f64,
    /// Version used to score.
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::ConstantScorer;

    fn version_with(probability: f64, threshold: f64) -> ModelVersion {
        ModelVersion {
            version: 3,
            scorer: Arc::new(ConstantScorer::new(probability)),
            threshold,
            created_at: Utc::now(),
            feedback_through: None,
        }
    }

    #[test]
    fn test_label_at_threshold_is_positive() {
        let prediction = version_with(0.5, 0.5)
            .evaluate(&Features::new())
            .expect("evaluate");
        assert_eq!(prediction.label, 1);
        assert_eq!(prediction.version, 3);
    }

    #[test]
    fn test_label_below_threshold_is_negative() {
        let prediction = version_with(0.49, 0.5)
            .evaluate(&Features::new())
            .expect("evaluate");
        assert_eq!(prediction.label, 0);
        assert!((prediction.threshold - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_out_of_range_probability_is_rejected() {
        let result = version_with(1.5, 0.5).evaluate(&Features::new());
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
