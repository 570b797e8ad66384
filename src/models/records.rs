//! Append-only records: predictions served and analyst feedback.

use super::Features;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One served prediction. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Features as received.
    pub features: Features,
    /// Predicted label, `0` or `1`.
    pub predicted_label: u8,
    /// Predicted probability.
    pub predicted_probability: f64,
    /// Model version that produced the prediction.
    pub version_used: u64,
    /// When the prediction was served.
    pub timestamp: DateTime<Utc>,
}

/// One analyst-labeled transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Features of the labeled transaction.
    pub features: Features,
    /// Ground-truth label, `0` or `1`.
    pub true_label: u8,
    /// When the label was submitted.
    pub submitted_at: DateTime<Utc>,
}

impl FeedbackRecord {
    /// Creates a feedback record stamped with the current time.
    #[must_use]
    pub fn new(features: Features, true_label: u8) -> Self {
        Self {
            features,
            true_label,
            submitted_at: crate::now(),
        }
    }
}
