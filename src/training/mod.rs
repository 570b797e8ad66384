//! Trainer collaborator interface and the baseline trainer.
//!
//! The retrain orchestrator treats fitting as a black box: it hands a
//! [`Dataset`] to a [`Trainer`] and gets back a [`TrainedModel`] (a scorer plus
//! a decision threshold). [`LogisticTrainer`] is the default implementation so
//! the service runs end-to-end; any other trainer can be injected.

mod logistic;
mod scorer;

pub use logistic::{LogisticScorer, LogisticTrainer, best_f1_threshold};
pub use scorer::{ConstantScorer, Scorer, ScorerArtifact, ScorerRegistry};

use crate::models::{FeedbackRecord, Features};
use crate::Result;
use std::sync::Arc;

/// One labeled training row.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledRow {
    /// Feature mapping.
    pub features: Features,
    /// Label, `0` or `1`.
    pub label: u8,
}

/// Labeled dataset handed to a [`Trainer`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    rows: Vec<LabeledRow>,
}

impl Dataset {
    /// Creates a dataset from rows.
    #[must_use]
    pub const fn new(rows: Vec<LabeledRow>) -> Self {
        Self { rows }
    }

    /// Appends feedback rows. Existing rows are kept as-is.
    pub fn extend_with_feedback(&mut self, feedback: &[FeedbackRecord]) {
        self.rows.extend(feedback.iter().map(|record| LabeledRow {
            features: record.features.clone(),
            label: record.true_label,
        }));
    }

    /// Returns the rows.
    #[must_use]
    pub fn rows(&self) -> &[LabeledRow] {
        &self.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of positive rows.
    #[must_use]
    pub fn positives(&self) -> usize {
        self.rows.iter().filter(|row| row.label == 1).count()
    }
}

/// Output of a successful fit.
#[derive(Clone)]
pub struct TrainedModel {
    /// Fitted scorer.
    pub scorer: Arc<dyn Scorer>,
    /// Decision threshold chosen for the scorer.
    pub threshold: f64,
}

impl std::fmt::Debug for TrainedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainedModel")
            .field("scorer", &self.scorer.kind())
            .field("threshold", &self.threshold)
            .finish()
    }
}

/// Fits a scorer and decision threshold from a labeled dataset.
///
/// `fit` may run for a long time; the orchestrator calls it on the blocking
/// thread pool.
pub trait Trainer: Send + Sync {
    /// Trainer name, used in logs.
    fn name(&self) -> &'static str;

    /// Fits a model.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TrainerFailure`] if fitting fails.
    fn fit(&self, dataset: &Dataset) -> Result<TrainedModel>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureValue;

    #[test]
    fn test_feedback_is_appended_not_replacing() {
        let mut base = Features::new();
        base.insert("Amount".into(), FeatureValue::Number(10.0));
        let mut dataset = Dataset::new(vec![LabeledRow {
            features: base.clone(),
            label: 0,
        }]);

        dataset.extend_with_feedback(&[FeedbackRecord::new(base, 1)]);

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.rows()[0].label, 0);
        assert_eq!(dataset.positives(), 1);
    }
}
