//! Baseline trainer: L2-regularized logistic regression.
//!
//! Inputs are the numeric (or boolean) columns of the dataset, standardized
//! with the training mean and standard deviation. A column present in every
//! training row is a required input; a sparser column is optional, and a
//! missing value scores as its training mean, the same imputation used when
//! fitting. Weights are fitted with
//! full-batch gradient descent from a zero start, so a given dataset always
//! yields the same model. The decision threshold is the F1-maximizing cut over
//! the training probabilities.

use super::{Dataset, Scorer, TrainedModel, Trainer};
use crate::models::Features;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Fitted logistic scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticScorer {
    inputs: Vec<String>,
    means: Vec<f64>,
    scales: Vec<f64>,
    weights: Vec<f64>,
    bias: f64,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    optional: BTreeSet<String>,
}

impl LogisticScorer {
    /// Kind tag.
    pub const KIND: &'static str = "logistic";

    /// Names of the model inputs, in weight order.
    #[must_use]
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub(super) fn load(params: &serde_json::Value) -> Result<Arc<dyn Scorer>> {
        let scorer: Self = serde_json::from_value(params.clone())
            .map_err(|e| Error::storage("load_logistic_scorer", e))?;

        let n = scorer.inputs.len();
        if scorer.means.len() != n || scorer.scales.len() != n || scorer.weights.len() != n {
            return Err(Error::storage(
                "load_logistic_scorer",
                "parameter vectors have mismatched lengths",
            ));
        }
        Ok(Arc::new(scorer))
    }

    fn logit(&self, row: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(row)
            .fold(self.bias, |acc, (w, x)| w.mul_add(*x, acc))
    }
}

impl Scorer for LogisticScorer {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn score(&self, features: &Features) -> Result<f64> {
        let mut row = Vec::with_capacity(self.inputs.len());
        for (i, name) in self.inputs.iter().enumerate() {
            let Some(value) = features.get(name) else {
                if self.optional.contains(name) {
                    row.push(0.0);
                    continue;
                }
                return Err(Error::InvalidInput(format!("missing feature '{name}'")));
            };
            let x = value
                .as_f64()
                .filter(|x| x.is_finite())
                .ok_or_else(|| {
                    Error::InvalidInput(format!("feature '{name}' must be a finite number"))
                })?;
            row.push((x - self.means[i]) / self.scales[i]);
        }
        Ok(sigmoid(self.logit(&row)))
    }

    fn export(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| Error::operation("export_logistic_scorer", e))
    }
}

/// Gradient-descent logistic regression trainer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogisticTrainer {
    /// Full-batch passes over the data.
    pub epochs: usize,
    /// Step size.
    pub learning_rate: f64,
    /// L2 penalty on the weights.
    pub l2: f64,
}

impl Default for LogisticTrainer {
    fn default() -> Self {
        Self {
            epochs: 200,
            learning_rate: 0.1,
            l2: 0.001,
        }
    }
}

impl Trainer for LogisticTrainer {
    fn name(&self) -> &'static str {
        "logistic"
    }

    #[allow(clippy::cast_precision_loss)]
    fn fit(&self, dataset: &Dataset) -> Result<TrainedModel> {
        if dataset.is_empty() {
            return Err(Error::TrainerFailure("dataset is empty".to_string()));
        }
        if let Some(row) = dataset.rows().iter().find(|row| row.label > 1) {
            return Err(Error::TrainerFailure(format!(
                "label {} is not binary",
                row.label
            )));
        }
        let positives = dataset.positives();
        if positives == 0 || positives == dataset.len() {
            return Err(Error::TrainerFailure(
                "dataset must contain both classes".to_string(),
            ));
        }

        let inputs = numeric_columns(dataset);
        if inputs.is_empty() {
            return Err(Error::TrainerFailure(
                "dataset has no numeric feature columns".to_string(),
            ));
        }

        let (means, scales) = column_moments(dataset, &inputs);
        let optional = sparse_columns(dataset, &inputs);
        let matrix: Vec<Vec<f64>> = dataset
            .rows()
            .iter()
            .map(|row| {
                inputs
                    .iter()
                    .enumerate()
                    .map(|(i, name)| {
                        row.features
                            .get(name)
                            .and_then(crate::models::FeatureValue::as_f64)
                            .map_or(0.0, |x| (x - means[i]) / scales[i])
                    })
                    .collect()
            })
            .collect();
        let labels: Vec<f64> = dataset
            .rows()
            .iter()
            .map(|row| f64::from(row.label))
            .collect();

        let n = matrix.len() as f64;
        let mut weights = vec![0.0; inputs.len()];
        let mut bias = 0.0;
        for _ in 0..self.epochs {
            let mut grad_w = vec![0.0; inputs.len()];
            let mut grad_b = 0.0;
            for (row, y) in matrix.iter().zip(&labels) {
                let z = weights
                    .iter()
                    .zip(row)
                    .fold(bias, |acc, (w, x): (&f64, &f64)| w.mul_add(*x, acc));
                let err = sigmoid(z) - y;
                for (g, x) in grad_w.iter_mut().zip(row) {
                    *g = err.mul_add(*x, *g);
                }
                grad_b += err;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= self.learning_rate * self.l2.mul_add(*w, g / n);
            }
            bias -= self.learning_rate * grad_b / n;
        }

        let scorer = LogisticScorer {
            inputs,
            means,
            scales,
            weights,
            bias,
            optional,
        };
        let probabilities: Vec<f64> = matrix.iter().map(|row| sigmoid(scorer.logit(row))).collect();
        let label_bits: Vec<u8> = dataset.rows().iter().map(|row| row.label).collect();
        let (threshold, f1) = best_f1_threshold(&label_bits, &probabilities);

        tracing::debug!(
            rows = dataset.len(),
            inputs = scorer.inputs.len(),
            threshold,
            f1,
            "Fitted logistic scorer"
        );

        Ok(TrainedModel {
            scorer: Arc::new(scorer),
            threshold,
        })
    }
}

/// Picks the threshold on a 0.01 grid that maximizes F1.
///
/// Returns `(threshold, f1)`. Ties keep the lowest threshold. When no
/// threshold yields a true positive the result is `(0.5, 0.0)`.
#[must_use]
pub fn best_f1_threshold(labels: &[u8], probabilities: &[f64]) -> (f64, f64) {
    let mut best = (0.5, 0.0);
    for step in 1..100_u32 {
        let threshold = f64::from(step) / 100.0;
        let (mut tp, mut fp, mut fn_) = (0_u32, 0_u32, 0_u32);
        for (label, p) in labels.iter().zip(probabilities) {
            match (*p >= threshold, *label == 1) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, true) => fn_ += 1,
                (false, false) => {},
            }
        }
        if tp == 0 {
            continue;
        }
        let f1 = f64::from(2 * tp) / f64::from(2 * tp + fp + fn_);
        if f1 > best.1 {
            best = (threshold, f1);
        }
    }
    best
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Columns where every present value reads as a number.
fn numeric_columns(dataset: &Dataset) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut rejected = BTreeSet::new();
    for row in dataset.rows() {
        for (name, value) in &row.features {
            if value.as_f64().is_some_and(f64::is_finite) {
                seen.insert(name.clone());
            } else {
                rejected.insert(name.clone());
            }
        }
    }
    seen.difference(&rejected).cloned().collect()
}

/// Inputs missing from at least one row.
fn sparse_columns(dataset: &Dataset, inputs: &[String]) -> BTreeSet<String> {
    inputs
        .iter()
        .filter(|name| {
            dataset
                .rows()
                .iter()
                .any(|row| !row.features.contains_key(name.as_str()))
        })
        .cloned()
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn column_moments(dataset: &Dataset, inputs: &[String]) -> (Vec<f64>, Vec<f64>) {
    inputs
        .iter()
        .map(|name| {
            let values: Vec<f64> = dataset
                .rows()
                .iter()
                .filter_map(|row| row.features.get(name).and_then(|v| v.as_f64()))
                .collect();
            let count = values.len().max(1) as f64;
            let mean = values.iter().sum::<f64>() / count;
            let variance = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / count;
            let std = variance.sqrt();
            (mean, if std < 1e-12 { 1.0 } else { std })
        })
        .unzip()
}
