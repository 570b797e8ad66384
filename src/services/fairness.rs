//! Fairness auditing over recorded predictions.
//!
//! For each protected attribute, predictions are partitioned by the
//! attribute's value and the mean predicted label is computed per partition.
//! The gap is the spread between the highest and lowest mean. An attribute
//! observed with fewer than two distinct values has no gap and is left out of
//! the results rather than reported as zero.

use crate::alerts::AlertDispatcher;
use crate::models::{Alert, AlertKind, FairnessAuditResult, PredictionRecord, Severity};
use crate::storage::PredictionLog;
use crate::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default gap above which an audit raises a bias alert.
pub const DEFAULT_MAX_GAP: f64 = 0.05;

/// Computes per-attribute outcome gaps.
///
/// Pure and deterministic: the same records and attributes always produce the
/// same results, in attribute order. Records missing an attribute are ignored
/// for that attribute.
#[must_use]
pub fn compute_gaps(
    records: &[PredictionRecord],
    attributes: &[String],
    computed_at: DateTime<Utc>,
) -> Vec<FairnessAuditResult> {
    let mut results = Vec::new();
    for attribute in attributes {
        // group -> (positives, total)
        let mut groups: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        let mut seen = 0;
        for record in records {
            let Some(value) = record.features.get(attribute) else {
                continue;
            };
            seen += 1;
            let entry = groups.entry(value.group_key()).or_insert((0, 0));
            entry.0 += u64::from(record.predicted_label);
            entry.1 += 1;
        }
        if groups.len() < 2 {
            continue;
        }

        let means = groups.values().map(|&(positives, total)| ratio(positives, total));
        let (min, max) = means.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), m| {
            (lo.min(m), hi.max(m))
        });
        results.push(FairnessAuditResult {
            attribute_name: attribute.clone(),
            outcome_gap: max - min,
            groups: groups.len(),
            records: seen,
            computed_at,
        });
    }
    results
}

#[allow(clippy::cast_precision_loss)]
fn ratio(positives: u64, total: u64) -> f64 {
    positives as f64 / total as f64
}

/// Audits prediction history and alerts on gaps above the bound.
pub struct FairnessAuditor {
    history: Arc<dyn PredictionLog>,
    dispatcher: Arc<AlertDispatcher>,
    max_gap: f64,
    window: Option<ChronoDuration>,
}

impl FairnessAuditor {
    /// Creates an auditor over the whole prediction history.
    #[must_use]
    pub fn new(history: Arc<dyn PredictionLog>, dispatcher: Arc<AlertDispatcher>, max_gap: f64) -> Self {
        Self {
            history,
            dispatcher,
            max_gap,
            window: None,
        }
    }

    /// Restricts audits to predictions from the last `hours` hours.
    #[must_use]
    pub fn with_window_hours(mut self, hours: Option<u64>) -> Self {
        self.window = hours
            .and_then(|h| i64::try_from(h).ok())
            .map(ChronoDuration::hours);
        self
    }

    /// Configured alert bound.
    #[must_use]
    pub const fn max_gap(&self) -> f64 {
        self.max_gap
    }

    /// Runs one audit.
    ///
    /// Every gap strictly above the bound raises a warning-level bias alert
    /// carrying the attribute and the gap.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::StorageFailure`] if the history cannot be read.
    pub async fn audit(&self, attributes: &[String]) -> Result<Vec<FairnessAuditResult>> {
        let now = crate::now();
        let since = self.window.map(|w| now - w);
        let records = self.history.predictions_since(since)?;
        let results = compute_gaps(&records, attributes, now);

        tracing::info!(
            records = records.len(),
            attributes = attributes.len(),
            audited = results.len(),
            "Fairness audit completed"
        );

        for result in &results {
            metrics::gauge!("riskwatch_fairness_gap", "attribute" => result.attribute_name.clone())
                .set(result.outcome_gap);
            if result.outcome_gap <= self.max_gap {
                continue;
            }

            tracing::warn!(
                attribute = %result.attribute_name,
                gap = result.outcome_gap,
                max_gap = self.max_gap,
                "Fairness gap exceeds bound"
            );
            let alert = Alert::new(
                format!(
                    "Fairness gap {:.2}% for {} exceeds threshold",
                    result.outcome_gap * 100.0,
                    result.attribute_name
                ),
                Severity::Warning,
                AlertKind::Bias,
            )
            .with_details(serde_json::json!({
                "attribute": result.attribute_name,
                "gap": result.outcome_gap,
                "max_gap": self.max_gap,
                "groups": result.groups,
            }));
            self.dispatcher.notify(&alert).await;
        }

        Ok(results)
    }
}

impl std::fmt::Debug for FairnessAuditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FairnessAuditor")
            .field("max_gap", &self.max_gap)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
