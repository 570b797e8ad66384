//! Fairness audit results.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome gap for one protected attribute.
///
/// `outcome_gap` is the spread between the highest and lowest per-group mean
/// predicted label. Produced fresh on each audit run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FairnessAuditResult {
    /// Attribute name, e.g. `Gender`.
    pub attribute_name: String,
    /// Gap in `[0, 1]`.
    pub outcome_gap: f64,
    /// Number of distinct values observed for the attribute.
    pub groups: usize,
    /// Number of records that carried the attribute.
    pub records: usize,
    /// When the audit computed this result.
    pub computed_at: DateTime<Utc>,
}
