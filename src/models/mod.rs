//! Data models for riskwatch.
//!
//! This module contains the core data structures shared across the system.

mod alert;
mod fairness;
mod features;
mod incident;
mod records;
mod version;

pub use alert::{Alert, AlertKind, Severity};
pub use fairness::FairnessAuditResult;
pub use features::{FeatureValue, Features};
pub use incident::{Incident, IncidentSource};
pub use records::{FeedbackRecord, PredictionRecord};
pub use version::{ModelVersion, Prediction, VersionSummary};
