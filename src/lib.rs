//! # Riskwatch
//!
//! Serves a binary risk score from a versioned scoring model and keeps that
//! model healthy over time.
//!
//! Riskwatch accumulates analyst feedback, decides when to retrain, publishes
//! new model versions without disturbing in-flight predictions, audits
//! prediction fairness across protected attributes, and relays alerts and
//! incidents to monitoring channels and live subscribers.
//!
//! ## Components
//!
//! - [`storage::VersionStore`]: durable registry of model versions plus the
//!   current-version pointer
//! - [`serving::ActiveVersionCache`]: lock-free snapshot of the serving version
//! - [`serving::PredictionService`]: scores requests and records them
//! - [`services::RetrainOrchestrator`]: drift decision, training, publication
//! - [`services::FairnessAuditor`]: per-attribute outcome gaps
//! - [`alerts::AlertDispatcher`]: fan-out to notification channels
//! - [`incidents::IncidentHub`]: pub/sub relay to live subscribers
//!
//! ## Example
//!
//! ```rust,ignore
//! use riskwatch::serving::{ActiveVersionCache, PredictionService};
//!
//! let cache = Arc::new(ActiveVersionCache::empty());
//! let service = PredictionService::new(cache, history, dispatcher, 0.9);
//! let prediction = service.predict(features)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod alerts;
pub mod config;
pub mod http;
pub mod incidents;
pub mod models;
pub mod observability;
pub mod services;
pub mod serving;
pub mod storage;
pub mod training;

pub use config::RiskwatchConfig;
pub use models::{
    Alert, AlertKind, FairnessAuditResult, FeatureValue, Features, FeedbackRecord, Incident,
    IncidentSource, ModelVersion, Prediction, PredictionRecord, Severity,
};
pub use services::{FairnessAuditor, RetrainOrchestrator, RetrainOutcome, RetrainState};
pub use serving::{ActiveVersionCache, PredictionService};

/// Error type for riskwatch operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Unauthorized` | Missing or wrong bearer token on an HTTP call |
/// | `NoActiveVersion` | Predicting or reading the pointer before any version was activated |
/// | `VersionNotFound` | `get`/`set_current`/rollback to a version with no stored artifact |
/// | `RetrainInProgress` | A retrain, rollback or reload while another lifecycle operation holds the lock |
/// | `TrainerFailure` | The trainer rejected or failed to fit the merged dataset |
/// | `ChannelDelivery` | One alert channel failed (contained inside the dispatcher) |
/// | `StorageFailure` | A durable read or write failed |
/// | `InvalidInput` | Malformed features or request bodies |
/// | `Cancelled` | An operator cancelled an in-flight retrain |
/// | `OperationFailed` | Startup, configuration and runtime failures |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Authentication failed.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// No model version has been activated yet.
    #[error("no active model version")]
    NoActiveVersion,

    /// The requested model version has no stored artifact.
    #[error("model version {version} not found")]
    VersionNotFound {
        /// The requested version number.
        version: u64,
    },

    /// Another retrain cycle or operator action is in flight.
    #[error("a retrain cycle is already in progress")]
    RetrainInProgress,

    /// The trainer failed to produce a model.
    #[error("trainer failure: {0}")]
    TrainerFailure(String),

    /// An alert channel failed to deliver.
    ///
    /// Only ever constructed inside the alert dispatcher, which records it and
    /// moves on to the next channel.
    #[error("delivery to channel '{channel}' failed: {cause}")]
    ChannelDelivery {
        /// The channel name.
        channel: String,
        /// The underlying cause.
        cause: String,
    },

    /// A durable read or write failed.
    #[error("storage operation '{operation}' failed: {cause}")]
    StorageFailure {
        /// The storage operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation was cancelled by an operator.
    #[error("operation cancelled")]
    Cancelled,

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Builds a [`Error::StorageFailure`] from any displayable cause.
    pub fn storage(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::StorageFailure {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Builds an [`Error::OperationFailed`] from any displayable cause.
    pub fn operation(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Stable snake_case tag for this error kind, used in API error payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "auth_error",
            Self::NoActiveVersion => "no_active_version",
            Self::VersionNotFound { .. } => "not_found",
            Self::RetrainInProgress => "retrain_in_progress",
            Self::TrainerFailure(_) => "trainer_failure",
            Self::ChannelDelivery { .. } => "channel_delivery_failure",
            Self::StorageFailure { .. } => "storage_failure",
            Self::InvalidInput(_) => "invalid_input",
            Self::Cancelled => "cancelled",
            Self::OperationFailed { .. } => "operation_failed",
        }
    }
}

/// Result type alias for riskwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current UTC time.
#[must_use]
pub fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
