//! Alerts fanned out to notification channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Alert severity, ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational (e.g. a new model version went live).
    #[default]
    Info,
    /// Needs attention soon.
    Warning,
    /// Something failed.
    Error,
    /// Needs attention now.
    Critical,
}

impl Severity {
    /// Returns the lowercase severity name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown severity: {other}"
            ))),
        }
    }
}

/// What raised an alert. Channels use it to pick dashboards and tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A single prediction exceeded the high-risk bound.
    FraudSpike,
    /// Retrain cycle results (success or failure).
    Retrain,
    /// Fairness gap breach.
    Bias,
    /// Operator actions such as rollback and reload.
    Operational,
}

impl AlertKind {
    /// Returns the snake_case tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FraudSpike => "fraud_spike",
            Self::Retrain => "retrain",
            Self::Bias => "bias",
            Self::Operational => "operational",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification to deliver to every configured channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier, used for idempotency on the receiving side.
    pub id: String,
    /// Human-readable message.
    pub message: String,
    /// Severity.
    pub severity: Severity,
    /// Context tag.
    pub kind: AlertKind,
    /// Structured detail (version numbers, gaps, probabilities).
    #[serde(default)]
    pub details: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Creates an alert with no structured detail.
    #[must_use]
    pub fn new(message: impl Into<String>, severity: Severity, kind: AlertKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message: message.into(),
            severity,
            kind,
            details: serde_json::Value::Null,
            created_at: crate::now(),
        }
    }

    /// Attaches structured detail.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("WARN".parse::<Severity>().ok(), Some(Severity::Warning));
        assert!("loud".parse::<Severity>().is_err());
    }

    #[test]
    fn test_alert_ids_are_unique() {
        let a = Alert::new("a", Severity::Info, AlertKind::Retrain);
        let b = Alert::new("a", Severity::Info, AlertKind::Retrain);
        assert_ne!(a.id, b.id);
    }
}
