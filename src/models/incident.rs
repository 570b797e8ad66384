//! External incidents relayed to live subscribers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// System an incident was pulled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentSource {
    /// `PagerDuty`.
    PagerDuty,
    /// `ServiceNow`.
    ServiceNow,
}

impl IncidentSource {
    /// Returns the lowercase source tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PagerDuty => "pagerduty",
            Self::ServiceNow => "servicenow",
        }
    }
}

impl fmt::Display for IncidentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An incident as seen in an external system. Relayed, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    /// Originating system.
    pub source: IncidentSource,
    /// Identifier in the originating system.
    pub external_id: String,
    /// Human-readable title.
    pub title: String,
    /// Status string as reported by the originating system.
    pub status: String,
}
