//! Open feature mappings.
//!
//! A transaction is an arbitrary bag of named scalars. Model inputs read the
//! numeric ones; protected attributes used for fairness auditing are usually
//! text. A key that is absent is never an error at this layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single scalar feature value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// Boolean flag. Scored as `0.0`/`1.0`.
    Bool(bool),
    /// Numeric value.
    Number(f64),
    /// Categorical or free-text value.
    Text(String),
}

impl FeatureValue {
    /// Returns the numeric reading of this value, if it has one.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(_) => None,
        }
    }

    /// Key used to group records by this value.
    ///
    /// Numbers render without a trailing `.0` so `1` and `1.0` land in the
    /// same group.
    #[must_use]
    pub fn group_key(&self) -> String {
        self.to_string()
    }

    /// Parses a raw cell (CSV) into the most specific value.
    #[must_use]
    pub fn parse_cell(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(n) = trimmed.parse::<f64>() {
            return Self::Number(n);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => Self::Text(trimmed.to_string()),
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{n:.0}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for FeatureValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Ordered mapping of feature name to value.
///
/// `BTreeMap` keeps serialization and iteration deterministic.
pub type Features = BTreeMap<String, FeatureValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_deserialization() {
        let features: Features =
            serde_json::from_str(r#"{"Amount": 12.5, "Gender": "F", "Online": true}"#)
                .expect("parse features");

        assert_eq!(features["Amount"], FeatureValue::Number(12.5));
        assert_eq!(features["Gender"], FeatureValue::Text("F".to_string()));
        assert_eq!(features["Online"], FeatureValue::Bool(true));
    }

    #[test]
    fn test_group_key_normalizes_integral_numbers() {
        assert_eq!(FeatureValue::Number(1.0).group_key(), "1");
        assert_eq!(FeatureValue::Number(1.5).group_key(), "1.5");
        assert_eq!(FeatureValue::Text("EU".into()).group_key(), "EU");
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(FeatureValue::parse_cell(" 42 "), FeatureValue::Number(42.0));
        assert_eq!(FeatureValue::parse_cell("TRUE"), FeatureValue::Bool(true));
        assert_eq!(
            FeatureValue::parse_cell("north"),
            FeatureValue::Text("north".to_string())
        );
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(FeatureValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(FeatureValue::Text("x".into()).as_f64(), None);
    }
}
