//! Scoring functions and their persisted form.

use super::logistic::LogisticScorer;
use crate::models::Features;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// An opaque scoring function: features in, probability out.
///
/// Implementations must be immutable after construction; a published model
/// version shares its scorer with every in-flight prediction.
pub trait Scorer: Send + Sync {
    /// Stable kind tag used to find the loader for a persisted artifact.
    fn kind(&self) -> &'static str;

    /// Returns the probability of the positive class in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for malformed or missing features.
    fn score(&self, features: &Features) -> Result<f64>;

    /// Exports the parameters needed to rebuild this scorer.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters cannot be serialized.
    fn export(&self) -> Result<serde_json::Value>;
}

/// Persisted form of a scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerArtifact {
    /// Kind tag, see [`Scorer::kind`].
    pub kind: String,
    /// Kind-specific parameters.
    pub params: serde_json::Value,
}

impl ScorerArtifact {
    /// Captures a scorer's artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the scorer cannot export its parameters.
    pub fn capture(scorer: &dyn Scorer) -> Result<Self> {
        Ok(Self {
            kind: scorer.kind().to_string(),
            params: scorer.export()?,
        })
    }
}

type ScorerLoader = fn(&serde_json::Value) -> Result<Arc<dyn Scorer>>;

/// Maps scorer kinds to loaders so artifacts can be rebuilt after a restart.
#[derive(Clone)]
pub struct ScorerRegistry {
    loaders: HashMap<String, ScorerLoader>,
}

impl ScorerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            loaders: HashMap::new(),
        }
    }

    /// Creates a registry with the built-in scorer kinds.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(LogisticScorer::KIND, LogisticScorer::load);
        registry.register(ConstantScorer::KIND, ConstantScorer::load);
        registry
    }

    /// Registers (or replaces) the loader for a kind.
    pub fn register(&mut self, kind: &str, loader: ScorerLoader) {
        self.loaders.insert(kind.to_string(), loader);
    }

    /// Rebuilds a scorer from its artifact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFailure`] if the kind is unknown or the
    /// parameters are malformed.
    pub fn load(&self, artifact: &ScorerArtifact) -> Result<Arc<dyn Scorer>> {
        let loader = self.loaders.get(&artifact.kind).ok_or_else(|| {
            Error::storage(
                "load_scorer",
                format!("unknown scorer kind '{}'", artifact.kind),
            )
        })?;
        loader(&artifact.params)
    }
}

impl Default for ScorerRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for ScorerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&String> = self.loaders.keys().collect();
        kinds.sort();
        f.debug_struct("ScorerRegistry").field("kinds", &kinds).finish()
    }
}

/// Scorer that returns the same probability for every input.
///
/// Useful as a placeholder model and in tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantScorer {
    probability: f64,
}

#[derive(Serialize, Deserialize)]
struct ConstantParams {
    probability: f64,
}

impl ConstantScorer {
    /// Kind tag.
    pub const KIND: &'static str = "constant";

    /// Creates a constant scorer.
    #[must_use]
    pub const fn new(probability: f64) -> Self {
        Self { probability }
    }

    fn load(params: &serde_json::Value) -> Result<Arc<dyn Scorer>> {
        let params: ConstantParams = serde_json::from_value(params.clone())
            .map_err(|e| Error::storage("load_constant_scorer", e))?;
        Ok(Arc::new(Self::new(params.probability)))
    }
}

impl Scorer for ConstantScorer {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn score(&self, _features: &Features) -> Result<f64> {
        Ok(self.probability)
    }

    fn export(&self) -> Result<serde_json::Value> {
        serde_json::to_value(ConstantParams {
            probability: self.probability,
        })
        .map_err(|e| Error::operation("export_constant_scorer", e))
    }
}
