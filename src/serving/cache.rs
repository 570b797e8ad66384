//! Active version cache.

use crate::models::ModelVersion;
use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// Holds the single model version currently used for serving.
///
/// Readers take an `Arc` snapshot without locking; a swap publishes a fully
/// constructed version in one atomic pointer store. A reader that took a
/// snapshot before a swap keeps scoring against it until it drops the `Arc`.
#[derive(Debug, Default)]
pub struct ActiveVersionCache {
    active: ArcSwapOption<ModelVersion>,
}

impl ActiveVersionCache {
    /// Creates a cache with nothing active.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a cache serving `version`.
    #[must_use]
    pub fn with_version(version: Arc<ModelVersion>) -> Self {
        Self {
            active: ArcSwapOption::from(Some(version)),
        }
    }

    /// Returns the active version, or `None` before the first activation.
    #[must_use]
    pub fn snapshot(&self) -> Option<Arc<ModelVersion>> {
        self.active.load_full()
    }

    /// Atomically replaces the active version and returns the previous one.
    ///
    /// Callers must have durably moved the store pointer to `version` first.
    pub fn swap(&self, version: Arc<ModelVersion>) -> Option<Arc<ModelVersion>> {
        let number = version.version;
        let previous = self.active.swap(Some(version));
        #[allow(clippy::cast_precision_loss)]
        let gauge_value = number as f64;
        metrics::gauge!("riskwatch_active_model_version").set(gauge_value);
        tracing::info!(
            version = number,
            previous = previous.as_ref().map(|v| v.version),
            "Activated model version"
        );
        previous
    }

    /// Returns the active version number, if any.
    #[must_use]
    pub fn active_version(&self) -> Option<u64> {
        self.active.load().as_ref().map(|v| v.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Features;
    use crate::training::ConstantScorer;

    fn version(n: u64, p: f64, threshold: f64) -> Arc<ModelVersion> {
        Arc::new(ModelVersion {
            version: n,
            scorer: Arc::new(ConstantScorer::new(p)),
            threshold,
            created_at: chrono::Utc::now(),
            feedback_through: None,
        })
    }

    #[test]
    fn test_empty_cache_has_no_snapshot() {
        let cache = ActiveVersionCache::empty();
        assert!(cache.snapshot().is_none());
        assert_eq!(cache.active_version(), None);
    }

    #[test]
    fn test_old_snapshot_survives_swap() {
        let cache = ActiveVersionCache::with_version(version(1, 0.2, 0.5));
        let held = cache.snapshot().expect("snapshot");

        let previous = cache.swap(version(2, 0.8, 0.3));
        assert_eq!(previous.map(|v| v.version), Some(1));

        let prediction = held.evaluate(&Features::new()).expect("evaluate");
        assert_eq!(prediction.version, 1);
        assert!((prediction.threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(cache.active_version(), Some(2));
    }
}
