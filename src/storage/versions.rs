//! Version store: durable registry of published model versions plus the
//! current-version pointer.
//!
//! # Layout
//!
//! ```text
//! <model_dir>/
//!   model_v1.json
//!   model_v2.json
//!   current_model_version.txt   # plain-text version number
//! ```
//!
//! Each artifact holds the version number, threshold, publication time, the
//! feedback watermark of the cycle that trained it, and the scorer's
//! `(kind, params)` export. Artifacts and the pointer are written to a
//! temporary sibling, fsynced and renamed into place, so a crash never leaves a
//! half-written file under the final name.

use super::connection::acquire_lock;
use crate::models::ModelVersion;
use crate::training::{Scorer, ScorerArtifact, ScorerRegistry};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Name of the pointer file inside the model directory.
pub const POINTER_FILE: &str = "current_model_version.txt";

/// Maximum artifact size accepted when reading (16 MiB).
const MAX_ARTIFACT_SIZE: u64 = 16 * 1024 * 1024;

/// Durable registry of model versions.
///
/// Implementations must allocate version numbers as `max(existing) + 1`
/// starting at 1, never reuse a number, and persist pointer updates before
/// returning from [`VersionStore::set_current`].
pub trait VersionStore: Send + Sync {
    /// Persists a new version and returns it. Does not move the pointer.
    ///
    /// `feedback_through` is recorded on the version as
    /// [`ModelVersion::feedback_through`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFailure`] if the artifact cannot be written,
    /// or [`Error::InvalidInput`] if the threshold is outside `[0, 1]`.
    fn publish_with_watermark(
        &self,
        scorer: Arc<dyn Scorer>,
        threshold: f64,
        feedback_through: Option<DateTime<Utc>>,
    ) -> Result<Arc<ModelVersion>>;

    /// Persists a new version with no feedback watermark.
    ///
    /// # Errors
    ///
    /// Same as [`VersionStore::publish_with_watermark`].
    fn publish(&self, scorer: Arc<dyn Scorer>, threshold: f64) -> Result<Arc<ModelVersion>> {
        self.publish_with_watermark(scorer, threshold, None)
    }

    /// Durably points "current" at `version`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionNotFound`] if no artifact exists for `version`.
    fn set_current(&self, version: u64) -> Result<()>;

    /// Reads the durable pointer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveVersion`] if the pointer was never set.
    fn current_version(&self) -> Result<u64>;

    /// Loads a version by number.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VersionNotFound`] if the version was never published.
    fn get(&self, version: u64) -> Result<Arc<ModelVersion>>;

    /// Lists every published version number in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFailure`] if the registry cannot be read.
    fn versions(&self) -> Result<Vec<u64>>;

    /// Loads the version the pointer refers to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoActiveVersion`] if the pointer was never set.
    fn get_current(&self) -> Result<Arc<ModelVersion>> {
        self.get(self.current_version()?)
    }
}

fn check_threshold(threshold: f64) -> Result<()> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "threshold {threshold} outside [0, 1]"
        )))
    }
}

/// On-disk artifact format.
#[derive(Debug, Serialize, Deserialize)]
struct StoredVersion {
    version: u64,
    threshold: f64,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    feedback_through: Option<DateTime<Utc>>,
    scorer: ScorerArtifact,
}

/// Filesystem-backed version store.
pub struct FilesystemVersionStore {
    dir: PathBuf,
    registry: ScorerRegistry,
    /// Serializes version allocation and artifact writes.
    publish_lock: Mutex<()>,
    /// Loaded versions, keyed by number. Artifacts are immutable so entries
    /// never go stale.
    loaded: Mutex<HashMap<u64, Arc<ModelVersion>>>,
}

impl FilesystemVersionStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageFailure`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>, registry: ScorerRegistry) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::storage("create_model_dir", e))?;
        Ok(Self {
            dir,
            registry,
            publish_lock: Mutex::new(()),
            loaded: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the model directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn artifact_path(&self, version: u64) -> PathBuf {
        self.dir.join(format!("model_v{version}.json"))
    }

    fn pointer_path(&self) -> PathBuf {
        self.dir.join(POINTER_FILE)
    }

    fn read_artifact(&self, version: u64) -> Result<Arc<ModelVersion>> {
        let path = self.artifact_path(version);
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::VersionNotFound { version });
            },
            Err(e) => return Err(Error::storage("read_artifact_metadata", e)),
        };
        if metadata.len() > MAX_ARTIFACT_SIZE {
            return Err(Error::storage(
                "read_artifact",
                format!("{} exceeds {MAX_ARTIFACT_SIZE} bytes", path.display()),
            ));
        }

        let bytes = fs::read(&path).map_err(|e| Error::storage("read_artifact", e))?;
        let stored: StoredVersion =
            serde_json::from_slice(&bytes).map_err(|e| Error::storage("parse_artifact", e))?;
        if stored.version != version {
            return Err(Error::storage(
                "parse_artifact",
                format!(
                    "{} claims version {}",
                    path.display(),
                    stored.version
                ),
            ));
        }

        Ok(Arc::new(ModelVersion {
            version,
            scorer: self.registry.load(&stored.scorer)?,
            threshold: stored.threshold,
            created_at: stored.created_at,
            feedback_through: stored.feedback_through,
        }))
    }
}

impl VersionStore for FilesystemVersionStore {
    fn publish_with_watermark(
        &self,
        scorer: Arc<dyn Scorer>,
        threshold: f64,
        feedback_through: Option<DateTime<Utc>>,
    ) -> Result<Arc<ModelVersion>> {
        check_threshold(threshold)?;
        let artifact = ScorerArtifact::capture(scorer.as_ref())?;

        let _guard = acquire_lock(&self.publish_lock);
        let version = self.versions()?.last().map_or(1, |last| last + 1);
        let stored = StoredVersion {
            version,
            threshold,
            created_at: crate::now(),
            feedback_through,
            scorer: artifact,
        };
        let json = serde_json::to_vec_pretty(&stored)
            .map_err(|e| Error::storage("serialize_artifact", e))?;
        write_atomic(&self.artifact_path(version), &json)?;

        let published = Arc::new(ModelVersion {
            version,
            scorer,
            threshold,
            created_at: stored.created_at,
            feedback_through,
        });
        acquire_lock(&self.loaded).insert(version, Arc::clone(&published));

        tracing::info!(version, threshold, dir = %self.dir.display(), "Published model version");
        Ok(published)
    }

    fn set_current(&self, version: u64) -> Result<()> {
        if !self.artifact_path(version).is_file() {
            return Err(Error::VersionNotFound { version });
        }
        write_atomic(&self.pointer_path(), version.to_string().as_bytes())?;
        tracing::info!(version, "Moved current model pointer");
        Ok(())
    }

    fn current_version(&self) -> Result<u64> {
        let raw = match fs::read_to_string(self.pointer_path()) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NoActiveVersion);
            },
            Err(e) => return Err(Error::storage("read_pointer", e)),
        };
        raw.trim()
            .parse::<u64>()
            .map_err(|e| Error::storage("parse_pointer", format!("{:?}: {e}", raw.trim())))
    }

    fn get(&self, version: u64) -> Result<Arc<ModelVersion>> {
        if let Some(found) = acquire_lock(&self.loaded).get(&version) {
            return Ok(Arc::clone(found));
        }
        let loaded = self.read_artifact(version)?;
        acquire_lock(&self.loaded).insert(version, Arc::clone(&loaded));
        Ok(loaded)
    }

    fn versions(&self) -> Result<Vec<u64>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| Error::storage("read_model_dir", e))?;
        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::storage("read_model_dir_entry", e))?;
            if let Some(version) = parse_artifact_name(&entry.file_name().to_string_lossy()) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }
}

impl std::fmt::Debug for FilesystemVersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilesystemVersionStore")
            .field("dir", &self.dir)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

fn parse_artifact_name(name: &str) -> Option<u64> {
    name.strip_prefix("model_v")?
        .strip_suffix(".json")?
        .parse()
        .ok()
        .filter(|v| *v > 0)
}

/// Writes `bytes` to a temporary sibling, fsyncs it, then renames it over
/// `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::storage("write_atomic", "path has no parent directory"))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    if let Err(e) = write_synced(&tmp, bytes).and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::storage("write_atomic", format!("{}: {e}", path.display())));
    }

    // Persist the rename itself. Not every platform can open a directory.
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// In-memory version store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryVersionStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    versions: BTreeMap<u64, Arc<ModelVersion>>,
    current: Option<u64>,
}

impl MemoryVersionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VersionStore for MemoryVersionStore {
    fn publish_with_watermark(
        &self,
        scorer: Arc<dyn Scorer>,
        threshold: f64,
        feedback_through: Option<DateTime<Utc>>,
    ) -> Result<Arc<ModelVersion>> {
        check_threshold(threshold)?;
        let mut inner = acquire_lock(&self.inner);
        let version = inner.versions.keys().next_back().map_or(1, |last| last + 1);
        let published = Arc::new(ModelVersion {
            version,
            scorer,
            threshold,
            created_at: crate::now(),
            feedback_through,
        });
        inner.versions.insert(version, Arc::clone(&published));
        Ok(published)
    }

    fn set_current(&self, version: u64) -> Result<()> {
        let mut inner = acquire_lock(&self.inner);
        if !inner.versions.contains_key(&version) {
            return Err(Error::VersionNotFound { version });
        }
        inner.current = Some(version);
        Ok(())
    }

    fn current_version(&self) -> Result<u64> {
        acquire_lock(&self.inner).current.ok_or(Error::NoActiveVersion)
    }

    fn get(&self, version: u64) -> Result<Arc<ModelVersion>> {
        acquire_lock(&self.inner)
            .versions
            .get(&version)
            .cloned()
            .ok_or(Error::VersionNotFound { version })
    }

    fn versions(&self) -> Result<Vec<u64>> {
        Ok(acquire_lock(&self.inner).versions.keys().copied().collect())
    }
}

impl std::fmt::Debug for MemoryVersionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = acquire_lock(&self.inner);
        f.debug_struct("MemoryVersionStore")
            .field("versions", &inner.versions.len())
            .field("current", &inner.current)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Features;
    use crate::training::ConstantScorer;

    fn constant(p: f64) -> Arc<dyn Scorer> {
        Arc::new(ConstantScorer::new(p))
    }

    #[test]
    fn test_versions_start_at_one_and_increase() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemVersionStore::open(dir.path(), ScorerRegistry::with_builtin())
            .expect("open");

        let v1 = store.publish(constant(0.1), 0.5).expect("publish v1");
        let v2 = store.publish(constant(0.2), 0.6).expect("publish v2");

        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(store.versions().expect("versions"), vec![1, 2]);
    }

    #[test]
    fn test_publish_does_not_move_pointer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemVersionStore::open(dir.path(), ScorerRegistry::with_builtin())
            .expect("open");

        store.publish(constant(0.1), 0.5).expect("publish");
        assert!(matches!(store.current_version(), Err(Error::NoActiveVersion)));
        assert!(matches!(store.get_current(), Err(Error::NoActiveVersion)));
    }

    #[test]
    fn test_pointer_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = FilesystemVersionStore::open(dir.path(), ScorerRegistry::with_builtin())
                .expect("open");
            store.publish(constant(0.1), 0.5).expect("publish v1");
            store.publish(constant(0.7), 0.4).expect("publish v2");
            store.set_current(2).expect("set current");
        }

        let reopened = FilesystemVersionStore::open(dir.path(), ScorerRegistry::with_builtin())
            .expect("reopen");
        let current = reopened.get_current().expect("current");
        assert_eq!(current.version, 2);
        assert!((current.threshold - 0.4).abs() < f64::EPSILON);
        let p = current.scorer.score(&Features::new()).expect("score");
        assert!((p - 0.7).abs() < f64::EPSILON);

        let raw = fs::read_to_string(dir.path().join(POINTER_FILE)).expect("pointer");
        assert_eq!(raw, "2");
    }

    #[test]
    fn test_set_current_unknown_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemVersionStore::open(dir.path(), ScorerRegistry::with_builtin())
            .expect("open");
        store.publish(constant(0.1), 0.5).expect("publish");
        store.set_current(1).expect("set current");

        let result = store.set_current(9);
        assert!(matches!(result, Err(Error::VersionNotFound { version: 9 })));
        assert_eq!(store.current_version().expect("current"), 1);
    }

    #[test]
    fn test_get_unknown_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemVersionStore::open(dir.path(), ScorerRegistry::with_builtin())
            .expect("open");
        assert!(matches!(
            store.get(3),
            Err(Error::VersionNotFound { version: 3 })
        ));
    }

    #[test]
    fn test_corrupt_pointer_is_storage_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesystemVersionStore::open(dir.path(), ScorerRegistry::with_builtin())
            .expect("open");
        fs::write(dir.path().join(POINTER_FILE), "not-a-number").expect("write");
        assert!(matches!(
            store.current_version(),
            Err(Error::StorageFailure { .. })
        ));
    }

    #[test]
    fn test_stray_files_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("model_vX.json"), "{}").expect("write");
        fs::write(dir.path().join("notes.txt"), "hi").expect("write");
        let store = FilesystemVersionStore::open(dir.path(), ScorerRegistry::with_builtin())
            .expect("open");

        let v = store.publish(constant(0.1), 0.5).expect("publish");
        assert_eq!(v.version, 1);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let store = MemoryVersionStore::new();
        assert!(matches!(
            store.publish(constant(0.1), 1.5),
            Err(Error::InvalidInput(_))
        ));
        assert!(store.versions().expect("versions").is_empty());
    }

    #[test]
    fn test_memory_store_contract() {
        let store = MemoryVersionStore::new();
        assert!(matches!(store.current_version(), Err(Error::NoActiveVersion)));

        let v1 = store.publish(constant(0.1), 0.5).expect("publish");
        assert_eq!(v1.version, 1);
        assert!(matches!(
            store.set_current(2),
            Err(Error::VersionNotFound { version: 2 })
        ));
        store.set_current(1).expect("set current");
        assert_eq!(store.get_current().expect("current").version, 1);
    }
}
