//! Atomic holder of the live artifact.
//!
//! Readers get an `Arc` to the current snapshot under a short read lock and
//! keep using it after the lock is released. A swap replaces the whole
//! snapshot; readers holding the old `Arc` are unaffected.

use crate::artifact::Artifact;
use crate::error::{CoreError, CoreResult};
use crate::version::{ArtifactVersion, Digest};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// An installed artifact paired with the version it was installed under
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// The artifact
    pub artifact: Arc<Artifact>,
    /// Its version
    pub version: ArtifactVersion,
}

/// Holds the current immutable artifact snapshot
#[derive(Debug, Default)]
pub struct ArtifactStore {
    current: RwLock<Option<Snapshot>>,
}

impl ArtifactStore {
    /// Create an empty store (no artifact installed)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with an artifact already installed
    #[must_use]
    pub fn with_artifact(artifact: Artifact) -> Self {
        let store = Self::new();
        store.swap(artifact, Digest::compute(&[]));
        store
    }

    /// Get the current snapshot, if any
    #[must_use]
    pub fn get(&self) -> Option<Arc<Artifact>> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|installed| Arc::clone(&installed.artifact))
    }

    /// Get the version of the current snapshot, if any
    #[must_use]
    pub fn version(&self) -> Option<ArtifactVersion> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(|installed| installed.version.clone())
    }

    /// Get the current artifact and its version from one read
    #[must_use]
    pub fn snapshot(&self) -> Option<Snapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    /// Replace the current snapshot with a fully parsed artifact.
    ///
    /// Returns exactly what was installed, even if another swap lands
    /// right after.
    pub fn swap(&self, artifact: Artifact, digest: Digest) -> Snapshot {
        let artifact = Arc::new(artifact);
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = guard.as_ref().map_or(1, |installed| installed.version.generation + 1);
        let installed = Snapshot {
            artifact,
            version: ArtifactVersion::new(generation, digest),
        };
        *guard = Some(installed.clone());
        drop(guard);

        info!(version = %installed.version, "artifact installed");
        installed
    }

    /// Parse artifact bytes and install them.
    ///
    /// Parsing finishes before the write lock is taken, so a failure leaves
    /// the previous snapshot untouched.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes do not parse
    pub fn install_bytes(&self, bytes: &[u8]) -> CoreResult<Snapshot> {
        let artifact = Artifact::from_json(bytes)?;
        Ok(self.swap(artifact, Digest::compute(bytes)))
    }

    /// Read, parse and install an artifact file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or does not parse
    pub fn load_file(&self, path: &Path) -> CoreResult<Snapshot> {
        let bytes = std::fs::read(path).map_err(|e| CoreError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.install_bytes(&bytes)
    }
}
