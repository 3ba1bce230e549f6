//! Artifact reload: read, parse, swap, announce.

use crate::debounce::Callback;
use chrono::{DateTime, Utc};
use serde::Serialize;
use spire_core::{ArtifactStore, ArtifactVersion, CoreError};
use spire_hub::BroadcastHub;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Reload failure; the previous artifact stays live
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("reload of {path} failed: {source}")]
pub struct ReloadError {
    /// Artifact file
    pub path: PathBuf,
    /// Read or parse failure
    #[source]
    pub source: CoreError,
}

/// Payload of the global `artifact_reload` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadNotice {
    /// Artifact name
    pub name: String,
    /// Generation counter
    pub generation: u64,
    /// Content digest (hex)
    pub digest: String,
    /// When the swap happened
    pub loaded_at: DateTime<Utc>,
}

/// Reloads one artifact file into a store and notifies every client
#[derive(Debug, Clone)]
pub struct ArtifactReloader {
    path: PathBuf,
    store: Arc<ArtifactStore>,
    hub: Arc<BroadcastHub>,
}

impl ArtifactReloader {
    /// Create a reloader
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        store: Arc<ArtifactStore>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self {
            path: path.into(),
            store,
            hub,
        }
    }

    /// Artifact file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read and install the artifact, then publish the new version.
    ///
    /// On failure the store is left exactly as it was and nothing is
    /// published.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or does not parse
    pub fn reload(&self) -> Result<ArtifactVersion, ReloadError> {
        let installed = self.store.load_file(&self.path).map_err(|source| {
            error!(
                path = %self.path.display(),
                error = %source,
                "artifact reload failed, keeping previous"
            );
            ReloadError {
                path: self.path.clone(),
                source,
            }
        })?;

        let version = installed.version;
        let notice = ReloadNotice {
            name: installed.artifact.name().to_string(),
            generation: version.generation,
            digest: version.digest.clone(),
            loaded_at: version.loaded_at,
        };
        match serde_json::to_value(&notice) {
            Ok(payload) => {
                let notified = self.hub.publish_global(&payload);
                info!(version = %version, clients = notified, "artifact reloaded");
            }
            Err(err) => error!(error = %err, "could not encode reload notice"),
        }
        Ok(version)
    }

    /// Watcher callback that reloads and discards the outcome (it is logged)
    #[must_use]
    pub fn into_callback(self: Arc<Self>) -> Callback {
        Arc::new(move || {
            let _ = self.reload();
        })
    }
}
