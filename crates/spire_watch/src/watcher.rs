//! Filesystem watch on the artifact file.
//!
//! The containing directory is watched rather than the file, so editors and
//! deploy tools that replace the file by rename are still seen. Events for
//! other names in the directory are ignored.

use crate::debounce::{Callback, Debouncer, Trigger};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Watch errors
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Path has no file name component
    #[error("not a file path: {0}")]
    InvalidPath(PathBuf),

    /// `start` was called twice
    #[error("watcher is already running")]
    AlreadyRunning,

    /// The OS watch could not be set up
    #[error("failed to watch {path}: {source}")]
    Notify {
        /// Directory being watched
        path: PathBuf,
        /// Underlying error
        #[source]
        source: notify::Error,
    },
}

/// Watcher settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Quiet period before a change is acted on
    pub debounce: Duration,
}

impl WatcherConfig {
    /// Set debounce window
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
        }
    }
}

struct Running {
    // dropped first: no more events once it is gone
    watcher: RecommendedWatcher,
    debouncer: Debouncer,
}

/// Watches one artifact file and calls back after changes settle
pub struct ArtifactWatcher {
    path: PathBuf,
    config: WatcherConfig,
    running: Mutex<Option<Running>>,
}

impl ArtifactWatcher {
    /// Create a watcher for `path`; nothing is watched until [`start`](Self::start)
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, config: WatcherConfig) -> Self {
        Self {
            path: path.into(),
            config,
            running: Mutex::new(None),
        }
    }

    /// Watched file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begin watching. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the path has no file name, the watcher is already
    /// running, or the directory cannot be watched
    pub fn start(&self, on_change: Callback) -> Result<(), WatchError> {
        let file_name = self
            .path
            .file_name()
            .map(OsStr::to_os_string)
            .ok_or_else(|| WatchError::InvalidPath(self.path.clone()))?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut running = self.lock();
        if running.is_some() {
            return Err(WatchError::AlreadyRunning);
        }

        let debouncer = Debouncer::spawn(self.config.debounce, on_change);
        let trigger = debouncer.trigger();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            forward(result, &file_name, &trigger);
        })
        .map_err(|source| WatchError::Notify {
            path: dir.clone(),
            source,
        })?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|source| WatchError::Notify {
                path: dir.clone(),
                source,
            })?;

        info!(
            path = %self.path.display(),
            debounce_ms = self.config.debounce.as_millis() as u64,
            "artifact watcher started"
        );
        *running = Some(Running { watcher, debouncer });
        Ok(())
    }

    /// Stop watching.
    ///
    /// Idempotent and safe to call when `start` never ran or failed. After
    /// it returns no further callback fires.
    pub fn stop(&self) {
        let Some(Running { watcher, debouncer }) = self.lock().take() else {
            return;
        };
        drop(watcher);
        debouncer.stop();
        info!(path = %self.path.display(), "artifact watcher stopped");
    }

    /// Whether the watch is active
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ArtifactWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ArtifactWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactWatcher")
            .field("path", &self.path)
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

fn forward(result: notify::Result<Event>, file_name: &OsString, trigger: &Trigger) {
    match result {
        Ok(event) if is_relevant(&event, file_name) => {
            debug!(kind = ?event.kind, "artifact change detected");
            trigger.fire();
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "watch error"),
    }
}

/// Content-changing events that name the target file
fn is_relevant(event: &Event, file_name: &OsStr) -> bool {
    let changes_content = match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    };
    changes_content
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name))
}
