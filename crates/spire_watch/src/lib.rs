//! SPIRE Artifact Watch
//!
//! Keeps the live artifact in step with the file on disk. A directory watch
//! feeds a debouncer; once changes settle, the reloader parses the file,
//! swaps it into the store all at once and sends `artifact_reload` to every
//! connected client. A file that fails to parse leaves the running artifact
//! in place.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod debounce;
pub mod reload;
pub mod watcher;

// Re-exports
pub use debounce::{Callback, Debouncer, Trigger};
pub use reload::{ArtifactReloader, ReloadError, ReloadNotice};
pub use watcher::{ArtifactWatcher, WatchError, WatcherConfig};
