//! SPIRE Core Types
//!
//! The compiled artifact model (hook rules, job specs, capabilities) and the
//! store that exposes the live artifact snapshot to request handlers,
//! the hook matcher, and the reload path.
//!
//! Everything here is plain data plus one synchronization point:
//! [`ArtifactStore`], which is swapped wholesale and never mutated in place.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;
pub mod capability;
pub mod error;
pub mod id;
pub mod record;
pub mod store;
pub mod version;

// Re-exports
pub use artifact::{Artifact, FieldMapping, HookRule, JobSpec, Operation, Timing};
pub use capability::{Capability, CapabilitySet};
pub use error::{CoreError, CoreResult};
pub use id::{ClientId, DispatchId};
pub use record::{Record, snapshot};
pub use store::{ArtifactStore, Snapshot};
pub use version::{ArtifactVersion, Digest};
