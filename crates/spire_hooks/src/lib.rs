//! SPIRE Hooks
//!
//! Bridges committed mutations to background jobs.
//!
//! [`HookMatcher`] selects the artifact's `after` rules for an entity and
//! operation and hands one [`DispatchRequest`] per rule to a
//! [`JobDispatchPort`]. [`JobQueue`] is the in-process port: a bounded
//! intake, a worker pool, and per-job retry with exponential backoff.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatch;
pub mod matcher;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod runner;

// Re-exports
pub use dispatch::{DispatchError, DispatchRequest, JobDispatchPort};
pub use matcher::HookMatcher;
pub use metrics::{DispatchMetrics, DispatchStats};
pub use queue::{JobQueue, QueueConfig};
pub use retry::RetryPolicy;
pub use runner::{JobError, JobInvocation, JobRunner, LogRunner};
