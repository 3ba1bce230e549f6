//! The contract between the hook matcher and the job execution engine.

use indexmap::IndexMap;
use spire_core::{DispatchId, JobSpec, Operation, Record};

/// One matched hook rule, handed to the execution engine
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    /// Request ID, for correlating log lines
    pub id: DispatchId,
    /// Entity whose mutation fired the rule
    pub entity: String,
    /// Mutation kind
    pub operation: Operation,
    /// Job names from the rule, in order, including any that did not resolve
    pub job_names: Vec<String>,
    /// Independent copy of the committed record
    pub data_snapshot: Record,
    /// Resolved job specs keyed by name; unresolved names are absent
    pub resolved_specs: IndexMap<String, JobSpec>,
}

impl DispatchRequest {
    /// Job specs in `job_names` order, skipping names that did not resolve
    pub fn jobs(&self) -> impl Iterator<Item = &JobSpec> {
        self.job_names
            .iter()
            .filter_map(|name| self.resolved_specs.get(name))
    }

    /// Names in `job_names` with no resolved spec
    #[must_use]
    pub fn unresolved(&self) -> Vec<&str> {
        self.job_names
            .iter()
            .filter(|name| !self.resolved_specs.contains_key(name.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// Dispatch errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Intake queue is full
    #[error("dispatch queue is full")]
    QueueFull,

    /// Engine is no longer accepting work
    #[error("dispatch queue is closed")]
    Closed,
}

/// Hands dispatch requests to an asynchronous execution engine.
///
/// `enqueue` must return promptly; any waiting happens inside the engine.
/// Retries and failure reporting after a successful enqueue are the
/// engine's concern and are never surfaced to the caller.
pub trait JobDispatchPort: Send + Sync {
    /// Submit a request
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot accept the request right now
    fn enqueue(&self, request: DispatchRequest) -> Result<(), DispatchError>;
}
