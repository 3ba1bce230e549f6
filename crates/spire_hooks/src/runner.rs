//! The seam to whatever actually executes a job.

use async_trait::async_trait;
use spire_core::{CapabilitySet, DispatchId, Record};
use tracing::info;

/// A single attempt at running one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobInvocation {
    /// Request this job came from
    pub dispatch_id: DispatchId,
    /// Job name
    pub job: String,
    /// Capabilities declared for the job
    pub capabilities: CapabilitySet,
    /// Projected input
    pub input: Record,
    /// 1-based attempt number
    pub attempt: u32,
}

/// Job failure reported by a runner
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job failed: {message}")]
pub struct JobError {
    /// What went wrong
    pub message: String,
}

impl JobError {
    /// Create a job error
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Executes jobs
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run one attempt of a job
    ///
    /// # Errors
    ///
    /// Returns error if the attempt failed and may be retried
    async fn run(&self, invocation: &JobInvocation) -> Result<(), JobError>;
}

/// Runner that only logs each invocation
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRunner;

#[async_trait]
impl JobRunner for LogRunner {
    async fn run(&self, invocation: &JobInvocation) -> Result<(), JobError> {
        info!(
            dispatch_id = %invocation.dispatch_id,
            job = %invocation.job,
            attempt = invocation.attempt,
            fields = invocation.input.len(),
            "job invoked"
        );
        Ok(())
    }
}
