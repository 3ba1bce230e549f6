//! In-process dispatch engine.
//!
//! [`JobQueue`] accepts requests through a bounded channel without waiting,
//! and a dispatcher task runs them on a fixed number of workers. Jobs in one
//! request run in order on one worker; each is retried per [`RetryPolicy`]
//! and a job that runs out of attempts is logged and counted, never raised.

use crate::dispatch::{DispatchError, DispatchRequest, JobDispatchPort};
use crate::metrics::{DispatchMetrics, DispatchStats};
use crate::retry::RetryPolicy;
use crate::runner::{JobInvocation, JobRunner};
use spire_core::JobSpec;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Queue sizing and retry settings
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Pending requests accepted before `enqueue` reports full
    pub capacity: usize,
    /// Requests executed concurrently
    pub workers: usize,
    /// Per-job retry policy
    pub retry: RetryPolicy,
}

impl QueueConfig {
    /// Set intake capacity
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set worker count
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            workers: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Bounded job queue with a worker pool
pub struct JobQueue {
    sender: Mutex<Option<mpsc::Sender<DispatchRequest>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<DispatchMetrics>,
}

impl JobQueue {
    /// Start the queue and its dispatcher task on the current runtime
    #[must_use]
    pub fn start(config: QueueConfig, runner: Arc<dyn JobRunner>) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let metrics = Arc::new(DispatchMetrics::new());
        let dispatcher = tokio::spawn(dispatch_loop(
            receiver,
            config,
            runner,
            Arc::clone(&metrics),
        ));

        Self {
            sender: Mutex::new(Some(sender)),
            dispatcher: Mutex::new(Some(dispatcher)),
            metrics,
        }
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.metrics.snapshot()
    }

    /// Stop intake and wait for queued and running jobs to finish.
    ///
    /// Later calls return immediately.
    pub async fn shutdown(&self) {
        drop(lock(&self.sender).take());
        let dispatcher = lock(&self.dispatcher).take();
        if let Some(handle) = dispatcher {
            if let Err(err) = handle.await {
                error!(error = %err, "dispatcher task failed");
            }
            info!("job queue drained");
        }
    }
}

impl JobDispatchPort for JobQueue {
    fn enqueue(&self, request: DispatchRequest) -> Result<(), DispatchError> {
        let sender = lock(&self.sender);
        let Some(sender) = sender.as_ref() else {
            self.metrics.record_rejected();
            return Err(DispatchError::Closed);
        };
        match sender.try_send(request) {
            Ok(()) => {
                self.metrics.record_enqueued();
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.record_rejected();
                Err(DispatchError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.metrics.record_rejected();
                Err(DispatchError::Closed)
            }
        }
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("open", &lock(&self.sender).is_some())
            .field("metrics", &self.metrics)
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn dispatch_loop(
    mut receiver: mpsc::Receiver<DispatchRequest>,
    config: QueueConfig,
    runner: Arc<dyn JobRunner>,
    metrics: Arc<DispatchMetrics>,
) {
    let workers = Arc::new(Semaphore::new(config.workers.max(1)));
    let mut running = JoinSet::new();

    while let Some(request) = receiver.recv().await {
        while running.try_join_next().is_some() {}

        let Ok(permit) = Arc::clone(&workers).acquire_owned().await else {
            break;
        };
        let runner = Arc::clone(&runner);
        let metrics = Arc::clone(&metrics);
        let retry = config.retry;
        running.spawn(async move {
            run_request(&request, runner.as_ref(), retry, &metrics).await;
            drop(permit);
        });
    }

    while running.join_next().await.is_some() {}
}

async fn run_request(
    request: &DispatchRequest,
    runner: &dyn JobRunner,
    retry: RetryPolicy,
    metrics: &DispatchMetrics,
) {
    debug!(dispatch_id = %request.id, entity = %request.entity, "dispatch started");
    for spec in request.jobs() {
        run_job(request, spec, runner, retry, metrics).await;
    }
}

async fn run_job(
    request: &DispatchRequest,
    spec: &JobSpec,
    runner: &dyn JobRunner,
    retry: RetryPolicy,
    metrics: &DispatchMetrics,
) {
    let mut invocation = JobInvocation {
        dispatch_id: request.id,
        job: spec.name.clone(),
        capabilities: spec.capabilities.clone(),
        input: spec.project(&request.data_snapshot),
        attempt: 0,
    };

    loop {
        invocation.attempt += 1;
        match runner.run(&invocation).await {
            Ok(()) => {
                metrics.record_succeeded();
                return;
            }
            Err(err) if retry.should_retry(invocation.attempt) => {
                let delay = retry.delay(invocation.attempt - 1);
                warn!(
                    dispatch_id = %request.id,
                    job = %spec.name,
                    attempt = invocation.attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "job failed, retrying"
                );
                metrics.record_retried();
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                error!(
                    dispatch_id = %request.id,
                    job = %spec.name,
                    attempts = invocation.attempt,
                    error = %err,
                    "job failed, attempts exhausted"
                );
                metrics.record_failed();
                return;
            }
        }
    }
}
