//! Trailing-edge debouncer.
//!
//! Each trigger (re)starts a quiet window; the callback runs once the window
//! passes with no further trigger. After [`Debouncer::stop`] returns the
//! callback never runs again, and a callback already running has finished.
//! Callbacks run on the blocking pool.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Callback fired after a quiet window
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Cheap, cloneable handle that can fire triggers from any thread
#[derive(Debug, Clone)]
pub struct Trigger(mpsc::UnboundedSender<()>);

impl Trigger {
    /// Record one event
    pub fn fire(&self) {
        // closed only after stop, when events no longer matter
        let _ = self.0.send(());
    }
}

/// Runs a callback after a burst of triggers settles
pub struct Debouncer {
    trigger: Trigger,
    stopped: Arc<Mutex<bool>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Debouncer {
    /// Spawn the debounce task on the current runtime
    #[must_use]
    pub fn spawn(window: Duration, callback: Callback) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stopped = Arc::new(Mutex::new(false));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(debounce_loop(
            window,
            receiver,
            callback,
            Arc::clone(&stopped),
            cancel.clone(),
        ));

        Self {
            trigger: Trigger(sender),
            stopped,
            cancel,
            task,
        }
    }

    /// Handle for firing triggers
    #[must_use]
    pub fn trigger(&self) -> Trigger {
        self.trigger.clone()
    }

    /// Stop for good; idempotent
    pub fn stop(&self) {
        // taking the gate waits out a callback that is mid-flight
        *self.stopped.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.cancel.cancel();
        self.task.abort();
    }

    /// Whether `stop` has been called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

async fn debounce_loop(
    window: Duration,
    mut events: mpsc::UnboundedReceiver<()>,
    callback: Callback,
    stopped: Arc<Mutex<bool>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            event = events.recv() => {
                if event.is_none() {
                    return;
                }
            }
        }

        let mut deadline = Instant::now() + window;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                event = events.recv() => match event {
                    Some(()) => deadline = Instant::now() + window,
                    None => return,
                },
                _ = sleep_until(deadline) => break,
            }
        }

        // callbacks may block on file I/O, so they run off the async workers
        let gate = Arc::clone(&stopped);
        let fire = Arc::clone(&callback);
        let ran = tokio::task::spawn_blocking(move || {
            let gate = gate.lock().unwrap_or_else(PoisonError::into_inner);
            if *gate {
                return false;
            }
            fire();
            true
        })
        .await;
        match ran {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => warn!(error = %err, "debounced callback panicked"),
        }
    }
}
