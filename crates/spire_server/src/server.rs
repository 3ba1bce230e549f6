//! Server wiring: build every component from a config and run until shutdown.

use crate::api::{AppState, router};
use crate::config::ServerConfig;
use anyhow::{Context, Result};
use spire_core::ArtifactStore;
use spire_hooks::{HookMatcher, JobDispatchPort, JobQueue, LogRunner};
use spire_hub::BroadcastHub;
use spire_watch::{ArtifactReloader, ArtifactWatcher};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// A fully wired SPIRE server
#[derive(Debug)]
pub struct SpireServer {
    config: ServerConfig,
    state: AppState,
    watcher: Arc<ArtifactWatcher>,
}

impl SpireServer {
    /// Load the artifact and start the job queue and file watcher.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the artifact cannot be loaded or watched
    pub fn build(config: ServerConfig) -> Result<Self> {
        let store = Arc::new(ArtifactStore::new());
        let version = store
            .load_file(&config.artifact)
            .with_context(|| format!("loading artifact {}", config.artifact.display()))?
            .version;
        info!(path = %config.artifact.display(), version = %version, "artifact loaded");

        let hub = Arc::new(BroadcastHub::new());
        let jobs = Arc::new(JobQueue::start(config.queue(), Arc::new(LogRunner)));
        let port: Arc<dyn JobDispatchPort> = jobs.clone();
        let matcher = HookMatcher::new(Arc::clone(&store), port);
        let reloader = Arc::new(ArtifactReloader::new(
            &config.artifact,
            Arc::clone(&store),
            Arc::clone(&hub),
        ));

        let watcher = Arc::new(ArtifactWatcher::new(&config.artifact, config.watcher()));
        watcher
            .start(Arc::clone(&reloader).into_callback())
            .context("starting artifact watcher")?;

        let state = AppState {
            store,
            hub,
            matcher,
            jobs,
            reloader,
            connection: config.connection(),
        };
        Ok(Self {
            config,
            state,
            watcher,
        })
    }

    /// Handler state
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until `shutdown` resolves, then stop the watcher, finish open
    /// requests and drain the job queue.
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot bind or the server fails
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind)
            .await
            .with_context(|| format!("binding {}", self.config.bind))?;
        let addr: SocketAddr = listener.local_addr()?;
        info!(%addr, "listening");

        let watcher = Arc::clone(&self.watcher);
        let signal = async move {
            shutdown.await;
            info!("shutdown requested");
            watcher.stop();
        };

        axum::serve(listener, router(self.state.clone()))
            .with_graceful_shutdown(signal)
            .await
            .context("server error")?;

        self.watcher.stop();
        self.state.jobs.shutdown().await;
        info!("server stopped");
        Ok(())
    }
}
