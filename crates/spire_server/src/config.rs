//! Server configuration.
//!
//! Every option is a command-line flag with a `SPIRE_*` environment
//! fallback.

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use spire_hooks::{QueueConfig, RetryPolicy};
use spire_hub::ConnectionConfig;
use spire_watch::WatcherConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ConfigError {
    /// Offending option
    pub field: &'static str,
    /// Why it was rejected
    pub reason: String,
}

impl ConfigError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// SPIRE server configuration
#[derive(Debug, Clone, PartialEq, Eq, Parser, Serialize, Deserialize)]
#[command(name = "spire-server")]
#[command(about = "SPIRE runtime server: realtime hub, hooks and artifact reload", long_about = None)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    #[arg(short, long, env = "SPIRE_BIND", default_value = "127.0.0.1:8080")]
    pub bind: SocketAddr,

    /// Compiled artifact file
    #[arg(short, long, env = "SPIRE_ARTIFACT")]
    pub artifact: PathBuf,

    /// Outbound queue capacity per WebSocket client
    #[arg(long, env = "SPIRE_QUEUE_CAPACITY", default_value_t = 256)]
    pub queue_capacity: usize,

    /// Largest accepted inbound WebSocket frame, in bytes
    #[arg(long, env = "SPIRE_MAX_FRAME_BYTES", default_value_t = 64 * 1024)]
    pub max_frame_bytes: usize,

    /// Heartbeat ping interval in milliseconds
    #[arg(long, env = "SPIRE_PING_INTERVAL_MS", default_value_t = 54_000)]
    pub ping_interval_ms: u64,

    /// Idle read deadline in milliseconds
    #[arg(long, env = "SPIRE_READ_IDLE_MS", default_value_t = 60_000)]
    pub read_idle_ms: u64,

    /// Socket write deadline in milliseconds
    #[arg(long, env = "SPIRE_WRITE_TIMEOUT_MS", default_value_t = 10_000)]
    pub write_timeout_ms: u64,

    /// Artifact change debounce window in milliseconds
    #[arg(long, env = "SPIRE_DEBOUNCE_MS", default_value_t = 100)]
    pub debounce_ms: u64,

    /// Concurrent job workers
    #[arg(long, env = "SPIRE_JOB_WORKERS", default_value_t = 4)]
    pub job_workers: usize,

    /// Pending dispatch requests before new ones are refused
    #[arg(long, env = "SPIRE_JOB_QUEUE_CAPACITY", default_value_t = 1024)]
    pub job_queue_capacity: usize,

    /// Attempts per job, including the first
    #[arg(long, env = "SPIRE_JOB_MAX_ATTEMPTS", default_value_t = 3)]
    pub job_max_attempts: u32,

    /// Log output format
    #[arg(long, env = "SPIRE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            artifact: PathBuf::from("artifact.json"),
            queue_capacity: 256,
            max_frame_bytes: 64 * 1024,
            ping_interval_ms: 54_000,
            read_idle_ms: 60_000,
            write_timeout_ms: 10_000,
            debounce_ms: 100,
            job_workers: 4,
            job_queue_capacity: 1024,
            job_max_attempts: 3,
            log_format: LogFormat::Pretty,
        }
    }
}

impl ServerConfig {
    /// Check option combinations
    ///
    /// # Errors
    ///
    /// Returns error on zero capacities or a heartbeat that does not fit
    /// inside the idle deadline
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("queue_capacity", self.queue_capacity as u64),
            ("max_frame_bytes", self.max_frame_bytes as u64),
            ("ping_interval_ms", self.ping_interval_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("job_workers", self.job_workers as u64),
            ("job_queue_capacity", self.job_queue_capacity as u64),
            ("job_max_attempts", u64::from(self.job_max_attempts)),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::new(field, "must be greater than zero"));
            }
        }
        if self.ping_interval_ms >= self.read_idle_ms {
            return Err(ConfigError::new(
                "ping_interval_ms",
                format!(
                    "{} must be less than read_idle_ms ({})",
                    self.ping_interval_ms, self.read_idle_ms
                ),
            ));
        }
        Ok(())
    }

    /// Per-connection settings
    #[must_use]
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::default()
            .with_queue_capacity(self.queue_capacity)
            .with_max_frame_bytes(self.max_frame_bytes)
            .with_heartbeat(
                Duration::from_millis(self.ping_interval_ms),
                Duration::from_millis(self.read_idle_ms),
            )
            .with_write_timeout(Duration::from_millis(self.write_timeout_ms))
    }

    /// Job queue settings
    #[must_use]
    pub fn queue(&self) -> QueueConfig {
        QueueConfig::default()
            .with_capacity(self.job_queue_capacity)
            .with_workers(self.job_workers)
            .with_retry(RetryPolicy::default().with_max_attempts(self.job_max_attempts))
    }

    /// Watcher settings
    #[must_use]
    pub fn watcher(&self) -> WatcherConfig {
        WatcherConfig::default().with_debounce(Duration::from_millis(self.debounce_ms))
    }
}
