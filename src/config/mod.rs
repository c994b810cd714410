//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. In local dev call `dotenvy::dotenv().ok()` first.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::queue::QueueConfig;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL, e.g. `sqlite://work.db`.
    pub database_url: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub bind_addr: SocketAddr,
    pub max_workers: usize,
    pub poll_interval: Duration,
    pub execution_timeout: Duration,
    pub shutdown_grace: Duration,
    pub job_max_retries: u32,
    pub job_retry_base: Duration,
    pub job_retry_max: Duration,
    pub job_sweep_interval: Duration,
    pub job_history_limit: usize,
    /// Per-subscriber event channel size.
    pub event_buffer: usize,
    pub event_heartbeat: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: required_var("DATABASE_URL")?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok().filter(|s| !s.is_empty()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            bind_addr: parsed_var("BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 8080)))?,
            max_workers: parsed_var("WORK_MAX_WORKERS", 4)?,
            poll_interval: Duration::from_secs(parsed_var("WORK_POLL_INTERVAL_SECS", 60)?),
            execution_timeout: Duration::from_secs(parsed_var(
                "WORK_EXECUTION_TIMEOUT_SECS",
                1800,
            )?),
            shutdown_grace: Duration::from_secs(parsed_var("WORK_SHUTDOWN_GRACE_SECS", 10)?),
            job_max_retries: parsed_var("JOB_MAX_RETRIES", 3)?,
            job_retry_base: Duration::from_millis(parsed_var("JOB_RETRY_BASE_MS", 1000)?),
            job_retry_max: Duration::from_millis(parsed_var("JOB_RETRY_MAX_MS", 300_000)?),
            job_sweep_interval: Duration::from_millis(parsed_var("JOB_SWEEP_INTERVAL_MS", 1000)?),
            job_history_limit: parsed_var("JOB_HISTORY_LIMIT", 100)?,
            event_buffer: parsed_var("EVENT_BUFFER", 64)?,
            event_heartbeat: Duration::from_secs(parsed_var("EVENT_HEARTBEAT_SECS", 30)?),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_workers: self.max_workers,
            poll_interval: self.poll_interval,
            execution_timeout: self.execution_timeout,
            shutdown_grace: self.shutdown_grace,
            queue: QueueConfig {
                max_retries: self.job_max_retries,
                retry_base: self.job_retry_base,
                retry_max: self.job_retry_max,
                sweep_interval: self.job_sweep_interval,
                history_limit: self.job_history_limit,
            },
        }
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {name}={raw}: {e}"))),
        Err(_) => Ok(default),
    }
}
