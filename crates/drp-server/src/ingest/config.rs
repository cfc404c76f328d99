//! Ingestion configuration
//!
//! Worker pool, batching, retry and export settings (`INGEST_*` / `EXPORT_*`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::exporter::DEFAULT_PAGE_SIZE;
use super::ingestor::DEFAULT_BATCH_SIZE;
use super::scheduler::RetryPolicy;

const DEFAULT_WORKER_THREADS: usize = 4;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_SECS: [u64; 3] = [10, 60, 300];
const DEFAULT_JOB_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_PROGRESS_EVERY_FLUSHES: u64 = 10;
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestConfig {
    /// Whether the server starts job workers
    pub enabled: bool,
    /// Jobs processed concurrently
    pub worker_threads: usize,
    /// Rows per flush
    pub batch_size: usize,
    /// Attempts per job, including the first
    pub max_retries: u32,
    /// Sleep before each retry; the last entry repeats
    pub backoff_secs: Vec<u64>,
    /// Wall-clock ceiling for a single attempt
    pub job_timeout_secs: u64,
    /// Records fetched per export page
    pub export_page_size: usize,
    /// Persist counters every N flushes
    pub progress_every_flushes: u64,
    /// Jobs that can wait in the queue before enqueue blocks
    pub queue_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_threads: DEFAULT_WORKER_THREADS,
            batch_size: DEFAULT_BATCH_SIZE,
            max_retries: DEFAULT_MAX_ATTEMPTS,
            backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            export_page_size: DEFAULT_PAGE_SIZE,
            progress_every_flushes: DEFAULT_PROGRESS_EVERY_FLUSHES,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            enabled: env_or("INGEST_ENABLED", defaults.enabled),
            worker_threads: env_or("INGEST_WORKER_THREADS", defaults.worker_threads),
            batch_size: env_or("INGEST_BATCH_SIZE", defaults.batch_size),
            max_retries: env_or("INGEST_MAX_RETRIES", defaults.max_retries),
            backoff_secs: match std::env::var("INGEST_BACKOFF_SECS") {
                Ok(raw) => parse_backoff(&raw)?,
                Err(_) => defaults.backoff_secs,
            },
            job_timeout_secs: env_or("INGEST_JOB_TIMEOUT_SECS", defaults.job_timeout_secs),
            export_page_size: env_or("EXPORT_PAGE_SIZE", defaults.export_page_size),
            progress_every_flushes: env_or(
                "INGEST_PROGRESS_EVERY_FLUSHES",
                defaults.progress_every_flushes,
            ),
            queue_capacity: env_or("INGEST_QUEUE_CAPACITY", defaults.queue_capacity),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_threads == 0 {
            anyhow::bail!("INGEST_WORKER_THREADS must be greater than 0");
        }
        if self.batch_size == 0 {
            anyhow::bail!("INGEST_BATCH_SIZE must be greater than 0");
        }
        if self.max_retries == 0 {
            anyhow::bail!("INGEST_MAX_RETRIES must be at least 1");
        }
        if self.job_timeout_secs == 0 {
            anyhow::bail!("INGEST_JOB_TIMEOUT_SECS must be greater than 0");
        }
        if self.export_page_size == 0 {
            anyhow::bail!("EXPORT_PAGE_SIZE must be greater than 0");
        }
        if self.queue_capacity == 0 {
            anyhow::bail!("INGEST_QUEUE_CAPACITY must be greater than 0");
        }
        Ok(())
    }

    /// Get job timeout as Duration
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.backoff_secs.iter().copied().map(Duration::from_secs).collect(),
        )
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// `"10, 60,300"` → `[10, 60, 300]`
fn parse_backoff(raw: &str) -> anyhow::Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|e| anyhow::anyhow!("invalid INGEST_BACKOFF_SECS entry '{}': {}", s, e))
        })
        .collect()
}
