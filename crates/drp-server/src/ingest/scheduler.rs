//! Job scheduler
//!
//! Jobs go into a bounded queue drained by a dispatcher task. Each job runs
//! in its own task, at most `worker_threads` at a time. Every attempt has a
//! wall-clock timeout; failed attempts are retried with backoff until the
//! retry policy gives up.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, instrument, warn};

use super::config::IngestConfig;
use super::jobs::Job;
use super::{IngestError, Result};

/// How often and how patiently a job is retried
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            3,
            vec![
                Duration::from_secs(10),
                Duration::from_secs(60),
                Duration::from_secs(300),
            ],
        )
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after failed attempt number `attempt` (1-based); the last entry repeats
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let Some(last) = self.backoff.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        let idx = (attempt.saturating_sub(1) as usize).min(last);
        self.backoff[idx]
    }
}

/// Executes one attempt of a job
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: &Job) -> Result<()>;

    /// Called when an attempt is abandoned because it exceeded its timeout
    async fn record_timeout(&self, _job: &Job, _error: &IngestError) {}
}

/// Handle for submitting jobs; clones share the same queue
#[derive(Clone)]
pub struct JobScheduler {
    tx: mpsc::Sender<Job>,
}

impl JobScheduler {
    /// Start the dispatcher.
    ///
    /// The returned handle resolves once every `JobScheduler` clone is dropped
    /// and the jobs already queued have finished.
    pub fn start(runner: Arc<dyn JobRunner>, config: &IngestConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let policy = config.retry_policy();
        let timeout = config.job_timeout();
        let workers = config.worker_threads.max(1);

        info!(
            workers,
            max_attempts = policy.max_attempts(),
            timeout_secs = timeout.as_secs(),
            "Starting job scheduler"
        );

        let handle = tokio::spawn(dispatch(rx, runner, policy, timeout, workers));
        (Self { tx }, handle)
    }

    pub async fn enqueue(&self, job: impl Into<Job>) -> Result<()> {
        let job = job.into();
        info!(job = %job, "Job enqueued");
        self.tx
            .send(job)
            .await
            .map_err(|_| IngestError::Validation("job queue is closed".to_string()))
    }
}

async fn dispatch(
    mut rx: mpsc::Receiver<Job>,
    runner: Arc<dyn JobRunner>,
    policy: RetryPolicy,
    timeout: Duration,
    workers: usize,
) {
    let slots = Arc::new(Semaphore::new(workers));
    let mut tasks = JoinSet::new();

    while let Some(job) = rx.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let runner = runner.clone();
        let policy = policy.clone();

        tasks.spawn(async move {
            let _permit = permit;
            // Outcome is already logged and recorded on the status tables
            let _ = run_with_retry(runner.as_ref(), &job, &policy, timeout).await;
        });

        while tasks.try_join_next().is_some() {}
    }

    info!(in_flight = tasks.len(), "Job queue closed, waiting for running jobs");
    while tasks.join_next().await.is_some() {}
    info!("Job scheduler stopped");
}

/// Run `job` until it succeeds, fails permanently or runs out of attempts
#[instrument(skip(runner, policy), fields(job = %job))]
pub async fn run_with_retry(
    runner: &dyn JobRunner,
    job: &Job,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<()> {
    let mut attempt = 1u32;
    loop {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, runner.run(job)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let err = IngestError::Timeout(timeout);
                runner.record_timeout(job, &err).await;
                Err(err)
            }
        };

        match outcome {
            Ok(()) => {
                info!(attempt, elapsed_ms = started.elapsed().as_millis() as u64, "Job completed");
                return Ok(());
            }
            Err(e) if !e.is_retryable() => {
                error!(attempt, error = %e, "Job failed permanently");
                return Err(e);
            }
            Err(e) if attempt >= policy.max_attempts() => {
                error!(attempt, error = %e, "Job failed, no attempts left");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.backoff_for(attempt);
                warn!(attempt, error = %e, retry_in_secs = delay.as_secs(), "Job attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::jobs::IngestJob;
    use crate::ingest::models::DataType;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn job(id: i64) -> Job {
        IngestJob::new(id, DataType::Refined).into()
    }

    fn no_backoff(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Vec::new())
    }

    /// Fails the first `failures` attempts with `error`
    struct FlakyRunner {
        failures: u32,
        calls: AtomicU32,
        retryable: bool,
    }

    impl FlakyRunner {
        fn new(failures: u32, retryable: bool) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                retryable,
            }
        }
    }

    #[async_trait]
    impl JobRunner for FlakyRunner {
        async fn run(&self, _job: &Job) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call > self.failures {
                Ok(())
            } else if self.retryable {
                Err(IngestError::Database(sqlx::Error::PoolTimedOut))
            } else {
                Err(IngestError::NotFound("upload 1".into()))
            }
        }
    }

    struct SlowRunner {
        timeouts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobRunner for SlowRunner {
        async fn run(&self, _job: &Job) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        async fn record_timeout(&self, job: &Job, _error: &IngestError) {
            self.timeouts.lock().unwrap().push(job.to_string());
        }
    }

    /// Tracks how many jobs run at once
    #[derive(Default)]
    struct ConcurrencyRunner {
        running: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
    }

    #[async_trait]
    impl JobRunner for ConcurrencyRunner {
        async fn run(&self, _job: &Job) -> Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_backoff_schedule_repeats_last() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(10));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(60));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(300));
        assert_eq!(policy.backoff_for(9), Duration::from_secs(300));
        assert_eq!(no_backoff(3).backoff_for(2), Duration::ZERO);
    }

    #[test]
    fn test_policy_needs_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Vec::new()).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let runner = FlakyRunner::new(2, true);
        let result = run_with_retry(&runner, &job(1), &no_backoff(3), Duration::from_secs(5)).await;

        assert!(result.is_ok());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let runner = FlakyRunner::new(10, true);
        let result = run_with_retry(&runner, &job(1), &no_backoff(3), Duration::from_secs(5)).await;

        assert!(result.is_err());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let runner = FlakyRunner::new(10, false);
        let result = run_with_retry(&runner, &job(1), &no_backoff(3), Duration::from_secs(5)).await;

        assert!(matches!(result, Err(IngestError::NotFound(_))));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failed_attempt() {
        let runner = SlowRunner {
            timeouts: Mutex::new(Vec::new()),
        };
        let policy = RetryPolicy::new(2, vec![Duration::from_secs(10)]);

        let result = run_with_retry(&runner, &job(7), &policy, Duration::from_secs(1)).await;

        assert!(matches!(result, Err(IngestError::Timeout(_))));
        assert_eq!(runner.timeouts.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_bounds_concurrency_and_drains() {
        let runner = Arc::new(ConcurrencyRunner::default());
        let config = IngestConfig {
            worker_threads: 2,
            ..IngestConfig::default()
        };

        let (scheduler, handle) = JobScheduler::start(runner.clone(), &config);
        for id in 0..6 {
            scheduler.enqueue(job(id)).await.unwrap();
        }
        drop(scheduler);
        handle.await.unwrap();

        assert_eq!(runner.done.load(Ordering::SeqCst), 6);
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
    }
}
