//! Bounded worker pool for independent jobs.
//!
//! Every submitted job is spawned as its own task; a semaphore caps how many
//! run at once. A job that panics is reported as a `PoolError` in its result
//! slot and never stops the remaining jobs.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Results returned in submission order
//! - Panics isolated per job
//! - Pool statistics tracking

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was configured without workers.
    #[error("Worker pool '{0}' needs at least one worker")]
    NoWorkers(String),

    /// A job panicked or was cancelled before finishing.
    #[error("Job {index} in pool '{pool}' did not finish: {message}")]
    JobAborted {
        pool: String,
        index: usize,
        message: String,
    },
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Name used in logs.
    pub name: String,
    /// Maximum number of jobs running at once.
    pub num_workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "pool".to_string(),
            num_workers: 4,
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the pool name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of jobs currently running.
    pub active_workers: usize,
    /// Jobs that ran to completion.
    pub jobs_completed: u64,
    /// Jobs that panicked or were cancelled.
    pub jobs_failed: u64,
    /// Average job duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_completion(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let average_duration = if completed > 0 {
            Duration::from_millis(total_duration_ms / completed)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            average_job_duration: average_duration,
        }
    }
}

/// Decrements the active counter even if the job panics.
struct ActiveGuard(Arc<SharedPoolStats>);

impl ActiveGuard {
    fn enter(stats: &Arc<SharedPoolStats>) -> Self {
        stats.active_workers.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(stats))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active_workers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Pool that runs a closed list of jobs with bounded concurrency.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    stats: Arc<SharedPoolStats>,
}

impl WorkerPool {
    /// Creates a new worker pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::NoWorkers` if `num_workers` is zero.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, PoolError> {
        if config.num_workers == 0 {
            return Err(PoolError::NoWorkers(config.name));
        }
        Ok(Self {
            config,
            stats: Arc::new(SharedPoolStats::new()),
        })
    }

    /// Runs `work` on every job and waits for all of them.
    ///
    /// The returned vector has one entry per job, in submission order. An
    /// `Err` entry means that job panicked; its siblings are unaffected.
    pub async fn run_all<J, O, F, Fut>(&self, jobs: Vec<J>, work: F) -> Vec<Result<O, PoolError>>
    where
        J: Send + 'static,
        O: Send + 'static,
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
    {
        let total = jobs.len();
        info!(
            pool = %self.config.name,
            num_workers = self.config.num_workers,
            jobs = total,
            "Worker pool started"
        );

        let limiter = Arc::new(Semaphore::new(self.config.num_workers));
        let work = Arc::new(work);

        let handles: Vec<_> = jobs
            .into_iter()
            .enumerate()
            .map(|(index, job)| {
                let limiter = Arc::clone(&limiter);
                let work = Arc::clone(&work);
                let stats = Arc::clone(&self.stats);
                let pool = self.config.name.clone();

                tokio::spawn(async move {
                    let _permit = limiter
                        .acquire_owned()
                        .await
                        .map_err(|e| PoolError::JobAborted {
                            pool,
                            index,
                            message: e.to_string(),
                        })?;
                    let _active = ActiveGuard::enter(&stats);
                    let start = Instant::now();

                    let output = work(job).await;

                    stats.record_completion(start.elapsed());
                    Ok(output)
                })
            })
            .collect();

        let joined = futures::future::join_all(handles).await;

        let results: Vec<_> = joined
            .into_iter()
            .enumerate()
            .map(|(index, joined)| match joined {
                Ok(result) => result,
                Err(e) => {
                    self.stats.record_failure();
                    error!(pool = %self.config.name, index, error = %e, "Job did not finish");
                    Err(PoolError::JobAborted {
                        pool: self.config.name.clone(),
                        index,
                        message: e.to_string(),
                    })
                }
            })
            .collect();

        let stats = self.stats();
        debug!(
            pool = %self.config.name,
            completed = stats.jobs_completed,
            failed = stats.jobs_failed,
            average_ms = stats.average_job_duration.as_millis() as u64,
            "Worker pool drained"
        );

        results
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }
}
