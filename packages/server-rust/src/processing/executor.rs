//! Work executors for asynchronous message processing.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::config::ProcessingConfig;
use super::error::WorkRejected;
use super::worker::{BackgroundRunnable, BackgroundWorker};
use crate::traits::{Work, WorkExecutor};

// ---------------------------------------------------------------------------
// TokioExecutor
// ---------------------------------------------------------------------------

/// Spawns every work item as its own task. Never rejects.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Executor spawning onto the runtime this is called from.
    ///
    /// # Errors
    ///
    /// Fails outside a tokio runtime.
    pub fn current() -> Result<Self, TryCurrentError> {
        Handle::try_current().map(Self::new)
    }
}

impl WorkExecutor for TokioExecutor {
    fn schedule_work(&self, work: Work) -> Result<(), WorkRejected> {
        self.handle.spawn(work);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PoolStats {
    in_flight: AtomicUsize,
    completed: AtomicU64,
}

/// Bounded executor: a queue of `worker_queue_capacity` items feeding at most
/// `max_concurrent_work` concurrently running tasks.
///
/// Work arriving while the queue is full, or after [`stop`](Self::stop), is
/// rejected.
pub struct WorkerPool {
    worker: BackgroundWorker<PoolRunner>,
    stats: Arc<PoolStats>,
}

impl WorkerPool {
    /// Starts the pool on the current tokio runtime.
    #[must_use]
    pub fn start(config: &ProcessingConfig) -> Self {
        let stats = Arc::new(PoolStats::default());
        let permits = config.max_concurrent_work.max(1);
        let runner = PoolRunner {
            semaphore: Arc::new(Semaphore::new(permits as usize)),
            permits,
            stats: Arc::clone(&stats),
        };
        let worker = BackgroundWorker::start(
            runner,
            config.worker_stats_interval_ms,
            config.worker_queue_capacity,
        );
        Self { worker, stats }
    }

    /// Work items currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.stats.in_flight.load(Ordering::SeqCst)
    }

    /// Work items that ran to completion.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.stats.completed.load(Ordering::SeqCst)
    }

    /// Rejects new work, then waits for queued and running work to finish.
    pub async fn stop(&self) {
        self.worker.stop().await;
    }
}

impl WorkExecutor for WorkerPool {
    fn schedule_work(&self, work: Work) -> Result<(), WorkRejected> {
        self.worker.try_submit(work)
    }
}

struct PoolRunner {
    semaphore: Arc<Semaphore>,
    permits: u32,
    stats: Arc<PoolStats>,
}

#[async_trait]
impl BackgroundRunnable for PoolRunner {
    type Task = Work;

    async fn run(&mut self, work: Work) {
        // Waiting here applies backpressure to the queue.
        let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
            return;
        };
        let stats = Arc::clone(&self.stats);
        stats.in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            work.await;
            stats.in_flight.fetch_sub(1, Ordering::SeqCst);
            stats.completed.fetch_add(1, Ordering::SeqCst);
            drop(permit);
        });
    }

    async fn on_tick(&mut self) {
        info!(
            in_flight = self.stats.in_flight.load(Ordering::SeqCst),
            completed = self.stats.completed.load(Ordering::SeqCst),
            "worker pool stats"
        );
    }

    async fn shutdown(&mut self) {
        if let Ok(all) = self.semaphore.acquire_many(self.permits).await {
            all.forget();
        }
        self.semaphore.close();
        debug!(
            completed = self.stats.completed.load(Ordering::SeqCst),
            "worker pool stopped"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
