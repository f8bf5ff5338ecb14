//! Background task loop shared by the executors.
//!
//! A `BackgroundWorker<R>` owns a bounded channel and a tokio task feeding
//! every received task to a `BackgroundRunnable`, with periodic tick callbacks.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::error::WorkRejected;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Task handler driven by a [`BackgroundWorker`].
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    async fn run(&mut self, task: Self::Task);

    /// Called on every tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once after the queue has been drained on stop.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Handle to a running task loop.
///
/// The loop:
/// 1. receives tasks from the bounded channel and runs them one at a time
/// 2. calls `on_tick()` at the configured interval
/// 3. on stop, drains the tasks already queued, then calls `shutdown()`
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Mutex<Option<mpsc::Sender<R::Task>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the loop on the current tokio runtime.
    pub fn start(mut runnable: R, tick_interval_ms: u64, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(Duration::from_millis(tick_interval_ms.max(1)));
            // The first tick completes immediately.
            ticks.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(task) => runnable.run(task).await,
                            None => break,
                        }
                    }
                    _ = ticks.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        rx.close();
                        while let Some(task) = rx.recv().await {
                            runnable.run(task).await;
                        }
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Mutex::new(Some(tx)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queues `task`, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        let tx = self.tx.lock().clone();
        match tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Queues `task` without waiting.
    ///
    /// # Errors
    ///
    /// [`WorkRejected::QueueFull`] when the channel is at capacity,
    /// [`WorkRejected::Stopped`] once the worker was stopped.
    pub fn try_submit(&self, task: R::Task) -> Result<(), WorkRejected> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(WorkRejected::Stopped)?;
        tx.try_send(task).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => WorkRejected::QueueFull,
            mpsc::error::TrySendError::Closed(_) => WorkRejected::Stopped,
        })
    }

    /// Stops accepting tasks, runs the ones already queued, and waits for the
    /// loop to finish. Later calls return immediately.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
        self.tx.lock().take();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
