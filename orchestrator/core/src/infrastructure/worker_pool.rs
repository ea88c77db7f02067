// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Worker Pool
//!
//! Explicitly constructed executor handed to every component that runs
//! background work: state machine consumers, pollers, the reconciliation
//! checker and task watchers. There is no process-wide executor; the daemon
//! builds one runtime and one pool, and tests build their own.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Task spawning, cooperative cancellation, bounded shutdown

use std::future::Future;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Pool bound to the runtime of the calling task.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Spawn a tracked task. Long-running loops should also select on
    /// [`WorkerPool::shutdown_token`].
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn_on(future, &self.handle)
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn active_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel every task and wait up to `grace` for them to finish.
    /// Returns `false` when tasks were still running at the deadline.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!(active_tasks = self.tracker.len(), "Shutting down worker pool");
        self.shutdown.cancel();
        self.tracker.close();

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                info!("Worker pool drained");
                true
            }
            Err(_) => {
                warn!(
                    remaining = self.tracker.len(),
                    grace_secs = grace.as_secs(),
                    "Worker pool did not drain before the shutdown grace period"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_shutdown_cancels_cooperative_tasks() {
        let pool = WorkerPool::current();
        let stopped = Arc::new(AtomicBool::new(false));

        let token = pool.shutdown_token();
        let flag = stopped.clone();
        pool.spawn(async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert!(stopped.load(Ordering::SeqCst));
        assert!(pool.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_reports_stuck_tasks() {
        let pool = WorkerPool::current();
        pool.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        assert!(!pool.shutdown(Duration::from_millis(50)).await);
    }
}
