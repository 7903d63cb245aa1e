//! Bounded worker pool shared by every pipeline stage.
//!
//! Collaborator work is synchronous and may be CPU heavy, so it runs on
//! tokio's blocking pool. A semaphore with one permit per worker bounds how
//! much of it runs at once. Coordination (barrier waits, fan-out) happens in
//! plain async tasks that never hold a permit, so a stage waiting on its
//! predecessor cannot starve the workers it is about to need.

use crate::errors::TaskError;
use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Handle, Runtime};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Upper bound on pool size. Larger requests are clamped.
pub const MAX_WORKERS: usize = 1024;

/// Clamp a requested worker count into `1..=MAX_WORKERS`.
pub fn clamp_workers(requested: usize) -> usize {
    let workers = requested.clamp(1, MAX_WORKERS);
    if workers != requested {
        tracing::warn!(requested, workers, "Worker count out of range, clamping");
    }
    workers
}

/// Fixed-size pool of workers backed by a tokio runtime.
pub struct WorkerPool {
    handle: PoolHandle,
    /// Present when the pool owns its runtime.
    runtime: Option<Runtime>,
}

/// Cheap, cloneable handle used by tasks to submit further work.
#[derive(Clone)]
pub struct PoolHandle {
    runtime: Handle,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl WorkerPool {
    /// Create a pool that owns a dedicated multi-thread runtime.
    pub fn new(workers: usize) -> Result<Self> {
        let workers = clamp_workers(workers);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers.min(4))
            .max_blocking_threads(workers)
            .thread_name("unitforge-worker")
            .enable_all()
            .build()
            .context("Failed to create worker pool runtime")?;

        tracing::debug!(workers, "Created worker pool");

        Ok(Self {
            handle: PoolHandle::new(runtime.handle().clone(), workers),
            runtime: Some(runtime),
        })
    }

    /// Attach a pool to an existing runtime instead of owning one.
    pub fn from_handle(runtime: Handle, workers: usize) -> Self {
        Self {
            handle: PoolHandle::new(runtime, clamp_workers(workers)),
            runtime: None,
        }
    }

    pub fn handle(&self) -> &PoolHandle {
        &self.handle
    }

    pub fn workers(&self) -> usize {
        self.handle.workers
    }

    /// Whether this pool owns (and will shut down) its runtime.
    pub fn owns_runtime(&self) -> bool {
        self.runtime.is_some()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Dropping a runtime from inside async code panics; detach instead.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl PoolHandle {
    fn new(runtime: Handle, workers: usize) -> Self {
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Permits not currently held by running work.
    #[cfg(test)]
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Spawn a coordination task. It does not count against the worker bound.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Run synchronous work on a worker once one is free.
    ///
    /// Failures and panics of `work` come back as `TaskError` instead of
    /// propagating into the caller.
    pub async fn run<T, F>(&self, work: F) -> Result<T, TaskError>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TaskError::PoolClosed)?;

        match self.runtime.spawn_blocking(work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(TaskError::Failed(err)),
            Err(join_err) if join_err.is_panic() => {
                Err(TaskError::Panicked(panic_message(join_err.into_panic())))
            }
            Err(_) => Err(TaskError::Cancelled),
        }
    }

    /// Spawn `work` as its own task and return a handle to its outcome.
    #[cfg(test)]
    pub fn submit<T, F>(&self, work: F) -> JoinHandle<Result<T, TaskError>>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.clone();
        self.runtime.spawn(async move { pool.run(work).await })
    }

    /// Stop handing out permits. Work already running is unaffected.
    #[cfg(test)]
    pub fn close(&self) {
        self.permits.close();
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_pool_clamps_zero_workers() {
        let pool = WorkerPool::new(0).unwrap();
        assert_eq!(pool.workers(), 1);
        assert!(pool.owns_runtime());
    }

    #[test]
    fn test_submit_returns_value() {
        let pool = WorkerPool::new(2).unwrap();
        let handle = pool.handle().submit(|| Ok(21 * 2));
        let value = futures::executor::block_on(handle).unwrap().unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_failure_is_captured() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool
            .handle()
            .submit(|| -> anyhow::Result<()> { anyhow::bail!("collaborator failed") });
        let err = futures::executor::block_on(handle).unwrap().unwrap_err();
        assert!(matches!(err, TaskError::Failed(_)));
        assert!(err.to_string().contains("collaborator failed"));
    }

    #[test]
    fn test_panic_is_captured() {
        let pool = WorkerPool::new(1).unwrap();
        let handle = pool
            .handle()
            .submit(|| -> anyhow::Result<()> { panic!("parser exploded") });
        let err = futures::executor::block_on(handle).unwrap().unwrap_err();
        match err {
            TaskError::Panicked(msg) => assert!(msg.contains("parser exploded")),
            other => panic!("expected panic, got {other:?}"),
        }
    }

    #[test]
    fn test_concurrency_is_bounded_by_workers() {
        let pool = WorkerPool::new(2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.handle().submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for result in futures::executor::block_on(futures::future::join_all(handles)) {
            result.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.handle().available_workers(), 2);
    }

    #[test]
    fn test_closed_pool_rejects_work() {
        let pool = WorkerPool::new(1).unwrap();
        pool.handle().close();
        let handle = pool.handle().submit(|| Ok(()));
        let err = futures::executor::block_on(handle).unwrap().unwrap_err();
        assert!(matches!(err, TaskError::PoolClosed));
    }

    #[tokio::test]
    async fn test_pool_on_existing_runtime() {
        let pool = WorkerPool::from_handle(Handle::current(), 3);
        assert!(!pool.owns_runtime());
        let value = pool.handle().submit(|| Ok("done")).await.unwrap().unwrap();
        assert_eq!(value, "done");
    }

    #[test]
    fn test_oversized_worker_count_is_clamped() {
        let pool = WorkerPool::new(usize::MAX).unwrap();
        assert_eq!(pool.workers(), MAX_WORKERS);
        let value = futures::executor::block_on(pool.handle().submit(|| Ok(7)))
            .unwrap()
            .unwrap();
        assert_eq!(value, 7);

        assert_eq!(clamp_workers(0), 1);
        assert_eq!(clamp_workers(MAX_WORKERS + 1), MAX_WORKERS);
        assert_eq!(clamp_workers(8), 8);
    }

    #[tokio::test]
    async fn test_dropping_owned_pool_inside_async_context() {
        let pool = WorkerPool::new(1).unwrap();
        drop(pool);
    }
}
