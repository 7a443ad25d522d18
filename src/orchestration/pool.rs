//! Worker Pool
//!
//! Runs engine transitions on tokio's blocking threads, with a semaphore
//! bounding how many run at once. Timers schedule work back onto the
//! same pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::error::{EngineError, Result};

#[derive(Clone)]
pub struct WorkerPool {
    handle: Handle,
    permits: Arc<Semaphore>,
    closed: Arc<AtomicBool>,
    size: usize,
}

impl WorkerPool {
    pub fn new(handle: Handle, size: usize) -> Self {
        let size = size.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(size)),
            closed: Arc::new(AtomicBool::new(false)),
            size,
        }
    }

    /// Queues a job. Fails only once the pool has been shut down.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            return Err(EngineError::PoolClosed);
        }

        let permits = Arc::clone(&self.permits);
        self.handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if let Err(e) = tokio::task::spawn_blocking(job).await {
                error!("Worker job panicked: {}", e);
            }
        });
        Ok(())
    }

    /// Queues a job after `delay`. The returned handle can abort the wait.
    pub fn schedule_after<F>(&self, delay: Duration, job: F) -> Result<JoinHandle<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            return Err(EngineError::PoolClosed);
        }

        let pool = self.clone();
        Ok(self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = pool.submit(job) {
                warn!("Dropping delayed job: {}", e);
            }
        }))
    }

    /// Stops accepting work; queued jobs still run.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use tokio::sync::mpsc;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_runs_job() {
        let pool = WorkerPool::new(Handle::current(), 2);
        let (tx, mut rx) = mpsc::unbounded_channel();

        pool.submit(move || {
            let _ = tx.send(42);
        })
        .unwrap();

        assert_eq!(rx.recv().await, Some(42));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(Handle::current(), 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let tx = tx.clone();
            pool.submit(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                let _ = tx.send(());
            })
            .unwrap();
        }

        for _ in 0..6 {
            rx.recv().await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let pool = WorkerPool::new(Handle::current(), 1);
        pool.shutdown();
        assert!(matches!(pool.submit(|| {}), Err(EngineError::PoolClosed)));
        assert!(pool
            .schedule_after(Duration::from_millis(1), || {})
            .is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_schedule_after_delays() {
        let pool = WorkerPool::new(Handle::current(), 1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = std::time::Instant::now();

        pool.schedule_after(Duration::from_millis(30), move || {
            let _ = tx.send(());
        })
        .unwrap();

        rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
