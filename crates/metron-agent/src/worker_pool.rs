//! Bounded task queue served by a fixed set of long-lived workers.
//!
//! `submit` never waits: when the queue is full the task is dropped and
//! counted. Stopping the pool abandons whatever is still queued.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// A unit of work executed by a pool worker.
pub type Task = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// Drops are logged on the first one and then once every this many.
const DROP_LOG_EVERY: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl PoolState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PoolState::Created,
            1 => PoolState::Running,
            2 => PoolState::Stopping,
            _ => PoolState::Stopped,
        }
    }
}

/// Point-in-time counters of a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub active_workers: usize,
    pub queue_len: usize,
    pub dropped: u64,
    pub processed: u64,
}

#[derive(Default)]
struct Counters {
    active: AtomicUsize,
    dropped: AtomicU64,
    processed: AtomicU64,
}

pub struct WorkerPool {
    workers: usize,
    tx: mpsc::Sender<Task>,
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    counters: Arc<Counters>,
    state: AtomicU8,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl WorkerPool {
    /// Creates a pool in the `Created` state. The capacity is clamped to
    /// `1..=Semaphore::MAX_PERMITS`.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.clamp(1, Semaphore::MAX_PERMITS));
        Self {
            workers,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            counters: Arc::new(Counters::default()),
            state: AtomicU8::new(PoolState::Created as u8),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Launches the workers. Only the first call has any effect.
    pub fn start(&self) {
        if self
            .state
            .compare_exchange(
                PoolState::Created as u8,
                PoolState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            tracing::warn!(state = ?self.state(), "Worker pool already started");
            return;
        }

        for id in 0..self.workers {
            self.tracker.spawn(worker(
                id,
                self.rx.clone(),
                self.counters.clone(),
                self.cancel.clone(),
            ));
        }

        tracing::info!(
            workers = self.workers,
            queue_size = self.tx.max_capacity(),
            "Worker pool started"
        );
    }

    /// Enqueues `task` without waiting. Returns `false` (and counts a drop)
    /// when the queue is full or the pool is shutting down.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if matches!(self.state(), PoolState::Stopping | PoolState::Stopped) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        match self.tx.try_send(Box::pin(task)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % DROP_LOG_EVERY == 1 {
                    let stats = self.stats();
                    tracing::warn!(
                        active_workers = stats.active_workers,
                        queue_length = stats.queue_len,
                        dropped_tasks = stats.dropped,
                        processed_tasks = stats.processed,
                        "Worker pool queue is full, dropping task"
                    );
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active_workers: self.counters.active.load(Ordering::Relaxed),
            queue_len: self.tx.max_capacity() - self.tx.capacity(),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
        }
    }

    /// Cancels the workers, closes the queue, waits for every worker to exit
    /// and discards tasks that never started. Idempotent.
    pub async fn stop(&self) {
        let previous = self.state.swap(PoolState::Stopping as u8, Ordering::AcqRel);
        if matches!(
            PoolState::from_u8(previous),
            PoolState::Stopping | PoolState::Stopped
        ) {
            self.state.store(previous, Ordering::Release);
            return;
        }

        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let mut abandoned = 0usize;
        {
            let mut rx = self.rx.lock().await;
            rx.close();
            while rx.try_recv().is_ok() {
                abandoned += 1;
            }
        }

        self.state.store(PoolState::Stopped as u8, Ordering::Release);
        tracing::info!(
            processed_tasks = self.counters.processed.load(Ordering::Relaxed),
            dropped_tasks = self.counters.dropped.load(Ordering::Relaxed),
            abandoned_tasks = abandoned,
            "Worker pool stopped"
        );
    }
}

async fn worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    tracing::debug!(worker_id = id, "Worker started");

    loop {
        let task = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                task = rx.recv() => task,
            }
        };
        let Some(task) = task else {
            tracing::debug!(worker_id = id, "Worker stopping");
            return;
        };

        counters.active.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let result = task.await;
        let duration = started.elapsed();
        counters.active.fetch_sub(1, Ordering::Relaxed);
        counters.processed.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(()) => tracing::debug!(worker_id = id, ?duration, "Task completed"),
            Err(e) => tracing::error!(worker_id = id, ?duration, error = %e, "Task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Notify;

    async fn wait_for(pool: &WorkerPool, check: impl Fn(PoolStats) -> bool) {
        for _ in 0..200 {
            if check(pool.stats()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached, stats: {:?}", pool.stats());
    }

    #[tokio::test]
    async fn full_queue_drops_excess_tasks() {
        const CAPACITY: usize = 4;
        const EXTRA: usize = 3;

        let pool = WorkerPool::new(1, CAPACITY);
        pool.start();

        let release = Arc::new(Notify::new());
        let gate = release.clone();
        assert!(pool.submit(async move {
            gate.notified().await;
            Ok(())
        }));
        wait_for(&pool, |s| s.active_workers == 1).await;

        let accepted = (0..CAPACITY + EXTRA)
            .filter(|_| pool.submit(async { Ok(()) }))
            .count();

        assert_eq!(accepted, CAPACITY);
        let stats = pool.stats();
        assert_eq!(stats.dropped, EXTRA as u64);
        assert_eq!(stats.queue_len, CAPACITY);

        release.notify_one();
        wait_for(&pool, |s| s.processed == (CAPACITY + 1) as u64).await;
        pool.stop().await;
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test]
    async fn failing_task_does_not_stop_worker() {
        let pool = WorkerPool::new(1, 8);
        pool.start();

        assert!(pool.submit(async { anyhow::bail!("boom") }));
        assert!(pool.submit(async { Ok(()) }));
        wait_for(&pool, |s| s.processed == 2).await;

        pool.stop().await;
    }

    #[tokio::test]
    async fn submit_after_stop_is_dropped() {
        let pool = WorkerPool::new(2, 2);
        pool.start();
        pool.stop().await;
        pool.stop().await;

        assert!(!pool.submit(async { Ok(()) }));
        assert_eq!(pool.stats().dropped, 1);
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[tokio::test]
    async fn stop_abandons_queued_tasks() {
        let pool = WorkerPool::new(1, 4);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = ran.clone();
            assert!(pool.submit(async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }));
        }
        assert_eq!(pool.stats().queue_len, 3);

        pool.stop().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats().processed, 0);
    }

    #[test]
    fn oversized_capacity_is_clamped() {
        let pool = WorkerPool::new(0, usize::MAX);
        assert_eq!(pool.stats().queue_len, 0);
        assert_eq!(pool.tx.max_capacity(), Semaphore::MAX_PERMITS);
    }

    #[tokio::test]
    async fn queued_tasks_run_once_started() {
        let pool = WorkerPool::new(2, 4);
        assert!(pool.submit(async { Ok(()) }));
        assert_eq!(pool.state(), PoolState::Created);

        pool.start();
        wait_for(&pool, |s| s.processed == 1).await;
        pool.stop().await;
    }
}
