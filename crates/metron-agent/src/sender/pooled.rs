use super::{poll_delta, MetricsSender, MetricsService};
use crate::worker_pool::{PoolStats, WorkerPool};
use async_trait::async_trait;
use metron_common::types::MetricSnapshot;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Queues deliveries on a bounded [`WorkerPool`].
///
/// A send that finds the queue full is dropped; the pool counts it and the
/// caller still gets `Ok`.
pub struct PooledSender {
    service: Arc<MetricsService>,
    pool: WorkerPool,
    cancel: CancellationToken,
}

impl PooledSender {
    /// Creates the pool and starts its workers.
    pub fn new(
        service: Arc<MetricsService>,
        workers: usize,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let pool = WorkerPool::new(workers, queue_capacity);
        pool.start();
        Self {
            service,
            pool,
            cancel,
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

#[async_trait]
impl MetricsSender for PooledSender {
    async fn send(&self, snapshot: MetricSnapshot, poll_count: u64) -> anyhow::Result<()> {
        let service = self.service.clone();
        let cancel = self.cancel.clone();
        let metrics = snapshot.to_map();
        let delta = poll_delta(poll_count);

        let submitted = self.pool.submit(async move {
            service
                .deliver(&cancel, &metrics, delta)
                .await
                .map_err(anyhow::Error::from)
        });
        if !submitted {
            tracing::debug!(delta, "Delivery task dropped");
        }
        Ok(())
    }

    async fn stop(&self) {
        self.pool.stop().await;
    }
}
