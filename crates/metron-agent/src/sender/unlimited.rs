use super::{poll_delta, MetricsSender, MetricsService};
use async_trait::async_trait;
use metron_common::types::MetricSnapshot;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Spawns one delivery task per send.
///
/// `send` succeeds once the task is scheduled; delivery failures are only
/// logged.
pub struct UnlimitedSender {
    service: Arc<MetricsService>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl UnlimitedSender {
    pub fn new(service: Arc<MetricsService>, cancel: CancellationToken) -> Self {
        Self {
            service,
            cancel,
            tracker: TaskTracker::new(),
        }
    }
}

#[async_trait]
impl MetricsSender for UnlimitedSender {
    async fn send(&self, snapshot: MetricSnapshot, poll_count: u64) -> anyhow::Result<()> {
        if self.tracker.is_closed() {
            anyhow::bail!("sender is stopped");
        }

        let service = self.service.clone();
        let cancel = self.cancel.clone();
        let metrics = snapshot.to_map();
        let delta = poll_delta(poll_count);

        self.tracker.spawn(async move {
            if let Err(e) = service.deliver(&cancel, &metrics, delta).await {
                tracing::error!(error = %e, delta, "Failed to send metrics");
            }
        });
        Ok(())
    }

    async fn stop(&self) {
        self.tracker.close();
        if !self.tracker.is_empty() {
            tracing::info!(pending = self.tracker.len(), "Waiting for in-flight deliveries");
        }
        self.tracker.wait().await;
    }
}
