//! Delivery strategies for collected snapshots.
//!
//! [`MetricsService`] turns a snapshot into a wire batch and posts it. The
//! two [`MetricsSender`] implementations decide how deliveries are
//! scheduled: one task per send, or a bounded worker pool.

pub mod pooled;
pub mod unlimited;

use async_trait::async_trait;
use metron_common::types::{Metric, MetricSnapshot, POLL_COUNT_ID};
use metron_transport::{HttpClient, TransportError};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use pooled::PooledSender;
pub use unlimited::UnlimitedSender;

/// Collector endpoint that accepts metric batches.
pub const UPDATES_ENDPOINT: &str = "/updates/";

#[async_trait]
pub trait MetricsSender: Send + Sync {
    /// Hands a snapshot and the poll count accumulated since the last
    /// successful send to the delivery mechanism.
    async fn send(&self, snapshot: MetricSnapshot, poll_count: u64) -> anyhow::Result<()>;

    /// Waits until outstanding deliveries have finished or been abandoned.
    async fn stop(&self);
}

/// Builds and posts delivery batches.
pub struct MetricsService {
    client: Arc<dyn HttpClient>,
    excluded: HashSet<String>,
}

impl MetricsService {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            client,
            excluded: HashSet::new(),
        }
    }

    pub fn with_excluded<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(names.into_iter().map(Into::into));
        self
    }

    /// One gauge per non-excluded entry, then a `PollCount` counter when
    /// `delta` is non-zero.
    pub fn build_batch(&self, metrics: &BTreeMap<String, f64>, delta: i64) -> Vec<Metric> {
        let mut batch: Vec<Metric> = metrics
            .iter()
            .filter(|(name, _)| !self.excluded.contains(name.as_str()))
            .map(|(name, value)| Metric::gauge(name.as_str(), *value))
            .collect();
        if delta != 0 {
            batch.push(Metric::counter(POLL_COUNT_ID, delta));
        }
        batch
    }

    /// Posts the batch for `metrics`. An empty batch is not sent.
    pub async fn deliver(
        &self,
        cancel: &CancellationToken,
        metrics: &BTreeMap<String, f64>,
        delta: i64,
    ) -> Result<(), TransportError> {
        let batch = self.build_batch(metrics, delta);
        if batch.is_empty() {
            tracing::debug!("No metrics to send");
            return Ok(());
        }

        let body = serde_json::to_value(&batch)?;
        self.client.post(cancel, UPDATES_ENDPOINT, &body).await?;
        tracing::debug!(count = batch.len(), delta, "Metrics batch delivered");
        Ok(())
    }
}

/// Chooses the sender for `rate_limit`: a pool of `rate_limit` workers with
/// a queue of twice that size, or unbounded tasks when it is zero.
pub fn from_rate_limit(
    service: Arc<MetricsService>,
    rate_limit: usize,
    cancel: CancellationToken,
) -> Arc<dyn MetricsSender> {
    if rate_limit > 0 {
        tracing::info!(workers = rate_limit, "Using pooled sender");
        Arc::new(PooledSender::new(
            service,
            rate_limit,
            rate_limit.saturating_mul(2),
            cancel,
        ))
    } else {
        tracing::info!("Using unlimited sender");
        Arc::new(UnlimitedSender::new(service, cancel))
    }
}

fn poll_delta(poll_count: u64) -> i64 {
    i64::try_from(poll_count).unwrap_or(i64::MAX)
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingClient;
    use super::*;
    use metron_common::types::MetricKind;

    #[test]
    fn batch_has_gauges_then_poll_counter() {
        let service = MetricsService::new(Arc::new(RecordingClient::default()));
        let metrics = MetricSnapshot {
            alloc: 10.0,
            ..Default::default()
        }
        .to_map();

        let batch = service.build_batch(&metrics, 4);
        assert_eq!(batch.len(), metrics.len() + 1);
        assert!(batch[..metrics.len()]
            .iter()
            .all(|m| m.kind == MetricKind::Gauge && m.value.is_some()));
        let counter = batch.last().unwrap();
        assert_eq!(counter.id, POLL_COUNT_ID);
        assert_eq!(counter.delta, Some(4));
    }

    #[test]
    fn zero_delta_omits_counter() {
        let service = MetricsService::new(Arc::new(RecordingClient::default()));
        let metrics = BTreeMap::from([("Alloc".to_string(), 1.0)]);
        let batch = service.build_batch(&metrics, 0);
        assert_eq!(batch, vec![Metric::gauge("Alloc", 1.0)]);
    }

    #[test]
    fn excluded_names_are_skipped() {
        let service = MetricsService::new(Arc::new(RecordingClient::default()))
            .with_excluded(["RandomValue"]);
        let metrics = MetricSnapshot::default().to_map();
        assert!(metrics.contains_key("RandomValue"));

        let batch = service.build_batch(&metrics, 1);
        assert!(batch.iter().all(|m| m.id != "RandomValue"));
        let gauges = batch.iter().filter(|m| m.kind == MetricKind::Gauge).count();
        assert_eq!(gauges, metrics.len() - 1);
        assert_eq!(batch.len(), metrics.len());
    }

    #[tokio::test]
    async fn empty_batch_makes_no_request() {
        let client = Arc::new(RecordingClient::default());
        let service = MetricsService::new(client.clone());

        service
            .deliver(&CancellationToken::new(), &BTreeMap::new(), 0)
            .await
            .unwrap();

        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn deliver_posts_json_array() {
        let client = Arc::new(RecordingClient::default());
        let service = MetricsService::new(client.clone());
        let metrics = BTreeMap::from([("Sys".to_string(), 2.5)]);

        service
            .deliver(&CancellationToken::new(), &metrics, 3)
            .await
            .unwrap();

        let bodies = client.bodies.lock().unwrap();
        assert_eq!(
            bodies[0],
            serde_json::json!([
                {"id": "Sys", "type": "gauge", "value": 2.5},
                {"id": "PollCount", "type": "counter", "delta": 3}
            ])
        );
    }

    #[tokio::test]
    async fn delivery_error_is_returned() {
        let service = MetricsService::new(Arc::new(RecordingClient::failing()));
        let metrics = BTreeMap::from([("Sys".to_string(), 2.5)]);
        let err = service
            .deliver(&CancellationToken::new(), &metrics, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 500, .. }));
    }

    #[test]
    fn huge_poll_count_saturates() {
        assert_eq!(poll_delta(7), 7);
        assert_eq!(poll_delta(u64::MAX), i64::MAX);
    }
}
