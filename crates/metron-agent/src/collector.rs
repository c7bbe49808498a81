//! Periodic polling of the registered providers into one shared snapshot.

use metron_collector::MetricsProvider;
use metron_common::types::MetricSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Default)]
struct CollectorState {
    metrics: MetricSnapshot,
    poll_count: u64,
}

pub struct MetricsCollector {
    providers: Vec<Arc<dyn MetricsProvider>>,
    poll_interval: Duration,
    state: RwLock<CollectorState>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl MetricsCollector {
    pub fn new(
        providers: Vec<Arc<dyn MetricsProvider>>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            providers,
            poll_interval,
            state: RwLock::new(CollectorState::default()),
            cancel,
            tracker: TaskTracker::new(),
        }
    }

    /// Spawns the polling loop. The first poll happens one interval after
    /// the call.
    pub fn start(self: &Arc<Self>) {
        let collector = self.clone();
        self.tracker.spawn(async move {
            let mut tick = interval_at(
                Instant::now() + collector.poll_interval,
                collector.poll_interval,
            );
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                providers = collector.providers.len(),
                interval = ?collector.poll_interval,
                "Starting poll loop"
            );

            loop {
                tokio::select! {
                    biased;
                    _ = collector.cancel.cancelled() => break,
                    _ = tick.tick() => collector.poll_once().await,
                }
            }

            tracing::info!("Poll loop stopped");
        });
    }

    /// Stops the polling loop and waits for it to exit. Safe to call more
    /// than once, or without `start`.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Runs one poll cycle: sample every provider in registration order,
    /// merge the successful partials and count the tick.
    pub async fn poll_once(&self) {
        let mut partials = Vec::with_capacity(self.providers.len());
        for provider in &self.providers {
            match provider.collect(&self.cancel).await {
                Ok(partial) => partials.push(partial),
                Err(e) => tracing::error!(
                    provider = provider.name(),
                    error = %e,
                    "Failed to collect metrics"
                ),
            }
        }

        let mut state = self.state.write().await;
        for partial in &partials {
            state.metrics.merge(partial);
        }
        state.poll_count += 1;

        tracing::debug!(
            poll_count = state.poll_count,
            providers_ok = partials.len(),
            metrics = %state.metrics,
            "Poll completed"
        );
    }

    /// Returns a copy of the current snapshot and the number of polls not
    /// yet reported.
    pub async fn get_metrics(&self) -> (MetricSnapshot, u64) {
        let state = self.state.read().await;
        (state.metrics.clone(), state.poll_count)
    }

    pub async fn reset_count(&self) {
        self.state.write().await.poll_count = 0;
    }

    /// Subtracts `reported` from the counter, keeping polls that completed
    /// after it was read.
    pub async fn consume_count(&self, reported: u64) {
        let mut state = self.state.write().await;
        state.poll_count = state.poll_count.saturating_sub(reported);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    struct FixedProvider {
        name: &'static str,
        snapshot: MetricSnapshot,
    }

    #[async_trait]
    impl MetricsProvider for FixedProvider {
        fn name(&self) -> &str {
            self.name
        }

        async fn collect(&self, _cancel: &CancellationToken) -> Result<MetricSnapshot> {
            Ok(self.snapshot.clone())
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl MetricsProvider for BrokenProvider {
        fn name(&self) -> &str {
            "broken"
        }

        async fn collect(&self, _cancel: &CancellationToken) -> Result<MetricSnapshot> {
            anyhow::bail!("sensor unavailable")
        }
    }

    fn fixed(name: &'static str, snapshot: MetricSnapshot) -> Arc<dyn MetricsProvider> {
        Arc::new(FixedProvider { name, snapshot })
    }

    #[tokio::test]
    async fn poll_merges_partials_and_counts_once() {
        let collector = MetricsCollector::new(
            vec![
                fixed(
                    "runtime",
                    MetricSnapshot {
                        alloc: 100.0,
                        ..Default::default()
                    },
                ),
                Arc::new(BrokenProvider),
                fixed(
                    "host",
                    MetricSnapshot {
                        alloc: 0.0,
                        sys: 50.0,
                        ..Default::default()
                    },
                ),
            ],
            Duration::from_secs(1),
            CancellationToken::new(),
        );

        collector.poll_once().await;

        let (metrics, count) = collector.get_metrics().await;
        assert_eq!(metrics.alloc, 100.0);
        assert_eq!(metrics.sys, 50.0);
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn all_providers_failing_still_counts_the_tick() {
        let collector = MetricsCollector::new(
            vec![Arc::new(BrokenProvider)],
            Duration::from_secs(1),
            CancellationToken::new(),
        );

        collector.poll_once().await;
        collector.poll_once().await;

        let (metrics, count) = collector.get_metrics().await;
        assert!(metrics.is_zero());
        assert_eq!(count, 2);

        collector.reset_count().await;
        assert_eq!(collector.get_metrics().await.1, 0);

        collector.poll_once().await;
        collector.consume_count(5).await;
        assert_eq!(collector.get_metrics().await.1, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_polls_on_every_tick_until_stopped() {
        let collector = Arc::new(MetricsCollector::new(
            vec![fixed(
                "runtime",
                MetricSnapshot {
                    alloc: 1.0,
                    ..Default::default()
                },
            )],
            Duration::from_millis(10),
            CancellationToken::new(),
        ));

        collector.start();
        tokio::time::sleep(Duration::from_millis(35)).await;
        collector.stop().await;
        collector.stop().await;

        let (_, count) = collector.get_metrics().await;
        assert_eq!(count, 3);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(collector.get_metrics().await.1, 3);
    }
}
