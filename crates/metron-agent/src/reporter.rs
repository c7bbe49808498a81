use crate::collector::MetricsCollector;
use crate::sender::MetricsSender;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Hands the collector's snapshot to the sender once per report interval.
///
/// The reported polls are deducted from the counter only after a send
/// succeeds, so a failed cycle's count rolls into the next one.
pub struct MetricsReporter {
    collector: Arc<MetricsCollector>,
    sender: Arc<dyn MetricsSender>,
    report_interval: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl MetricsReporter {
    pub fn new(
        collector: Arc<MetricsCollector>,
        sender: Arc<dyn MetricsSender>,
        report_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            collector,
            sender,
            report_interval,
            cancel,
            tracker: TaskTracker::new(),
        }
    }

    pub fn start(self: &Arc<Self>) {
        let reporter = self.clone();
        self.tracker.spawn(async move {
            let mut tick = interval_at(
                Instant::now() + reporter.report_interval,
                reporter.report_interval,
            );
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(interval = ?reporter.report_interval, "Starting report loop");

            loop {
                tokio::select! {
                    biased;
                    _ = reporter.cancel.cancelled() => break,
                    _ = tick.tick() => reporter.report_once().await,
                }
            }

            tracing::info!("Report loop stopped");
        });
    }

    /// Stops the loop, waits for it, then drains the sender.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.sender.stop().await;
    }

    pub async fn report_once(&self) {
        let (snapshot, poll_count) = self.collector.get_metrics().await;

        match self.sender.send(snapshot, poll_count).await {
            Ok(()) => {
                self.collector.consume_count(poll_count).await;
                tracing::debug!(poll_count, "Metrics handed to sender");
            }
            Err(e) => {
                tracing::error!(poll_count, error = %e, "Failed to send metrics, keeping poll count");
            }
        }
    }
}
