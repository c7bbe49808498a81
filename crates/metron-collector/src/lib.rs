//! Metric providers for the metron agent.
//!
//! Each [`MetricsProvider`] samples one category of measurements (process
//! runtime, host OS) and returns a partial [`MetricSnapshot`]. The agent's
//! collector polls every registered provider on each tick and merges the
//! partial results.

pub mod host;
pub mod runtime;

use anyhow::Result;
use async_trait::async_trait;
use metron_common::types::MetricSnapshot;
use tokio_util::sync::CancellationToken;

pub use host::HostProvider;
pub use runtime::RuntimeProvider;

/// A source of partial metric snapshots.
///
/// Implementations are registered with the agent's collector and called once
/// per poll interval. Fields a provider does not measure stay zero so the
/// merge leaves them alone.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Returns the provider name (e.g., `"runtime"`, `"host"`), used for
    /// logging.
    fn name(&self) -> &str;

    /// Samples current values.
    ///
    /// # Errors
    ///
    /// Returns an error if `cancel` is already cancelled or the underlying
    /// system API call fails.
    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricSnapshot>;
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        anyhow::bail!("collection cancelled");
    }
    Ok(())
}
