use crate::{ensure_not_cancelled, MetricsProvider};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use metron_common::types::MetricSnapshot;
use std::sync::Mutex;
use sysinfo::System;
use tokio_util::sync::CancellationToken;

/// Samples host-wide memory, per-core CPU utilization and load average.
pub struct HostProvider {
    system: Mutex<System>,
}

impl HostProvider {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; prime the first one.
        system.refresh_cpu_all();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for HostProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsProvider for HostProvider {
    fn name(&self) -> &str {
        "host"
    }

    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricSnapshot> {
        ensure_not_cancelled(cancel)?;

        let mut system = self
            .system
            .lock()
            .map_err(|_| anyhow!("host provider state poisoned"))?;
        system.refresh_memory();
        system.refresh_cpu_all();

        let load = System::load_average();
        let cpu_utilization = system
            .cpus()
            .iter()
            .map(|cpu| cpu.cpu_usage() as f64)
            .collect();

        Ok(MetricSnapshot {
            total_memory: system.total_memory() as f64,
            free_memory: system.free_memory() as f64,
            used_memory: system.used_memory() as f64,
            load_one: load.one,
            load_five: load.five,
            load_fifteen: load.fifteen,
            cpu_utilization,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_host_memory_and_cores() {
        let provider = HostProvider::new();
        let snapshot = provider.collect(&CancellationToken::new()).await.unwrap();
        assert!(snapshot.total_memory > 0.0);
        assert!(!snapshot.cpu_utilization.is_empty());
        assert_eq!(snapshot.alloc, 0.0, "runtime fields stay untouched");
    }
}
