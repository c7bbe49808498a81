use crate::{ensure_not_cancelled, MetricsProvider};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use metron_common::types::MetricSnapshot;
use rand::Rng;
use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio_util::sync::CancellationToken;

/// Samples the agent's own process: memory, CPU, I/O and uptime, plus a
/// random jitter value.
pub struct RuntimeProvider {
    system: Mutex<System>,
    pid: Pid,
}

impl RuntimeProvider {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("Failed to get current pid: {e}"))?;
        let mut system = System::new();
        refresh(&mut system, pid);
        Ok(Self {
            system: Mutex::new(system),
            pid,
        })
    }
}

fn refresh(system: &mut System, pid: Pid) {
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::new()
            .with_cpu()
            .with_memory()
            .with_disk_usage(),
    );
}

#[async_trait]
impl MetricsProvider for RuntimeProvider {
    fn name(&self) -> &str {
        "runtime"
    }

    async fn collect(&self, cancel: &CancellationToken) -> Result<MetricSnapshot> {
        ensure_not_cancelled(cancel)?;

        let mut system = self
            .system
            .lock()
            .map_err(|_| anyhow!("runtime provider state poisoned"))?;
        refresh(&mut system, self.pid);

        let process = system
            .process(self.pid)
            .ok_or_else(|| anyhow!("process {} not found", self.pid))?;
        let disk = process.disk_usage();
        let threads = process.tasks().map(|t| t.len()).unwrap_or(0);

        Ok(MetricSnapshot {
            alloc: process.memory() as f64,
            sys: process.virtual_memory() as f64,
            total_alloc: disk.total_written_bytes as f64,
            heap_objects: threads as f64,
            process_cpu: process.cpu_usage() as f64,
            uptime: process.run_time() as f64,
            random_value: rand::thread_rng().gen::<f64>(),
            ..Default::default()
        })
    }
}
