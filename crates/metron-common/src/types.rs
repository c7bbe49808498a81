use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of the counter entry that carries the poll-count delta.
pub const POLL_COUNT_ID: &str = "PollCount";

/// A point-in-time aggregate of process and host measurements.
///
/// Every scalar field uses `0.0` to mean "not populated", so a default
/// snapshot doubles as the merge base case. See [`MetricSnapshot::merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSnapshot {
    // Process runtime
    pub alloc: f64,
    pub sys: f64,
    pub total_alloc: f64,
    pub heap_objects: f64,
    pub process_cpu: f64,
    pub uptime: f64,
    pub random_value: f64,

    // Host
    pub total_memory: f64,
    pub free_memory: f64,
    pub used_memory: f64,
    pub load_one: f64,
    pub load_five: f64,
    pub load_fifteen: f64,
    /// Per-core utilization in percent, core 0 first.
    pub cpu_utilization: Vec<f64>,
}

impl MetricSnapshot {
    fn scalars(&self) -> [(&'static str, f64); 13] {
        [
            ("Alloc", self.alloc),
            ("Sys", self.sys),
            ("TotalAlloc", self.total_alloc),
            ("HeapObjects", self.heap_objects),
            ("ProcessCPU", self.process_cpu),
            ("Uptime", self.uptime),
            ("RandomValue", self.random_value),
            ("TotalMemory", self.total_memory),
            ("FreeMemory", self.free_memory),
            ("UsedMemory", self.used_memory),
            ("LoadAverage1", self.load_one),
            ("LoadAverage5", self.load_five),
            ("LoadAverage15", self.load_fifteen),
        ]
    }

    /// Returns `true` when nothing has been recorded yet.
    ///
    /// # Examples
    ///
    /// ```
    /// use metron_common::types::MetricSnapshot;
    ///
    /// assert!(MetricSnapshot::default().is_zero());
    /// let s = MetricSnapshot { sys: 1.0, ..Default::default() };
    /// assert!(!s.is_zero());
    /// ```
    pub fn is_zero(&self) -> bool {
        self.scalars().iter().all(|(_, v)| *v == 0.0) && self.cpu_utilization.is_empty()
    }

    /// Merges a partial snapshot into `self` using last-non-zero-wins.
    ///
    /// A zero field in `partial` never overwrites a recorded value, and the
    /// per-core vector is replaced only when `partial` carries one. A zero
    /// `self` takes `partial` wholesale.
    ///
    /// # Examples
    ///
    /// ```
    /// use metron_common::types::MetricSnapshot;
    ///
    /// let mut s = MetricSnapshot { alloc: 100.0, ..Default::default() };
    /// s.merge(&MetricSnapshot { sys: 50.0, ..Default::default() });
    /// assert_eq!(s.alloc, 100.0);
    /// assert_eq!(s.sys, 50.0);
    /// ```
    pub fn merge(&mut self, partial: &MetricSnapshot) {
        if self.is_zero() {
            *self = partial.clone();
            return;
        }

        fn keep(dst: &mut f64, src: f64) {
            if src != 0.0 {
                *dst = src;
            }
        }

        keep(&mut self.alloc, partial.alloc);
        keep(&mut self.sys, partial.sys);
        keep(&mut self.total_alloc, partial.total_alloc);
        keep(&mut self.heap_objects, partial.heap_objects);
        keep(&mut self.process_cpu, partial.process_cpu);
        keep(&mut self.uptime, partial.uptime);
        keep(&mut self.random_value, partial.random_value);
        keep(&mut self.total_memory, partial.total_memory);
        keep(&mut self.free_memory, partial.free_memory);
        keep(&mut self.used_memory, partial.used_memory);
        keep(&mut self.load_one, partial.load_one);
        keep(&mut self.load_five, partial.load_five);
        keep(&mut self.load_fifteen, partial.load_fifteen);

        if !partial.cpu_utilization.is_empty() {
            self.cpu_utilization = partial.cpu_utilization.clone();
        }
    }

    /// Flattens the snapshot into wire names, ordered by name.
    ///
    /// Per-core utilization is emitted as `CPUutilization1..N`.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        let mut map: BTreeMap<String, f64> = self
            .scalars()
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect();
        for (i, value) in self.cpu_utilization.iter().enumerate() {
            map.insert(format!("CPUutilization{}", i + 1), *value);
        }
        map
    }
}

impl std::fmt::Display for MetricSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MetricSnapshot{{alloc: {:.2}, sys: {:.2}, total_memory: {:.2}, cores: {}}}",
            self.alloc,
            self.sys,
            self.total_memory,
            self.cpu_utilization.len()
        )
    }
}

/// Metric type tag on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// One entry of a delivery batch.
///
/// Exactly one of `value` (gauges) or `delta` (counters) is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
}

impl Metric {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            value: Some(value),
            delta: None,
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            value: None,
            delta: Some(delta),
        }
    }
}

/// Hybrid-encryption envelope: AES-GCM ciphertext plus the RSA-wrapped key,
/// both base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub data: String,
    pub key: String,
}
