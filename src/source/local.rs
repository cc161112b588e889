//! Host CPU, memory, disk and network gauges.
//!
//! # Sampling window
//!
//! Per-core CPU utilization is the change between two `/proc/stat` readings,
//! so every [`collect`](Source::collect) waits [`LocalStatsSource::SAMPLE_WINDOW`]
//! (500 ms unless overridden) between the two reads. That wait is part of the
//! source: the cycle running it takes at least that long.

use super::{Collection, Source};
use crate::error::SourceError;
use crate::metrics::{cpu, disk, CpuCollector, MemoryCollector, NetworkCollector, ProcFs};
use crate::sample::{now_millis, RawSample, SourceKind};
use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

pub struct LocalStatsSource {
    cpu: CpuCollector,
    memory: MemoryCollector,
    network: NetworkCollector,
    root_fs: PathBuf,
    sample_window: Duration,
}

impl LocalStatsSource {
    /// Default wait between the two CPU readings
    pub const SAMPLE_WINDOW: Duration = Duration::from_millis(500);

    /// Read the live `/proc` and report the root filesystem
    pub fn new() -> Self {
        Self::with_paths(ProcFs::default(), "/")
    }

    /// Read from another proc root and filesystem path (fixtures, containers)
    pub fn with_paths(proc: ProcFs, root_fs: impl Into<PathBuf>) -> Self {
        Self {
            cpu: CpuCollector::new(proc.clone()),
            memory: MemoryCollector::new(proc.clone()),
            network: NetworkCollector::new(proc),
            root_fs: root_fs.into(),
            sample_window: Self::SAMPLE_WINDOW,
        }
    }

    pub fn with_sample_window(mut self, window: Duration) -> Self {
        self.sample_window = window;
        self
    }

    /// How long each collection blocks for CPU sampling
    pub fn sample_window(&self) -> Duration {
        self.sample_window
    }

    async fn gather(&mut self) -> Result<Vec<RawSample>> {
        let before = self.cpu.snapshot()?;
        tokio::time::sleep(self.sample_window).await;
        let after = self.cpu.snapshot()?;

        let memory = self.memory.collect()?;
        let fs = disk::filesystem_usage(&self.root_fs)?;
        let network = self.network.collect()?;

        let ts = now_millis();
        let gauge = |name: &str, value: f64| RawSample::new(name, value, ts);

        let mut samples = vec![
            gauge("system_cpu_user", self.cpu.ticks_to_secs(after.total.user)),
            gauge("system_cpu_system", self.cpu.ticks_to_secs(after.total.system)),
        ];

        for core in cpu::core_utilization(&before, &after) {
            samples.push(
                gauge("system_cpu_percent", core.utilization_percent)
                    .with_label("cpu", core.core_id.to_string()),
            );
        }

        samples.extend([
            gauge("system_memory_total", memory.total as f64),
            gauge("system_memory_available", memory.available as f64),
            gauge("system_memory_used", memory.used as f64),
            gauge("system_memory_percent", memory.used_percent),
            gauge("system_disk_total", fs.total_bytes as f64),
            gauge("system_disk_used", fs.used_bytes as f64),
            gauge("system_disk_percent", fs.used_percent),
            gauge("system_network_bytes_recv", network.rx_bytes as f64),
            gauge("system_network_bytes_sent", network.tx_bytes as f64),
        ]);

        Ok(samples)
    }
}

impl Default for LocalStatsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Source for LocalStatsSource {
    fn kind(&self) -> SourceKind {
        SourceKind::System
    }

    fn name(&self) -> &str {
        "local"
    }

    async fn collect(&mut self) -> Collection {
        match self.gather().await {
            Ok(samples) => Collection::ok(samples),
            Err(e) => Collection::failed(SourceError::Host(e)),
        }
    }
}
