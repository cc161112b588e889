//! CPU times and utilization from /proc/stat.

use super::ProcFs;
use anyhow::{bail, Result};
use std::collections::BTreeMap;

/// Raw CPU time values from /proc/stat, in clock ticks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

/// One reading of /proc/stat
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuSnapshot {
    /// Aggregate `cpu` line
    pub total: CpuTimes,
    /// Per logical core, keyed by core index
    pub cores: BTreeMap<usize, CpuTimes>,
}

/// Utilization of one logical core between two snapshots
#[derive(Debug, Clone, PartialEq)]
pub struct CoreUtilization {
    pub core_id: usize,
    pub utilization_percent: f64,
}

pub struct CpuCollector {
    proc: ProcFs,
    ticks_per_sec: f64,
}

impl CpuCollector {
    pub fn new(proc: ProcFs) -> Self {
        Self { proc, ticks_per_sec: clock_ticks() }
    }

    pub fn snapshot(&self) -> Result<CpuSnapshot> {
        parse_stat(&self.proc.read("stat")?)
    }

    /// Convert ticks to seconds using the kernel's USER_HZ
    pub fn ticks_to_secs(&self, ticks: u64) -> f64 {
        ticks as f64 / self.ticks_per_sec
    }
}

/// Parse the cpu lines of /proc/stat
pub fn parse_stat(content: &str) -> Result<CpuSnapshot> {
    let mut snapshot = CpuSnapshot::default();
    let mut seen_total = false;

    for line in content.lines() {
        if line.starts_with("cpu ") {
            snapshot.total = parse_cpu_line(line);
            seen_total = true;
        } else if let Some(rest) = line.strip_prefix("cpu") {
            // Per-core line like "cpu0", "cpu1", etc.
            let core_id = rest.split_whitespace().next().and_then(|s| s.parse().ok());
            if let Some(core_id) = core_id {
                snapshot.cores.insert(core_id, parse_cpu_line(line));
            }
        }
    }

    if !seen_total {
        bail!("/proc/stat has no aggregate cpu line");
    }
    Ok(snapshot)
}

fn parse_cpu_line(line: &str) -> CpuTimes {
    let parts: Vec<u64> = line
        .split_whitespace()
        .skip(1) // Skip "cpu" or "cpuN"
        .filter_map(|s| s.parse().ok())
        .collect();
    let field = |i: usize| parts.get(i).copied().unwrap_or(0);

    CpuTimes {
        user: field(0),
        nice: field(1),
        system: field(2),
        idle: field(3),
        iowait: field(4),
        irq: field(5),
        softirq: field(6),
        steal: field(7),
    }
}

/// Busy percentage between two readings of the same CPU
pub fn utilization(prev: &CpuTimes, curr: &CpuTimes) -> f64 {
    let total_delta = curr.total().saturating_sub(prev.total());
    if total_delta == 0 {
        return 0.0;
    }
    let idle_delta = curr.idle_total().saturating_sub(prev.idle_total());
    let busy = 100.0 * (1.0 - (idle_delta as f64 / total_delta as f64));
    busy.clamp(0.0, 100.0)
}

/// Per-core utilization between two snapshots, ordered by core index.
///
/// Cores present in only one snapshot (hotplug) are skipped.
pub fn core_utilization(before: &CpuSnapshot, after: &CpuSnapshot) -> Vec<CoreUtilization> {
    after
        .cores
        .iter()
        .filter_map(|(core_id, curr)| {
            before.cores.get(core_id).map(|prev| CoreUtilization {
                core_id: *core_id,
                utilization_percent: utilization(prev, curr),
            })
        })
        .collect()
}

fn clock_ticks() -> f64 {
    let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if ticks > 0 {
        ticks as f64
    } else {
        100.0
    }
}
