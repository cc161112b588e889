//! Memory totals from /proc/meminfo.

use super::ProcFs;
use anyhow::{bail, Result};

/// Memory metrics, bytes
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryMetrics {
    /// Total system RAM
    pub total: u64,
    /// Memory available for new allocations without swapping
    pub available: u64,
    /// Used memory (excluding buffers/cache)
    pub used: u64,
    /// (total - available) / total
    pub used_percent: f64,
}

pub struct MemoryCollector {
    proc: ProcFs,
}

impl MemoryCollector {
    pub fn new(proc: ProcFs) -> Self {
        Self { proc }
    }

    pub fn collect(&self) -> Result<MemoryMetrics> {
        parse_meminfo(&self.proc.read("meminfo")?)
    }
}

pub fn parse_meminfo(meminfo: &str) -> Result<MemoryMetrics> {
    let mut total: Option<u64> = None;
    let mut free: u64 = 0;
    let mut available: Option<u64> = None;
    let mut buffers: u64 = 0;
    let mut cached: u64 = 0;

    for line in meminfo.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let value: u64 = parts[1].parse().unwrap_or(0) * 1024; // Convert from KB to bytes

        match parts[0] {
            "MemTotal:" => total = Some(value),
            "MemFree:" => free = value,
            "MemAvailable:" => available = Some(value),
            "Buffers:" => buffers = value,
            "Cached:" => cached = value,
            _ => {}
        }
    }

    let Some(total) = total else {
        bail!("/proc/meminfo has no MemTotal");
    };
    // Kernels before 3.14 lack MemAvailable
    let available = available.unwrap_or(free + buffers + cached);
    let used = total.saturating_sub(free + buffers + cached);

    let used_percent = if total > 0 {
        100.0 * total.saturating_sub(available) as f64 / total as f64
    } else {
        0.0
    };

    Ok(MemoryMetrics { total, available, used, used_percent })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEMINFO: &str = "\
MemTotal:        1000000 kB
MemFree:          200000 kB
MemAvailable:     600000 kB
Buffers:           50000 kB
Cached:           250000 kB
SwapCached:            0 kB
";

    #[test]
    fn derives_used_and_percent() {
        let mem = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(mem.total, 1_024_000_000);
        assert_eq!(mem.available, 614_400_000);
        assert_eq!(mem.used, 512_000_000);
        assert!((mem.used_percent - 40.0).abs() < 1e-9);
    }

    #[test]
    fn falls_back_when_mem_available_missing() {
        let text = "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 100 kB\nCached: 300 kB\n";
        let mem = parse_meminfo(text).unwrap();
        assert_eq!(mem.available, 500 * 1024);
        assert!((mem.used_percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn missing_total_is_an_error() {
        assert!(parse_meminfo("MemFree: 1 kB\n").is_err());
    }
}
