//! Network byte counters from /proc/net/dev.

use super::ProcFs;
use anyhow::Result;

/// Counters summed over every non-loopback interface
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkTotals {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
}

pub struct NetworkCollector {
    proc: ProcFs,
}

impl NetworkCollector {
    pub fn new(proc: ProcFs) -> Self {
        Self { proc }
    }

    pub fn collect(&self) -> Result<NetworkTotals> {
        Ok(parse_net_dev(&self.proc.read("net/dev")?))
    }
}

pub fn parse_net_dev(netdev: &str) -> NetworkTotals {
    let mut totals = NetworkTotals::default();

    // Skip header lines
    for line in netdev.lines().skip(2) {
        // "eth0:1234 ..." has no space after the colon on busy interfaces
        let Some((interface, counters)) = line.split_once(':') else {
            continue;
        };
        if interface.trim() == "lo" {
            continue;
        }

        let parts: Vec<u64> = counters
            .split_whitespace()
            .map(|s| s.parse().unwrap_or(0))
            .collect();
        if parts.len() < 16 {
            continue;
        }

        totals.rx_bytes += parts[0];
        totals.rx_packets += parts[1];
        totals.tx_bytes += parts[8];
        totals.tx_packets += parts[9];
    }

    totals
}
