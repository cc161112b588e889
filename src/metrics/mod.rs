//! Host statistics readers backing the local stats source.

pub mod cpu;
pub mod disk;
pub mod memory;
pub mod network;

pub use cpu::{CoreUtilization, CpuCollector, CpuSnapshot, CpuTimes};
pub use disk::FilesystemUsage;
pub use memory::{MemoryCollector, MemoryMetrics};
pub use network::{NetworkCollector, NetworkTotals};

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// Location of the proc filesystem, replaceable for fixtures
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Read a file relative to the proc root, e.g. `stat` or `net/dev`
    pub fn read(&self, relative: &str) -> Result<String> {
        let path = self.root.join(relative);
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new("/proc")
    }
}
