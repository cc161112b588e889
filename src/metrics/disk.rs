//! Filesystem capacity via statvfs.

use anyhow::{bail, Context, Result};
use std::ffi::CString;
use std::mem::MaybeUninit;
use std::path::Path;

/// Capacity of the filesystem holding a path, bytes
#[derive(Debug, Clone, PartialEq)]
pub struct FilesystemUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    /// Space available to unprivileged users
    pub available_bytes: u64,
    /// used / (used + available); reserved blocks are not counted as free
    pub used_percent: f64,
}

impl FilesystemUsage {
    fn from_blocks(block_size: u64, blocks: u64, free: u64, available: u64) -> Self {
        let total_bytes = blocks * block_size;
        let available_bytes = available * block_size;
        let used_bytes = blocks.saturating_sub(free) * block_size;
        let denominator = used_bytes + available_bytes;
        let used_percent = if denominator > 0 {
            100.0 * used_bytes as f64 / denominator as f64
        } else {
            0.0
        };

        Self { total_bytes, used_bytes, available_bytes, used_percent }
    }
}

pub fn filesystem_usage(path: &Path) -> Result<FilesystemUsage> {
    let c_path = CString::new(path.to_string_lossy().as_bytes())
        .with_context(|| format!("Invalid path {}", path.display()))?;
    let mut statvfs = MaybeUninit::<libc::statvfs>::uninit();

    let result = unsafe { libc::statvfs(c_path.as_ptr(), statvfs.as_mut_ptr()) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        bail!("statvfs({}) failed: {}", path.display(), err);
    }

    let statvfs = unsafe { statvfs.assume_init() };
    Ok(FilesystemUsage::from_blocks(
        statvfs.f_frsize as u64,
        statvfs.f_blocks as u64,
        statvfs.f_bfree as u64,
        statvfs.f_bavail as u64,
    ))
}
