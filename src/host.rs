//! Identity of the machine the forwarder runs on.

use serde::Serialize;
use std::ffi::CStr;

/// Host identity captured once at start-up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInfo {
    pub hostname: String,
    /// Machine architecture, e.g. `x86_64`
    pub architecture: String,
    /// Kernel name as reported by uname, e.g. `Linux`
    pub platform: String,
    /// Kernel release
    pub release: String,
}

impl HostInfo {
    /// Read host identity from `uname(2)`, falling back to compile-time values
    pub fn detect() -> Self {
        uname().unwrap_or_else(|| Self {
            hostname: "unknown".to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            platform: std::env::consts::OS.to_string(),
            release: String::new(),
        })
    }

    /// OS family: `linux` for any casing of Linux, otherwise the lower-cased platform
    pub fn os_family(&self) -> String {
        let lower = self.platform.to_lowercase();
        if lower == "linux" {
            "linux".to_string()
        } else {
            lower
        }
    }
}

fn uname() -> Option<HostInfo> {
    let mut uts = std::mem::MaybeUninit::<libc::utsname>::uninit();
    let result = unsafe { libc::uname(uts.as_mut_ptr()) };
    if result != 0 {
        return None;
    }
    let uts = unsafe { uts.assume_init() };

    let field = |raw: &[libc::c_char]| -> String {
        unsafe { CStr::from_ptr(raw.as_ptr()) }.to_string_lossy().into_owned()
    };

    Some(HostInfo {
        hostname: field(&uts.nodename),
        architecture: field(&uts.machine),
        platform: field(&uts.sysname),
        release: field(&uts.release),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(platform: &str) -> HostInfo {
        HostInfo {
            hostname: "h".into(),
            architecture: "x86_64".into(),
            platform: platform.into(),
            release: "6.1.0".into(),
        }
    }

    #[test]
    fn os_family_normalizes_linux() {
        assert_eq!(host("Linux").os_family(), "linux");
        assert_eq!(host("LINUX").os_family(), "linux");
        assert_eq!(host("Darwin").os_family(), "darwin");
        assert_eq!(host("FreeBSD").os_family(), "freebsd");
    }

    #[test]
    fn detect_fills_every_field() {
        let info = HostInfo::detect();
        assert!(!info.hostname.is_empty());
        assert!(!info.architecture.is_empty());
        assert!(!info.platform.is_empty());
    }
}
