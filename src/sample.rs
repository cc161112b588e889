//! Raw metric samples shared by every source.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where a sample came from. Drives the `type` field of the delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Scraped from a remote exposition endpoint
    Prometheus,
    /// Read from the local host
    System,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Prometheus => write!(f, "prometheus"),
            SourceKind::System => write!(f, "system"),
        }
    }
}

/// One metric reading, before it is wrapped in an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    /// Milliseconds since the Unix epoch, stamped at collection time
    pub timestamp: i64,
    /// Scraped target host (remote source only)
    pub source_target: Option<String>,
    /// Module list the target was scraped with (remote source only)
    pub source_module: Option<String>,
}

impl RawSample {
    pub fn new(name: impl Into<String>, value: f64, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            value,
            timestamp,
            source_target: None,
            source_module: None,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Current wall clock in milliseconds since the Unix epoch.
///
/// This is the only clock samples are stamped with.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
