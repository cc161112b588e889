//! Metric sources polled by the scheduler.

pub mod local;
pub mod remote;

pub use local::LocalStatsSource;
pub use remote::RemoteScrapeSource;

use crate::error::SourceError;
use crate::sample::{RawSample, SourceKind};
use async_trait::async_trait;

/// Outcome of one collection pass.
///
/// A pass can partly succeed: a multi-target scrape keeps the samples of the
/// targets that answered and reports one error per target that did not.
#[derive(Debug, Default)]
pub struct Collection {
    pub samples: Vec<RawSample>,
    pub failures: Vec<SourceError>,
}

impl Collection {
    pub fn ok(samples: Vec<RawSample>) -> Self {
        Self { samples, failures: Vec::new() }
    }

    pub fn failed(error: SourceError) -> Self {
        Self { samples: Vec::new(), failures: vec![error] }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Something that produces raw samples on demand.
///
/// Implementations never panic on I/O or parse problems; they report them in
/// [`Collection::failures`] and let the scheduler decide what to log.
#[async_trait]
pub trait Source: Send {
    /// Tag applied to every event built from this source
    fn kind(&self) -> SourceKind;

    /// Short name for log lines
    fn name(&self) -> &str;

    async fn collect(&mut self) -> Collection;
}
