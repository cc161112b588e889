//! Error types for the collection, delivery and configuration boundaries.
//!
//! None of these ever stop the forwarding loop. The scheduler turns source and
//! delivery errors into log lines and counter updates; configuration errors are
//! only raised before the loop starts.

use crate::exposition::ParseError;
use thiserror::Error;

/// A source could not produce samples this cycle.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid exposition payload from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: ParseError,
    },

    #[error("host statistics unavailable: {0:#}")]
    Host(#[from] anyhow::Error),
}

/// One event could not be delivered to the sink.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("sink answered with HTTP {0}, expected 200")]
    UnexpectedStatus(u16),

    #[error("sink request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A collection cycle was aborted by something the sources and sink did not contain.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CycleError {
    #[error("collection cycle panicked: {0}")]
    Panicked(String),
}

/// Configuration rejected at start-up.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be at least 1 second, got {value}")]
    IntervalTooSmall { name: &'static str, value: u64 },

    #[error("invalid URL for {name}: {url}")]
    InvalidUrl { name: &'static str, url: String },

    #[error("invalid target descriptor '{descriptor}': {reason}")]
    InvalidTarget { descriptor: String, reason: String },

    #[error("failed to load targets file {path}: {reason}")]
    TargetsFile { path: String, reason: String },
}
