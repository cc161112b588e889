//! promfwd - forward Prometheus metrics and host statistics to Logstash.
//!
//! A single loop scrapes an exposition endpoint (optionally once per managed
//! target), turns every sample into a flat JSON event and POSTs it to an HTTP
//! input. Host CPU, memory, disk and network gauges are collected on a slower
//! interval and forwarded the same way.

pub mod config;
pub mod error;
pub mod exposition;
pub mod format;
pub mod host;
pub mod logging;
pub mod metrics;
pub mod sample;
pub mod scheduler;
pub mod sink;
pub mod source;
pub mod status;
