//! Wraps raw samples in the event envelope delivered to the sink.

use crate::host::HostInfo;
use crate::sample::{RawSample, SourceKind};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

pub const AGENT_NAME: &str = "promfwd";
pub const AGENT_TYPE: &str = "prometheus-forwarder";

/// The JSON document posted to the sink, one per sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedEvent {
    #[serde(rename = "@timestamp")]
    pub timestamp: String,
    pub agent: Agent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observer: Option<Observer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<Device>,
    pub metric_name: String,
    #[serde(serialize_with = "serialize_metric_value")]
    pub metric_value: f64,
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "type")]
    pub kind: SourceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agent {
    pub hostname: String,
    pub name: &'static str,
    #[serde(rename = "type")]
    pub agent_type: &'static str,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<AgentHost>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentHost {
    pub hostname: String,
    pub name: String,
    pub architecture: String,
    pub os: OsInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OsInfo {
    pub platform: String,
    pub version: String,
    pub family: String,
}

/// Host that performed the scrape
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observer {
    pub hostname: String,
}

/// Scraped device, for multi-target remote sources
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

/// Builds envelopes. Pure: the same sample always yields the same event.
#[derive(Debug, Clone)]
pub struct EventFormatter {
    host: HostInfo,
}

impl EventFormatter {
    pub fn new(host: HostInfo) -> Self {
        Self { host }
    }

    pub fn format(&self, sample: &RawSample, kind: SourceKind) -> FormattedEvent {
        let host = match kind {
            SourceKind::System => Some(AgentHost {
                hostname: self.host.hostname.clone(),
                name: self.host.hostname.clone(),
                architecture: self.host.architecture.clone(),
                os: OsInfo {
                    platform: self.host.platform.clone(),
                    version: self.host.release.clone(),
                    family: self.host.os_family(),
                },
            }),
            SourceKind::Prometheus => None,
        };

        let observer = match kind {
            SourceKind::Prometheus => Some(Observer { hostname: self.host.hostname.clone() }),
            SourceKind::System => None,
        };

        let device = sample.source_target.as_ref().map(|target| Device {
            ip: target.clone(),
            module: sample.source_module.clone(),
        });

        FormattedEvent {
            timestamp: format_timestamp(sample.timestamp),
            agent: Agent {
                hostname: self.host.hostname.clone(),
                name: AGENT_NAME,
                agent_type: AGENT_TYPE,
                version: env!("CARGO_PKG_VERSION"),
                host,
            },
            observer,
            device,
            metric_name: sample.name.clone(),
            metric_value: sample.value,
            labels: sample.labels.clone(),
            kind,
        }
    }
}

/// Render milliseconds since epoch as RFC 3339 UTC with millisecond precision.
///
/// Out-of-range instants render as the epoch.
pub fn format_timestamp(millis: i64) -> String {
    let instant: DateTime<Utc> = Utc.timestamp_millis_opt(millis).single().unwrap_or_default();
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Finite values as JSON numbers; NaN and the infinities as the strings
/// `"NaN"`, `"+Inf"` and `"-Inf"`, spelled as in the exposition format.
fn serialize_metric_value<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else if value.is_nan() {
        serializer.serialize_str("NaN")
    } else if value.is_sign_positive() {
        serializer.serialize_str("+Inf")
    } else {
        serializer.serialize_str("-Inf")
    }
}
