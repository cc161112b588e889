//! Command-line configuration, target descriptors and start-up validation.

use crate::error::ConfigError;
use clap::{Parser, ValueEnum};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_LOCAL_STATS_INTERVAL_SECS: u64 = 300;

/// Forward Prometheus metrics and host statistics to a Logstash HTTP input
#[derive(Parser, Debug, Clone)]
#[command(name = "promfwd")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// URL of the metrics endpoint to scrape (e.g. http://localhost:9116/snmp)
    #[arg(long, env = "PROMFWD_REMOTE_URL")]
    pub remote_url: String,

    /// URL of the Logstash HTTP input that receives one JSON event per sample
    #[arg(long, env = "PROMFWD_SINK_URL")]
    pub sink_url: String,

    /// Scrape interval in seconds
    #[arg(short = 'i', long, env = "PROMFWD_INTERVAL", default_value_t = DEFAULT_INTERVAL_SECS)]
    pub interval: u64,

    /// HTTP request timeout in seconds, for both scrape and delivery
    #[arg(long, env = "PROMFWD_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Also collect CPU, memory, disk and network statistics of this host
    #[arg(long, env = "PROMFWD_ENABLE_LOCAL_STATS")]
    pub enable_local_stats: bool,

    /// Host statistics interval in seconds
    #[arg(long, env = "PROMFWD_LOCAL_STATS_INTERVAL", default_value_t = DEFAULT_LOCAL_STATS_INTERVAL_SECS)]
    pub local_stats_interval: u64,

    /// Scrape target, repeatable: HOST[;auth=TOKEN][;module=M1,M2]
    #[arg(short = 't', long = "target")]
    pub targets: Vec<String>,

    /// JSON file with a list of {"host", "auth", "modules"} targets
    #[arg(long, env = "PROMFWD_TARGETS_FILE")]
    pub targets_file: Option<PathBuf>,

    /// Log level (RUST_LOG takes precedence when set)
    #[arg(long, env = "PROMFWD_LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Serve /health and /metrics with forwarder counters on this address
    #[arg(long, env = "PROMFWD_STATUS_ADDR")]
    pub status_addr: Option<SocketAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// One device scraped through the remote endpoint (e.g. an SNMP exporter target)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<String>,
}

impl Target {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), auth: None, modules: Vec::new() }
    }

    /// Comma-joined module list, as sent in the `module` query parameter
    pub fn module_tag(&self) -> Option<String> {
        if self.modules.is_empty() {
            None
        } else {
            Some(self.modules.join(","))
        }
    }
}

impl FromStr for Target {
    type Err = ConfigError;

    fn from_str(descriptor: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidTarget {
            descriptor: descriptor.to_string(),
            reason: reason.to_string(),
        };

        let mut parts = descriptor.split(';').map(str::trim);
        let host = parts.next().unwrap_or("");
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let mut target = Target::new(host);
        for part in parts.filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| invalid("expected key=value"))?;
            match key.trim() {
                "auth" => target.auth = Some(value.trim().to_string()),
                "module" | "modules" => {
                    target.modules = value
                        .split(',')
                        .map(str::trim)
                        .filter(|m| !m.is_empty())
                        .map(String::from)
                        .collect();
                }
                other => return Err(invalid(&format!("unknown key '{}'", other))),
            }
        }
        Ok(target)
    }
}

/// Validated runtime configuration, immutable once loaded
#[derive(Debug, Clone)]
pub struct Config {
    pub remote_url: Url,
    pub sink_url: Url,
    pub interval: Duration,
    pub timeout: Duration,
    pub enable_local_stats: bool,
    pub local_stats_interval: Duration,
    pub targets: Vec<Target>,
    pub log_level: LogLevel,
    pub status_addr: Option<SocketAddr>,
}

impl Config {
    /// Build and validate the configuration from parsed arguments
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        validate_seconds("interval", args.interval)?;
        validate_seconds("timeout", args.timeout)?;
        validate_seconds("local_stats_interval", args.local_stats_interval)?;

        let mut targets = Vec::new();
        if let Some(ref path) = args.targets_file {
            targets.extend(load_targets_file(path)?);
        }
        for descriptor in &args.targets {
            targets.push(descriptor.parse()?);
        }

        let config = Self {
            remote_url: parse_url("remote_url", &args.remote_url)?,
            sink_url: parse_url("sink_url", &args.sink_url)?,
            interval: Duration::from_secs(args.interval),
            timeout: Duration::from_secs(args.timeout),
            enable_local_stats: args.enable_local_stats,
            local_stats_interval: Duration::from_secs(args.local_stats_interval),
            targets,
            log_level: args.log_level,
            status_addr: args.status_addr,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the scheduler relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_duration("interval", self.interval)?;
        validate_duration("timeout", self.timeout)?;
        validate_duration("local_stats_interval", self.local_stats_interval)?;
        Ok(())
    }
}

fn validate_seconds(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value < 1 {
        return Err(ConfigError::IntervalTooSmall { name, value });
    }
    Ok(())
}

fn validate_duration(name: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value < Duration::from_secs(1) {
        return Err(ConfigError::IntervalTooSmall { name, value: value.as_secs() });
    }
    Ok(())
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|_| ConfigError::InvalidUrl { name, url: raw.to_string() })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ConfigError::InvalidUrl { name, url: raw.to_string() }),
    }
}

fn load_targets_file(path: &Path) -> Result<Vec<Target>, ConfigError> {
    let file_error = |reason: String| ConfigError::TargetsFile {
        path: path.display().to_string(),
        reason,
    };
    let content = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
    let targets: Vec<Target> =
        serde_json::from_str(&content).map_err(|e| file_error(e.to_string()))?;
    if let Some(bad) = targets.iter().find(|t| t.host.trim().is_empty()) {
        return Err(file_error(format!("target with empty host: {:?}", bad)));
    }
    Ok(targets)
}
