//! Read-only HTTP endpoint exposing forwarder counters.
//!
//! `GET /health` returns the latest [`StatsSnapshot`] as JSON, `GET /metrics`
//! renders the counters in Prometheus text format. The endpoint only reads
//! snapshots published by the scheduler.

use crate::scheduler::{Counters, Phase, StatsSnapshot};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on request line plus headers
const MAX_REQUEST_HEAD: u64 = 8 * 1024;
/// A client must finish sending its request head within this
const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Last iteration delivered everything it collected
    Ok,
    /// Last iteration had source or delivery failures, or was aborted
    Degraded,
}

#[derive(Debug, Serialize)]
struct HealthReport<'a> {
    status: HealthStatus,
    version: &'static str,
    #[serde(flatten)]
    snapshot: &'a StatsSnapshot,
}

/// A rendered HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Self { status, content_type: "text/plain; charset=utf-8", body: body.into() }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            404 => "Not Found",
            405 => "Method Not Allowed",
            _ => "Internal Server Error",
        }
    }
}

pub fn health_status(snapshot: &StatsSnapshot) -> HealthStatus {
    let clean = snapshot.last_iteration.as_ref().map_or(true, |it| it.is_clean());
    if clean && snapshot.phase != Phase::Backoff {
        HealthStatus::Ok
    } else {
        HealthStatus::Degraded
    }
}

/// Map a request line to a response
pub fn route(method: &str, path: &str, snapshot: &StatsSnapshot) -> Response {
    let path = path.split('?').next().unwrap_or(path);
    match (method, path) {
        ("GET", "/health") => {
            let report = HealthReport {
                status: health_status(snapshot),
                version: env!("CARGO_PKG_VERSION"),
                snapshot,
            };
            match serde_json::to_string(&report) {
                Ok(body) => Response { status: 200, content_type: "application/json", body },
                Err(e) => Response::text(500, e.to_string()),
            }
        }
        ("GET", "/metrics") => Response {
            status: 200,
            content_type: "text/plain; version=0.0.4",
            body: render_prometheus(&snapshot.counters),
        },
        ("GET", _) => Response::text(404, "not found\n"),
        _ => Response::text(405, format!("method {} not supported\n", method)),
    }
}

/// Counters in Prometheus text exposition format
pub fn render_prometheus(counters: &Counters) -> String {
    let rows = [
        ("promfwd_metrics_collected_total", "Samples returned by all sources.", counters.metrics_collected),
        ("promfwd_metrics_sent_total", "Events accepted by the sink.", counters.metrics_sent),
        ("promfwd_errors_total", "Events the sink did not accept.", counters.errors),
        ("promfwd_cycles_total", "Forwarding loop iterations completed.", counters.cycles),
        ("promfwd_cycle_failures_total", "Iterations aborted unexpectedly.", counters.cycle_failures),
    ];

    let mut out = String::new();
    for (name, help, value) in rows {
        let _ = writeln!(out, "# HELP {} {}", name, help);
        let _ = writeln!(out, "# TYPE {} counter", name);
        let _ = writeln!(out, "{} {}", name, value);
    }
    out
}

pub async fn serve(
    listener: TcpListener,
    stats: watch::Receiver<StatsSnapshot>,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(addr = %listener.local_addr()?, "Status endpoint listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let stats = stats.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, stats).await {
                            debug!(%peer, error = %e, "Status connection error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "Failed to accept status connection"),
            },
        }
    }
}

async fn handle_connection(mut stream: TcpStream, stats: watch::Receiver<StatsSnapshot>) -> Result<()> {
    let request_line = tokio::time::timeout(READ_TIMEOUT, read_request_head(&mut stream))
        .await
        .context("Timed out reading status request")??;

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");

    let snapshot = stats.borrow().clone();
    let response = route(method, path, &snapshot);

    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        response.reason(),
        response.content_type,
        response.body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(response.body.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Read the request line and drain headers, at most [`MAX_REQUEST_HEAD`] bytes
async fn read_request_head<R: AsyncRead + Unpin>(stream: R) -> Result<String> {
    let mut reader = BufReader::new(stream.take(MAX_REQUEST_HEAD));
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    if !request_line.ends_with('\n') {
        bail!("Request line truncated after {} bytes", request_line.len());
    }

    // The body of a GET is ignored
    loop {
        let mut header = String::new();
        let n = reader.read_line(&mut header).await?;
        if n == 0 || header.trim().is_empty() {
            break;
        }
    }
    Ok(request_line)
}
