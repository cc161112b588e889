//! Minimal scripted HTTP server for exercising the real HTTP source and sink.

#![allow(dead_code)]

use promfwd::config::{Config, LogLevel};
use promfwd::format::EventFormatter;
use promfwd::host::HostInfo;
use reqwest::Url;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One request as the server saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    /// Path including the query string
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn query(&self) -> Vec<(String, String)> {
        let url = Url::parse(&format!("http://stub{}", self.target)).unwrap();
        url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }
}

type Responder = dyn Fn(&Recorded) -> Reply + Send + Sync;

#[derive(Clone)]
struct Shared {
    requests: Arc<Mutex<Vec<Recorded>>>,
    script: Arc<Mutex<VecDeque<Reply>>>,
    fallback: Arc<Responder>,
}

pub struct StubServer {
    addr: SocketAddr,
    shared: Shared,
    task: JoinHandle<()>,
}

impl StubServer {
    /// Answer every request through `responder`
    pub async fn start(responder: impl Fn(&Recorded) -> Reply + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Shared {
            requests: Arc::default(),
            script: Arc::default(),
            fallback: Arc::new(responder),
        };

        let conn_shared = shared.clone();
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = conn_shared.clone();
                tokio::spawn(async move {
                    let _ = handle(stream, shared).await;
                });
            }
        });

        Self { addr, shared, task }
    }

    /// Always answer with the same status and body
    pub async fn fixed(status: u16, body: &str) -> Self {
        let reply = Reply::new(status, body);
        Self::start(move |_| reply.clone()).await
    }

    /// Answer from `replies` in order, then fall back to 200 with an empty body
    pub async fn scripted(replies: impl IntoIterator<Item = Reply>) -> Self {
        let server = Self::start(|_| Reply::ok("")).await;
        server.shared.script.lock().unwrap().extend(replies);
        server
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, path)).unwrap()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.shared.requests.lock().unwrap().clone()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn handle(mut stream: TcpStream, shared: Shared) -> std::io::Result<()> {
    let mut reader = BufReader::new(&mut stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or("/").to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.push((k.trim().to_string(), v.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await?;

    let recorded = Recorded { method, target, headers, body: String::from_utf8_lossy(&body).into_owned() };
    let reply = {
        let scripted = shared.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| (shared.fallback.as_ref())(&recorded))
    };
    shared.requests.lock().unwrap().push(recorded);

    let head = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reply.status,
        reply.body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(reply.body.as_bytes()).await?;
    stream.shutdown().await
}

/// Three samples spread over three families
pub const THREE_SAMPLES: &str = "\
# HELP up Target reachability.
# TYPE up gauge
up 1
# TYPE requests_total counter
requests_total{code=\"200\"} 1027
# TYPE temperature_celsius gauge
temperature_celsius{room=\"lab\"} 21.5
";

pub fn test_host() -> HostInfo {
    HostInfo {
        hostname: "forwarder-01".into(),
        architecture: "x86_64".into(),
        platform: "Linux".into(),
        release: "6.1.0".into(),
    }
}

pub fn formatter() -> EventFormatter {
    EventFormatter::new(test_host())
}

pub fn config(remote_url: Url, sink_url: Url) -> Config {
    Config {
        remote_url,
        sink_url,
        interval: Duration::from_secs(1),
        timeout: Duration::from_secs(5),
        enable_local_stats: false,
        local_stats_interval: Duration::from_secs(300),
        targets: Vec::new(),
        log_level: LogLevel::Info,
        status_addr: None,
    }
}
