//! Delivery of formatted events to the ingestion endpoint.

use crate::error::DeliveryError;
use crate::format::FormattedEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, enabled, Level};

/// Receives one event at a time. Implementations never retry.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn deliver(&self, event: &FormattedEvent) -> Result<(), DeliveryError>;
}

/// POSTs each event as a JSON document, e.g. to the Logstash `http` input
pub struct HttpSink {
    client: Client,
    url: Url,
}

impl HttpSink {
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("promfwd/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build sink HTTP client")?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn deliver(&self, event: &FormattedEvent) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(event)?;

        if enabled!(Level::DEBUG) {
            debug!(
                now_ms = crate::sample::now_millis(),
                event_timestamp = %event.timestamp,
                "Sending event: {}",
                String::from_utf8_lossy(&body)
            );
        }

        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(CONTENT_LENGTH, HeaderValue::from(body.len()))
            .body(body)
            .send()
            .await?;

        // Only 200 counts; Logstash answers 200 on accept
        match response.status() {
            StatusCode::OK => Ok(()),
            other => Err(DeliveryError::UnexpectedStatus(other.as_u16())),
        }
    }
}
