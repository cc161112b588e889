//! Scrapes a Prometheus exposition endpoint, optionally once per target.

use super::{Collection, Source};
use crate::config::Target;
use crate::error::SourceError;
use crate::exposition;
use crate::sample::{now_millis, RawSample, SourceKind};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::debug;

const ACCEPT_EXPOSITION: &str = "text/plain;version=0.0.4;q=1,*/*;q=0.1";

pub struct RemoteScrapeSource {
    client: Client,
    base_url: Url,
    targets: Vec<Target>,
}

impl RemoteScrapeSource {
    /// Scrape `base_url` directly when `targets` is empty, otherwise once per target
    pub fn new(base_url: Url, targets: Vec<Target>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("promfwd/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build scrape HTTP client")?;

        Ok(Self { client, base_url, targets })
    }

    /// URL for one scrape: the base URL plus `target`, `auth` and `module` parameters
    pub fn request_url(&self, target: Option<&Target>) -> Url {
        let mut url = self.base_url.clone();
        if let Some(target) = target {
            let mut query = url.query_pairs_mut();
            query.append_pair("target", &target.host);
            if let Some(ref auth) = target.auth {
                query.append_pair("auth", auth);
            }
            if let Some(module) = target.module_tag() {
                query.append_pair("module", &module);
            }
        }
        url
    }

    async fn scrape(&self, target: Option<&Target>) -> Result<Vec<RawSample>, SourceError> {
        let url = self.request_url(target);
        // Auth tokens travel in the query string; keep them out of logs
        let shown = target.map_or_else(|| url.to_string(), |t| format!("{} (target {})", self.base_url, t.host));

        let response = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_EXPOSITION)
            .send()
            .await
            .map_err(|source| SourceError::Request { url: shown.clone(), source: source.without_url() })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status { url: shown, status: status.as_u16() });
        }

        let body = response
            .text()
            .await
            .map_err(|source| SourceError::Body { url: shown.clone(), source: source.without_url() })?;

        let families = exposition::parse(&body)
            .map_err(|source| SourceError::Parse { url: shown.clone(), source })?;

        // Collection time, not the payload's own timestamps
        let collected_at = now_millis();
        let source_target = target.map(|t| t.host.clone());
        let source_module = target.and_then(Target::module_tag);

        let samples: Vec<RawSample> = families
            .into_iter()
            .flat_map(|family| family.samples)
            .map(|sample| RawSample {
                name: sample.name,
                labels: sample.labels,
                value: sample.value,
                timestamp: collected_at,
                source_target: source_target.clone(),
                source_module: source_module.clone(),
            })
            .collect();

        debug!(url = %shown, samples = samples.len(), "Scrape complete");
        Ok(samples)
    }
}

#[async_trait]
impl Source for RemoteScrapeSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Prometheus
    }

    fn name(&self) -> &str {
        "remote"
    }

    async fn collect(&mut self) -> Collection {
        if self.targets.is_empty() {
            return match self.scrape(None).await {
                Ok(samples) => Collection::ok(samples),
                Err(e) => Collection::failed(e),
            };
        }

        // One unreachable target must not hide the others
        let mut collection = Collection::default();
        for target in &self.targets {
            match self.scrape(Some(target)).await {
                Ok(samples) => collection.samples.extend(samples),
                Err(e) => collection.failures.push(e),
            }
        }
        collection
    }
}
