//! Candidate discovery from listing pages

use std::collections::BTreeSet;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::HeaderMap;
use tracing::{debug, error, info, instrument, warn};

use super::extract::extract;
use super::http::{direct_client, fetch_text, proxied_client};
use crate::config::Config;
use crate::error::{PoolError, Result};
use crate::models::{CrawlSource, Proxy};
use crate::store::{Buckets, RetryingStore};

/// Outcome of one crawl over all sources
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Sources attempted
    pub sources: usize,
    /// Sources whose page could not be fetched
    pub failed_sources: usize,
    /// Distinct candidates found this cycle
    pub candidates: usize,
    /// Whether the candidate bucket now holds exactly this cycle's union
    pub replaced: bool,
}

/// Fetches every source page and replaces the candidate bucket with the union of what they list
pub struct Crawler {
    store: RetryingStore,
    buckets: Buckets,
    headers: HeaderMap,
    timeout: Duration,
    workers: usize,
}

enum SourceOutcome {
    Failed,
    Crawled(Vec<Proxy>),
}

impl Crawler {
    pub fn new(
        store: RetryingStore,
        buckets: Buckets,
        headers: HeaderMap,
        timeout: Duration,
        workers: usize,
    ) -> Self {
        Self {
            store,
            buckets,
            headers,
            timeout,
            workers: workers.max(1),
        }
    }

    pub fn from_config(config: &Config, store: RetryingStore) -> Self {
        Self::new(
            store,
            Buckets::from_config(&config.store),
            config.catalog.headers.clone(),
            config.probe.crawl_timeout,
            config.workers.crawl,
        )
    }

    /// Crawl all `sources` concurrently; a failing source never affects the others.
    ///
    /// The candidate bucket is overwritten with this cycle's union. When no
    /// source could be fetched at all the previous candidates are kept.
    #[instrument(skip_all, fields(sources = sources.len()))]
    pub async fn crawl(&self, sources: &[CrawlSource]) -> CrawlReport {
        info!("Crawling {} sources", sources.len());

        let outcomes = futures::stream::iter(sources.to_vec())
            .map(|source| async move { self.crawl_source(&source).await })
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await;

        let mut report = CrawlReport {
            sources: sources.len(),
            ..Default::default()
        };
        let mut found = BTreeSet::new();
        for outcome in outcomes {
            match outcome {
                SourceOutcome::Failed => report.failed_sources += 1,
                SourceOutcome::Crawled(proxies) => found.extend(proxies),
            }
        }
        report.candidates = found.len();

        if report.failed_sources == report.sources {
            warn!(
                failed = report.failed_sources,
                "No source could be crawled, keeping previous candidates"
            );
            return report;
        }

        let found: Vec<Proxy> = found.into_iter().collect();
        match self
            .store
            .replace_members(&self.buckets.candidate, &found)
            .await
        {
            Ok(()) => report.replaced = true,
            Err(e) => error!(candidates = found.len(), error = %e, "Giving up on candidate write"),
        }

        info!(
            failed = report.failed_sources,
            candidates = report.candidates,
            replaced = report.replaced,
            "Crawl complete"
        );
        report
    }

    async fn crawl_source(&self, source: &CrawlSource) -> SourceOutcome {
        let body = match self.fetch(source).await {
            Ok(body) => body,
            Err(e) => {
                warn!(source = %source.name, url = %source.url, error = %e, "Error when fetching source");
                return SourceOutcome::Failed;
            }
        };

        // Html is not Send; parse and drop it before the next await.
        let proxies = extract(&source.rule, &body, &source.name);
        debug!(source = %source.name, found = proxies.len(), "Extracted candidates");

        SourceOutcome::Crawled(proxies)
    }

    async fn fetch(&self, source: &CrawlSource) -> Result<String> {
        let client = match &source.bootstrap_proxy {
            Some(proxy) => proxied_client(proxy, &self.headers, self.timeout)?,
            None => direct_client(&self.headers, self.timeout)?,
        };

        let (status, body) = fetch_text(&client, &source.url, self.timeout).await?;
        if !status.is_success() {
            return Err(PoolError::Extraction(format!(
                "listing page answered {}",
                status
            )));
        }

        Ok(body)
    }
}
