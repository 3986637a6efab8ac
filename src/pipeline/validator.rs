//! Per-target latency scoring of anonymous proxies

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use tracing::{debug, error, info, instrument};

use super::http::{fetch_text, proxied_client};
use crate::config::Config;
use crate::error::Result;
use crate::models::{Proxy, Score, Target, TargetCatalog};
use crate::store::{Buckets, RetryingStore};

/// Outcome of one validation run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidateReport {
    /// (proxy, target) pairs probed
    pub tasks: usize,
    /// Scored with their latency
    pub passed: usize,
    /// Scored with the penalty
    pub penalized: usize,
    /// Score write abandoned after retries
    pub abandoned: usize,
}

pub struct Validator {
    store: RetryingStore,
    buckets: Buckets,
    headers: HeaderMap,
    targets: Arc<TargetCatalog>,
    timeout: Duration,
    penalty: f64,
    workers: usize,
}

impl Validator {
    pub fn new(
        store: RetryingStore,
        buckets: Buckets,
        headers: HeaderMap,
        targets: Arc<TargetCatalog>,
        timeout: Duration,
        penalty: f64,
        workers: usize,
    ) -> Self {
        Self {
            store,
            buckets,
            headers,
            targets,
            timeout,
            penalty,
            workers: workers.max(1),
        }
    }

    pub fn from_config(config: &Config, store: RetryingStore) -> Self {
        Self::new(
            store,
            Buckets::from_config(&config.store),
            config.catalog.headers.clone(),
            config.catalog.targets.clone(),
            config.probe.validate_timeout,
            config.scoring.time_exception,
            config.workers.validate,
        )
    }

    pub fn targets(&self) -> &Arc<TargetCatalog> {
        &self.targets
    }

    /// Score every anonymous proxy against every target
    #[instrument(skip(self))]
    pub async fn validate(&self) -> Result<ValidateReport> {
        let proxies = self.store.members(&self.buckets.anonymous).await?;

        // Owned pairs keep the fan-out future `Send` for a spawned refresh loop.
        let tasks: Vec<(Target, Proxy)> = self
            .targets
            .iter()
            .flat_map(|target| {
                proxies
                    .iter()
                    .map(move |proxy| (target.clone(), proxy.clone()))
            })
            .collect();
        info!(
            proxies = proxies.len(),
            targets = self.targets.len(),
            tasks = tasks.len(),
            "Validating anonymous proxies"
        );

        let results = futures::stream::iter(tasks)
            .map(|(target, proxy)| async move {
                let score = self.probe(&proxy, &target).await;
                let stored = self.record(&proxy, &target, score).await;
                (score, stored)
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await;

        let mut report = ValidateReport {
            tasks: results.len(),
            ..Default::default()
        };
        for (score, stored) in results {
            if !stored {
                report.abandoned += 1;
            } else if score.is_penalty() {
                report.penalized += 1;
            } else {
                report.passed += 1;
            }
        }

        info!(
            passed = report.passed,
            penalized = report.penalized,
            abandoned = report.abandoned,
            "Validation complete"
        );
        Ok(report)
    }

    /// Time one request to `target` through `proxy`
    async fn probe(&self, proxy: &Proxy, target: &Target) -> Score {
        let started = Instant::now();
        let result = async {
            let client = proxied_client(proxy, &self.headers, self.timeout)?;
            fetch_text(&client, &target.url, self.timeout).await
        }
        .await;
        let elapsed = started.elapsed();

        match result {
            Ok((status, body)) if status == StatusCode::OK && page_matches(&body, &target.expect) => {
                Score::Latency(elapsed.as_secs_f64())
            }
            Ok((status, _)) => {
                debug!(
                    proxy = %proxy,
                    target = %target.name,
                    status = status.as_u16(),
                    "Unexpected page through proxy"
                );
                Score::Penalty
            }
            Err(e) => {
                debug!(proxy = %proxy, target = %target.name, error = %e, "Validation request failed");
                Score::Penalty
            }
        }
    }

    async fn record(&self, proxy: &Proxy, target: &Target, score: Score) -> bool {
        let value = score.value(self.penalty);
        match self.store.set_score(&target.index, proxy, value).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    proxy = %proxy,
                    target = %target.name,
                    score = value,
                    error = %e,
                    "Giving up on score write"
                );
                false
            }
        }
    }
}

/// Whether `body` parses into the shape the target is expected to serve
fn page_matches(body: &str, expect: &Selector) -> bool {
    Html::parse_document(body).select(expect).next().is_some()
}
