//! Anonymity filter
//!
//! Each candidate is asked to fetch the reflection endpoint on our behalf. If
//! the reflected body still carries our own public IP the proxy leaks the
//! client address and is kept out of the anonymous bucket.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::http::{direct_client, fetch_text, proxied_client};
use crate::config::Config;
use crate::error::{PoolError, Result};
use crate::models::Proxy;
use crate::store::{Buckets, RetryingStore};

/// Outcome of one filter run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterReport {
    /// Candidates probed
    pub probed: usize,
    /// Added to (or kept in) the anonymous bucket
    pub anonymous: usize,
    /// Leaked our address; removed from the anonymous bucket
    pub transparent: usize,
    /// Probe failed or timed out; membership left untouched
    pub inconclusive: usize,
    /// Verdict reached but the store write was abandoned
    pub abandoned: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Anonymous,
    Transparent,
    Inconclusive,
}

/// Settings for reaching the reflection endpoint
#[derive(Debug, Clone)]
pub struct ReflectSettings {
    pub url: Url,
    pub local_ip_attempts: u32,
    pub local_ip_timeout: Duration,
    pub probe_timeout: Duration,
}

pub struct AnonymityFilter {
    store: RetryingStore,
    buckets: Buckets,
    headers: HeaderMap,
    reflect: ReflectSettings,
    workers: usize,
}

impl AnonymityFilter {
    pub fn new(
        store: RetryingStore,
        buckets: Buckets,
        headers: HeaderMap,
        reflect: ReflectSettings,
        workers: usize,
    ) -> Self {
        Self {
            store,
            buckets,
            headers,
            reflect,
            workers: workers.max(1),
        }
    }

    pub fn from_config(config: &Config, store: RetryingStore) -> Self {
        Self::new(
            store,
            Buckets::from_config(&config.store),
            config.catalog.headers.clone(),
            ReflectSettings {
                url: config.probe.reflect_url.clone(),
                local_ip_attempts: config.probe.local_ip_attempts,
                local_ip_timeout: config.probe.local_ip_timeout,
                probe_timeout: config.probe.anonymity_timeout,
            },
            config.workers.filter,
        )
    }

    /// Resolve our own public IP by asking the reflection endpoint directly
    pub async fn resolve_local_ip(&self) -> Result<IpAddr> {
        let attempts = self.reflect.local_ip_attempts.max(1);

        for attempt in 1..=attempts {
            match self.reflect_once().await {
                Ok(ip) => {
                    debug!(ip = %ip, attempt, "Resolved local IP");
                    return Ok(ip);
                }
                Err(e) => warn!(attempt, attempts, error = %e, "Error when resolving local IP"),
            }
        }

        Err(PoolError::LocalIpUnavailable { attempts })
    }

    async fn reflect_once(&self) -> Result<IpAddr> {
        let timeout = self.reflect.local_ip_timeout;
        let client = direct_client(&self.headers, timeout)?;
        let (_, body) = fetch_text(&client, &self.reflect.url, timeout).await?;
        parse_reflected_ip(&body)
    }

    /// Probe every candidate and move it into or out of the anonymous bucket.
    ///
    /// Fails only when the local IP cannot be resolved or the candidate
    /// bucket cannot be read; per-proxy failures are counted in the report.
    #[instrument(skip(self))]
    pub async fn filter_anonymous(&self) -> Result<FilterReport> {
        let local_ip = self.resolve_local_ip().await?;
        let needle: Arc<str> = Arc::from(local_ip.to_string());

        let candidates = self.store.members(&self.buckets.candidate).await?;
        info!(candidates = candidates.len(), "Filtering candidates for anonymity");

        let results = futures::stream::iter(candidates)
            .map(|proxy| {
                let needle = Arc::clone(&needle);
                async move {
                    let verdict = self.probe(&proxy, &needle).await;
                    let stored = self.apply(&proxy, verdict).await;
                    (verdict, stored)
                }
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await;

        let mut report = FilterReport {
            probed: results.len(),
            ..Default::default()
        };
        for (verdict, stored) in results {
            match (verdict, stored) {
                (Verdict::Inconclusive, _) => report.inconclusive += 1,
                (_, false) => report.abandoned += 1,
                (Verdict::Anonymous, true) => report.anonymous += 1,
                (Verdict::Transparent, true) => report.transparent += 1,
            }
        }

        info!(
            anonymous = report.anonymous,
            transparent = report.transparent,
            inconclusive = report.inconclusive,
            abandoned = report.abandoned,
            "Anonymity filter complete"
        );
        Ok(report)
    }

    async fn probe(&self, proxy: &Proxy, local_ip: &str) -> Verdict {
        let timeout = self.reflect.probe_timeout;
        let result = async {
            let client = proxied_client(proxy, &self.headers, timeout)?;
            fetch_text(&client, &self.reflect.url, timeout).await
        }
        .await;

        match result {
            Ok((_, body)) if body.contains(local_ip) => Verdict::Transparent,
            Ok(_) => Verdict::Anonymous,
            Err(e) => {
                debug!(proxy = %proxy, error = %e, "Anonymity probe failed");
                Verdict::Inconclusive
            }
        }
    }

    /// Record a verdict; returns false when the write was abandoned
    async fn apply(&self, proxy: &Proxy, verdict: Verdict) -> bool {
        let result = match verdict {
            Verdict::Anonymous => self.store.add_member(&self.buckets.anonymous, proxy).await,
            Verdict::Transparent => self
                .store
                .remove_member(&self.buckets.anonymous, proxy)
                .await
                .map(|_| ()),
            Verdict::Inconclusive => return true,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(proxy = %proxy, error = %e, "Giving up on anonymity verdict write");
                false
            }
        }
    }
}

/// Extract the caller address from a reflection endpoint response.
///
/// Accepts `{"origin": "a, b"}` (first entry wins), `{"ip": "a"}` or a bare
/// address in plain text.
pub fn parse_reflected_ip(body: &str) -> Result<IpAddr> {
    let body = body.trim();

    let reported = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(fields)) => ["origin", "ip"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .map(str::to_string),
        Ok(Value::String(s)) => Some(s),
        _ => None,
    }
    .unwrap_or_else(|| body.to_string());

    let first = reported.split(',').next().unwrap_or_default().trim();
    first.parse().map_err(|_| {
        let shown: String = body.chars().take(64).collect();
        PoolError::Extraction(format!("no address in reflection response: {:?}", shown))
    })
}
