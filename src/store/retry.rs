//! Bounded retry with jittered sleeps for store writes

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::ScoredStore;
use crate::config::RetryConfig;
use crate::error::Result;
use crate::models::{Proxy, ScoreIndex};

/// How often, and how patiently, a failed store write is retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first one
    pub max_attempts: u32,
    /// Upper bound of the uniform random sleep between attempts
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_wait: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, max_wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_wait,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.max_wait)
    }

    /// Random sleep in `[0, max_wait]`
    pub fn jitter(&self) -> Duration {
        let ceiling = self.max_wait.as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// Between attempts the store is asked to reconnect. Returns the last error
    /// once `max_attempts` is reached.
    pub async fn run<T, F, Fut>(&self, store: &dyn ScoredStore, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let wait = self.jitter();
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "{} failed, retrying",
                        what
                    );
                    tokio::time::sleep(wait).await;

                    if let Err(re) = store.reconnect().await {
                        debug!(error = %re, "Reconnect before retry failed");
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Collapses concurrent reconnect requests into a single attempt.
///
/// Every caller that arrives while an attempt is in flight waits for it and
/// then returns without connecting again, whether that attempt succeeded or not.
#[derive(Debug, Default)]
pub struct ReconnectGate {
    generation: AtomicU64,
    lock: Mutex<()>,
}

impl ReconnectGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reconnect attempts made so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Run `connect` unless another caller already did while we waited
    pub async fn run<F, Fut>(&self, connect: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let seen = self.generation();
        let _guard = self.lock.lock().await;
        if self.generation() != seen {
            debug!("Reconnect already attempted by another task");
            return Ok(());
        }

        let result = connect().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        result
    }
}

/// Store handle whose writes go through a [`RetryPolicy`]
#[derive(Clone)]
pub struct RetryingStore {
    store: Arc<dyn ScoredStore>,
    policy: RetryPolicy,
}

impl RetryingStore {
    pub fn new(store: Arc<dyn ScoredStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn add_member(&self, bucket: &str, proxy: &Proxy) -> Result<()> {
        let store = self.store.as_ref();
        self.policy
            .run(store, "add_member", || store.add_member(bucket, proxy))
            .await
    }

    pub async fn replace_members(&self, bucket: &str, proxies: &[Proxy]) -> Result<()> {
        let store = self.store.as_ref();
        self.policy
            .run(store, "replace_members", || store.replace_members(bucket, proxies))
            .await
    }

    pub async fn remove_member(&self, bucket: &str, proxy: &Proxy) -> Result<bool> {
        let store = self.store.as_ref();
        self.policy
            .run(store, "remove_member", || store.remove_member(bucket, proxy))
            .await
    }

    pub async fn set_score(&self, index: &ScoreIndex, proxy: &Proxy, score: f64) -> Result<()> {
        let store = self.store.as_ref();
        self.policy
            .run(store, "set_score", || store.set_score(index, proxy, score))
            .await
    }

    pub async fn members(&self, bucket: &str) -> Result<Vec<Proxy>> {
        let store = self.store.as_ref();
        self.policy
            .run(store, "members", || store.members(bucket))
            .await
    }
}
