//! Scored store
//!
//! Buckets are either plain membership sets (`candidate`, `anonymous`) or
//! score indexes (one per target) ordered ascending by score. Every mutation
//! touches a single `(bucket, proxy)` key, so no cross-key transactions are
//! needed and implementations must be safe for concurrent callers.

mod memory;
pub mod migrations;
mod postgres;
mod retry;

pub use memory::MemoryStore;
pub use postgres::{PgStore, PoolStats};
pub use retry::{ReconnectGate, RetryPolicy, RetryingStore};

use async_trait::async_trait;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::models::{Proxy, ScoreIndex};

/// Storage backend for proxy buckets, scores and refresh times
#[async_trait]
pub trait ScoredStore: Send + Sync {
    /// Add a proxy to a membership bucket (no-op if present)
    async fn add_member(&self, bucket: &str, proxy: &Proxy) -> Result<()>;

    /// All members of a membership bucket
    async fn members(&self, bucket: &str) -> Result<Vec<Proxy>>;

    /// Make `proxies` the entire contents of a membership bucket
    async fn replace_members(&self, bucket: &str, proxies: &[Proxy]) -> Result<()>;

    /// Remove a proxy from a membership bucket; returns whether it was present
    async fn remove_member(&self, bucket: &str, proxy: &Proxy) -> Result<bool>;

    /// Upsert a proxy's score and stamp the index's mtime with the current time
    async fn set_score(&self, index: &ScoreIndex, proxy: &Proxy, score: f64) -> Result<()>;

    /// Proxies scored within `[min, max]`, ascending by score
    async fn range_query(&self, bucket: &str, min: f64, max: f64) -> Result<Vec<Proxy>>;

    /// Last refresh time (epoch seconds) recorded under `mtime_key`
    async fn mtime(&self, mtime_key: &str) -> Result<Option<i64>>;

    /// Drop the current connection and establish a fresh one
    async fn reconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// Names of the two membership buckets the pipeline moves proxies through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buckets {
    pub candidate: String,
    pub anonymous: String,
}

impl Buckets {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            candidate: config.candidate_bucket.clone(),
            anonymous: config.anonymous_bucket.clone(),
        }
    }
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            candidate: "candidate".to_string(),
            anonymous: "anonymous".to_string(),
        }
    }
}

/// Current time in epoch seconds, as stored in mtime keys
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}
