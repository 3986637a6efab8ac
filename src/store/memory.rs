//! In-process store backend

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::{now_epoch, ScoredStore};
use crate::error::Result;
use crate::models::{Proxy, ScoreIndex};

/// Keeps every bucket in memory; state is lost on restart
#[derive(Debug, Default)]
pub struct MemoryStore {
    sets: DashMap<String, HashSet<Proxy>>,
    scores: RwLock<HashMap<String, HashMap<Proxy, f64>>>,
    mtimes: DashMap<String, i64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score currently stored for a proxy, if any
    pub fn score_of(&self, bucket: &str, proxy: &Proxy) -> Option<f64> {
        self.scores
            .read()
            .get(bucket)
            .and_then(|index| index.get(proxy).copied())
    }
}

#[async_trait]
impl ScoredStore for MemoryStore {
    async fn add_member(&self, bucket: &str, proxy: &Proxy) -> Result<()> {
        self.sets
            .entry(bucket.to_string())
            .or_default()
            .insert(proxy.clone());
        Ok(())
    }

    async fn members(&self, bucket: &str) -> Result<Vec<Proxy>> {
        Ok(self
            .sets
            .get(bucket)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn replace_members(&self, bucket: &str, proxies: &[Proxy]) -> Result<()> {
        self.sets
            .insert(bucket.to_string(), proxies.iter().cloned().collect());
        Ok(())
    }

    async fn remove_member(&self, bucket: &str, proxy: &Proxy) -> Result<bool> {
        Ok(self
            .sets
            .get_mut(bucket)
            .map(|mut set| set.remove(proxy))
            .unwrap_or(false))
    }

    async fn set_score(&self, index: &ScoreIndex, proxy: &Proxy, score: f64) -> Result<()> {
        self.scores
            .write()
            .entry(index.bucket.clone())
            .or_default()
            .insert(proxy.clone(), score);
        self.mtimes.insert(index.mtime_key.clone(), now_epoch());
        Ok(())
    }

    async fn range_query(&self, bucket: &str, min: f64, max: f64) -> Result<Vec<Proxy>> {
        let scores = self.scores.read();
        let Some(index) = scores.get(bucket) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<(&Proxy, f64)> = index
            .iter()
            .filter(|(_, &score)| score >= min && score <= max)
            .map(|(proxy, &score)| (proxy, score))
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));

        Ok(hits.into_iter().map(|(proxy, _)| proxy.clone()).collect())
    }

    async fn mtime(&self, mtime_key: &str) -> Result<Option<i64>> {
        Ok(self.mtimes.get(mtime_key).map(|v| *v))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
