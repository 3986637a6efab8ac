//! Read side of the pool: ranked, shuffled samples per target
//!
//! Reads go straight to the store without retry; a store outage surfaces as
//! an error immediately.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::debug;

use crate::error::Result;
use crate::models::{Proxy, TargetCatalog};
use crate::store::ScoredStore;

/// Why a selection holds fewer proxies than asked for
#[derive(Debug, Clone, PartialEq)]
pub enum Shortfall {
    /// Some proxies qualified, just not enough
    Fewer { requested: usize, available: usize },
    /// Nothing scored within the range
    Empty { min: f64, max: f64 },
}

/// Proxies drawn for one request
#[derive(Debug, Clone)]
pub struct Selection {
    pub proxies: Vec<Proxy>,
    /// Name of the target actually queried
    pub target: String,
    /// false when the requested name was unknown and `ALL` answered instead
    pub exact: bool,
    pub shortfall: Option<Shortfall>,
}

/// Outcome classification reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStatus {
    Success,
    SuccessPartial,
}

impl LookupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupStatus::Success => "success",
            LookupStatus::SuccessPartial => "success-partial",
        }
    }
}

impl Selection {
    pub fn status(&self) -> LookupStatus {
        if self.exact {
            LookupStatus::Success
        } else {
            LookupStatus::SuccessPartial
        }
    }
}

/// A selection plus the refresh time of the bucket it came from
#[derive(Debug, Clone)]
pub struct Lookup {
    pub selection: Selection,
    pub mtime: Option<i64>,
}

#[derive(Clone)]
pub struct PoolQuery {
    store: Arc<dyn ScoredStore>,
    targets: Arc<TargetCatalog>,
    not_validated: f64,
}

impl PoolQuery {
    /// `not_validated` is the default upper score bound, so proxies present
    /// but not yet scored low remain eligible
    pub fn new(store: Arc<dyn ScoredStore>, targets: Arc<TargetCatalog>, not_validated: f64) -> Self {
        Self {
            store,
            targets,
            not_validated,
        }
    }

    pub fn targets(&self) -> &TargetCatalog {
        &self.targets
    }

    /// Up to `num` proxies for `target` scored within `[min, max]`, in random order
    pub async fn get_many(
        &self,
        target: &str,
        num: usize,
        min: f64,
        max: Option<f64>,
    ) -> Result<Selection> {
        let resolved = self.targets.resolve(target);
        let max = max.unwrap_or(self.not_validated);

        let mut proxies = self
            .store
            .range_query(&resolved.target.index.bucket, min, max)
            .await?;

        let shortfall = if proxies.is_empty() {
            Some(Shortfall::Empty { min, max })
        } else if proxies.len() < num {
            Some(Shortfall::Fewer {
                requested: num,
                available: proxies.len(),
            })
        } else {
            None
        };

        proxies.shuffle(&mut rand::thread_rng());
        proxies.truncate(num);

        if let Some(shortfall) = &shortfall {
            debug!(
                requested = %target,
                target = %resolved.target.name,
                ?shortfall,
                "Fewer proxies than requested"
            );
        }

        Ok(Selection {
            proxies,
            target: resolved.target.name.clone(),
            exact: resolved.exact,
            shortfall,
        })
    }

    /// One random proxy for `target` within `[min, max]`
    pub async fn get_one(&self, target: &str, min: f64, max: Option<f64>) -> Result<Option<Proxy>> {
        let selection = self.get_many(target, 1, min, max).await?;
        Ok(selection.proxies.into_iter().next())
    }

    /// Last validation time of `target`'s bucket, in epoch seconds
    pub async fn get_mtime(&self, target: &str) -> Result<Option<i64>> {
        let resolved = self.targets.resolve(target);
        self.store.mtime(&resolved.target.index.mtime_key).await
    }

    /// Proxies no slower than `max_delay` seconds, with the bucket's mtime
    pub async fn lookup(&self, target: &str, num: usize, max_delay: f64) -> Result<Lookup> {
        let selection = self.get_many(target, num, 0.0, Some(max_delay)).await?;
        let mtime = self.get_mtime(&selection.target).await?;
        Ok(Lookup { selection, mtime })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoolError;
    use crate::models::{ScoreIndex, TargetSpec};
    use crate::store::MemoryStore;
    use crate::test_support::DownStore;
    use std::collections::HashSet;

    fn targets() -> Arc<TargetCatalog> {
        let x = TargetSpec {
            name: "X".to_string(),
            url: "http://x.example/".to_string(),
            bucket: None,
            mtime_key: None,
            expect: None,
        }
        .compile()
        .unwrap();
        Arc::new(TargetCatalog::new(vec![x]).unwrap())
    }

    fn proxy(n: u8) -> Proxy {
        format!("10.0.0.{}:8080", n).parse().unwrap()
    }

    /// X scores 0.1..=1.0 for proxies 1..=10, ALL scores 5.0 for proxies 1..=3
    async fn seeded() -> (Arc<MemoryStore>, PoolQuery) {
        let store = Arc::new(MemoryStore::new());
        let x = ScoreIndex::for_name("X");
        let all = ScoreIndex::for_name("ALL");
        for n in 1..=10u8 {
            store
                .set_score(&x, &proxy(n), f64::from(n) / 10.0)
                .await
                .unwrap();
        }
        for n in 1..=3u8 {
            store.set_score(&all, &proxy(n), 5.0).await.unwrap();
        }
        let query = PoolQuery::new(store.clone(), targets(), 1000.0);
        (store, query)
    }

    #[tokio::test]
    async fn test_get_many_respects_max_score() {
        let (_, query) = seeded().await;

        let selection = query.get_many("X", 10, 0.0, Some(0.45)).await.unwrap();
        let got: HashSet<Proxy> = selection.proxies.into_iter().collect();
        let expected: HashSet<Proxy> = (1..=4).map(proxy).collect();
        assert_eq!(got, expected);
    }

    #[tokio::test]
    async fn test_get_many_caps_at_num() {
        let (_, query) = seeded().await;

        let selection = query.get_many("x", 3, 0.0, None).await.unwrap();
        assert_eq!(selection.proxies.len(), 3);
        assert_eq!(selection.shortfall, None);
        assert_eq!(selection.status(), LookupStatus::Success);
    }

    #[tokio::test]
    async fn test_get_many_reports_fewer_than_requested() {
        let (_, query) = seeded().await;

        let selection = query.get_many("X", 5, 0.0, Some(0.2)).await.unwrap();
        assert_eq!(selection.proxies.len(), 2);
        assert_eq!(
            selection.shortfall,
            Some(Shortfall::Fewer {
                requested: 5,
                available: 2
            })
        );

        let empty = query.get_many("X", 5, 0.0, Some(0.05)).await.unwrap();
        assert!(empty.proxies.is_empty());
        assert_eq!(empty.shortfall, Some(Shortfall::Empty { min: 0.0, max: 0.05 }));
        assert!(empty.exact);
    }

    #[tokio::test]
    async fn test_unknown_target_falls_back_to_all() {
        let (_, query) = seeded().await;

        let fallback = query.get_many("nosuchsite", 10, 0.0, None).await.unwrap();
        let all = query.get_many("ALL", 10, 0.0, None).await.unwrap();

        assert_eq!(fallback.target, "ALL");
        assert!(!fallback.exact);
        assert_eq!(fallback.status(), LookupStatus::SuccessPartial);
        assert_eq!(
            fallback.proxies.into_iter().collect::<HashSet<_>>(),
            all.proxies.into_iter().collect::<HashSet<_>>()
        );
    }

    #[tokio::test]
    async fn test_repeated_queries_return_the_same_set() {
        let (_, query) = seeded().await;

        let first: HashSet<Proxy> = query
            .get_many("X", 10, 0.0, None)
            .await
            .unwrap()
            .proxies
            .into_iter()
            .collect();
        for _ in 0..20 {
            let again: HashSet<Proxy> = query
                .get_many("X", 10, 0.0, None)
                .await
                .unwrap()
                .proxies
                .into_iter()
                .collect();
            assert_eq!(again, first);
        }
    }

    #[tokio::test]
    async fn test_get_one_and_mtime() {
        let (_, query) = seeded().await;

        let one = query.get_one("X", 0.0, Some(0.1)).await.unwrap();
        assert_eq!(one, Some(proxy(1)));
        assert_eq!(query.get_one("X", 0.0, Some(0.01)).await.unwrap(), None);

        assert!(query.get_mtime("X").await.unwrap().is_some());
        assert!(query.get_mtime("unknown").await.unwrap().is_some());

        let empty = PoolQuery::new(Arc::new(MemoryStore::new()), targets(), 1000.0);
        assert_eq!(empty.get_mtime("X").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lookup_bundles_mtime() {
        let (_, query) = seeded().await;

        let lookup = query.lookup("X", 2, 10.0).await.unwrap();
        assert_eq!(lookup.selection.proxies.len(), 2);
        assert!(lookup.mtime.is_some());
    }

    #[tokio::test]
    async fn test_store_errors_surface_immediately() {
        let query = PoolQuery::new(Arc::new(DownStore), targets(), 1000.0);

        let err = query.get_many("X", 1, 0.0, None).await.unwrap_err();
        assert!(matches!(err, PoolError::StoreUnavailable(_)));
        assert!(query.get_mtime("X").await.is_err());
    }
}
