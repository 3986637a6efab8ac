//! Throwaway local servers and a fault-injecting store for unit tests

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use tokio::net::TcpListener;

use crate::error::{PoolError, Result};
use crate::models::{Proxy, ScoreIndex};
use crate::store::{MemoryStore, ScoredStore};

/// Serve `router` on an ephemeral local port
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Answers every request with `body` after `delay`
///
/// Used both as a listing site and as an HTTP proxy: a forward proxy receives
/// absolute-form requests, which the fallback handler accepts like any other.
pub async fn canned_server(status: StatusCode, body: impl Into<String>, delay: Duration) -> SocketAddr {
    let body = Arc::new(body.into());
    let router = Router::new().fallback(move || {
        let body = body.clone();
        async move {
            tokio::time::sleep(delay).await;
            (status, body.as_str().to_string()).into_response()
        }
    });
    spawn_server(router).await
}

/// Reflection endpoint reporting `ip` as the caller's address
pub async fn reflect_server(ip: &str) -> SocketAddr {
    canned_server(
        StatusCode::OK,
        format!("{{\n  \"origin\": \"{}\"\n}}\n", ip),
        Duration::ZERO,
    )
    .await
}

/// A local address nothing listens on
pub async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

pub fn proxy_at(addr: SocketAddr) -> Proxy {
    Proxy::new(addr.ip().to_string(), addr.port()).unwrap()
}

pub fn html_page(title: &str) -> String {
    format!(
        "<html><head><title>{}</title></head><body><p>ok</p></body></html>",
        title
    )
}

/// Fails the first `failures` writes, then delegates to a [`MemoryStore`]
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    remaining: AtomicU32,
    calls: AtomicU32,
    reconnects: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>, failures: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            reconnects: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn trip(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            Err(PoolError::StoreUnavailable("connection reset by peer".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ScoredStore for FlakyStore {
    async fn add_member(&self, bucket: &str, proxy: &Proxy) -> Result<()> {
        self.trip()?;
        self.inner.add_member(bucket, proxy).await
    }

    async fn members(&self, bucket: &str) -> Result<Vec<Proxy>> {
        self.inner.members(bucket).await
    }

    async fn replace_members(&self, bucket: &str, proxies: &[Proxy]) -> Result<()> {
        self.trip()?;
        self.inner.replace_members(bucket, proxies).await
    }

    async fn remove_member(&self, bucket: &str, proxy: &Proxy) -> Result<bool> {
        self.trip()?;
        self.inner.remove_member(bucket, proxy).await
    }

    async fn set_score(&self, index: &ScoreIndex, proxy: &Proxy, score: f64) -> Result<()> {
        self.trip()?;
        self.inner.set_score(index, proxy, score).await
    }

    async fn range_query(&self, bucket: &str, min: f64, max: f64) -> Result<Vec<Proxy>> {
        self.inner.range_query(bucket, min, max).await
    }

    async fn mtime(&self, mtime_key: &str) -> Result<Option<i64>> {
        self.inner.mtime(mtime_key).await
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "flaky"
    }
}

/// A store whose every call fails, for query-path error handling
pub struct DownStore;

#[async_trait]
impl ScoredStore for DownStore {
    async fn add_member(&self, _bucket: &str, _proxy: &Proxy) -> Result<()> {
        Err(PoolError::StoreUnavailable("store is down".into()))
    }

    async fn members(&self, _bucket: &str) -> Result<Vec<Proxy>> {
        Err(PoolError::StoreUnavailable("store is down".into()))
    }

    async fn replace_members(&self, _bucket: &str, _proxies: &[Proxy]) -> Result<()> {
        Err(PoolError::StoreUnavailable("store is down".into()))
    }

    async fn remove_member(&self, _bucket: &str, _proxy: &Proxy) -> Result<bool> {
        Err(PoolError::StoreUnavailable("store is down".into()))
    }

    async fn set_score(&self, _index: &ScoreIndex, _proxy: &Proxy, _score: f64) -> Result<()> {
        Err(PoolError::StoreUnavailable("store is down".into()))
    }

    async fn range_query(&self, _bucket: &str, _min: f64, _max: f64) -> Result<Vec<Proxy>> {
        Err(PoolError::StoreUnavailable("store is down".into()))
    }

    async fn mtime(&self, _mtime_key: &str) -> Result<Option<i64>> {
        Err(PoolError::StoreUnavailable("store is down".into()))
    }

    fn backend_name(&self) -> &'static str {
        "down"
    }
}
