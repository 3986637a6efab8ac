//! API server using Axum
//!
//! Serves ranked proxy lists to scraping clients.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::Router;
use tokio::sync::watch;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

use crate::config::ApiServerConfig;
use crate::error::{PoolError, Result};
use crate::query::PoolQuery;

use super::routes;

/// Requests taking longer than this are answered with 408
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub query: PoolQuery,
    pub default_num: usize,
    pub default_delay: f64,
    pub backend: &'static str,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(query: PoolQuery, config: &ApiServerConfig, backend: &'static str) -> Self {
        Self {
            query,
            default_num: config.default_num,
            default_delay: config.default_delay,
            backend,
            started_at: Instant::now(),
        }
    }
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, query: PoolQuery, backend: &'static str) -> Self {
        let state = AppState::new(query, &config, backend);
        Self { config, state }
    }

    /// Build the router
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone())
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|_| {
                PoolError::InvalidConfig(format!(
                    "invalid API address {}:{}",
                    self.config.host, self.config.port
                ))
            })?;

        let router = self.build_router();

        info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await
            .map_err(|e| PoolError::Internal(e.to_string()))?;

        info!("API server shut down");
        Ok(())
    }
}
