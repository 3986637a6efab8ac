//! Proxypool - Entry Point
//!
//! Starts the refresh service and the API server with graceful shutdown support.

use std::sync::Arc;

use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use proxypool::api::ApiServer;
use proxypool::config::{Config, LogConfig, StoreBackend};
use proxypool::error::Result;
use proxypool::pipeline::Pipeline;
use proxypool::query::PoolQuery;
use proxypool::services::{RefreshHandle, RefreshService};
use proxypool::store::{MemoryStore, PgStore, ScoredStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration before tracing so LOG_LEVEL/LOG_FORMAT apply
    let config = Config::from_env()?;
    init_tracing(&config.log);

    info!("Starting proxypool");
    info!(
        targets = config.catalog.targets.len(),
        sources = config.catalog.sources.len(),
        "Configuration loaded"
    );

    let (store, pg) = open_store(&config).await?;

    let query = PoolQuery::new(
        store.clone(),
        config.catalog.targets.clone(),
        config.scoring.not_validated,
    );
    let pipeline = Arc::new(Pipeline::from_config(&config, store.clone()));

    // Start refresh service
    let (refresh_handle, refresh_shutdown) = RefreshHandle::new();
    let refresh_service = RefreshService::new(pipeline, config.schedule.clone());
    let refresh_task = tokio::spawn(async move {
        refresh_service.run(refresh_shutdown).await;
    });

    // Start API server
    let (shutdown_tx, api_shutdown) = watch::channel(false);
    let api_server = ApiServer::new(config.api.clone(), query, store.backend_name());
    let api_task = tokio::spawn(async move {
        if let Err(e) = api_server.run(api_shutdown).await {
            error!("API server error: {}", e);
        }
    });

    info!("API server started on {}", config.api_addr());

    // Wait for shutdown signal
    shutdown_signal().await;
    info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    refresh_handle.shutdown();

    let _ = tokio::join!(api_task, refresh_task);

    if let Some(pg) = pg {
        pg.close().await;
        info!("Database connections closed");
    }

    info!("Proxypool stopped");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("proxypool={level},tower_http={level}", level = log.level).into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if log.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn open_store(config: &Config) -> Result<(Arc<dyn ScoredStore>, Option<Arc<PgStore>>)> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store; the pool is lost on exit");
            let store: Arc<dyn ScoredStore> = Arc::new(MemoryStore::new());
            Ok((store, None))
        }
        StoreBackend::Postgres => {
            let store = Arc::new(PgStore::connect(config).await?);
            let latency = store.health_check().await?;
            let stats = store.pool_stats();
            info!(
                latency_ms = latency.as_millis() as u64,
                connections = stats.size,
                idle = stats.idle,
                "Connected to database"
            );

            store.run_migrations().await?;
            info!("Database migrations complete");

            let shared: Arc<dyn ScoredStore> = store.clone();
            Ok((shared, Some(store)))
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
