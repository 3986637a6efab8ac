use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

use super::{now_epoch, ReconnectGate, ScoredStore};
use crate::config::Config;
use crate::error::{PoolError, Result};
use crate::models::{Proxy, ScoreIndex};

#[derive(Debug, Clone)]
struct PoolSettings {
    url: String,
    min_connections: u32,
    max_connections: u32,
}

impl PoolSettings {
    async fn connect(&self) -> Result<PgPool> {
        PgPoolOptions::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(30 * 60)) // 30 minutes
            .max_lifetime(Duration::from_secs(60 * 60)) // 1 hour
            .connect(&self.url)
            .await
            .map_err(|e| PoolError::StoreUnavailable(e.to_string()))
    }
}

/// PostgreSQL-backed store
///
/// The live pool sits behind an `ArcSwap` so `reconnect` can replace it while
/// other tasks keep using the old handle until their query finishes. Workers
/// failing together share one reconnect through the gate.
pub struct PgStore {
    pool: ArcSwap<PgPool>,
    settings: PoolSettings,
    reconnect_gate: ReconnectGate,
}

impl PgStore {
    /// Create a new database connection pool
    pub async fn connect(config: &Config) -> Result<Self> {
        info!(
            host = %config.store.host,
            port = %config.store.port,
            database = %config.store.name,
            "Connecting to database"
        );

        let settings = PoolSettings {
            url: config.database_url(),
            min_connections: config.store.min_connections,
            max_connections: config.store.max_connections,
        };
        let pool = settings.connect().await?;

        info!("Database connection pool established");

        Ok(Self {
            pool: ArcSwap::from_pointee(pool),
            settings,
            reconnect_gate: ReconnectGate::new(),
        })
    }

    /// Get the current connection pool
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.load_full()
    }

    /// Check if the database is healthy
    pub async fn health_check(&self) -> Result<Duration> {
        let start = std::time::Instant::now();
        let pool = self.pool();

        sqlx::query("SELECT 1").execute(&*pool).await?;

        Ok(start.elapsed())
    }

    /// Get pool statistics
    pub fn pool_stats(&self) -> PoolStats {
        let pool = self.pool();
        PoolStats {
            size: pool.size(),
            idle: pool.num_idle() as u32,
        }
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        super::migrations::run_migrations(&*self.pool()).await?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Close the connection pool
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool().close().await;
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub size: u32,
    pub idle: u32,
}

fn decode_rows(bucket: &str, rows: Vec<String>) -> Vec<Proxy> {
    rows.into_iter()
        .filter_map(|raw| match raw.parse::<Proxy>() {
            Ok(proxy) => Some(proxy),
            Err(e) => {
                warn!(bucket = %bucket, error = %e, "Skipping malformed stored proxy");
                None
            }
        })
        .collect()
}

#[async_trait]
impl ScoredStore for PgStore {
    async fn add_member(&self, bucket: &str, proxy: &Proxy) -> Result<()> {
        let pool = self.pool();
        sqlx::query(
            "INSERT INTO pool_members (bucket, proxy) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(bucket)
        .bind(proxy.url())
        .execute(&*pool)
        .await?;

        Ok(())
    }

    async fn members(&self, bucket: &str) -> Result<Vec<Proxy>> {
        let pool = self.pool();
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT proxy FROM pool_members WHERE bucket = $1 ORDER BY proxy",
        )
        .bind(bucket)
        .fetch_all(&*pool)
        .await?;

        Ok(decode_rows(bucket, rows))
    }

    async fn replace_members(&self, bucket: &str, proxies: &[Proxy]) -> Result<()> {
        let pool = self.pool();
        let urls: Vec<String> = proxies.iter().map(Proxy::url).collect();

        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM pool_members WHERE bucket = $1")
            .bind(bucket)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO pool_members (bucket, proxy)
            SELECT $1, proxy FROM UNNEST($2::text[]) AS t(proxy)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(bucket)
        .bind(&urls)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }

    async fn remove_member(&self, bucket: &str, proxy: &Proxy) -> Result<bool> {
        let pool = self.pool();
        let result = sqlx::query("DELETE FROM pool_members WHERE bucket = $1 AND proxy = $2")
            .bind(bucket)
            .bind(proxy.url())
            .execute(&*pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_score(&self, index: &ScoreIndex, proxy: &Proxy, score: f64) -> Result<()> {
        let pool = self.pool();

        sqlx::query(
            r#"
            INSERT INTO pool_scores (bucket, proxy, score, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (bucket, proxy)
            DO UPDATE SET score = EXCLUDED.score, updated_at = NOW()
            "#,
        )
        .bind(&index.bucket)
        .bind(proxy.url())
        .bind(score)
        .execute(&*pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO pool_mtimes (key, mtime)
            VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET mtime = EXCLUDED.mtime
            "#,
        )
        .bind(&index.mtime_key)
        .bind(now_epoch())
        .execute(&*pool)
        .await?;

        Ok(())
    }

    async fn range_query(&self, bucket: &str, min: f64, max: f64) -> Result<Vec<Proxy>> {
        let pool = self.pool();
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT proxy FROM pool_scores
            WHERE bucket = $1 AND score >= $2 AND score <= $3
            ORDER BY score ASC
            "#,
        )
        .bind(bucket)
        .bind(min)
        .bind(max)
        .fetch_all(&*pool)
        .await?;

        Ok(decode_rows(bucket, rows))
    }

    async fn mtime(&self, mtime_key: &str) -> Result<Option<i64>> {
        let pool = self.pool();
        let mtime = sqlx::query_scalar::<_, i64>("SELECT mtime FROM pool_mtimes WHERE key = $1")
            .bind(mtime_key)
            .fetch_optional(&*pool)
            .await?;

        Ok(mtime)
    }

    async fn reconnect(&self) -> Result<()> {
        self.reconnect_gate
            .run(|| async {
                let fresh = self.settings.connect().await?;
                // The replaced pool drains in the background once its in-flight queries finish.
                let stale = self.pool.swap(Arc::new(fresh));
                tokio::spawn(async move { stale.close().await });

                info!("Database connection pool re-established");
                Ok(())
            })
            .await
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
