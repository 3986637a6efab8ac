use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::Deserialize;
use url::Url;

use crate::error::{PoolError, Result};
use crate::models::{CrawlSource, SourceSpec, TargetCatalog, TargetSpec};

/// Default user agent sent to listing sites and the reflection endpoint
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Application configuration, built once at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// Scored store backend and bucket names
    pub store: StoreConfig,
    /// Retry budget for store writes
    pub retry: RetryConfig,
    /// Worker pool size per pipeline stage
    pub workers: WorkerConfig,
    /// Reflection endpoint and per-call timeouts
    pub probe: ProbeConfig,
    /// Penalty and sentinel scores
    pub scoring: ScoringConfig,
    /// Periodic pipeline schedule
    pub schedule: ScheduleConfig,
    /// API server configuration
    pub api: ApiServerConfig,
    /// Logging configuration
    pub log: LogConfig,
    /// Targets, crawl sources and request headers
    pub catalog: Catalog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(PoolError::InvalidConfig(format!(
                "STORE_BACKEND must be postgres or memory, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Database name
    pub name: String,
    /// SSL mode (disable, require, prefer)
    pub ssl_mode: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections in pool
    pub min_connections: u32,
    /// Bucket holding raw crawl output
    pub candidate_bucket: String,
    /// Bucket holding proxies confirmed anonymous
    pub anonymous_bucket: String,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per store write, including the first
    pub max_attempts: u32,
    /// Upper bound of the random sleep between attempts
    pub max_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub crawl: usize,
    pub filter: usize,
    pub validate: usize,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Endpoint echoing the caller's IP
    pub reflect_url: Url,
    pub local_ip_attempts: u32,
    pub local_ip_timeout: Duration,
    pub crawl_timeout: Duration,
    pub anonymity_timeout: Duration,
    pub validate_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Score written when validation fails or times out
    pub time_exception: f64,
    /// Default upper bound for range queries
    pub not_validated: f64,
}

#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Pause between pipeline runs; `None` disables the schedule
    pub interval: Option<Duration>,
    pub run_on_start: bool,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 8000)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Proxies returned when a request omits `num`
    pub default_num: usize,
    /// Score ceiling used when a request omits `delay`
    pub default_delay: f64,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

/// Targets, crawl sources and outbound headers
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub headers: HeaderMap,
    pub targets: Arc<TargetCatalog>,
    pub sources: Vec<CrawlSource>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    targets: Vec<TargetSpec>,
    #[serde(default)]
    sources: Vec<SourceSpec>,
}

impl Catalog {
    /// Built-in catalog: the `ALL` target, no sources
    pub fn builtin() -> Self {
        Self {
            headers: default_headers(),
            targets: Arc::new(TargetCatalog::default()),
            sources: Vec::new(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PoolError::InvalidConfig(format!("cannot read catalog {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    /// Decode and compile a catalog document
    pub fn from_json(raw: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(raw)
            .map_err(|e| PoolError::InvalidConfig(format!("malformed catalog: {}", e)))?;

        let mut headers = default_headers();
        for (name, value) in file.headers {
            let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|_| {
                PoolError::InvalidConfig(format!("invalid header name: {}", name))
            })?;
            let value = HeaderValue::from_str(value.trim()).map_err(|_| {
                PoolError::InvalidConfig(format!("invalid value for header {}", name))
            })?;
            headers.insert(name, value);
        }

        let targets = file
            .targets
            .into_iter()
            .map(TargetSpec::compile)
            .collect::<Result<Vec<_>>>()?;

        let sources = file
            .sources
            .into_iter()
            .map(SourceSpec::compile)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            headers,
            targets: Arc::new(TargetCatalog::new(targets)?),
            sources,
        })
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    headers
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let reflect_raw = get_env_or("REFLECT_URL", "http://httpbin.org/ip");
        let reflect_url = Url::parse(reflect_raw.trim()).map_err(|e| {
            PoolError::InvalidConfig(format!("REFLECT_URL must be a valid URL: {}", e))
        })?;

        let catalog = match env::var("POOL_CATALOG") {
            Ok(path) if !path.trim().is_empty() => Catalog::from_file(path.trim())?,
            _ => Catalog::builtin(),
        };

        let refresh_secs: u64 = parse_env("REFRESH_INTERVAL", "1800")?;
        let scoring = ScoringConfig {
            time_exception: parse_env("SCORE_TIME_EXCEPTION", "30")?,
            not_validated: parse_env("SCORE_NOT_VALIDATED", "1000")?,
        };
        if scoring.time_exception < 0.0 || scoring.not_validated < 0.0 {
            return Err(PoolError::InvalidConfig(
                "scores must not be negative".into(),
            ));
        }

        Ok(Config {
            store: StoreConfig {
                backend: get_env_or("STORE_BACKEND", "postgres").parse()?,
                host: get_env_or("DB_HOST", "localhost"),
                port: parse_env("DB_PORT", "5432")?,
                user: get_env_or("DB_USER", "proxypool"),
                password: get_env_or("DB_PASSWORD", "proxypool"),
                name: get_env_or("DB_NAME", "proxypool"),
                ssl_mode: get_env_or("DB_SSLMODE", "disable"),
                max_connections: parse_env("DB_MAX_CONNECTIONS", "20")?,
                min_connections: parse_env("DB_MIN_CONNECTIONS", "2")?,
                candidate_bucket: get_env_or("POOL_CANDIDATE_BUCKET", "candidate"),
                anonymous_bucket: get_env_or("POOL_ANONYMOUS_BUCKET", "anonymous"),
            },
            retry: RetryConfig {
                max_attempts: parse_env::<u32>("STORE_RETRY_ATTEMPTS", "3")?.max(1),
                max_wait: Duration::from_millis(parse_env("STORE_RETRY_MAX_WAIT_MS", "2000")?),
            },
            workers: WorkerConfig {
                crawl: parse_env::<usize>("CRAWL_WORKERS", "8")?.max(1),
                filter: parse_env::<usize>("FILTER_WORKERS", "32")?.max(1),
                validate: parse_env::<usize>("VALIDATE_WORKERS", "64")?.max(1),
            },
            probe: ProbeConfig {
                reflect_url,
                local_ip_attempts: parse_env::<u32>("LOCAL_IP_ATTEMPTS", "3")?.max(1),
                local_ip_timeout: secs_env("LOCAL_IP_TIMEOUT", "5")?,
                crawl_timeout: secs_env("CRAWL_TIMEOUT", "20")?,
                anonymity_timeout: secs_env("ANONYMITY_TIMEOUT", "10")?,
                validate_timeout: secs_env("VALIDATE_TIMEOUT", "10")?,
            },
            scoring,
            schedule: ScheduleConfig {
                interval: (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs)),
                run_on_start: parse_env("REFRESH_ON_START", "true")?,
            },
            api: ApiServerConfig {
                port: parse_env("API_PORT", "8000")?,
                host: get_env_or("API_HOST", "0.0.0.0"),
                default_num: parse_env("API_DEFAULT_NUM", "5")?,
                default_delay: parse_env("API_DEFAULT_DELAY", "10")?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
            catalog,
        })
    }

    /// Get the database connection URL
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.store.user,
            self.store.password,
            self.store.host,
            self.store.port,
            self.store.name,
            self.store.ssl_mode
        )
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| PoolError::InvalidConfig(format!("{} has an invalid value", key)))
}

fn secs_env(key: &str, default: &str) -> Result<Duration> {
    let secs: u64 = parse_env(key, default)?;
    if secs == 0 {
        return Err(PoolError::InvalidConfig(format!(
            "{} must be at least one second",
            key
        )));
    }
    Ok(Duration::from_secs(secs))
}
