//! Periodic pool refresh
//!
//! Runs the crawl → filter → validate pipeline once at startup (optional) and
//! then on a fixed interval until shut down.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, instrument};

use crate::config::ScheduleConfig;
use crate::pipeline::{Pipeline, PipelineReport};

/// Refresh service
pub struct RefreshService {
    pipeline: Arc<Pipeline>,
    schedule: ScheduleConfig,
    completed: AtomicU64,
}

impl RefreshService {
    pub fn new(pipeline: Arc<Pipeline>, schedule: ScheduleConfig) -> Self {
        Self {
            pipeline,
            schedule,
            completed: AtomicU64::new(0),
        }
    }

    /// Pipeline runs finished so far
    pub fn completed_runs(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Run the refresh service until `shutdown` flips to true
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        match self.schedule.interval {
            Some(every) => info!("Starting refresh service ({}s interval)", every.as_secs()),
            None => info!("Starting refresh service (periodic refresh disabled)"),
        }

        if self.schedule.run_on_start {
            tokio::select! {
                _ = self.refresh() => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    info!("Refresh service shutting down");
                    return;
                }
            }
        }

        let Some(every) = self.schedule.interval else {
            wait_for_shutdown(&mut shutdown).await;
            info!("Refresh service shutting down");
            return;
        };

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.refresh() => {}
                        _ = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        info!("Refresh service shutting down");
    }

    async fn refresh(&self) -> PipelineReport {
        let report = self.pipeline.run_once().await;
        self.completed.fetch_add(1, Ordering::Relaxed);

        info!(
            candidates = report.crawl.candidates,
            failed_sources = report.crawl.failed_sources,
            anonymous = report.filter.as_ref().map(|f| f.anonymous),
            scored = report.validate.as_ref().map(|v| v.tasks),
            "Pool refreshed"
        );
        report
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            // Sender gone; nobody can ask us to stop any more.
            std::future::pending::<()>().await;
        }
    }
}

/// Handle for managing the refresh service
pub struct RefreshHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl RefreshHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for RefreshHandle {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TargetCatalog;
    use crate::pipeline::{AnonymityFilter, Crawler, ReflectSettings, Validator};
    use crate::store::{Buckets, MemoryStore, RetryPolicy, RetryingStore};
    use crate::test_support::dead_addr;
    use reqwest::header::HeaderMap;
    use std::time::Duration;
    use url::Url;

    async fn idle_pipeline() -> Arc<Pipeline> {
        let store = RetryingStore::new(Arc::new(MemoryStore::new()), RetryPolicy::default());
        let reflect = dead_addr().await;

        Arc::new(Pipeline::new(
            Vec::new(),
            Crawler::new(
                store.clone(),
                Buckets::default(),
                HeaderMap::new(),
                Duration::from_secs(1),
                1,
            ),
            AnonymityFilter::new(
                store.clone(),
                Buckets::default(),
                HeaderMap::new(),
                ReflectSettings {
                    url: Url::parse(&format!("http://{}/ip", reflect)).unwrap(),
                    local_ip_attempts: 1,
                    local_ip_timeout: Duration::from_millis(200),
                    probe_timeout: Duration::from_millis(200),
                },
                1,
            ),
            Validator::new(
                store,
                Buckets::default(),
                HeaderMap::new(),
                Arc::new(TargetCatalog::default()),
                Duration::from_millis(200),
                30.0,
                1,
            ),
        ))
    }

    #[tokio::test]
    async fn test_refresh_runs_on_interval_until_shutdown() {
        let service = Arc::new(RefreshService::new(
            idle_pipeline().await,
            ScheduleConfig {
                interval: Some(Duration::from_millis(50)),
                run_on_start: true,
            },
        ));
        let (handle, shutdown) = RefreshHandle::new();

        let task = tokio::spawn({
            let service = service.clone();
            async move { service.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(400)).await;
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();

        assert!(service.completed_runs() >= 2);
    }

    #[tokio::test]
    async fn test_refresh_disabled_only_runs_on_start() {
        let service = Arc::new(RefreshService::new(
            idle_pipeline().await,
            ScheduleConfig {
                interval: None,
                run_on_start: true,
            },
        ));
        let (handle, shutdown) = RefreshHandle::new();

        let task = tokio::spawn({
            let service = service.clone();
            async move { service.run(shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(service.completed_runs(), 1);

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
