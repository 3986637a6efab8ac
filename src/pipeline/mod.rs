//! The refresh pipeline: crawl, then filter, then validate
//!
//! Stages run strictly one after another. Inside a stage every unit of work
//! (source, candidate, proxy × target) is independent and fanned out over a
//! bounded `buffer_unordered` pool sized by the stage's worker setting.

mod anonymity;
mod crawler;
mod extract;
mod http;
mod validator;

pub use anonymity::{parse_reflected_ip, AnonymityFilter, FilterReport, ReflectSettings};
pub use crawler::{CrawlReport, Crawler};
pub use extract::extract;
pub use validator::{ValidateReport, Validator};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, instrument};

use crate::config::Config;
use crate::models::CrawlSource;
use crate::store::{RetryPolicy, RetryingStore, ScoredStore};

/// Per-stage results of one pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub crawl: CrawlReport,
    /// `None` when the filter stage aborted
    pub filter: Option<FilterReport>,
    /// `None` when the validation stage aborted
    pub validate: Option<ValidateReport>,
    pub elapsed: Duration,
}

pub struct Pipeline {
    sources: Vec<CrawlSource>,
    crawler: Crawler,
    filter: AnonymityFilter,
    validator: Validator,
}

impl Pipeline {
    pub fn new(
        sources: Vec<CrawlSource>,
        crawler: Crawler,
        filter: AnonymityFilter,
        validator: Validator,
    ) -> Self {
        Self {
            sources,
            crawler,
            filter,
            validator,
        }
    }

    pub fn from_config(config: &Config, store: Arc<dyn ScoredStore>) -> Self {
        let store = RetryingStore::new(store, RetryPolicy::from_config(&config.retry));

        Self::new(
            config.catalog.sources.clone(),
            Crawler::from_config(config, store.clone()),
            AnonymityFilter::from_config(config, store.clone()),
            Validator::from_config(config, store),
        )
    }

    /// Run every stage once.
    ///
    /// A filter failure (no local IP baseline) only skips filtering; the
    /// validator still rescores whatever the anonymous bucket holds.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> PipelineReport {
        let started = Instant::now();

        let crawl = self.crawler.crawl(&self.sources).await;

        let filter = match self.filter.filter_anonymous().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Anonymity filter aborted");
                None
            }
        };

        let validate = match self.validator.validate().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "Validation aborted");
                None
            }
        };

        let report = PipelineReport {
            crawl,
            filter,
            validate,
            elapsed: started.elapsed(),
        };
        info!(elapsed_ms = report.elapsed.as_millis() as u64, "Pipeline run complete");
        report
    }
}
