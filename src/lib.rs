//! Proxypool - self-refreshing pool of anonymous HTTP proxies
//!
//! Candidates are crawled from listing pages, checked for anonymity against a
//! reflection endpoint and timed against each configured target site. Callers
//! ask for "N proxies good for site X" and receive a shuffled sample of the
//! fastest ones.
//!
//! ## Features
//!
//! - Rule-driven extraction (single selector, table cells, labelled rows)
//! - Bounded concurrent anonymity probing and per-target latency scoring
//! - PostgreSQL or in-memory scored store with retried writes
//! - Periodic refresh and a small JSON API

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod services;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{PoolError, Result};
