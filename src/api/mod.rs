//! HTTP front end
//!
//! A thin JSON wrapper over [`crate::query::PoolQuery`].

pub mod handlers;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
