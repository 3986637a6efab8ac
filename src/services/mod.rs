//! Background services

pub mod refresh;

pub use refresh::{RefreshHandle, RefreshService};
