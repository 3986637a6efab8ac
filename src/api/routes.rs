//! API route definitions

use axum::routing::get;
use axum::Router;

use super::handlers;
use super::server::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/proxylist",
            get(handlers::proxylist::get_proxylist).post(handlers::proxylist::post_proxylist),
        )
        .fallback(handlers::health::api_doc)
        .with_state(state)
}
