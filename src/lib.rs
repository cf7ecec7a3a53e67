//! sacco_ledger Library
//!
//! Member accounts, loans and the HTTP surface over them. Re-exports
//! modules for integration testing and the binary.

use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

pub mod aggregate;
pub mod api;
pub mod audit;
pub mod config;
pub mod domain;
mod error;
pub mod handlers;
pub mod jobs;
pub mod notifications;
pub mod seed;
pub mod store;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use domain::{Amount, AmountError, Balance, DomainError, DomainEvent, OperationContext, Role};
pub use handlers::Services;

/// Build the application router
pub fn build_app(services: Services) -> Router {
    // Layers run last-added first: logging -> context -> handler
    let api_routes = api::create_router()
        .layer(middleware::from_fn(api::middleware::context_middleware))
        .layer(middleware::from_fn(api::middleware::logging_middleware));

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(services)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
