// Library interface for the bot service - exposes modules for testing

pub mod circuit_breaker;
pub mod commands;
pub mod config;
pub mod cryptopay;
pub mod db;
pub mod deposits;
pub mod domain;
pub mod errors;
pub mod games;
pub mod handlers;
pub mod house;
pub mod ledger;
pub mod rates;
pub mod repository;
pub mod retry;
pub mod sessions;
pub mod state;
pub mod withdrawals;

use axum::{
    routing::{get, post},
    Router,
};
use state::AppState;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        .route("/health/detailed", get(handlers::health::detailed_health))
        .route("/keepalive", get(handlers::health::keepalive))
        // Provider webhook
        .route("/webhook/cryptopay", post(handlers::webhook::cryptopay_webhook))
        // Public stats
        .route("/stats", get(handlers::stats::stats))
        // Metrics
        .route("/metrics", get(handlers::metrics::metrics_handler))
        // State
        .with_state(state)
        // Middleware
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}
