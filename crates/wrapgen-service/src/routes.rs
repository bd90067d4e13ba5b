//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{credits, generate, health, tasks};
use crate::state::AppState;

/// Maximum concurrent requests for generation submissions.
/// Each accepted submission spawns a provider-bound worker, so this is kept
/// tighter than the general API limit.
const GENERATE_MAX_CONCURRENT_REQUESTS: usize = 32;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 64;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Generation (JWT auth)
/// - `POST /v1/wraps/generate` - Submit a wrap generation
///
/// ## Tasks (JWT auth)
/// - `POST /v1/tasks/status` - Poll a task's status
/// - `GET /v1/tasks` - List the user's tasks
///
/// ## Credits (JWT auth; top-up requires the admin key)
/// - `GET /v1/credits/balance` - Get current balance
/// - `GET /v1/credits/ledger` - List ledger history
/// - `POST /v1/credits/topup` - Credit an account (admin)
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    // Build CORS layer
    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    // Generation submissions get their own, tighter concurrency limit.
    let generate_routes = Router::new()
        .route("/generate", post(generate::generate_wrap))
        .layer(ConcurrencyLimitLayer::new(GENERATE_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Tasks
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/status", post(tasks::task_status))
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/ledger", get(credits::list_ledger))
        .route("/credits/topup", post(credits::top_up))
        // Generation routes (with their own concurrency limit)
        .nest("/wraps", generate_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
