//! API Router configuration

use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        // Policies
        .route(
            "/policies",
            get(handlers::list_policies).post(handlers::save_policy),
        )
        .route("/policies/:id", get(handlers::get_policy))
        .route("/policies/:id/activate", post(handlers::activate_policy))
        .route("/policies/:id/unlock", post(handlers::unlock_policy))
        .route("/policies/:id/versions", get(handlers::list_versions))
        .route(
            "/policies/:id/versions/:version_id",
            get(handlers::get_version),
        )
        .route("/policy-versions/active", get(handlers::get_active_version))
        // Verification requests
        .route(
            "/verification-requests",
            get(handlers::list_requests).post(handlers::submit_request),
        )
        .route("/verification-requests/:id", get(handlers::get_request))
        .route(
            "/verification-requests/:id/decide",
            post(handlers::decide_request),
        )
        // Audit
        .route("/audit", get(handlers::query_audit))
        // SLA
        .route("/escalations/stream", get(handlers::stream_escalations))
        .route("/sla/sweep", post(handlers::run_sweep));

    let mut router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.request_timeout_secs,
        )))
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}
