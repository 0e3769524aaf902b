use axum::{
    middleware,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::api::distributions::{self as handlers, ApiState};
use crate::auth::{auth_middleware, JwtHandler};
use crate::distribution::DistributionService;
use crate::middleware::request_logging;

/// Create the API router. Everything under `/api` requires a bearer token.
pub fn create_router(service: Arc<DistributionService>, jwt_handler: Arc<JwtHandler>) -> Router {
    let state = ApiState { service };

    let protected_routes = Router::new()
        .route(
            "/api/distributions",
            get(handlers::list_distributions).post(handlers::create_distribution),
        )
        .route(
            "/api/distributions/my-distributions",
            get(handlers::my_distributions),
        )
        .route(
            "/api/distributions/pending-review",
            get(handlers::pending_review),
        )
        .route("/api/distributions/:id", get(handlers::get_distribution))
        .route(
            "/api/distributions/:id/calculate",
            post(handlers::calculate),
        )
        .route(
            "/api/distributions/:id/submit-review",
            post(handlers::submit_for_review),
        )
        .route(
            "/api/distributions/:id/approve-asset-manager",
            post(handlers::approve_asset_manager),
        )
        .route(
            "/api/distributions/:id/approve-compliance",
            post(handlers::approve_compliance),
        )
        .route(
            "/api/distributions/:id/approve-admin",
            post(handlers::approve_admin),
        )
        .route("/api/distributions/:id/cancel", post(handlers::cancel))
        .route(
            "/api/distributions/:id/investors/:investor_id/initiate-payment",
            post(handlers::initiate_payment),
        )
        .route(
            "/api/distributions/:id/investors/:investor_id/mark-paid",
            post(handlers::mark_paid),
        )
        .route(
            "/api/distributions/:id/investors/:investor_id/mark-failed",
            post(handlers::mark_failed),
        )
        .route(
            "/api/distributions/:id/investors/:investor_id/form16",
            post(handlers::attach_form16),
        )
        .route(
            "/api/distributions/:id/investors/:investor_id/payments",
            get(handlers::payment_history),
        )
        .route_layer(middleware::from_fn_with_state(jwt_handler, auth_middleware))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .merge(protected_routes)
        .layer(middleware::from_fn(request_logging))
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}
