//! API routes

pub mod health;
pub mod subscriptions;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{
    auth::{require_auth, require_build_token},
    state::AppState,
};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Dashboard routes (JWT required) - under /api/v1
    let protected_api_routes = Router::new()
        // Static segment wins over :tenant_id
        .route("/subscriptions/admin/premium", get(subscriptions::list_premium))
        .route("/subscriptions/:tenant_id", get(subscriptions::get_subscription))
        .route("/subscriptions/:tenant_id/upgrade", post(subscriptions::upgrade))
        .route("/subscriptions/:tenant_id/cancel", post(subscriptions::cancel))
        .route(
            "/subscriptions/:tenant_id/mobile-app",
            post(subscriptions::request_mobile_app),
        )
        .layer(middleware::from_fn_with_state(auth_state.clone(), require_auth));

    // Build pipeline callback (shared build token, not JWT)
    let build_callback_routes = Router::new()
        .route(
            "/subscriptions/:tenant_id/mobile-app/build-result",
            post(subscriptions::report_build_result),
        )
        .layer(middleware::from_fn_with_state(auth_state, require_build_token));

    let api_v1_routes = Router::new()
        .merge(protected_api_routes)
        .merge(build_callback_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
