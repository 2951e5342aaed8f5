use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::handlers::{
    check_license_handler, create_license_handler, health_handler, license_info_handler,
    set_license_active_handler, AppState,
};
use crate::server::logging::request_logging_middleware;

/// Build the application router.
///
/// # Routes
///
/// ## Client
/// - `POST /check-license` - Challenge/response validation, consumes one daily check
///
/// ## Admin (admin key in the body)
/// - `POST /create-license` - Issue a license
/// - `POST /set-license-active` - Set or clear the inactive flag
/// - `POST /license-info` - License record and today's usage
///
/// ## Operations
/// - `GET /health` - Store connectivity
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/check-license", post(check_license_handler))
        .route("/create-license", post(create_license_handler))
        .route("/set-license-active", post(set_license_active_handler))
        .route("/license-info", post(license_info_handler))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn(request_logging_middleware))
        .with_state(state)
}
