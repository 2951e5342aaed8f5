// src/server/mod.rs

//! Server-side components for keycheck.
//!
//! This module contains:
//! - `api_error` → JSON error bodies and status mapping
//! - `database`  → sqlx store over SQLite/Postgres
//! - `handlers`  → Axum HTTP handlers
//! - `logging`   → Request logging middleware and health body
//! - `routes`    → Router builder

pub mod api_error;
pub mod database;
pub mod handlers;
pub mod logging;
pub mod routes;

pub use api_error::{ApiError, ErrorCode};
pub use database::Database;
pub use handlers::{
    check_license_handler, create_license_handler, health_handler, license_info_handler,
    set_license_active_handler, AppState, CreateLicenseRequest, LicenseInfoRequest,
    LicenseInfoResponse, LicenseResponse, SetLicenseActiveRequest,
};
pub use logging::{request_logging_middleware, HealthResponse, REQUEST_ID_HEADER};
pub use routes::build_router;
