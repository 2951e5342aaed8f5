//! Axum handlers for the keycheck HTTP surface.
//!
//! Handlers are thin: they unpack JSON, call into [`ValidationService`] or
//! [`AdminService`], and shape the response. All errors go through
//! [`ApiError`].

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::admin::{AdminService, LicenseInfo};
use crate::license::{License, LicenseStatus};
use crate::server::api_error::ApiError;
use crate::server::logging::HealthResponse;
use crate::store::LicenseStore;
use crate::validation::{CheckLicenseRequest, ValidationResult, ValidationService};

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub validation: Arc<ValidationService>,
    pub admin: Arc<AdminService>,
    /// Used by the health check only; services hold their own handle.
    pub store: Arc<dyn LicenseStore>,
    pub db_type: String,
}

/// Unwrap a JSON body, turning decode failures into `INVALID_PARAMS`.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => {
            warn!("Rejected request body: {}", rejection.body_text());
            Err(ApiError::from(rejection))
        }
    }
}

/// `POST /check-license`
pub async fn check_license_handler(
    State(state): State<AppState>,
    payload: Result<Json<CheckLicenseRequest>, JsonRejection>,
) -> Result<Json<ValidationResult>, ApiError> {
    let request = json_body(payload)?;
    let result = state.validation.validate(&request).await?;
    Ok(Json(result))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLicenseRequest {
    pub admin_key: Option<String>,
    pub license_key: Option<String>,
    pub validity_days: Option<i64>,
    pub checks_per_day: Option<i64>,
}

/// A license as shown to operators. The secret is only present in the
/// response to `POST /create-license`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseResponse {
    pub license_key: String,
    pub status: LicenseStatus,
    pub valid_until: DateTime<Utc>,
    pub checks_per_day: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

impl LicenseResponse {
    fn with_secret(license: License) -> Self {
        Self {
            license_key: license.license_key,
            status: license.status,
            valid_until: license.valid_until,
            checks_per_day: license.checks_per_day,
            created_at: license.created_at,
            secret: license.secret,
        }
    }

    fn redacted(license: License) -> Self {
        Self {
            secret: None,
            ..Self::with_secret(license)
        }
    }
}

/// `POST /create-license`
pub async fn create_license_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateLicenseRequest>, JsonRejection>,
) -> Result<Json<LicenseResponse>, ApiError> {
    let request = json_body(payload)?;
    let license = state
        .admin
        .create_license(
            request.admin_key.as_deref(),
            request.license_key.as_deref(),
            request.validity_days,
            request.checks_per_day,
        )
        .await?;
    Ok(Json(LicenseResponse::with_secret(license)))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLicenseActiveRequest {
    pub admin_key: Option<String>,
    pub license_key: Option<String>,
    pub active: Option<bool>,
}

/// `POST /set-license-active`
pub async fn set_license_active_handler(
    State(state): State<AppState>,
    payload: Result<Json<SetLicenseActiveRequest>, JsonRejection>,
) -> Result<Json<LicenseResponse>, ApiError> {
    let request = json_body(payload)?;
    let license = state
        .admin
        .set_license_active(
            request.admin_key.as_deref(),
            request.license_key.as_deref(),
            request.active,
        )
        .await?;
    Ok(Json(LicenseResponse::redacted(license)))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseInfoRequest {
    pub admin_key: Option<String>,
    pub license_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseInfoResponse {
    #[serde(flatten)]
    pub license: LicenseResponse,
    pub usage_day: NaiveDate,
    pub checks_used_today: u32,
    pub checks_remaining_today: u32,
}

/// `POST /license-info`
pub async fn license_info_handler(
    State(state): State<AppState>,
    payload: Result<Json<LicenseInfoRequest>, JsonRejection>,
) -> Result<Json<LicenseInfoResponse>, ApiError> {
    let request = json_body(payload)?;
    let LicenseInfo {
        license,
        usage_day,
        checks_used_today,
    } = state
        .admin
        .get_license(request.admin_key.as_deref(), request.license_key.as_deref())
        .await?;

    let checks_remaining_today = license.checks_per_day.saturating_sub(checks_used_today);
    Ok(Json(LicenseInfoResponse {
        license: LicenseResponse::redacted(license),
        usage_day,
        checks_used_today,
        checks_remaining_today,
    }))
}

/// `GET /health`
///
/// Always answers 200 while the process is up; the body reports whether the
/// store responded.
pub async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let connected = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Health check could not reach the store: {e}");
            false
        }
    };
    (
        StatusCode::OK,
        Json(HealthResponse::new(connected, &state.db_type)),
    )
}
