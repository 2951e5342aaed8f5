//! Standardized API error responses for all keycheck endpoints.
//!
//! # Response Format
//!
//! ```json
//! {
//!   "error": {
//!     "code": "INVALID_OR_EXPIRED",
//!     "message": "License is invalid or expired",
//!     "details": null
//!   }
//! }
//! ```
//!
//! Validation failures always use `INVALID_OR_EXPIRED` with the default
//! message, so a client cannot tell an unknown key from a bad hash.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::LicenseError;

/// Machine-readable error codes for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Request fields are missing or malformed
    InvalidParams,
    /// License key already exists (admin)
    DuplicateLicense,
    /// Admin key rejected
    Unauthorized,
    /// Any license authentication or state failure
    InvalidOrExpired,
    /// Admin lookup for an unknown license
    LicenseNotFound,
    /// Daily quota used up
    TooManyRequests,
    /// Store unavailable or failed
    StoreFailure,
    /// Server configuration error
    ConfigError,
    /// Unexpected internal server error
    InternalError,
}

impl ErrorCode {
    /// Returns the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidParams | ErrorCode::DuplicateLicense => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::InvalidOrExpired => StatusCode::FORBIDDEN,
            ErrorCode::LicenseNotFound => StatusCode::NOT_FOUND,
            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::StoreFailure | ErrorCode::ConfigError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a default human-readable message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParams => "Request parameters are missing or invalid",
            ErrorCode::DuplicateLicense => "A license with this key already exists",
            ErrorCode::Unauthorized => "Invalid administrative key",
            ErrorCode::InvalidOrExpired => "License is invalid or expired",
            ErrorCode::LicenseNotFound => "The requested license does not exist",
            ErrorCode::TooManyRequests => "Daily check limit reached",
            ErrorCode::StoreFailure => "Storage operation failed",
            ErrorCode::ConfigError => "Server configuration error",
            ErrorCode::InternalError => "An unexpected error occurred",
        }
    }
}

/// The inner error object containing code, message, and optional details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Standardized API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorBody,
}

impl ApiError {
    /// Creates a new API error with the default message for `code`.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: code.default_message().to_string(),
                details: None,
            },
        }
    }

    /// Creates a new API error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
                details: None,
            },
        }
    }

    /// Adds details to an existing error.
    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.error.code.status_code()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.error.code, self.error.message)
    }
}

impl std::error::Error for ApiError {}

impl From<LicenseError> for ApiError {
    fn from(err: LicenseError) -> Self {
        match err {
            LicenseError::InvalidParams(msg) => ApiError::with_message(ErrorCode::InvalidParams, msg),
            LicenseError::DuplicateLicense(key) => ApiError::with_message(
                ErrorCode::DuplicateLicense,
                format!("License '{key}' already exists"),
            )
            .details(serde_json::json!({ "licenseKey": key })),
            LicenseError::Unauthorized => ApiError::new(ErrorCode::Unauthorized),
            LicenseError::InvalidOrExpired => ApiError::new(ErrorCode::InvalidOrExpired),
            LicenseError::NotFound(key) => ApiError::with_message(
                ErrorCode::LicenseNotFound,
                format!("License '{key}' not found"),
            ),
            LicenseError::QuotaExceeded => ApiError::new(ErrorCode::TooManyRequests),
            // Internal details stay in the server log.
            LicenseError::StoreConflict(_) | LicenseError::StoreFailure(_) => {
                ApiError::new(ErrorCode::StoreFailure)
            }
            LicenseError::ConfigError(_) => ApiError::new(ErrorCode::ConfigError),
            LicenseError::NetworkError(_) => ApiError::new(ErrorCode::InternalError),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::with_message(ErrorCode::InvalidParams, rejection.body_text())
    }
}
