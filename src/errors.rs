//! Error types shared across the keycheck crate.

use thiserror::Error;

/// Crate-wide error type.
///
/// Validation-path failures are deliberately coarse: a client only ever sees
/// `InvalidOrExpired`, whichever sub-check actually failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LicenseError {
    /// Request fields are missing or malformed.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The administrative key did not match.
    #[error("unauthorized")]
    Unauthorized,

    /// Unknown license, bad hash, stale timestamp, inactive or expired license.
    #[error("license is invalid or expired")]
    InvalidOrExpired,

    /// The daily validation quota is used up.
    #[error("daily quota exceeded")]
    QuotaExceeded,

    /// A license with this key already exists.
    #[error("license key already exists: {0}")]
    DuplicateLicense(String),

    /// Admin lookup for a key that does not exist.
    #[error("license not found: {0}")]
    NotFound(String),

    /// Transient contention in the store; safe to retry.
    #[error("store conflict: {0}")]
    StoreConflict(String),

    /// The store is unavailable or returned an unexpected error.
    #[error("store failure: {0}")]
    StoreFailure(String),

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Client-side transport failure.
    #[error("network error: {0}")]
    NetworkError(String),
}

impl LicenseError {
    /// Whether retrying the same store operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LicenseError::StoreConflict(_))
    }
}

impl From<reqwest::Error> for LicenseError {
    fn from(err: reqwest::Error) -> Self {
        LicenseError::NetworkError(err.to_string())
    }
}

/// Convenient alias for results in this crate.
pub type LicenseResult<T> = Result<T, LicenseError>;
