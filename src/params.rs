//! Request parameter shape checks.

use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::errors::LicenseError;

lazy_static! {
    static ref LICENSE_KEY_RE: Regex =
        Regex::new(r"^[A-Za-z0-9._:-]{1,128}$").expect("license key pattern is valid");
    static ref CLIENT_HASH_RE: Regex =
        Regex::new(r"^[0-9a-fA-F]{64}$").expect("client hash pattern is valid");
}

/// Longest timestamp string accepted before parsing.
pub const MAX_TIMESTAMP_LEN: usize = 64;

/// A parameter that failed its shape check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamError {
    pub field: String,
    pub message: String,
}

impl ParamError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ParamError {}

impl From<ParamError> for LicenseError {
    fn from(err: ParamError) -> Self {
        LicenseError::InvalidParams(err.to_string())
    }
}

pub type ParamResult<T> = Result<T, ParamError>;

/// Unwrap a required field, rejecting missing or blank values.
pub fn require<'a>(value: Option<&'a str>, field_name: &str) -> ParamResult<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        Some(_) => Err(ParamError::new(field_name, "cannot be empty")),
        None => Err(ParamError::new(field_name, "is required")),
    }
}

/// License keys: 1-128 characters of `[A-Za-z0-9._:-]`.
///
/// ```
/// use keycheck::params::validate_license_key;
///
/// assert!(validate_license_key("LIC-ABCD-1234", "key").is_ok());
/// assert!(validate_license_key("has space", "key").is_err());
/// ```
pub fn validate_license_key(value: &str, field_name: &str) -> ParamResult<()> {
    if LICENSE_KEY_RE.is_match(value) {
        Ok(())
    } else {
        Err(ParamError::new(
            field_name,
            "must be 1-128 characters of letters, digits, '.', '_', ':' or '-'",
        ))
    }
}

/// Client hashes are SHA-256 digests: exactly 64 hex characters.
pub fn validate_client_hash(value: &str, field_name: &str) -> ParamResult<()> {
    if CLIENT_HASH_RE.is_match(value) {
        Ok(())
    } else {
        Err(ParamError::new(field_name, "must be 64 hexadecimal characters"))
    }
}

pub fn validate_timestamp_shape(value: &str, field_name: &str) -> ParamResult<()> {
    if value.len() > MAX_TIMESTAMP_LEN {
        Err(ParamError::new(
            field_name,
            format!("must be at most {MAX_TIMESTAMP_LEN} characters"),
        ))
    } else {
        Ok(())
    }
}

/// Require `value` to lie in `min..=max`.
pub fn validate_range(value: i64, min: i64, max: i64, field_name: &str) -> ParamResult<()> {
    if value < min || value > max {
        Err(ParamError::new(
            field_name,
            format!("must be between {min} and {max}"),
        ))
    } else {
        Ok(())
    }
}
