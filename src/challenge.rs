//! Challenge/response hash binding a license key, a timestamp and a secret.
//!
//! A client proves possession of a license by sending
//! `hex(SHA-256(license_key || "-" || timestamp || "-" || secret))` together with
//! the exact timestamp string it hashed. The server recomputes the digest and
//! rejects timestamps that fall outside the replay window.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use constant_time_eq::constant_time_eq;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default replay window: a captured request is useless after five minutes.
pub const DEFAULT_REPLAY_WINDOW_SECS: i64 = 300;

/// Why a challenge was rejected. Never shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChallengeError {
    #[error("timestamp could not be parsed")]
    MalformedTimestamp,
    #[error("timestamp is outside the replay window")]
    StaleTimestamp,
    #[error("client hash does not match")]
    HashMismatch,
}

/// Freshness parameters for challenge verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeSettings {
    /// Maximum accepted age of a timestamp.
    pub replay_window: Duration,
    /// How far in the future a timestamp may be.
    pub clock_skew: Duration,
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            replay_window: Duration::seconds(DEFAULT_REPLAY_WINDOW_SECS),
            clock_skew: Duration::zero(),
        }
    }
}

/// Compute the lowercase hex digest a client must present.
pub fn compute_client_hash(license_key: &str, timestamp: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(license_key.as_bytes());
    hasher.update(b"-");
    hasher.update(timestamp.as_bytes());
    hasher.update(b"-");
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Parse a client timestamp as an absolute UTC instant.
///
/// Accepts RFC 3339 (`2025-01-01T12:00:00.000Z`, offsets allowed) and
/// offset-less ISO 8601 datetimes, which are read as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ChallengeError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ChallengeError::MalformedTimestamp)
}

/// Verify a client challenge against `secret` at instant `now`.
///
/// Pure: no I/O and no side effects.
pub fn verify(
    license_key: &str,
    timestamp: &str,
    client_hash: &str,
    secret: &str,
    now: DateTime<Utc>,
    settings: &ChallengeSettings,
) -> Result<(), ChallengeError> {
    let issued_at = parse_timestamp(timestamp)?;

    if now - issued_at > settings.replay_window {
        return Err(ChallengeError::StaleTimestamp);
    }
    if issued_at - now > settings.clock_skew {
        return Err(ChallengeError::StaleTimestamp);
    }

    let expected = compute_client_hash(license_key, timestamp, secret);
    if constant_time_eq(expected.as_bytes(), client_hash.as_bytes()) {
        Ok(())
    } else {
        Err(ChallengeError::HashMismatch)
    }
}
