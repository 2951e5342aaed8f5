//! Per-license, per-day quota counter.
//!
//! The increment-and-check itself is delegated to
//! [`LicenseStore::try_consume_quota`], which must be a single atomic step.
//! This layer adds bounded retries for transient store contention; a retried
//! attempt can never double count because a conflicting attempt writes nothing.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use tracing::{debug, warn};

use crate::errors::LicenseError;
use crate::license::usage_day;
use crate::store::LicenseStore;

/// Default number of attempts for a contended quota update.
pub const DEFAULT_QUOTA_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    #[error("daily quota exceeded")]
    QuotaExceeded,
    #[error(transparent)]
    Store(#[from] LicenseError),
}

impl From<QuotaError> for LicenseError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::QuotaExceeded => LicenseError::QuotaExceeded,
            QuotaError::Store(e) => e,
        }
    }
}

#[derive(Clone)]
pub struct QuotaCounter {
    store: Arc<dyn LicenseStore>,
    max_attempts: u32,
    backoff: StdDuration,
}

impl QuotaCounter {
    pub fn new(store: Arc<dyn LicenseStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_QUOTA_ATTEMPTS,
            backoff: StdDuration::from_millis(10),
        }
    }

    /// Override retry behaviour. `max_attempts` is clamped to at least one.
    pub fn with_retries(mut self, max_attempts: u32, backoff: StdDuration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Consume one unit of `license_key`'s quota for `day`.
    ///
    /// Returns the checks remaining after this one (`limit - count`).
    pub async fn consume(
        &self,
        license_key: &str,
        limit: u32,
        day: NaiveDate,
    ) -> Result<u32, QuotaError> {
        let mut attempt = 1;
        loop {
            match self.store.try_consume_quota(license_key, day, limit).await {
                Ok(Some(count)) => {
                    debug!(license_key, %day, count, limit, "quota consumed");
                    return Ok(limit.saturating_sub(count));
                }
                Ok(None) => return Err(QuotaError::QuotaExceeded),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(
                        license_key,
                        attempt,
                        error = %e,
                        "quota update contended, retrying"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(QuotaError::Store(LicenseError::StoreFailure(format!(
                        "quota update still contended after {attempt} attempts: {e}"
                    ))));
                }
                Err(e) => return Err(QuotaError::Store(e)),
            }
        }
    }

    /// [`consume`](Self::consume) for the UTC day containing `now`.
    pub async fn consume_at(
        &self,
        license_key: &str,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<u32, QuotaError> {
        self.consume(license_key, limit, usage_day(now)).await
    }
}
