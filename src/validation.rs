//! The license validation path.
//!
//! Steps run in a fixed order and short-circuit: shape check, record lookup,
//! challenge verification, state evaluation, quota consumption. Only the last
//! step writes, so a request rejected earlier never consumes quota.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audit::{log_license_event, LicenseEvent};
use crate::cache::LicenseCache;
use crate::challenge::{self, ChallengeSettings};
use crate::clock::Clock;
use crate::errors::{LicenseError, LicenseResult};
use crate::license::{evaluate, License, LicenseState};
use crate::params::{require, validate_client_hash, validate_license_key, validate_timestamp_shape};
use crate::quota::{QuotaCounter, QuotaError};
use crate::store::LicenseStore;

/// Body of `POST /check-license`.
///
/// Every field is optional at the type level so that a missing field is an
/// `InvalidParams` rejection rather than a decoding failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckLicenseRequest {
    #[serde(alias = "licenseKey")]
    pub key: Option<String>,
    pub timestamp: Option<String>,
    pub client_hash: Option<String>,
}

/// Successful validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    /// Always `"active"`.
    pub status: String,
    pub valid_until: DateTime<Utc>,
    pub checks_remaining: u32,
}

/// Parameters for the validation path.
#[derive(Debug, Clone, Default)]
pub struct ValidationSettings {
    pub challenge: ChallengeSettings,
    /// Secret used for licenses that carry no secret of their own.
    pub shared_secret: Option<String>,
}

pub struct ValidationService {
    store: Arc<dyn LicenseStore>,
    clock: Arc<dyn Clock>,
    quota: QuotaCounter,
    cache: Option<Arc<LicenseCache>>,
    settings: ValidationSettings,
}

impl ValidationService {
    pub fn new(
        store: Arc<dyn LicenseStore>,
        clock: Arc<dyn Clock>,
        settings: ValidationSettings,
    ) -> Self {
        Self {
            quota: QuotaCounter::new(store.clone()),
            store,
            clock,
            cache: None,
            settings,
        }
    }

    pub fn with_cache(mut self, cache: Arc<LicenseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_quota_counter(mut self, quota: QuotaCounter) -> Self {
        self.quota = quota;
        self
    }

    /// Answer a validation request.
    ///
    /// Errors are `InvalidParams`, `InvalidOrExpired`, `QuotaExceeded`, or a
    /// store failure. Which check rejected a request is only logged.
    pub async fn validate(&self, request: &CheckLicenseRequest) -> LicenseResult<ValidationResult> {
        let license_key = require(request.key.as_deref(), "key")?;
        let timestamp = require(request.timestamp.as_deref(), "timestamp")?;
        let client_hash = require(request.client_hash.as_deref(), "clientHash")?;
        validate_license_key(license_key, "key")?;
        validate_timestamp_shape(timestamp, "timestamp")?;
        validate_client_hash(client_hash, "clientHash")?;

        let license = match self.load(license_key).await? {
            Some(license) => license,
            None => return Err(reject(license_key, "license not found")),
        };

        let secret = match self.secret_for(&license) {
            Some(secret) => secret,
            None => return Err(reject(license_key, "no secret configured for license")),
        };

        let now = self.clock.now();
        if let Err(e) = challenge::verify(
            license_key,
            timestamp,
            client_hash,
            secret,
            now,
            &self.settings.challenge,
        ) {
            return Err(reject(license_key, &e.to_string()));
        }

        let state = evaluate(&license, now);
        if state != LicenseState::Active {
            return Err(reject(license_key, &format!("license is {state}")));
        }

        let checks_remaining = match self
            .quota
            .consume_at(license_key, license.checks_per_day, now)
            .await
        {
            Ok(remaining) => remaining,
            Err(QuotaError::QuotaExceeded) => {
                log_license_event(
                    LicenseEvent::QuotaExhausted,
                    license_key,
                    Some(&format!("limit {} reached", license.checks_per_day)),
                );
                return Err(LicenseError::QuotaExceeded);
            }
            Err(QuotaError::Store(e)) => return Err(e),
        };

        log_license_event(
            LicenseEvent::Validated,
            license_key,
            Some(&format!("{checks_remaining} checks remaining today")),
        );

        Ok(ValidationResult {
            status: LicenseState::Active.to_string(),
            valid_until: license.valid_until,
            checks_remaining,
        })
    }

    async fn load(&self, license_key: &str) -> LicenseResult<Option<License>> {
        if let Some(cache) = &self.cache {
            if let Some(license) = cache.get(license_key) {
                debug!(license_key, "license served from cache");
                return Ok(Some(license));
            }
        }

        let fetched_at = self.clock.now();
        let license = self.store.get_license(license_key).await?;
        if let (Some(cache), Some(license)) = (&self.cache, &license) {
            cache.insert(license.clone(), fetched_at);
        }
        Ok(license)
    }

    fn secret_for<'a>(&'a self, license: &'a License) -> Option<&'a str> {
        license
            .secret
            .as_deref()
            .or(self.settings.shared_secret.as_deref())
            .filter(|s| !s.is_empty())
    }
}

fn reject(license_key: &str, reason: &str) -> LicenseError {
    log_license_event(LicenseEvent::ValidationFailed, license_key, Some(reason));
    LicenseError::InvalidOrExpired
}
