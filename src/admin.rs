//! Privileged license administration.
//!
//! Every operation is guarded by the administrative key. Admin writes go
//! straight to the store and never touch quota counters.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use constant_time_eq::constant_time_eq;
use rand::RngCore;
use serde::Deserialize;

use crate::audit::{log_license_event, LicenseEvent};
use crate::cache::LicenseCache;
use crate::clock::Clock;
use crate::errors::{LicenseError, LicenseResult};
use crate::license::{usage_day, License, LicenseStatus};
use crate::params::{require, validate_license_key, validate_range};
use crate::store::LicenseStore;

/// Upper bound on `validityDays` (one hundred years).
pub const MAX_VALIDITY_DAYS: i64 = 36_500;
/// Upper bound on `checksPerDay`.
pub const MAX_CHECKS_PER_DAY: i64 = 1_000_000;
/// Bytes of entropy in a generated per-license secret.
pub const SECRET_BYTES: usize = 32;

/// How challenge secrets are provisioned for new licenses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretMode {
    /// Each license gets its own random secret, returned once at creation.
    #[default]
    PerLicense,
    /// All licenses share the configured validation secret.
    Shared,
}

impl FromStr for SecretMode {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per_license" => Ok(SecretMode::PerLicense),
            "shared" => Ok(SecretMode::Shared),
            other => Err(LicenseError::ConfigError(format!(
                "secret_mode must be 'per_license' or 'shared', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for SecretMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretMode::PerLicense => f.write_str("per_license"),
            SecretMode::Shared => f.write_str("shared"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdminSettings {
    pub admin_key: String,
    pub secret_mode: SecretMode,
}

/// A license plus today's usage, for operator lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseInfo {
    pub license: License,
    /// UTC day the usage figure refers to.
    pub usage_day: NaiveDate,
    pub checks_used_today: u32,
}

pub struct AdminService {
    store: Arc<dyn LicenseStore>,
    clock: Arc<dyn Clock>,
    cache: Option<Arc<LicenseCache>>,
    settings: AdminSettings,
}

impl AdminService {
    pub fn new(store: Arc<dyn LicenseStore>, clock: Arc<dyn Clock>, settings: AdminSettings) -> Self {
        Self {
            store,
            clock,
            cache: None,
            settings,
        }
    }

    /// Share the validation path's cache so admin writes invalidate it.
    pub fn with_cache(mut self, cache: Arc<LicenseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn authorize(&self, admin_key: Option<&str>) -> LicenseResult<()> {
        let configured = self.settings.admin_key.as_bytes();
        match admin_key {
            Some(given) if !configured.is_empty() && constant_time_eq(given.as_bytes(), configured) => {
                Ok(())
            }
            _ => Err(LicenseError::Unauthorized),
        }
    }

    /// Mint a new license valid for `validity_days` from now.
    ///
    /// In per-license mode the returned record carries the freshly generated
    /// secret; it is not retrievable afterwards through the admin surface.
    pub async fn create_license(
        &self,
        admin_key: Option<&str>,
        license_key: Option<&str>,
        validity_days: Option<i64>,
        checks_per_day: Option<i64>,
    ) -> LicenseResult<License> {
        self.authorize(admin_key)?;

        let license_key = require(license_key, "licenseKey")?;
        validate_license_key(license_key, "licenseKey")?;
        let validity_days = validity_days
            .ok_or_else(|| LicenseError::InvalidParams("validityDays: is required".into()))?;
        validate_range(validity_days, 1, MAX_VALIDITY_DAYS, "validityDays")?;
        let checks_per_day = checks_per_day
            .ok_or_else(|| LicenseError::InvalidParams("checksPerDay: is required".into()))?;
        validate_range(checks_per_day, 1, MAX_CHECKS_PER_DAY, "checksPerDay")?;

        let now = self.clock.now();
        let secret = match self.settings.secret_mode {
            SecretMode::PerLicense => Some(generate_secret()),
            SecretMode::Shared => None,
        };
        let license = License {
            license_key: license_key.to_string(),
            secret,
            status: LicenseStatus::Active,
            valid_until: now + Duration::days(validity_days),
            checks_per_day: checks_per_day as u32,
            created_at: now,
        };

        self.store.insert_license(&license).await?;

        log_license_event(
            LicenseEvent::Created,
            license_key,
            Some(&format!(
                "valid_until={} checks_per_day={}",
                license.valid_until, license.checks_per_day
            )),
        );

        Ok(license)
    }

    /// Set or clear the administrative inactive flag.
    pub async fn set_license_active(
        &self,
        admin_key: Option<&str>,
        license_key: Option<&str>,
        active: Option<bool>,
    ) -> LicenseResult<License> {
        self.authorize(admin_key)?;

        let license_key = require(license_key, "licenseKey")?;
        validate_license_key(license_key, "licenseKey")?;
        let active =
            active.ok_or_else(|| LicenseError::InvalidParams("active: is required".into()))?;

        let status = if active {
            LicenseStatus::Active
        } else {
            LicenseStatus::Inactive
        };
        if !self.store.set_license_status(license_key, status).await? {
            return Err(LicenseError::NotFound(license_key.to_string()));
        }
        if let Some(cache) = &self.cache {
            cache.invalidate(license_key);
        }

        let event = if active {
            LicenseEvent::Activated
        } else {
            LicenseEvent::Deactivated
        };
        log_license_event(event, license_key, None);

        self.store
            .get_license(license_key)
            .await?
            .ok_or_else(|| LicenseError::NotFound(license_key.to_string()))
    }

    /// Look up a license and today's usage.
    pub async fn get_license(
        &self,
        admin_key: Option<&str>,
        license_key: Option<&str>,
    ) -> LicenseResult<LicenseInfo> {
        self.authorize(admin_key)?;

        let license_key = require(license_key, "licenseKey")?;
        validate_license_key(license_key, "licenseKey")?;

        let license = self
            .store
            .get_license(license_key)
            .await?
            .ok_or_else(|| LicenseError::NotFound(license_key.to_string()))?;
        let day = usage_day(self.clock.now());
        let checks_used_today = self.store.get_usage(license_key, day).await?;

        Ok(LicenseInfo {
            license,
            usage_day: day,
            checks_used_today,
        })
    }
}

/// 256 bits from the thread-local CSPRNG, hex encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
