//! License records and the derived license state.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::LicenseError;

/// Stored administrative status. `expired` is never stored; see [`LicenseState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    Active,
    Inactive,
}

impl LicenseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseStatus::Active => "active",
            LicenseStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LicenseStatus {
    type Err = LicenseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(LicenseStatus::Active),
            "inactive" => Ok(LicenseStatus::Inactive),
            other => Err(LicenseError::StoreFailure(format!(
                "unknown license status in store: {other}"
            ))),
        }
    }
}

/// A persisted license.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct License {
    /// Unique, immutable identifier presented by clients.
    pub license_key: String,
    /// Per-license challenge secret. `None` means the shared secret applies.
    pub secret: Option<String>,
    pub status: LicenseStatus,
    /// Set once at creation to `created_at + validity_days`.
    pub valid_until: DateTime<Utc>,
    /// Maximum successful validations per UTC day.
    pub checks_per_day: u32,
    pub created_at: DateTime<Utc>,
}

/// Effective state of a license at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseState {
    Active,
    Inactive,
    Expired,
}

impl fmt::Display for LicenseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LicenseState::Active => "active",
            LicenseState::Inactive => "inactive",
            LicenseState::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Derive the effective state of `license` at `now`.
///
/// The administrative `inactive` flag wins over time; otherwise a license is
/// expired strictly after `valid_until`.
pub fn evaluate(license: &License, now: DateTime<Utc>) -> LicenseState {
    if license.status == LicenseStatus::Inactive {
        LicenseState::Inactive
    } else if now > license.valid_until {
        LicenseState::Expired
    } else {
        LicenseState::Active
    }
}

/// The quota day an instant falls on. Days are UTC calendar days.
pub fn usage_day(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}
