//! Persistence contract for licenses and daily usage counters.
//!
//! [`LicenseStore`] is the only owner of durable state. The SQL-backed
//! implementation lives in `server::database`; [`MemoryStore`] keeps everything
//! in-process and is used for tests and embedding.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::{LicenseError, LicenseResult};
use crate::license::{License, LicenseStatus};

#[async_trait]
pub trait LicenseStore: Send + Sync {
    /// Fetch a license by key.
    async fn get_license(&self, license_key: &str) -> LicenseResult<Option<License>>;

    /// Insert a new license.
    ///
    /// Fails with [`LicenseError::DuplicateLicense`] if the key is taken; never
    /// overwrites an existing record.
    async fn insert_license(&self, license: &License) -> LicenseResult<()>;

    /// Set the administrative status. Returns `false` if the key is unknown.
    async fn set_license_status(
        &self,
        license_key: &str,
        status: LicenseStatus,
    ) -> LicenseResult<bool>;

    /// Atomically add one unit of usage for `(license_key, day)` if the current
    /// count is below `limit`.
    ///
    /// Returns the post-increment count, or `None` when the limit was already
    /// reached (nothing is written in that case). A missing row counts as zero.
    async fn try_consume_quota(
        &self,
        license_key: &str,
        day: NaiveDate,
        limit: u32,
    ) -> LicenseResult<Option<u32>>;

    /// Current usage for `(license_key, day)`; zero when no row exists.
    async fn get_usage(&self, license_key: &str, day: NaiveDate) -> LicenseResult<u32>;

    /// Delete usage rows for days strictly before `day`. Returns rows removed.
    async fn delete_usage_before(&self, day: NaiveDate) -> LicenseResult<u64>;

    /// Cheap connectivity check.
    async fn ping(&self) -> LicenseResult<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    licenses: HashMap<String, License>,
    usage: HashMap<(String, NaiveDate), u32>,
}

/// In-memory [`LicenseStore`].
///
/// A single mutex serializes every operation, which makes the quota step
/// trivially linearizable.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> LicenseResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| LicenseError::StoreFailure("failed to acquire memory store lock".into()))
    }

    /// Number of usage rows held for a license, across all days.
    pub fn usage_rows(&self, license_key: &str) -> LicenseResult<usize> {
        let state = self.lock()?;
        Ok(state
            .usage
            .keys()
            .filter(|(key, _)| key == license_key)
            .count())
    }
}

#[async_trait]
impl LicenseStore for MemoryStore {
    async fn get_license(&self, license_key: &str) -> LicenseResult<Option<License>> {
        Ok(self.lock()?.licenses.get(license_key).cloned())
    }

    async fn insert_license(&self, license: &License) -> LicenseResult<()> {
        let mut state = self.lock()?;
        if state.licenses.contains_key(&license.license_key) {
            return Err(LicenseError::DuplicateLicense(license.license_key.clone()));
        }
        state
            .licenses
            .insert(license.license_key.clone(), license.clone());
        Ok(())
    }

    async fn set_license_status(
        &self,
        license_key: &str,
        status: LicenseStatus,
    ) -> LicenseResult<bool> {
        let mut state = self.lock()?;
        match state.licenses.get_mut(license_key) {
            Some(license) => {
                license.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn try_consume_quota(
        &self,
        license_key: &str,
        day: NaiveDate,
        limit: u32,
    ) -> LicenseResult<Option<u32>> {
        let mut state = self.lock()?;
        let slot = (license_key.to_string(), day);
        let current = state.usage.get(&slot).copied().unwrap_or(0);

        if current >= limit {
            return Ok(None);
        }
        state.usage.insert(slot, current + 1);
        Ok(Some(current + 1))
    }

    async fn get_usage(&self, license_key: &str, day: NaiveDate) -> LicenseResult<u32> {
        let state = self.lock()?;
        Ok(state
            .usage
            .get(&(license_key.to_string(), day))
            .copied()
            .unwrap_or(0))
    }

    async fn delete_usage_before(&self, day: NaiveDate) -> LicenseResult<u64> {
        let mut state = self.lock()?;
        let before = state.usage.len();
        state.usage.retain(|(_, d), _| *d >= day);
        Ok((before - state.usage.len()) as u64)
    }

    async fn ping(&self) -> LicenseResult<()> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn sample(key: &str) -> License {
        let created_at = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        License {
            license_key: key.to_string(),
            secret: Some("abc".to_string()),
            status: LicenseStatus::Active,
            valid_until: created_at + Duration::days(7),
            checks_per_day: 3,
            created_at,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, d).unwrap()
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = MemoryStore::new();
        store.insert_license(&sample("K1")).await.unwrap();

        let err = store.insert_license(&sample("K1")).await.unwrap_err();
        assert_eq!(err, LicenseError::DuplicateLicense("K1".to_string()));
    }

    #[tokio::test]
    async fn quota_stops_at_limit_without_writing() {
        let store = MemoryStore::new();
        assert_eq!(store.try_consume_quota("K1", day(1), 2).await.unwrap(), Some(1));
        assert_eq!(store.try_consume_quota("K1", day(1), 2).await.unwrap(), Some(2));
        assert_eq!(store.try_consume_quota("K1", day(1), 2).await.unwrap(), None);
        assert_eq!(store.get_usage("K1", day(1)).await.unwrap(), 2);
        assert_eq!(store.get_usage("K1", day(2)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn status_update_reports_missing_keys() {
        let store = MemoryStore::new();
        store.insert_license(&sample("K1")).await.unwrap();

        assert!(store
            .set_license_status("K1", LicenseStatus::Inactive)
            .await
            .unwrap());
        assert!(!store
            .set_license_status("nope", LicenseStatus::Inactive)
            .await
            .unwrap());
        let stored = store.get_license("K1").await.unwrap().unwrap();
        assert_eq!(stored.status, LicenseStatus::Inactive);
    }

    #[tokio::test]
    async fn delete_usage_before_keeps_recent_days() {
        let store = MemoryStore::new();
        store.try_consume_quota("K1", day(1), 5).await.unwrap();
        store.try_consume_quota("K1", day(2), 5).await.unwrap();
        store.try_consume_quota("K1", day(3), 5).await.unwrap();

        assert_eq!(store.delete_usage_before(day(3)).await.unwrap(), 2);
        assert_eq!(store.usage_rows("K1").unwrap(), 1);
    }
}
