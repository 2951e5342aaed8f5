//! Bounded-staleness cache of license records.
//!
//! Entries older than `max_staleness` (measured on the injected clock) are
//! treated as absent, so a reader never sees a record older than that bound.
//! Admin mutations in the same process call [`LicenseCache::invalidate`]. Quota
//! state is never cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::license::License;

#[derive(Debug, Clone)]
struct CachedLicense {
    license: License,
    fetched_at: DateTime<Utc>,
}

pub struct LicenseCache {
    max_staleness: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CachedLicense>>,
}

impl LicenseCache {
    /// A zero or negative `max_staleness` disables caching.
    pub fn new(max_staleness: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_staleness,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_staleness > Duration::zero()
    }

    pub fn get(&self, license_key: &str) -> Option<License> {
        if !self.is_enabled() {
            return None;
        }
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        match entries.get(license_key) {
            Some(entry) if now - entry.fetched_at <= self.max_staleness => {
                Some(entry.license.clone())
            }
            Some(_) => {
                entries.remove(license_key);
                None
            }
            None => None,
        }
    }

    /// Cache `license` as read from the store at `fetched_at`.
    ///
    /// Pass the instant taken before the store read started, so store latency
    /// counts against the staleness bound.
    pub fn insert(&self, license: License, fetched_at: DateTime<Utc>) {
        if !self.is_enabled() {
            return;
        }
        let entry = CachedLicense { fetched_at, license };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry.license.license_key.clone(), entry);
    }

    pub fn invalidate(&self, license_key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(license_key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
