//! Usage retention job.
//!
//! Daily usage rows are only read for the current UTC day, so older rows are
//! history. This job deletes rows older than the retention period.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::license::usage_day;
use crate::store::LicenseStore;

use super::JobError;

/// Delete usage rows for days before `today - retention_days`.
///
/// The current day is never deleted, even with `retention_days == 0`.
/// Returns the number of rows removed.
pub async fn run_usage_retention(
    store: &dyn LicenseStore,
    now: DateTime<Utc>,
    retention_days: u32,
) -> Result<u64, JobError> {
    let cutoff = Duration::try_days(i64::from(retention_days))
        .and_then(|retention| usage_day(now).checked_sub_signed(retention))
        .ok_or_else(|| {
            JobError::ExecutionError(format!(
                "usage retention of {retention_days} days is out of range"
            ))
        })?;

    debug!("Deleting usage rows before {} at {}", cutoff, now);

    let removed = store.delete_usage_before(cutoff).await?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    #[tokio::test]
    async fn keeps_rows_inside_retention() {
        let store = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        for days_ago in 0..5 {
            let day = usage_day(now) - Duration::days(days_ago);
            store.try_consume_quota("L1", day, 10).await.unwrap();
        }

        let removed = run_usage_retention(&store, now, 2).await.unwrap();

        // Days 3 and 4 ago are older than the cutoff; 2 days ago is kept.
        assert_eq!(removed, 2);
        assert_eq!(store.usage_rows("L1").unwrap(), 3);
    }

    #[tokio::test]
    async fn out_of_range_retention_is_an_error() {
        let store = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        store.try_consume_quota("L1", usage_day(now), 10).await.unwrap();

        let err = run_usage_retention(&store, now, 200_000_000)
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::ExecutionError(_)));
        assert_eq!(store.usage_rows("L1").unwrap(), 1);
    }

    #[tokio::test]
    async fn zero_retention_keeps_today() {
        let store = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        store.try_consume_quota("L1", usage_day(now), 10).await.unwrap();

        let removed = run_usage_retention(&store, now, 0).await.unwrap();

        assert_eq!(removed, 0);
        assert_eq!(store.get_usage("L1", usage_day(now)).await.unwrap(), 1);
    }
}
