#![cfg(all(feature = "server", feature = "sqlite"))]

use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use keycheck::errors::{LicenseError, LicenseResult};
use keycheck::license::{License, LicenseStatus};
use keycheck::quota::{QuotaCounter, QuotaError};
use keycheck::server::database::Database;
use keycheck::store::LicenseStore;

/// Helper: create an in-memory SQLite Database with the keycheck schema.
async fn setup_in_memory_db() -> LicenseResult<Arc<Database>> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .map_err(|e| LicenseError::StoreFailure(format!("db connect failed: {e}")))?;

    let db = Database::SQLite(pool);
    db.migrate().await?;
    Ok(Arc::new(db))
}

/// A SQLite database file in the temp dir, removed on drop.
struct TempDbFile {
    path: std::path::PathBuf,
}

impl TempDbFile {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("keycheck-{}.db", uuid::Uuid::new_v4()));
        Self { path }
    }
}

impl Drop for TempDbFile {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path.display()));
        }
    }
}

/// Helper: a file-backed Database whose pool really runs statements on
/// several connections at once.
async fn setup_file_db(file: &TempDbFile, connections: u32) -> LicenseResult<Arc<Database>> {
    let options = SqliteConnectOptions::new()
        .filename(&file.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(10));
    let pool = SqlitePoolOptions::new()
        .min_connections(connections)
        .max_connections(connections)
        .connect_with(options)
        .await
        .map_err(|e| LicenseError::StoreFailure(format!("db connect failed: {e}")))?;

    let db = Database::SQLite(pool);
    db.migrate().await?;
    Ok(Arc::new(db))
}

fn sample_license(key: &str, checks_per_day: u32) -> License {
    let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
    License {
        license_key: key.to_string(),
        secret: Some("ab".repeat(32)),
        status: LicenseStatus::Active,
        valid_until: created_at + Duration::days(30),
        checks_per_day,
        created_at,
    }
}

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[tokio::test]
async fn insert_and_get_round_trip() -> LicenseResult<()> {
    let db = setup_in_memory_db().await?;
    let license = sample_license("L1", 5);

    db.insert_license(&license).await?;
    let fetched = db.get_license("L1").await?.expect("license should exist");

    assert_eq!(fetched, license);
    assert!(db.get_license("missing").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn license_without_secret_round_trips() -> LicenseResult<()> {
    let db = setup_in_memory_db().await?;
    let license = License {
        secret: None,
        ..sample_license("shared-1", 5)
    };

    db.insert_license(&license).await?;
    let fetched = db.get_license("shared-1").await?.expect("license should exist");

    assert_eq!(fetched.secret, None);
    Ok(())
}

#[tokio::test]
async fn duplicate_key_is_rejected_and_original_kept() -> LicenseResult<()> {
    let db = setup_in_memory_db().await?;
    db.insert_license(&sample_license("L1", 5)).await?;

    let err = db
        .insert_license(&sample_license("L1", 99))
        .await
        .unwrap_err();
    assert_eq!(err, LicenseError::DuplicateLicense("L1".to_string()));

    let kept = db.get_license("L1").await?.expect("license should exist");
    assert_eq!(kept.checks_per_day, 5);
    Ok(())
}

#[tokio::test]
async fn set_status_reports_unknown_keys() -> LicenseResult<()> {
    let db = setup_in_memory_db().await?;
    db.insert_license(&sample_license("L1", 5)).await?;

    assert!(db.set_license_status("L1", LicenseStatus::Inactive).await?);
    assert!(!db.set_license_status("nope", LicenseStatus::Inactive).await?);

    let fetched = db.get_license("L1").await?.expect("license should exist");
    assert_eq!(fetched.status, LicenseStatus::Inactive);
    Ok(())
}

#[tokio::test]
async fn quota_stops_at_limit_without_overcounting() -> LicenseResult<()> {
    let db = setup_in_memory_db().await?;
    let today = day(2024, 5, 2);

    assert_eq!(db.try_consume_quota("L1", today, 2).await?, Some(1));
    assert_eq!(db.try_consume_quota("L1", today, 2).await?, Some(2));
    assert_eq!(db.try_consume_quota("L1", today, 2).await?, None);
    assert_eq!(db.try_consume_quota("L1", today, 2).await?, None);

    assert_eq!(db.get_usage("L1", today).await?, 2);
    Ok(())
}

#[tokio::test]
async fn quota_resets_on_new_day() -> LicenseResult<()> {
    let db = setup_in_memory_db().await?;

    assert_eq!(db.try_consume_quota("L1", day(2024, 5, 2), 1).await?, Some(1));
    assert_eq!(db.try_consume_quota("L1", day(2024, 5, 2), 1).await?, None);
    assert_eq!(db.try_consume_quota("L1", day(2024, 5, 3), 1).await?, Some(1));

    assert_eq!(db.get_usage("L1", day(2024, 5, 2)).await?, 1);
    assert_eq!(db.get_usage("L1", day(2024, 5, 3)).await?, 1);
    Ok(())
}

#[tokio::test]
async fn zero_limit_writes_nothing() -> LicenseResult<()> {
    let db = setup_in_memory_db().await?;

    assert_eq!(db.try_consume_quota("L1", day(2024, 5, 2), 0).await?, None);
    assert_eq!(db.get_usage("L1", day(2024, 5, 2)).await?, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumers_get_exactly_the_limit() -> LicenseResult<()> {
    let db = setup_in_memory_db().await?;
    let store: Arc<dyn LicenseStore> = db.clone();
    let counter = QuotaCounter::new(store);
    let today = day(2024, 5, 2);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let counter = counter.clone();
        handles.push(tokio::spawn(
            async move { counter.consume("L1", 5, today).await },
        ));
    }

    let mut remaining = Vec::new();
    let mut exceeded = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(left) => remaining.push(left),
            Err(QuotaError::QuotaExceeded) => exceeded += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    remaining.sort_unstable();

    assert_eq!(remaining, vec![0, 1, 2, 3, 4]);
    assert_eq!(exceeded, 15);
    assert_eq!(db.get_usage("L1", today).await?, 5);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_consumers_on_many_connections_get_exactly_the_limit() -> LicenseResult<()> {
    let file = TempDbFile::new();
    let db = setup_file_db(&file, 8).await?;
    let store: Arc<dyn LicenseStore> = db.clone();
    let counter = QuotaCounter::new(store)
        .with_retries(10, std::time::Duration::from_millis(5));
    let today = day(2024, 5, 2);

    let barrier = Arc::new(tokio::sync::Barrier::new(40));
    let mut handles = Vec::new();
    for i in 0..40 {
        let counter = counter.clone();
        let barrier = barrier.clone();
        let key = if i % 2 == 0 { "L-even" } else { "L-odd" };
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            (key, counter.consume(key, 5, today).await)
        }));
    }

    let mut even = Vec::new();
    let mut odd = Vec::new();
    for handle in handles {
        match handle.await.expect("task panicked") {
            ("L-even", Ok(left)) => even.push(left),
            (_, Ok(left)) => odd.push(left),
            (_, Err(QuotaError::QuotaExceeded)) => {}
            (_, Err(other)) => panic!("unexpected error: {other}"),
        }
    }
    even.sort_unstable();
    odd.sort_unstable();

    assert_eq!(even, vec![0, 1, 2, 3, 4]);
    assert_eq!(odd, vec![0, 1, 2, 3, 4]);
    assert_eq!(db.get_usage("L-even", today).await?, 5);
    assert_eq!(db.get_usage("L-odd", today).await?, 5);
    Ok(())
}

#[tokio::test]
async fn delete_usage_before_keeps_cutoff_day() -> LicenseResult<()> {
    let db = setup_in_memory_db().await?;
    for d in 1..=5 {
        db.try_consume_quota("L1", day(2024, 5, d), 10).await?;
    }

    let removed = db.delete_usage_before(day(2024, 5, 3)).await?;

    assert_eq!(removed, 2);
    assert_eq!(db.get_usage("L1", day(2024, 5, 2)).await?, 0);
    assert_eq!(db.get_usage("L1", day(2024, 5, 3)).await?, 1);
    Ok(())
}

#[tokio::test]
async fn ping_and_db_type() -> LicenseResult<()> {
    let db = setup_in_memory_db().await?;
    db.ping().await?;
    assert_eq!(db.db_type(), "sqlite");
    Ok(())
}
