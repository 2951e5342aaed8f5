use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{query, query_as, query_scalar, FromRow};
use std::sync::Arc;
use tracing::{error, info};

#[cfg(feature = "sqlite")]
use sqlx::SqlitePool;

#[cfg(feature = "postgres")]
use sqlx::PgPool;

use crate::config::DatabaseConfig;
use crate::errors::{LicenseError, LicenseResult};
use crate::license::{License, LicenseStatus};
use crate::store::LicenseStore;

/// Row shape of the `licenses` table.
#[derive(Debug, Clone, FromRow)]
struct LicenseRow {
    license_key: String,
    secret: Option<String>,
    status: String,
    valid_until: DateTime<Utc>,
    checks_per_day: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<LicenseRow> for License {
    type Error = LicenseError;

    fn try_from(row: LicenseRow) -> Result<Self, Self::Error> {
        let checks_per_day = u32::try_from(row.checks_per_day).map_err(|_| {
            LicenseError::StoreFailure(format!(
                "checks_per_day out of range for {}: {}",
                row.license_key, row.checks_per_day
            ))
        })?;

        Ok(License {
            status: row.status.parse()?,
            license_key: row.license_key,
            secret: row.secret,
            valid_until: row.valid_until,
            checks_per_day,
            created_at: row.created_at,
        })
    }
}

#[cfg(feature = "sqlite")]
const SQLITE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS licenses (
        license_key     TEXT PRIMARY KEY,
        secret          TEXT,
        status          TEXT NOT NULL,
        valid_until     TEXT NOT NULL,
        checks_per_day  INTEGER NOT NULL CHECK (checks_per_day > 0),
        created_at      TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS daily_usage (
        license_key     TEXT NOT NULL,
        day             TEXT NOT NULL,
        count           INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
        PRIMARY KEY (license_key, day)
    )
    "#,
];

#[cfg(feature = "postgres")]
const POSTGRES_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS licenses (
        license_key     TEXT PRIMARY KEY,
        secret          TEXT,
        status          TEXT NOT NULL,
        valid_until     TIMESTAMPTZ NOT NULL,
        checks_per_day  BIGINT NOT NULL CHECK (checks_per_day > 0),
        created_at      TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS daily_usage (
        license_key     TEXT NOT NULL,
        day             DATE NOT NULL,
        count           BIGINT NOT NULL DEFAULT 0 CHECK (count >= 0),
        PRIMARY KEY (license_key, day)
    )
    "#,
];

/// SQLite BUSY/LOCKED (plain and extended), Postgres serialization failure
/// and deadlock.
fn is_transient_code(code: &str) -> bool {
    matches!(code, "5" | "6" | "261" | "262" | "517" | "40001" | "40P01")
}

/// Map a driver error, classifying lock contention as retryable.
fn store_error(op: &str, e: sqlx::Error) -> LicenseError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref().is_some_and(is_transient_code) {
            return LicenseError::StoreConflict(format!("{op}: {db_err}"));
        }
    }

    error!("{op} failed: {e}");
    LicenseError::StoreFailure(format!("database error: {e}"))
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Unified database abstraction over SQLite and Postgres.
///
/// Available variants depend on enabled features:
/// - `sqlite` feature enables `Database::SQLite`
/// - `postgres` feature enables `Database::Postgres`
#[derive(Debug, Clone)]
pub enum Database {
    #[cfg(feature = "sqlite")]
    SQLite(SqlitePool),
    #[cfg(feature = "postgres")]
    Postgres(PgPool),
}

impl Database {
    /// Connect according to `db_config`.
    pub async fn connect(db_config: &DatabaseConfig) -> LicenseResult<Arc<Self>> {
        match db_config.db_type.as_str() {
            #[cfg(feature = "sqlite")]
            "sqlite" => {
                let pool = SqlitePool::connect(&db_config.sqlite_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to SQLite: {e}");
                        LicenseError::StoreFailure(format!("failed to connect to SQLite: {e}"))
                    })?;

                Ok(Arc::new(Database::SQLite(pool)))
            }
            #[cfg(not(feature = "sqlite"))]
            "sqlite" => Err(LicenseError::ConfigError(
                "SQLite support not compiled in. Enable the 'sqlite' feature.".to_string(),
            )),
            #[cfg(feature = "postgres")]
            "postgres" => {
                let pool = PgPool::connect(&db_config.postgres_url)
                    .await
                    .map_err(|e| {
                        error!("Failed to connect to PostgreSQL: {e}");
                        LicenseError::StoreFailure(format!(
                            "failed to connect to PostgreSQL: {e}"
                        ))
                    })?;

                Ok(Arc::new(Database::Postgres(pool)))
            }
            #[cfg(not(feature = "postgres"))]
            "postgres" => Err(LicenseError::ConfigError(
                "PostgreSQL support not compiled in. Enable the 'postgres' feature.".to_string(),
            )),
            other => Err(LicenseError::ConfigError(format!(
                "unsupported database type: {other}"
            ))),
        }
    }

    /// Create the `licenses` and `daily_usage` tables if missing.
    pub async fn migrate(&self) -> LicenseResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                for statement in SQLITE_SCHEMA {
                    query(statement)
                        .execute(pool)
                        .await
                        .map_err(|e| store_error("SQLite migrate", e))?;
                }
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                for statement in POSTGRES_SCHEMA {
                    query(statement)
                        .execute(pool)
                        .await
                        .map_err(|e| store_error("Postgres migrate", e))?;
                }
            }
        }

        info!("Database schema is up to date ({})", self.db_type());
        Ok(())
    }

    pub fn db_type(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(_) => "sqlite",
            #[cfg(feature = "postgres")]
            Database::Postgres(_) => "postgres",
        }
    }
}

#[async_trait]
impl LicenseStore for Database {
    async fn get_license(&self, license_key: &str) -> LicenseResult<Option<License>> {
        let row = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query_as::<_, LicenseRow>("SELECT * FROM licenses WHERE license_key = ?")
                    .bind(license_key)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| store_error("SQLite get_license", e))?
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query_as::<_, LicenseRow>("SELECT * FROM licenses WHERE license_key = $1")
                    .bind(license_key)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| store_error("Postgres get_license", e))?
            }
        };

        row.map(License::try_from).transpose()
    }

    async fn insert_license(&self, license: &License) -> LicenseResult<()> {
        let result = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query(
                    r#"
                    INSERT INTO licenses (
                        license_key,
                        secret,
                        status,
                        valid_until,
                        checks_per_day,
                        created_at
                    )
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&license.license_key)
                .bind(&license.secret)
                .bind(license.status.as_str())
                .bind(license.valid_until)
                .bind(i64::from(license.checks_per_day))
                .bind(license.created_at)
                .execute(pool)
                .await
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query(
                    r#"
                    INSERT INTO licenses (
                        license_key,
                        secret,
                        status,
                        valid_until,
                        checks_per_day,
                        created_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(&license.license_key)
                .bind(&license.secret)
                .bind(license.status.as_str())
                .bind(license.valid_until)
                .bind(i64::from(license.checks_per_day))
                .bind(license.created_at)
                .execute(pool)
                .await
            }
        };

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(LicenseError::DuplicateLicense(license.license_key.clone()))
            }
            Err(e) => Err(store_error("insert_license", e)),
        }
    }

    async fn set_license_status(
        &self,
        license_key: &str,
        status: LicenseStatus,
    ) -> LicenseResult<bool> {
        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query("UPDATE licenses SET status = ? WHERE license_key = ?")
                .bind(status.as_str())
                .bind(license_key)
                .execute(pool)
                .await
                .map_err(|e| store_error("SQLite set_license_status", e))?
                .rows_affected(),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query("UPDATE licenses SET status = $1 WHERE license_key = $2")
                    .bind(status.as_str())
                    .bind(license_key)
                    .execute(pool)
                    .await
                    .map_err(|e| store_error("Postgres set_license_status", e))?
                    .rows_affected()
            }
        };

        Ok(rows_affected > 0)
    }

    /// One statement: insert the day's row at 1, or bump it only while it is
    /// below the limit. No row comes back when the limit is already reached.
    async fn try_consume_quota(
        &self,
        license_key: &str,
        day: NaiveDate,
        limit: u32,
    ) -> LicenseResult<Option<u32>> {
        if limit == 0 {
            return Ok(None);
        }
        let limit = i64::from(limit);

        let count: Option<i64> = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query_scalar(
                r#"
                INSERT INTO daily_usage (license_key, day, count)
                VALUES (?, ?, 1)
                ON CONFLICT (license_key, day) DO UPDATE
                    SET count = daily_usage.count + 1
                    WHERE daily_usage.count < ?
                RETURNING count
                "#,
            )
            .bind(license_key)
            .bind(day)
            .bind(limit)
            .fetch_optional(pool)
            .await
            .map_err(|e| store_error("SQLite try_consume_quota", e))?,
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query_scalar(
                r#"
                INSERT INTO daily_usage (license_key, day, count)
                VALUES ($1, $2, 1)
                ON CONFLICT (license_key, day) DO UPDATE
                    SET count = daily_usage.count + 1
                    WHERE daily_usage.count < $3
                RETURNING count
                "#,
            )
            .bind(license_key)
            .bind(day)
            .bind(limit)
            .fetch_optional(pool)
            .await
            .map_err(|e| store_error("Postgres try_consume_quota", e))?,
        };

        count
            .map(|c| {
                u32::try_from(c).map_err(|_| {
                    LicenseError::StoreFailure(format!("usage count out of range: {c}"))
                })
            })
            .transpose()
    }

    async fn get_usage(&self, license_key: &str, day: NaiveDate) -> LicenseResult<u32> {
        let count: Option<i64> = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query_scalar("SELECT count FROM daily_usage WHERE license_key = ? AND day = ?")
                    .bind(license_key)
                    .bind(day)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| store_error("SQLite get_usage", e))?
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query_scalar("SELECT count FROM daily_usage WHERE license_key = $1 AND day = $2")
                    .bind(license_key)
                    .bind(day)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| store_error("Postgres get_usage", e))?
            }
        };

        Ok(count.map(|c| c.clamp(0, i64::from(u32::MAX)) as u32).unwrap_or(0))
    }

    async fn delete_usage_before(&self, day: NaiveDate) -> LicenseResult<u64> {
        let rows_affected = match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => query("DELETE FROM daily_usage WHERE day < ?")
                .bind(day)
                .execute(pool)
                .await
                .map_err(|e| store_error("SQLite delete_usage_before", e))?
                .rows_affected(),
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => query("DELETE FROM daily_usage WHERE day < $1")
                .bind(day)
                .execute(pool)
                .await
                .map_err(|e| store_error("Postgres delete_usage_before", e))?
                .rows_affected(),
        };

        Ok(rows_affected)
    }

    async fn ping(&self) -> LicenseResult<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Database::SQLite(pool) => {
                query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(|e| store_error("SQLite ping", e))?;
            }
            #[cfg(feature = "postgres")]
            Database::Postgres(pool) => {
                query("SELECT 1")
                    .execute(pool)
                    .await
                    .map_err(|e| store_error("Postgres ping", e))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use std::fmt;

    #[derive(Debug)]
    struct FakeDbError {
        code: &'static str,
    }

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fake database error {}", self.code)
        }
    }

    impl StdError for FakeDbError {}

    impl DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "fake database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    fn db_error(code: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(FakeDbError { code }))
    }

    #[test]
    fn lock_contention_codes_are_transient() {
        for code in ["5", "6", "261", "262", "517", "40001", "40P01"] {
            let err = store_error("consume", db_error(code));
            assert!(
                matches!(err, LicenseError::StoreConflict(_)),
                "code {code} gave {err:?}"
            );
            assert!(err.is_transient());
        }
    }

    #[test]
    fn other_database_errors_are_failures() {
        // SQLite constraint violation, Postgres unique violation.
        for code in ["19", "2067", "23505"] {
            let err = store_error("insert", db_error(code));
            assert!(matches!(err, LicenseError::StoreFailure(_)), "code {code}");
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn non_database_errors_are_failures() {
        let err = store_error("get", sqlx::Error::RowNotFound);
        assert!(matches!(err, LicenseError::StoreFailure(_)));
    }
}
