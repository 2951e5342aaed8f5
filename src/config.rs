//! Configuration system for keycheck.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `config.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `KEYCHECK_SERVER_HOST` - Server bind address
//! - `KEYCHECK_SERVER_PORT` - Server port
//! - `KEYCHECK_ENVIRONMENT` - `development` or `production`
//! - `KEYCHECK_DATABASE_TYPE` - `sqlite` or `postgres`
//! - `KEYCHECK_DATABASE_URL` - Database connection URL
//! - `KEYCHECK_VALIDATION_SECRET` - Shared challenge secret
//! - `KEYCHECK_ADMIN_KEY` - Administrative secret
//! - `KEYCHECK_SECRET_MODE` - `per_license` or `shared`
//! - `KEYCHECK_REPLAY_WINDOW_SECS` - Maximum timestamp age
//! - `KEYCHECK_CLOCK_SKEW_SECS` - Allowed future skew of client timestamps
//! - `KEYCHECK_CACHE_STALENESS_SECS` - License cache bound (0 disables the cache)
//! - `KEYCHECK_LOGGING_ENABLED` - Enable logging
//! - `KEYCHECK_LOG_LEVEL` - Log level (trace, debug, info, warn, error)
//! - `KEYCHECK_JOBS_ENABLED` - Start the background job scheduler
//! - `KEYCHECK_USAGE_RETENTION_DAYS` - Days of usage history kept by the retention job
//!
//! The global is only read at the edges (the binary). Services receive the
//! derived [`ValidationSettings`] and [`AdminSettings`] explicitly.

use chrono::Duration;
use config::Config;
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;

use crate::admin::{AdminSettings, SecretMode};
use crate::challenge::ChallengeSettings;
use crate::errors::{LicenseError, LicenseResult};
use crate::validation::ValidationSettings;

/// Global configuration singleton.
static CONFIG: OnceLock<KeycheckConfig> = OnceLock::new();

/// Minimum admin key length accepted in production.
pub const MIN_PRODUCTION_ADMIN_KEY_LEN: usize = 16;

/// Upper bound for the replay window, clock skew and cache staleness.
pub const MAX_VALIDATION_WINDOW_SECS: i64 = 86_400;

/// Upper bound for `jobs.usage_retention_days`.
pub const MAX_USAGE_RETENTION_DAYS: u32 = 36_500;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeycheckConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub validation: ValidationConfig,
    pub logging: LoggingConfig,
    pub jobs: JobsConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// `development` or `production`
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            environment: "development".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database type: "sqlite" or "postgres"
    pub db_type: String,
    /// SQLite connection URL
    pub sqlite_url: String,
    /// PostgreSQL connection URL
    pub postgres_url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            sqlite_url: "sqlite://keycheck.db?mode=rwc".to_string(),
            postgres_url: "postgres://localhost/keycheck".to_string(),
        }
    }
}

/// Secrets.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared challenge secret; required in `shared` mode
    pub validation_secret: String,
    /// Administrative secret guarding license management
    pub admin_key: String,
    /// How secrets are provisioned for new licenses
    pub secret_mode: SecretMode,
}

/// Validation path tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub replay_window_secs: i64,
    pub clock_skew_secs: i64,
    pub cache_staleness_secs: i64,
    pub quota_retry_attempts: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            replay_window_secs: 300,
            clock_skew_secs: 0,
            cache_staleness_secs: 0,
            quota_retry_attempts: 3,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Enable logging
    pub enabled: bool,
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
        }
    }
}

/// Background job configuration (used with the `background-jobs` feature).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub enabled: bool,
    /// Days of usage rows to keep
    pub usage_retention_days: u32,
    /// Cron expression for the retention job (default: daily at 03:30)
    pub usage_retention_cron: String,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            usage_retention_days: 90,
            usage_retention_cron: "0 30 3 * * *".to_string(),
        }
    }
}

fn env_i64(name: &str) -> Option<i64> {
    env::var(name).ok().and_then(|v| v.parse::<i64>().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().and_then(|v| v.parse::<bool>().ok())
}

fn seconds(name: &str, value: i64) -> LicenseResult<Duration> {
    Duration::try_seconds(value)
        .ok_or_else(|| LicenseError::ConfigError(format!("{name} is out of range: {value}")))
}

fn config_err(e: config::ConfigError) -> LicenseError {
    LicenseError::ConfigError(e.to_string())
}

impl KeycheckConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. `config.toml` file (optional)
    /// 3. Environment variables
    pub fn load() -> LicenseResult<Self> {
        let builder = Config::builder()
            .set_default("server.host", "127.0.0.1")
            .map_err(config_err)?
            .set_default("server.port", 8080)
            .map_err(config_err)?
            .set_default("server.environment", "development")
            .map_err(config_err)?
            .set_default("database.db_type", "sqlite")
            .map_err(config_err)?
            .set_default("database.sqlite_url", "sqlite://keycheck.db?mode=rwc")
            .map_err(config_err)?
            .set_default("database.postgres_url", "postgres://localhost/keycheck")
            .map_err(config_err)?
            .set_default("auth.validation_secret", "")
            .map_err(config_err)?
            .set_default("auth.admin_key", "")
            .map_err(config_err)?
            .set_default("auth.secret_mode", "per_license")
            .map_err(config_err)?
            .set_default("validation.replay_window_secs", 300)
            .map_err(config_err)?
            .set_default("validation.clock_skew_secs", 0)
            .map_err(config_err)?
            .set_default("validation.cache_staleness_secs", 0)
            .map_err(config_err)?
            .set_default("validation.quota_retry_attempts", 3)
            .map_err(config_err)?
            .set_default("logging.enabled", true)
            .map_err(config_err)?
            .set_default("logging.level", "info")
            .map_err(config_err)?
            .set_default("jobs.enabled", false)
            .map_err(config_err)?
            .set_default("jobs.usage_retention_days", 90)
            .map_err(config_err)?
            .set_default("jobs.usage_retention_cron", "0 30 3 * * *")
            .map_err(config_err)?
            // Load from config.toml (optional)
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables
            .set_override_option("server.host", env::var("KEYCHECK_SERVER_HOST").ok())
            .map_err(config_err)?
            .set_override_option("server.port", env_i64("KEYCHECK_SERVER_PORT"))
            .map_err(config_err)?
            .set_override_option("server.environment", env::var("KEYCHECK_ENVIRONMENT").ok())
            .map_err(config_err)?
            .set_override_option("database.db_type", env::var("KEYCHECK_DATABASE_TYPE").ok())
            .map_err(config_err)?
            .set_override_option(
                "database.sqlite_url",
                env::var("KEYCHECK_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("sqlite")),
            )
            .map_err(config_err)?
            .set_override_option(
                "database.postgres_url",
                env::var("KEYCHECK_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("postgres")),
            )
            .map_err(config_err)?
            .set_override_option(
                "auth.validation_secret",
                env::var("KEYCHECK_VALIDATION_SECRET").ok(),
            )
            .map_err(config_err)?
            .set_override_option("auth.admin_key", env::var("KEYCHECK_ADMIN_KEY").ok())
            .map_err(config_err)?
            .set_override_option("auth.secret_mode", env::var("KEYCHECK_SECRET_MODE").ok())
            .map_err(config_err)?
            .set_override_option(
                "validation.replay_window_secs",
                env_i64("KEYCHECK_REPLAY_WINDOW_SECS"),
            )
            .map_err(config_err)?
            .set_override_option("validation.clock_skew_secs", env_i64("KEYCHECK_CLOCK_SKEW_SECS"))
            .map_err(config_err)?
            .set_override_option(
                "validation.cache_staleness_secs",
                env_i64("KEYCHECK_CACHE_STALENESS_SECS"),
            )
            .map_err(config_err)?
            .set_override_option("logging.enabled", env_bool("KEYCHECK_LOGGING_ENABLED"))
            .map_err(config_err)?
            .set_override_option("logging.level", env::var("KEYCHECK_LOG_LEVEL").ok())
            .map_err(config_err)?
            .set_override_option("jobs.enabled", env_bool("KEYCHECK_JOBS_ENABLED"))
            .map_err(config_err)?
            .set_override_option(
                "jobs.usage_retention_days",
                env_i64("KEYCHECK_USAGE_RETENTION_DAYS"),
            )
            .map_err(config_err)?;

        let settings = builder
            .build()
            .map_err(|e| LicenseError::ConfigError(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| LicenseError::ConfigError(format!("failed to deserialize config: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> LicenseResult<()> {
        if self.server.port == 0 {
            return Err(LicenseError::ConfigError(
                "server.port must be greater than 0".to_string(),
            ));
        }

        match self.server.environment.to_lowercase().as_str() {
            "development" | "production" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "server.environment must be 'development' or 'production', got '{other}'"
                )));
            }
        }

        match self.database.db_type.as_str() {
            "sqlite" | "postgres" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "database.db_type must be 'sqlite' or 'postgres', got '{other}'"
                )));
            }
        }

        if self.auth.admin_key.is_empty() {
            return Err(LicenseError::ConfigError(
                "auth.admin_key is required".to_string(),
            ));
        }
        if self.server.is_production() && self.auth.admin_key.len() < MIN_PRODUCTION_ADMIN_KEY_LEN
        {
            return Err(LicenseError::ConfigError(format!(
                "auth.admin_key must be at least {MIN_PRODUCTION_ADMIN_KEY_LEN} characters in production"
            )));
        }
        if self.auth.secret_mode == SecretMode::Shared && self.auth.validation_secret.is_empty() {
            return Err(LicenseError::ConfigError(
                "auth.validation_secret is required when auth.secret_mode is 'shared'".to_string(),
            ));
        }

        if self.validation.replay_window_secs <= 0 {
            return Err(LicenseError::ConfigError(
                "validation.replay_window_secs must be greater than 0".to_string(),
            ));
        }
        if self.validation.clock_skew_secs < 0 || self.validation.cache_staleness_secs < 0 {
            return Err(LicenseError::ConfigError(
                "validation.clock_skew_secs and validation.cache_staleness_secs cannot be negative"
                    .to_string(),
            ));
        }
        for (name, value) in [
            ("validation.replay_window_secs", self.validation.replay_window_secs),
            ("validation.clock_skew_secs", self.validation.clock_skew_secs),
            ("validation.cache_staleness_secs", self.validation.cache_staleness_secs),
        ] {
            if value > MAX_VALIDATION_WINDOW_SECS {
                return Err(LicenseError::ConfigError(format!(
                    "{name} must be at most {MAX_VALIDATION_WINDOW_SECS}, got {value}"
                )));
            }
        }
        if self.jobs.usage_retention_days > MAX_USAGE_RETENTION_DAYS {
            return Err(LicenseError::ConfigError(format!(
                "jobs.usage_retention_days must be at most {MAX_USAGE_RETENTION_DAYS}, got {}",
                self.jobs.usage_retention_days
            )));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(LicenseError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        Ok(())
    }

    /// Settings for the validation path.
    pub fn validation_settings(&self) -> LicenseResult<ValidationSettings> {
        Ok(ValidationSettings {
            challenge: ChallengeSettings {
                replay_window: seconds(
                    "validation.replay_window_secs",
                    self.validation.replay_window_secs,
                )?,
                clock_skew: seconds("validation.clock_skew_secs", self.validation.clock_skew_secs)?,
            },
            shared_secret: Some(self.auth.validation_secret.clone()).filter(|s| !s.is_empty()),
        })
    }

    /// Settings for the admin path.
    pub fn admin_settings(&self) -> AdminSettings {
        AdminSettings {
            admin_key: self.auth.admin_key.clone(),
            secret_mode: self.auth.secret_mode,
        }
    }

    pub fn cache_staleness(&self) -> LicenseResult<Duration> {
        seconds(
            "validation.cache_staleness_secs",
            self.validation.cache_staleness_secs,
        )
    }
}

/// Get the global configuration.
///
/// This loads the configuration on first access and caches it.
/// Returns an error if configuration loading or validation fails.
pub fn get_config() -> LicenseResult<&'static KeycheckConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = KeycheckConfig::load()?;
    config.validate()?;

    // Another thread may have won the race; either value is fine.
    let _ = CONFIG.set(config);

    CONFIG
        .get()
        .ok_or_else(|| LicenseError::ConfigError("configuration was not initialised".to_string()))
}

/// Initialize configuration explicitly.
///
/// Call this early in your application to catch configuration errors.
pub fn init_config() -> LicenseResult<&'static KeycheckConfig> {
    get_config()
}
