use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use keycheck::admin::AdminService;
use keycheck::cache::LicenseCache;
use keycheck::clock::{Clock, SystemClock};
use keycheck::config::{init_config, KeycheckConfig};
use keycheck::errors::{LicenseError, LicenseResult};
use keycheck::quota::QuotaCounter;
use keycheck::server::{build_router, AppState, Database};
use keycheck::store::LicenseStore;
use keycheck::validation::ValidationService;

/// Backoff between retries of a contended quota write.
const QUOTA_RETRY_BACKOFF: StdDuration = StdDuration::from_millis(10);

fn init_tracing(config: &KeycheckConfig) {
    let level = if config.logging.enabled {
        config.logging.level.as_str()
    } else {
        "off"
    };
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        return;
    }
    info!("Shutdown signal received");
}

async fn run(config: &'static KeycheckConfig) -> LicenseResult<()> {
    let db = Database::connect(&config.database).await?;
    db.migrate().await?;
    let db_type = db.db_type().to_string();
    let store: Arc<dyn LicenseStore> = db;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let cache = Arc::new(LicenseCache::new(config.cache_staleness()?, clock.clone()));
    let quota = QuotaCounter::new(store.clone())
        .with_retries(config.validation.quota_retry_attempts, QUOTA_RETRY_BACKOFF);

    let validation = ValidationService::new(
        store.clone(),
        clock.clone(),
        config.validation_settings()?,
    )
    .with_cache(cache.clone())
    .with_quota_counter(quota);
    let admin = AdminService::new(store.clone(), clock.clone(), config.admin_settings())
        .with_cache(cache);

    #[cfg(feature = "background-jobs")]
    let _scheduler = if config.jobs.enabled {
        use keycheck::jobs::{JobConfig, JobScheduler};

        let scheduler = JobScheduler::new(
            store.clone(),
            clock.clone(),
            JobConfig::from(&config.jobs),
        )
        .await
        .map_err(|e| LicenseError::ConfigError(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| LicenseError::ConfigError(e.to_string()))?;
        Some(scheduler)
    } else {
        None
    };

    let state = AppState {
        validation: Arc::new(validation),
        admin: Arc::new(admin),
        store,
        db_type,
    };
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| LicenseError::ConfigError(format!("invalid listen address: {e}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| LicenseError::ConfigError(format!("failed to bind {addr}: {e}")))?;

    info!(
        "keycheck server listening on http://{} ({} mode, secrets: {})",
        addr, config.server.environment, config.auth.secret_mode
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| LicenseError::StoreFailure(format!("server error: {e}")))?;

    info!("keycheck server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match init_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("keycheck: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("keycheck server failed: {e}");
            ExitCode::FAILURE
        }
    }
}
