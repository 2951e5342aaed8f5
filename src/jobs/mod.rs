//! Background job scheduler for keycheck.
//!
//! Requires the `background-jobs` feature to be enabled.
//!
//! # Available Jobs
//!
//! - **Usage Retention**: Deletes daily usage rows older than the configured
//!   retention period
//!
//! # Usage
//!
//! ```rust,ignore
//! use keycheck::jobs::{JobConfig, JobScheduler};
//!
//! let scheduler = JobScheduler::new(store, clock, JobConfig::default()).await?;
//! scheduler.start().await?;
//! ```

use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler as TokioJobScheduler};
use tracing::{error, info};

use crate::clock::Clock;
use crate::config::JobsConfig;
use crate::store::LicenseStore;

mod usage_retention;

pub use usage_retention::run_usage_retention;

/// Configuration for background jobs.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Cron expression for usage retention (default: daily at 03:30)
    pub usage_retention_cron: String,
    /// Days of usage history to keep (default: 90)
    pub usage_retention_days: u32,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            usage_retention_cron: "0 30 3 * * *".to_string(),
            usage_retention_days: 90,
        }
    }
}

impl From<&JobsConfig> for JobConfig {
    fn from(config: &JobsConfig) -> Self {
        Self {
            usage_retention_cron: config.usage_retention_cron.clone(),
            usage_retention_days: config.usage_retention_days,
        }
    }
}

pub struct JobScheduler {
    scheduler: TokioJobScheduler,
    store: Arc<dyn LicenseStore>,
    clock: Arc<dyn Clock>,
    config: JobConfig,
}

impl JobScheduler {
    pub async fn new(
        store: Arc<dyn LicenseStore>,
        clock: Arc<dyn Clock>,
        config: JobConfig,
    ) -> Result<Self, JobError> {
        let scheduler = TokioJobScheduler::new()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        Ok(Self {
            scheduler,
            store,
            clock,
            config,
        })
    }

    /// Register all jobs and start the scheduler.
    pub async fn start(&self) -> Result<(), JobError> {
        info!("Starting keycheck job scheduler");

        self.add_usage_retention_job().await?;

        self.scheduler
            .start()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!("keycheck job scheduler started");

        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), JobError> {
        info!("Shutting down keycheck job scheduler");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;
        Ok(())
    }

    async fn add_usage_retention_job(&self) -> Result<(), JobError> {
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let retention_days = self.config.usage_retention_days;

        let job = Job::new_async(
            self.config.usage_retention_cron.as_str(),
            move |_uuid, _l| {
                let store = Arc::clone(&store);
                let clock = Arc::clone(&clock);
                Box::pin(async move {
                    match run_usage_retention(store.as_ref(), clock.now(), retention_days).await {
                        Ok(removed) => {
                            if removed > 0 {
                                info!("Usage retention: {} rows deleted", removed);
                            }
                        }
                        Err(e) => {
                            error!("Usage retention failed: {}", e);
                        }
                    }
                })
            },
        )
        .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| JobError::SchedulerError(e.to_string()))?;

        info!(
            "Added usage retention job (schedule: {}, keep: {} days)",
            self.config.usage_retention_cron, self.config.usage_retention_days
        );

        Ok(())
    }

    /// Run usage retention immediately.
    pub async fn run_usage_retention_now(&self) -> Result<u64, JobError> {
        run_usage_retention(
            self.store.as_ref(),
            self.clock.now(),
            self.config.usage_retention_days,
        )
        .await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Job execution error: {0}")]
    ExecutionError(String),
}

impl From<crate::errors::LicenseError> for JobError {
    fn from(err: crate::errors::LicenseError) -> Self {
        JobError::StoreError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::license::usage_day;
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn default_config_values() {
        let config = JobConfig::default();
        assert_eq!(config.usage_retention_cron, "0 30 3 * * *");
        assert_eq!(config.usage_retention_days, 90);
    }

    #[test]
    fn config_from_jobs_section() {
        let section = JobsConfig {
            enabled: true,
            usage_retention_days: 7,
            usage_retention_cron: "0 0 * * * *".to_string(),
        };
        let config = JobConfig::from(&section);
        assert_eq!(config.usage_retention_days, 7);
        assert_eq!(config.usage_retention_cron, "0 0 * * * *");
    }

    #[tokio::test]
    async fn run_now_uses_injected_clock() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .try_consume_quota("L1", usage_day(now) - Duration::days(10), 5)
            .await
            .unwrap();

        let scheduler = JobScheduler::new(
            store.clone(),
            Arc::new(FixedClock::new(now)),
            JobConfig {
                usage_retention_days: 3,
                ..JobConfig::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(scheduler.run_usage_retention_now().await.unwrap(), 1);
        assert_eq!(store.usage_rows("L1").unwrap(), 0);
    }
}
