//! Scheduler - runs backups on a cron schedule until shut down
//!
//! Schedules are evaluated in UTC. A run that fails fatally is logged and the
//! scheduler waits for the next tick; Ctrl+C cancels the current run and stops
//! the loop.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::FatalRunError;
use crate::orchestrator::run_backup;
use crate::report::RunResult;

/// Parse a cron expression.
///
/// Standard 5-field expressions (`min hour dom month dow`) get a leading
/// seconds field of `0`; 6 and 7 field expressions are taken as they are.
pub fn parse_cron(expr: &str) -> Result<Schedule> {
    let trimmed = expr.trim();
    let normalized = match trimmed.split_whitespace().count() {
        5 => format!("0 {}", trimmed),
        6 | 7 => trimmed.to_string(),
        n => bail!(
            "Invalid cron expression '{}': expected 5 fields, got {}",
            trimmed,
            n
        ),
    };

    Schedule::from_str(&normalized)
        .with_context(|| format!("Invalid cron expression '{}'", trimmed))
}

/// Drives repeated backup runs
pub struct Scheduler {
    config: Arc<Config>,
    schedule: Option<Schedule>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(config: Config) -> Result<Self> {
        let schedule = config
            .schedule
            .cron
            .as_deref()
            .map(parse_cron)
            .transpose()?;

        Ok(Self {
            config: Arc::new(config),
            schedule,
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops the scheduler and cancels the run in progress
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// First scheduled run strictly after `now`
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.as_ref()?.after(&now).next()
    }

    /// Run backups against GitHub until Ctrl+C
    pub async fn run(&self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received, stopping scheduler..."),
                Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
            }
            shutdown.cancel();
        });

        let config = Arc::clone(&self.config);
        self.run_with(move |cancel| {
            let config = Arc::clone(&config);
            async move { run_backup(&config, cancel).await }
        })
        .await
    }

    /// Scheduler loop with an injectable job
    pub async fn run_with<F, Fut>(&self, job: F) -> Result<()>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<RunResult, FatalRunError>>,
    {
        if self.schedule.is_none() && !self.config.schedule.run_on_startup {
            info!("No cron schedule and run_on_startup is disabled, nothing to do");
            return Ok(());
        }

        if self.config.schedule.run_on_startup {
            info!("Running backup on startup");
            self.run_once(&job).await;
        }

        let Some(schedule) = &self.schedule else {
            info!("No cron schedule configured, exiting after startup run");
            return Ok(());
        };

        info!("Scheduler started");
        while !self.shutdown.is_cancelled() {
            let Some(next) = schedule.upcoming(Utc).next() else {
                info!("Cron schedule has no upcoming runs, stopping");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            info!("Next backup scheduled at {}", next.to_rfc3339());

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    debug!("Cron tick at {}", next.to_rfc3339());
                    self.run_once(&job).await;
                }
            }
        }

        info!("Scheduler stopped");
        Ok(())
    }

    async fn run_once<F, Fut>(&self, job: &F)
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<RunResult, FatalRunError>>,
    {
        match job(self.shutdown.child_token()).await {
            Ok(result) => info!(
                "Scheduled backup finished: {} succeeded, {} failed, {} skipped",
                result.succeeded, result.failed, result.skipped
            ),
            Err(e) => error!("Scheduled backup could not run: {}", e),
        }
    }
}
