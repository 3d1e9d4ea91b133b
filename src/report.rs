//! Outcome reporting: per-repository outcomes, the run summary, and the
//! webhook that announces it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, USER_AGENT};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::WebhookConfig;
use crate::discovery::RepoId;
use crate::error::{FatalRunError, NotificationError, TransferError};
use crate::filter::SkipReason;

/// How many failures are itemized in a notification message
const MAX_LISTED_FAILURES: usize = 5;

/// Service name reported in webhook payloads
const SERVICE_NAME: &str = "gitsaver";

/// Result of transferring one eligible repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub repo: RepoId,
    pub succeeded: bool,
    pub error: Option<String>,
}

impl TransferOutcome {
    pub fn success(repo: RepoId) -> Self {
        Self {
            repo,
            succeeded: true,
            error: None,
        }
    }

    pub fn failure(repo: RepoId, error: &TransferError) -> Self {
        Self {
            repo,
            succeeded: false,
            error: Some(error.to_string()),
        }
    }
}

/// Summary of one backup run
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    /// Repositories returned by the listing
    pub considered: usize,
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<TransferOutcome>,
    pub skips: Vec<(RepoId, SkipReason)>,
    pub duration: Duration,
}

impl RunResult {
    /// Repositories that passed the filter and were handed to a transfer
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Builds a [`RunResult`] from the stream of filter decisions and outcomes
#[derive(Debug)]
pub struct OutcomeCollector {
    result: RunResult,
    started: Instant,
}

impl OutcomeCollector {
    pub fn new() -> Self {
        Self {
            result: RunResult::default(),
            started: Instant::now(),
        }
    }

    pub fn record_listed(&mut self, count: usize) {
        self.result.considered += count;
    }

    pub fn record_skip(&mut self, repo: RepoId, reason: SkipReason) {
        self.result.skipped += 1;
        self.result.skips.push((repo, reason));
    }

    pub fn record(&mut self, outcome: TransferOutcome) {
        if outcome.succeeded {
            self.result.succeeded += 1;
        } else {
            self.result.failed += 1;
            self.result.failures.push(outcome);
        }
    }

    pub fn finish(mut self) -> RunResult {
        self.result.duration = self.started.elapsed();
        self.result
    }
}

impl Default for OutcomeCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Overall status announced for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

/// Status and human-readable summary of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub status: RunStatus,
    pub message: String,
}

/// JSON body POSTed to the webhook
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub status: RunStatus,
    pub message: &'a str,
    pub timestamp: DateTime<Utc>,
    pub service: &'static str,
}

/// Delivers run notifications
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// POSTs notifications to the configured success/failure URLs
pub struct WebhookNotifier {
    http: reqwest::Client,
    success_url: Option<String>,
    failure_url: Option<String>,
    headers: BTreeMap<String, String>,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Result<Self, NotificationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http,
            success_url: config.success_url.clone().filter(|u| !u.is_empty()),
            failure_url: config.failure_url.clone().filter(|u| !u.is_empty()),
            headers: config.headers.clone(),
        })
    }

    fn header_map(&self) -> Result<HeaderMap, NotificationError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("gitsaver-webhook"));

        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| NotificationError::Header(name.clone()))?;
            let value =
                HeaderValue::from_str(value).map_err(|_| NotificationError::Header(name.to_string()))?;
            headers.insert(name, value);
        }

        Ok(headers)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        let url = match notification.status {
            RunStatus::Success => self.success_url.as_deref(),
            RunStatus::Failure => self.failure_url.as_deref(),
        };
        let Some(url) = url else {
            info!("No webhook URL configured, skipping webhook notification");
            return Ok(());
        };

        let payload = WebhookPayload {
            status: notification.status,
            message: &notification.message,
            timestamp: Utc::now(),
            service: SERVICE_NAME,
        };

        let response = self
            .http
            .post(url)
            .headers(self.header_map()?)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!("Webhook notification sent to {} (status: {})", url, status.as_u16());
            Ok(())
        } else {
            Err(NotificationError::Status(status.as_u16()))
        }
    }
}

/// Turns a run result into a notification and hands it to a [`Notifier`]
#[derive(Clone)]
pub struct OutcomeReporter {
    notifier: Arc<dyn Notifier>,
}

impl OutcomeReporter {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Build the status and message for a run
    pub fn summarize(result: &RunResult, fatal: Option<&FatalRunError>) -> Notification {
        if let Some(err) = fatal {
            return Notification {
                status: RunStatus::Failure,
                message: format!("Backup could not start: {}", err),
            };
        }

        let mut message = format!(
            "Backup completed in {:.1}s: {} repositories considered, {} skipped, {} succeeded, {} failed",
            result.duration.as_secs_f64(),
            result.considered,
            result.skipped,
            result.succeeded,
            result.failed
        );

        if result.has_failures() {
            let listed: Vec<String> = result
                .failures
                .iter()
                .take(MAX_LISTED_FAILURES)
                .map(|f| {
                    format!(
                        "{} ({})",
                        f.repo,
                        f.error.as_deref().unwrap_or("unknown error")
                    )
                })
                .collect();
            message.push_str(". Failures: ");
            message.push_str(&listed.join("; "));
            if result.failures.len() > MAX_LISTED_FAILURES {
                message.push_str(&format!(
                    "; and {} more",
                    result.failures.len() - MAX_LISTED_FAILURES
                ));
            }
        }

        Notification {
            status: if result.has_failures() {
                RunStatus::Failure
            } else {
                RunStatus::Success
            },
            message,
        }
    }

    /// Announce the run. Delivery problems are logged and otherwise ignored.
    pub async fn report(&self, result: &RunResult, fatal: Option<&FatalRunError>) {
        let notification = Self::summarize(result, fatal);
        info!("{}", notification.message);

        if let Err(e) = self.notifier.notify(&notification).await {
            warn!("Failed to deliver run notification: {}", e);
        }
    }
}
