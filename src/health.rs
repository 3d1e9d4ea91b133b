//! Preflight checks for `gitsaver doctor`
//!
//! Verifies that a backup run has what it needs before one is scheduled.

use std::path::Path;

use crate::config::{BackupMethod, Config, WebhookConfig};
use crate::github::{GitHubClient, GitHubSettings};

/// Oldest git that reads `GIT_CONFIG_COUNT`, used to pass clone credentials
const MIN_GIT_VERSION: (u32, u32) = (2, 31);

/// Result of all preflight checks
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Git installation status
    pub git: CheckResult,
    /// GitHub session status
    pub github: CheckResult,
    /// Destination directory status
    pub destination: CheckResult,
    /// Webhook configuration (warning only)
    pub webhook: CheckResult,
}

/// Result of an individual check
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub message: String,
    pub details: Option<String>,
    pub is_warning: bool,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: None,
            is_warning: false,
        }
    }

    fn ok_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn error_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
            details: Some(details.into()),
            is_warning: false,
        }
    }

    fn warning_with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
            details: Some(details.into()),
            is_warning: true,
        }
    }

    /// Failures only count against the clone method; archive runs never call git
    fn required_for(self, method: BackupMethod) -> Self {
        if self.passed || method == BackupMethod::Clone {
            self
        } else {
            Self {
                passed: true,
                is_warning: true,
                ..self
            }
        }
    }
}

impl HealthCheck {
    /// Run all checks
    pub async fn run(config: &Config) -> Self {
        Self {
            git: Self::check_git().required_for(config.github.method),
            github: Self::check_github(config).await,
            destination: Self::check_destination(Path::new(&config.destination_path)),
            webhook: Self::check_webhook(&config.webhook),
        }
    }

    /// Whether every required check passed (warnings allowed)
    pub fn all_passed(&self) -> bool {
        self.all_checks().iter().all(|(_, r)| r.passed)
    }

    /// Failed checks (errors only, not warnings)
    pub fn errors(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| !r.passed)
            .collect()
    }

    /// Checks that passed with a warning
    pub fn warnings(&self) -> Vec<&CheckResult> {
        self.all_checks()
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.is_warning)
            .collect()
    }

    fn check_git() -> CheckResult {
        match std::process::Command::new("git").arg("--version").output() {
            Ok(output) if output.status.success() => {
                Self::check_git_version(String::from_utf8_lossy(&output.stdout).trim())
            }
            Ok(_) => CheckResult::error_with_details("Git command failed", "git --version exited non-zero"),
            Err(_) => CheckResult::error_with_details(
                "Git not found in PATH",
                "Install git: https://git-scm.com/downloads",
            ),
        }
    }

    /// Judge `git --version` output
    fn check_git_version(version: &str) -> CheckResult {
        match parse_git_version(version) {
            Some(found) if found >= MIN_GIT_VERSION => {
                CheckResult::ok_with_details("Git installed", version.to_string())
            }
            Some((major, minor)) => CheckResult::error_with_details(
                "Git is too old",
                format!(
                    "Found {}.{}, need {}.{} or newer",
                    major, minor, MIN_GIT_VERSION.0, MIN_GIT_VERSION.1
                ),
            ),
            None => CheckResult::warning_with_details("Unrecognized git version", version.to_string()),
        }
    }

    async fn check_github(config: &Config) -> CheckResult {
        match GitHubClient::authenticate(&GitHubSettings::from_config(config)).await {
            Ok(client) if client.is_authenticated() => CheckResult::ok_with_details(
                "GitHub authentication successful",
                format!("Backing up repositories for: {}", client.username()),
            ),
            Ok(client) if client.username().is_empty() => CheckResult::error_with_details(
                "No GitHub token or username configured",
                "Set GITHUB_TOKEN, or GITHUB_USERNAME for public repositories only",
            ),
            Ok(client) => CheckResult::warning_with_details(
                "Anonymous GitHub access",
                format!("Only public repositories of {} will be backed up", client.username()),
            ),
            Err(e) => CheckResult::error_with_details("GitHub authentication failed", e.to_string()),
        }
    }

    /// The destination must be a writable directory, or creatable
    fn check_destination(path: &Path) -> CheckResult {
        if !path.exists() {
            let existing = path
                .ancestors()
                .skip(1)
                .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
                .find(|p| p.exists());
            return match existing {
                Some(existing) if is_writable_dir(existing) => CheckResult::ok_with_details(
                    "Destination will be created on first run",
                    path.display().to_string(),
                ),
                _ => CheckResult::error_with_details(
                    "Destination cannot be created",
                    format!("Run: mkdir -p {}", path.display()),
                ),
            };
        }

        if !path.is_dir() {
            return CheckResult::error_with_details(
                "Destination is not a directory",
                path.display().to_string(),
            );
        }

        if is_writable_dir(path) {
            CheckResult::ok_with_details("Destination is writable", path.display().to_string())
        } else {
            CheckResult::error_with_details("Destination is not writable", path.display().to_string())
        }
    }

    fn check_webhook(webhook: &WebhookConfig) -> CheckResult {
        let configured = [&webhook.success_url, &webhook.failure_url]
            .iter()
            .filter(|u| u.as_deref().is_some_and(|u| !u.is_empty()))
            .count();

        match configured {
            0 => CheckResult::warning_with_details(
                "No webhook configured",
                "Set WEBHOOK_SUCCESS_URL / WEBHOOK_FAILURE_URL to be notified",
            ),
            2 => CheckResult::ok("Success and failure webhooks configured"),
            _ => CheckResult::ok("One webhook configured"),
        }
    }

    /// All checks in display order
    pub fn all_checks(&self) -> [(&'static str, &CheckResult); 4] {
        [
            ("Git Installation", &self.git),
            ("GitHub Session", &self.github),
            ("Destination", &self.destination),
            ("Webhook", &self.webhook),
        ]
    }
}

/// `(major, minor)` from `git version 2.39.2 (Apple Git-143)`
fn parse_git_version(output: &str) -> Option<(u32, u32)> {
    let version = output.strip_prefix("git version ")?.split_whitespace().next()?;
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

fn is_writable_dir(path: &Path) -> bool {
    let probe = path.join(format!(".gitsaver-doctor-{}", std::process::id()));
    match std::fs::write(&probe, b"") {
        Ok(()) => std::fs::remove_file(&probe).is_ok(),
        Err(_) => false,
    }
}
