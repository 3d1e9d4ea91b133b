use anyhow::{anyhow, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Main configuration structure for gitsaver
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Root directory that receives `<owner>/<repo>` backups
    #[serde(default = "default_destination_path")]
    pub destination_path: String,

    /// GitHub authentication and selection settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// When the daemon runs backups
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Transfer tuning
    #[serde(default)]
    pub transfer: TransferConfig,

    /// Outcome notification
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How repositories are copied to local storage
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupMethod {
    /// Download the default branch tarball, optionally unpacking it
    #[default]
    #[serde(rename = "tarball", alias = "archive")]
    Archive,
    /// Full git clone plus an all-refs fetch
    #[serde(rename = "git", alias = "clone")]
    Clone,
}

impl FromStr for BackupMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tarball" | "archive" => Ok(BackupMethod::Archive),
            "git" | "clone" => Ok(BackupMethod::Clone),
            other => Err(anyhow!(
                "Unknown backup method: {} (expected 'tarball' or 'git')",
                other
            )),
        }
    }
}

impl fmt::Display for BackupMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupMethod::Archive => write!(f, "tarball"),
            BackupMethod::Clone => write!(f, "git"),
        }
    }
}

/// GitHub configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GitHubConfig {
    /// Whose repositories to back up; defaults to the token owner
    pub username: Option<String>,

    /// Personal access token; anonymous access when absent
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Transfer strategy
    #[serde(default)]
    pub method: BackupMethod,

    /// Keep repositories owned by someone other than `username`
    #[serde(default)]
    pub include_other_users_repos: bool,

    /// Keep forks
    #[serde(default)]
    pub include_forked_repos: bool,

    /// Keep archived repositories
    #[serde(default)]
    pub include_archived_repos: bool,

    /// Unpack downloaded tarballs and delete the archive afterwards
    #[serde(default)]
    pub extract_tarball: bool,

    /// API root for GitHub Enterprise, e.g. `https://github.example.com/api/v3`
    pub api_url: Option<String>,
}

/// Scheduling configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ScheduleConfig {
    /// Cron expression (5 fields, or 6 with seconds), evaluated in UTC
    pub cron: Option<String>,

    /// Run one backup as soon as the daemon starts
    #[serde(default)]
    pub run_on_startup: bool,
}

/// Transfer tuning
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TransferConfig {
    /// Cap on concurrent transfers; unbounded when unset
    pub max_parallel: Option<usize>,

    /// Seconds to wait on a silent connection: per GitHub API request, and
    /// between chunks of an archive download
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Upper bound for a single git clone or fetch, in seconds
    #[serde(default = "default_git_timeout")]
    pub git_timeout_secs: u64,
}

/// Webhook configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct WebhookConfig {
    /// Notified after a run with no failures
    pub success_url: Option<String>,

    /// Notified after a fatal run or a run with failed repositories
    pub failure_url: Option<String>,

    /// Extra headers sent with every notification
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String, // "compact" or "json"
}

/// Immutable backup policy handed to the orchestrator for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupPolicy {
    pub include_other_users_repos: bool,
    pub include_forked_repos: bool,
    pub include_archived_repos: bool,
    pub method: BackupMethod,
    pub extract_archive: bool,
    pub destination_root: PathBuf,
}

impl Default for BackupPolicy {
    fn default() -> Self {
        Self {
            include_other_users_repos: false,
            include_forked_repos: false,
            include_archived_repos: false,
            method: BackupMethod::Archive,
            extract_archive: false,
            destination_root: PathBuf::from(default_destination_path()),
        }
    }
}

// Default value functions
fn default_destination_path() -> String {
    "./output".to_string()
}
fn default_http_timeout() -> u64 {
    300
}
fn default_git_timeout() -> u64 {
    3600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_parallel: None,
            http_timeout_secs: default_http_timeout(),
            git_timeout_secs: default_git_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to defaults,
    /// then apply environment overrides
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        let mut config = if config_path.exists() {
            Self::load(&config_path)?
        } else {
            tracing::debug!("No configuration file at {:?}, using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.expand_paths()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file, then apply environment overrides
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.expand_paths()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("gitsaver").join("config.yml"))
    }

    /// Overlay settings from environment-style variables.
    ///
    /// Booleans are enabled only by the literal value `true`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).map(|v| v.trim() == "true");

        if let Some(token) = lookup("GITHUB_TOKEN").filter(|t| !t.is_empty()) {
            self.github.token = Some(token);
        }
        if let Some(username) = lookup("GITHUB_USERNAME").filter(|u| !u.is_empty()) {
            self.github.username = Some(username);
        }
        if let Some(method) = lookup("GITHUB_BACKUP_METHOD").filter(|m| !m.is_empty()) {
            self.github.method = method.parse()?;
        }
        if let Some(cron) = lookup("GITHUB_CRON").filter(|c| !c.is_empty()) {
            self.schedule.cron = Some(cron);
        }
        if let Some(value) = flag("GITHUB_RUN_ON_STARTUP") {
            self.schedule.run_on_startup = value;
        }
        if let Some(value) = flag("GITHUB_INCLUDE_OTHER_USERS_REPOS") {
            self.github.include_other_users_repos = value;
        }
        if let Some(value) = flag("GITHUB_INCLUDE_FORKED_REPOS") {
            self.github.include_forked_repos = value;
        }
        if let Some(value) = flag("GITHUB_INCLUDE_ARCHIVED_REPOS") {
            self.github.include_archived_repos = value;
        }
        if let Some(value) = flag("GITHUB_EXTRACT_TARBALL") {
            self.github.extract_tarball = value;
        }
        if let Some(path) = lookup("DESTINATION_PATH").filter(|p| !p.is_empty()) {
            self.destination_path = path;
        }
        if let Some(url) = lookup("WEBHOOK_SUCCESS_URL").filter(|u| !u.is_empty()) {
            self.webhook.success_url = Some(url);
        }
        if let Some(url) = lookup("WEBHOOK_FAILURE_URL").filter(|u| !u.is_empty()) {
            self.webhook.failure_url = Some(url);
        }
        if let Some(headers) = lookup("WEBHOOK_HEADERS") {
            self.webhook.headers.extend(parse_header_list(&headers)?);
        }

        Ok(())
    }

    /// Expand environment variables and `~` in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.destination_path = shellexpand::full(&self.destination_path)
            .context("Failed to expand destination_path")?
            .into_owned();

        Ok(())
    }

    /// Reject settings that would only fail later at schedule time
    pub fn validate(&self) -> Result<()> {
        if let Some(expr) = &self.schedule.cron {
            crate::daemon::parse_cron(expr)?;
        }
        if self.transfer.max_parallel == Some(0) {
            return Err(anyhow!("transfer.max_parallel must be at least 1"));
        }
        Ok(())
    }

    /// Snapshot the policy the orchestrator applies for one run
    pub fn backup_policy(&self) -> BackupPolicy {
        BackupPolicy {
            include_other_users_repos: self.github.include_other_users_repos,
            include_forked_repos: self.github.include_forked_repos,
            include_archived_repos: self.github.include_archived_repos,
            method: self.github.method,
            extract_archive: self.github.extract_tarball,
            destination_root: PathBuf::from(&self.destination_path),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination_path: default_destination_path(),
            github: GitHubConfig::default(),
            schedule: ScheduleConfig::default(),
            transfer: TransferConfig::default(),
            webhook: WebhookConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Parse `Name=value,Other=value` into a header map
fn parse_header_list(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();

    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid header entry '{}', expected Name=value", pair))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }

    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.destination_path, "./output");
        assert_eq!(config.github.method, BackupMethod::Archive);
        assert!(!config.github.include_other_users_repos);
        assert!(!config.github.include_forked_repos);
        assert!(!config.github.include_archived_repos);
        assert!(!config.github.extract_tarball);
        assert!(config.schedule.cron.is_none());
        assert!(!config.schedule.run_on_startup);
        assert!(config.transfer.max_parallel.is_none());
        assert_eq!(config.transfer.http_timeout_secs, 300);
        assert!(config.webhook.headers.is_empty());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml_content = r#"
destination_path: "/srv/backups/github"
github:
  username: "octocat"
  token: "ghp_example"
  method: "git"
  include_other_users_repos: true
  include_forked_repos: true
  include_archived_repos: false
  extract_tarball: true
schedule:
  cron: "0 3 * * *"
  run_on_startup: true
transfer:
  max_parallel: 8
  http_timeout_secs: 60
webhook:
  success_url: "https://hooks.example.com/ok"
  failure_url: "https://hooks.example.com/fail"
  headers:
    Authorization: "Bearer abc"
logging:
  level: "debug"
  format: "json"
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.destination_path, "/srv/backups/github");
        assert_eq!(config.github.username.as_deref(), Some("octocat"));
        assert_eq!(config.github.token.as_deref(), Some("ghp_example"));
        assert_eq!(config.github.method, BackupMethod::Clone);
        assert!(config.github.include_other_users_repos);
        assert!(config.github.include_forked_repos);
        assert!(!config.github.include_archived_repos);
        assert!(config.github.extract_tarball);
        assert_eq!(config.schedule.cron.as_deref(), Some("0 3 * * *"));
        assert!(config.schedule.run_on_startup);
        assert_eq!(config.transfer.max_parallel, Some(8));
        assert_eq!(config.transfer.http_timeout_secs, 60);
        assert_eq!(config.transfer.git_timeout_secs, 3600);
        assert_eq!(
            config.webhook.headers.get("Authorization").map(String::as_str),
            Some("Bearer abc")
        );
        assert_eq!(config.logging.format, "json");
    }

    #[test]
    fn test_method_aliases() {
        let config: Config = serde_yaml::from_str("github:\n  method: archive\n").unwrap();
        assert_eq!(config.github.method, BackupMethod::Archive);
        assert_eq!("GIT".parse::<BackupMethod>().unwrap(), BackupMethod::Clone);
        assert!("rsync".parse::<BackupMethod>().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(lookup_from(&[
                ("GITHUB_TOKEN", "ghp_fromenv"),
                ("GITHUB_USERNAME", "hubot"),
                ("GITHUB_BACKUP_METHOD", "git"),
                ("GITHUB_INCLUDE_FORKED_REPOS", "true"),
                ("GITHUB_INCLUDE_ARCHIVED_REPOS", "yes"),
                ("GITHUB_EXTRACT_TARBALL", "true"),
                ("DESTINATION_PATH", "/data/gh"),
                ("WEBHOOK_HEADERS", "X-Token=abc, X-Env = prod"),
            ]))
            .unwrap();

        assert_eq!(config.github.token.as_deref(), Some("ghp_fromenv"));
        assert_eq!(config.github.username.as_deref(), Some("hubot"));
        assert_eq!(config.github.method, BackupMethod::Clone);
        assert!(config.github.include_forked_repos);
        // Only the literal "true" enables a flag
        assert!(!config.github.include_archived_repos);
        assert!(config.github.extract_tarball);
        assert_eq!(config.destination_path, "/data/gh");
        assert_eq!(config.webhook.headers.get("X-Env").map(String::as_str), Some("prod"));
        assert_eq!(config.webhook.headers.len(), 2);
    }

    #[test]
    fn test_env_override_rejects_unknown_method() {
        let mut config = Config::default();
        let result = config.apply_env_overrides(lookup_from(&[("GITHUB_BACKUP_METHOD", "ftp")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_cron() {
        let mut config = Config::default();
        config.schedule.cron = Some("every day please".to_string());
        assert!(config.validate().is_err());

        config.schedule.cron = Some("30 2 * * *".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_parallel() {
        let mut config = Config::default();
        config.transfer.max_parallel = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_paths() {
        env::set_var("TEST_GITSAVER_HOME", "/test/home");

        let mut config = Config::default();
        config.destination_path = "${TEST_GITSAVER_HOME}/backups".to_string();

        config.expand_paths().expect("Failed to expand paths");

        assert_eq!(config.destination_path, "/test/home/backups");

        env::remove_var("TEST_GITSAVER_HOME");
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.yml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_config_load_from_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.yml");
        std::fs::write(
            &config_path,
            "destination_path: /tmp/gitsaver\ngithub:\n  include_forked_repos: true\n",
        )
        .unwrap();

        let config = Config::load(&config_path).expect("Failed to load config");
        assert_eq!(config.destination_path, "/tmp/gitsaver");
        assert!(config.github.include_forked_repos);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_backup_policy_snapshot() {
        let mut config = Config::default();
        config.destination_path = "/backups".to_string();
        config.github.include_archived_repos = true;
        config.github.extract_tarball = true;

        let policy = config.backup_policy();
        assert_eq!(policy.destination_root, PathBuf::from("/backups"));
        assert!(policy.include_archived_repos);
        assert!(policy.extract_archive);
        assert!(!policy.include_forked_repos);
        assert_eq!(policy.method, BackupMethod::Archive);
    }

    #[test]
    fn test_default_config_path_xdg() {
        let default_path = Config::default_config_path().expect("Failed to get default path");
        assert!(default_path.to_string_lossy().contains("gitsaver"));
        assert!(default_path.to_string_lossy().ends_with("config.yml"));
    }
}
