//! gitsaver - GitHub repository backup
//!
//! gitsaver lists the repositories visible to a GitHub session, decides which
//! ones to keep, and mirrors each of them locally, either as a downloaded
//! (and optionally extracted) tarball of the default branch or as a full git
//! clone with every branch and tag.
//!
//! ## Modules
//!
//! - [`config`]: YAML configuration with environment overrides
//! - [`discovery`]: repository identity and the host abstraction
//! - [`github`]: GitHub session, listing and archive links
//! - [`filter`]: per-repository eligibility
//! - [`transfer`]: archive and clone strategies
//! - [`orchestrator`]: fan-out/fan-in of one backup run
//! - [`report`]: run summary and webhook notification
//! - [`daemon`]: cron scheduler
//! - [`health`]: preflight checks

pub mod config;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod github;
pub mod health;
pub mod orchestrator;
pub mod report;
pub mod transfer;

pub use config::{BackupMethod, BackupPolicy, Config};
pub use daemon::Scheduler;
pub use discovery::{RepoId, RepositoryHost, RepositoryRef, SessionInfo};
pub use error::{FatalRunError, NotificationError, TransferError};
pub use github::GitHubClient;
pub use health::HealthCheck;
pub use orchestrator::{run_backup, run_backup_with, Orchestrator};
pub use report::{OutcomeReporter, RunResult, TransferOutcome};
