//! Repository discovery abstraction layer
//!
//! The orchestrator only talks to a [`RepositoryHost`]: something that can
//! list repositories for a session and resolve a download link for one of
//! them. [`crate::github::GitHubClient`] is the production implementation;
//! tests substitute in-memory hosts.

use async_trait::async_trait;
use reqwest::Url;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::error::{FatalRunError, TransferError};

/// Identity of a repository: `(owner, name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// A remote repository as reported by the host for the current run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    /// Owner login (user or organization)
    pub owner: String,

    /// Repository name
    pub name: String,

    /// HTTPS clone URL
    pub clone_url: String,

    /// Endpoint that redirects to a tarball of the default branch
    pub archive_url: String,

    /// Whether the repository is a fork
    pub is_fork: bool,

    /// Whether the repository is archived
    pub is_archived: bool,

    /// Default branch name, when the host reports one
    pub default_branch: Option<String>,
}

impl RepositoryRef {
    pub fn id(&self) -> RepoId {
        RepoId::new(&self.owner, &self.name)
    }

    /// Get display name (owner/name format)
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// `root/owner/name`: clone working tree or extracted archive
    pub fn local_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.owner).join(&self.name)
    }

    /// `root/owner/name.tar.gz`: downloaded archive before extraction
    pub fn archive_path(&self, root: &Path) -> PathBuf {
        root.join(&self.owner).join(format!("{}.tar.gz", self.name))
    }
}

/// Read-only view of the run's session with the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Whether a token was accepted by the host
    pub authenticated: bool,

    /// Username the filter policy compares owners against
    pub username: String,
}

/// Capability interface for a repository host
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Session the host was opened with
    fn session(&self) -> &SessionInfo;

    /// List every repository visible to the session, following pagination
    /// to the end. Any page failure aborts the listing.
    async fn list_repositories(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<RepositoryRef>, FatalRunError>;

    /// Resolve a time-limited download link for the default branch tarball
    async fn archive_link(&self, repo: &RepositoryRef) -> Result<Url, TransferError>;

    /// Basic-auth credentials for git over HTTPS, if the session has any
    fn clone_credentials(&self) -> Option<(String, String)>;

    /// Provider name for display/logging
    fn provider_name(&self) -> &'static str;
}
