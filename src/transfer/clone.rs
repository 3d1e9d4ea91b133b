//! Clone transfer: replace the local working copy with a fresh full clone.

use async_trait::async_trait;
use base64::Engine as _;
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tokio::time::timeout;
use tracing::{debug, info};

use super::Transfer;
use crate::config::BackupMethod;
use crate::discovery::RepositoryRef;
use crate::error::TransferError;

/// Deletes `<owner>/<repo>/`, clones it again and fetches every ref
pub struct CloneTransfer {
    credentials: Option<(String, String)>,
    git_timeout: Duration,
}

impl CloneTransfer {
    pub fn new(credentials: Option<(String, String)>, git_timeout: Duration) -> Self {
        Self {
            credentials,
            git_timeout,
        }
    }

    /// `Authorization` header value for git's `http.extraHeader`
    fn auth_header(&self) -> Option<String> {
        self.credentials.as_ref().map(|(user, token)| {
            let encoded =
                base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, token));
            format!("Authorization: Basic {}", encoded)
        })
    }

    /// Replace the token with a placeholder in anything we log or report
    fn redact(&self, text: &str) -> String {
        match &self.credentials {
            Some((_, token)) if !token.is_empty() => text.replace(token.as_str(), "***"),
            _ => text.to_string(),
        }
    }

    /// Run one git command.
    ///
    /// Credentials go through `GIT_CONFIG_*` so they are neither visible in
    /// the process list nor written to the clone's `.git/config`.
    async fn git(
        &self,
        operation: &str,
        args: &[&str],
        cwd: Option<&Path>,
    ) -> Result<Output, TransferError> {
        let mut command = AsyncCommand::new("git");
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        if let Some(header) = self.auth_header() {
            command
                .env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", "http.extraHeader")
                .env("GIT_CONFIG_VALUE_0", header);
        }

        debug!("Running git {}", operation);
        let output = match timeout(self.git_timeout, command.output()).await {
            Ok(result) => result.map_err(|e| TransferError::Git {
                operation: operation.to_string(),
                detail: format!("failed to execute git: {}", e),
            })?,
            Err(_) => {
                return Err(TransferError::Git {
                    operation: operation.to_string(),
                    detail: format!("timed out after {}s", self.git_timeout.as_secs()),
                })
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransferError::Git {
                operation: operation.to_string(),
                detail: self.redact(stderr.trim()),
            });
        }

        Ok(output)
    }
}

/// Remove whatever is at `path` so a clone starts from nothing
pub async fn clear_destination(path: &Path) -> Result<(), TransferError> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path)
            .await
            .map_err(|e| TransferError::io(path, e)),
        Ok(_) => tokio::fs::remove_file(path)
            .await
            .map_err(|e| TransferError::io(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TransferError::io(path, e)),
    }
}

#[async_trait]
impl Transfer for CloneTransfer {
    fn method(&self) -> BackupMethod {
        BackupMethod::Clone
    }

    async fn transfer(
        &self,
        repo: &RepositoryRef,
        destination_root: &Path,
    ) -> Result<(), TransferError> {
        let target = repo.local_dir(destination_root);

        clear_destination(&target).await?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(parent, e))?;
        }

        info!("Cloning repository: {} -> {}", repo.full_name(), target.display());

        let target_str = target.to_string_lossy();
        self.git(
            "clone",
            &["clone", "--quiet", repo.clone_url.as_str(), target_str.as_ref()],
            None,
        )
        .await?;

        // Branches and tags beyond the default clone; up-to-date is success
        self.git(
            "fetch",
            &[
                "fetch",
                "--quiet",
                "--update-head-ok",
                "origin",
                "+refs/*:refs/*",
            ],
            Some(&target),
        )
        .await?;

        info!("Successfully cloned: {}", repo.full_name());
        Ok(())
    }
}
