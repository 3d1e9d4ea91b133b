//! Error taxonomy for a backup run.
//!
//! A run can fail in three distinct ways, and each one travels differently:
//!
//! - [`FatalRunError`] stops the run before any repository work is dispatched
//!   and surfaces to the caller.
//! - [`TransferError`] is isolated to a single repository and folded into the
//!   run result.
//! - [`NotificationError`] is logged by the reporter and never changes the
//!   outcome of the run.

use thiserror::Error;

/// Errors that abort an entire backup run.
#[derive(Debug, Error)]
pub enum FatalRunError {
    /// The host rejected the configured token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Anonymous listing needs a username to know whose repositories to list.
    #[error("a GitHub username is required when no token is configured")]
    MissingUsername,

    /// A page of the repository listing could not be fetched.
    #[error("failed to list repositories (page {page}): {detail}")]
    Listing { page: u32, detail: String },

    /// The run was cancelled before dispatch.
    #[error("backup run cancelled")]
    Cancelled,

    /// The hosting client could not be constructed.
    #[error("failed to create hosting client: {0}")]
    Client(String),
}

/// Errors isolated to a single repository transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("archive not found for {repo}")]
    NotFound { repo: String },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to extract archive {archive}: {detail}")]
    Extract { archive: String, detail: String },

    #[error("git {operation} failed: {detail}")]
    Git { operation: String, detail: String },

    #[error("transfer cancelled")]
    Cancelled,

    #[error("transfer task panicked: {0}")]
    Panicked(String),

    #[error("transfer task aborted")]
    Aborted,
}

impl TransferError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        TransferError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(err: reqwest::Error) -> Self {
        TransferError::Http(err.to_string())
    }
}

/// Webhook delivery failures.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned status {0}")]
    Status(u16),

    #[error("invalid webhook header {0}")]
    Header(String),
}
