//! Transfer strategies: how one eligible repository reaches local storage.
//!
//! A strategy is chosen once per run from [`BackupPolicy::method`] and shared
//! by every transfer task of that run.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackupMethod, BackupPolicy, TransferConfig};
use crate::discovery::{RepositoryHost, RepositoryRef};
use crate::error::{FatalRunError, TransferError};

pub mod archive;
pub mod clone;
pub mod content_hash;

pub use archive::{extract_tar_gz, ArchiveTransfer, ExtractSummary};
pub use clone::CloneTransfer;

/// Copies one repository under `destination_root`
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Which backup method this strategy implements
    fn method(&self) -> BackupMethod;

    /// Transfer `repo` into `destination_root/<owner>/...`
    async fn transfer(
        &self,
        repo: &RepositoryRef,
        destination_root: &Path,
    ) -> Result<(), TransferError>;
}

/// Build the strategy for this run
pub fn strategy_for(
    policy: &BackupPolicy,
    host: Arc<dyn RepositoryHost>,
    settings: &TransferConfig,
) -> Result<Arc<dyn Transfer>, FatalRunError> {
    match policy.method {
        BackupMethod::Archive => {
            let transfer = ArchiveTransfer::new(
                host,
                policy.extract_archive,
                Duration::from_secs(settings.http_timeout_secs),
            )?;
            Ok(Arc::new(transfer))
        }
        BackupMethod::Clone => Ok(Arc::new(CloneTransfer::new(
            host.clone_credentials(),
            Duration::from_secs(settings.git_timeout_secs),
        ))),
    }
}
