//! Archive transfer: download the default branch tarball and optionally unpack it.
//!
//! Tarballs generated by GitHub wrap everything in a single
//! `<owner>-<repo>-<sha>/` directory. Extraction drops that first path
//! segment so the destination holds the repository tree directly.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use futures::StreamExt;
use reqwest::header::USER_AGENT;
use reqwest::Url;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::Transfer;
use crate::config::BackupMethod;
use crate::discovery::{RepositoryHost, RepositoryRef};
use crate::error::{FatalRunError, TransferError};

/// Downloads `<owner>/<repo>.tar.gz` and optionally extracts it to `<owner>/<repo>/`
pub struct ArchiveTransfer {
    host: Arc<dyn RepositoryHost>,
    http: reqwest::Client,
    extract: bool,
    /// Longest wait for response headers or for the next body chunk
    stall_timeout: Duration,
}

/// What an extraction wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub directories: usize,
    pub files: usize,
    pub skipped: usize,
}

impl ArchiveTransfer {
    pub fn new(
        host: Arc<dyn RepositoryHost>,
        extract: bool,
        stall_timeout: Duration,
    ) -> Result<Self, FatalRunError> {
        // Bounded per stall, not per request: a download runs as long as data keeps arriving
        let http = reqwest::Client::builder()
            .connect_timeout(stall_timeout)
            .build()
            .map_err(|e| FatalRunError::Client(e.to_string()))?;

        Ok(Self {
            host,
            http,
            extract,
            stall_timeout,
        })
    }

    fn stalled(&self, link: &Url) -> TransferError {
        TransferError::Http(format!(
            "download from {} stalled for {}s",
            link.host_str().unwrap_or("host"),
            self.stall_timeout.as_secs()
        ))
    }

    /// Stream `link` into `target`, replacing any previous download
    async fn download(&self, link: Url, target: &Path) -> Result<u64, TransferError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::io(parent, e))?;
        }

        let request = self.http.get(link.clone()).header(USER_AGENT, "gitsaver");
        let response = tokio::time::timeout(self.stall_timeout, request.send())
            .await
            .map_err(|_| self.stalled(&link))??
            .error_for_status()?;

        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|e| TransferError::io(target, e))?;

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = tokio::time::timeout(self.stall_timeout, body.next())
            .await
            .map_err(|_| self.stalled(&link))?
        {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| TransferError::io(target, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| TransferError::io(target, e))?;

        Ok(written)
    }
}

#[async_trait]
impl Transfer for ArchiveTransfer {
    fn method(&self) -> BackupMethod {
        BackupMethod::Archive
    }

    async fn transfer(
        &self,
        repo: &RepositoryRef,
        destination_root: &Path,
    ) -> Result<(), TransferError> {
        let link = self.host.archive_link(repo).await?;
        let archive_path = repo.archive_path(destination_root);

        let bytes = self.download(link, &archive_path).await?;
        info!(
            "Downloaded {}@{} ({} bytes) -> {}",
            repo.full_name(),
            repo.default_branch.as_deref().unwrap_or("HEAD"),
            bytes,
            archive_path.display()
        );

        if !self.extract {
            return Ok(());
        }

        let destination = repo.local_dir(destination_root);
        let archive = archive_path.clone();
        let target = destination.clone();
        let summary = tokio::task::spawn_blocking(move || extract_tar_gz(&archive, &target))
            .await
            .map_err(|e| TransferError::Extract {
                archive: archive_path.display().to_string(),
                detail: e.to_string(),
            })??;

        info!(
            "Extracted {} -> {} ({} files, {} directories, {} skipped)",
            repo.full_name(),
            destination.display(),
            summary.files,
            summary.directories,
            summary.skipped
        );

        // The archive is only removed once its contents are safely on disk
        tokio::fs::remove_file(&archive_path)
            .await
            .map_err(|e| TransferError::io(&archive_path, e))?;

        Ok(())
    }
}

/// Relative path of an entry below the archive's wrapper directory.
///
/// Returns `None` for entries that have no path separator, for the wrapper
/// directory itself, and for paths that would escape the destination.
pub fn strip_wrapper_dir(entry_name: &str) -> Option<PathBuf> {
    let (_, rest) = entry_name.split_once('/')?;
    let relative = Path::new(rest);

    let mut clean = PathBuf::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}

/// Unpack a gzip-compressed tarball into `destination`, dropping the first
/// path segment of every entry.
///
/// Directories are created, regular files are written in full (overwriting),
/// and every other entry type is logged and skipped.
pub fn extract_tar_gz(archive: &Path, destination: &Path) -> Result<ExtractSummary, TransferError> {
    let extract_err = |detail: String| TransferError::Extract {
        archive: archive.display().to_string(),
        detail,
    };

    let file = File::open(archive).map_err(|e| TransferError::io(archive, e))?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));

    fs::create_dir_all(destination).map_err(|e| TransferError::io(destination, e))?;

    let mut summary = ExtractSummary::default();
    let entries = tarball
        .entries()
        .map_err(|e| extract_err(format!("failed to read tar entries: {}", e)))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| extract_err(format!("failed to read tar header: {}", e)))?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();

        let Some(relative) = strip_wrapper_dir(&name) else {
            debug!("Skipping top-level entry: {}", name);
            continue;
        };
        let target = destination.join(&relative);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| TransferError::io(&target, e))?;
            summary.directories += 1;
        } else if entry_type.is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| TransferError::io(parent, e))?;
            }
            let mut out = File::create(&target).map_err(|e| TransferError::io(&target, e))?;
            io::copy(&mut entry, &mut out)
                .map_err(|e| extract_err(format!("failed to write {}: {}", target.display(), e)))?;
            summary.files += 1;
        } else {
            warn!("Unsupported tar entry type {:?} for {}", entry_type, name);
            summary.skipped += 1;
        }
    }

    debug!("Extracted {} into {}", archive.display(), destination.display());
    Ok(summary)
}
