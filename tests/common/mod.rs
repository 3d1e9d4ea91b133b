//! Common test utilities and helpers for gitsaver tests
#![allow(dead_code)]

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::Url;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use gitsaver::config::BackupMethod;
use gitsaver::error::{FatalRunError, NotificationError, TransferError};
use gitsaver::report::{Notification, Notifier, OutcomeReporter};
use gitsaver::transfer::Transfer;
use gitsaver::{RepositoryHost, RepositoryRef, SessionInfo};

/// Builder for repositories returned by [`FakeHost`]
#[derive(Debug, Clone)]
pub struct MockRepository {
    repo: RepositoryRef,
}

impl MockRepository {
    pub fn new(name: &str, owner: &str) -> Self {
        Self {
            repo: RepositoryRef {
                owner: owner.to_string(),
                name: name.to_string(),
                clone_url: format!("https://github.com/{}/{}.git", owner, name),
                archive_url: format!("https://api.github.com/repos/{}/{}/tarball", owner, name),
                is_fork: false,
                is_archived: false,
                default_branch: Some("main".to_string()),
            },
        }
    }

    pub fn as_fork(mut self) -> Self {
        self.repo.is_fork = true;
        self
    }

    pub fn as_archived(mut self) -> Self {
        self.repo.is_archived = true;
        self
    }

    pub fn with_clone_url(mut self, url: impl Into<String>) -> Self {
        self.repo.clone_url = url.into();
        self
    }

    pub fn build(self) -> RepositoryRef {
        self.repo
    }
}

/// Test data sets for common scenarios
pub struct TestDataSets;

impl TestDataSets {
    /// Repositories for user `octocat` with one of each exclusion
    pub fn mixed_repositories() -> Vec<RepositoryRef> {
        vec![
            MockRepository::new("active-project", "octocat").build(),
            MockRepository::new("side-project", "octocat").build(),
            MockRepository::new("fork-project", "octocat").as_fork().build(),
            MockRepository::new("old-project", "octocat").as_archived().build(),
            MockRepository::new("team-service", "acme-corp").build(),
        ]
    }
}

/// In-memory repository host
pub struct FakeHost {
    session: SessionInfo,
    repos: Vec<RepositoryRef>,
    listing_error: Mutex<Option<FatalRunError>>,
    archive_links: HashMap<String, Url>,
}

impl FakeHost {
    pub fn new(username: &str, repos: Vec<RepositoryRef>) -> Self {
        Self {
            session: SessionInfo {
                authenticated: true,
                username: username.to_string(),
            },
            repos,
            listing_error: Mutex::new(None),
            archive_links: HashMap::new(),
        }
    }

    /// The next listing fails with `err`
    pub fn failing_with(self, err: FatalRunError) -> Self {
        *self.listing_error.lock().unwrap() = Some(err);
        self
    }

    /// Serve `repo`'s archive from `url`; repositories without a link are 404s
    pub fn with_archive_link(mut self, full_name: &str, url: Url) -> Self {
        self.archive_links.insert(full_name.to_string(), url);
        self
    }
}

#[async_trait]
impl RepositoryHost for FakeHost {
    fn session(&self) -> &SessionInfo {
        &self.session
    }

    async fn list_repositories(
        &self,
        _cancel: &CancellationToken,
    ) -> Result<Vec<RepositoryRef>, FatalRunError> {
        match self.listing_error.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(self.repos.clone()),
        }
    }

    async fn archive_link(&self, repo: &RepositoryRef) -> Result<Url, TransferError> {
        self.archive_links
            .get(&repo.full_name())
            .cloned()
            .ok_or_else(|| TransferError::NotFound {
                repo: repo.full_name(),
            })
    }

    fn clone_credentials(&self) -> Option<(String, String)> {
        None
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }
}

/// What [`ScriptedTransfer`] does for a repository name
#[derive(Debug, Clone, Copy)]
pub enum Script {
    Succeed,
    Fail,
    Panic,
}

/// Transfer that follows a per-repository script and records every call
#[derive(Default)]
pub struct ScriptedTransfer {
    scripts: HashMap<String, Script>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, script: Script) -> Self {
        self.scripts.insert(name.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

#[async_trait]
impl Transfer for ScriptedTransfer {
    fn method(&self) -> BackupMethod {
        BackupMethod::Archive
    }

    async fn transfer(&self, repo: &RepositoryRef, _root: &Path) -> Result<(), TransferError> {
        self.calls.lock().unwrap().push(repo.full_name());
        match self.scripts.get(&repo.name).copied().unwrap_or(Script::Succeed) {
            Script::Succeed => Ok(()),
            Script::Fail => Err(TransferError::Http("502 Bad Gateway".to_string())),
            Script::Panic => panic!("scripted panic for {}", repo.full_name()),
        }
    }
}

/// Notifier that keeps every notification
#[derive(Default)]
pub struct CapturingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl CapturingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for CapturingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Reporter wired to a fresh [`CapturingNotifier`]
pub fn capturing_reporter() -> (OutcomeReporter, Arc<CapturingNotifier>) {
    let notifier = Arc::new(CapturingNotifier::default());
    (OutcomeReporter::new(notifier.clone()), notifier)
}

/// A GitHub-style tarball: everything under one `<owner>-<repo>-<sha>/` directory
pub fn github_tarball(wrapper: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    let mut dir = tar::Header::new_gnu();
    dir.set_entry_type(tar::EntryType::Directory);
    dir.set_size(0);
    dir.set_mode(0o755);
    dir.set_cksum();
    builder
        .append_data(&mut dir, format!("{}/", wrapper), std::io::empty())
        .unwrap();

    for (path, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{}/{}", wrapper, path), body.as_bytes())
            .unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap()
}

pub fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Assertion helpers for test validation
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
