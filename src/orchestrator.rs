//! Backup orchestration: list, filter, fan out one task per repository, fan in.
//!
//! A run moves through its stages (listing, filtering, dispatching, awaiting,
//! reporting) in order. Listing is the only stage that
//! can fail the run as a whole; from Dispatching onwards every eligible
//! repository produces exactly one [`TransferOutcome`], whether its transfer
//! succeeded, failed, panicked or was cancelled.

use futures::stream::{FuturesUnordered, StreamExt};
use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::{BackupPolicy, Config};
use crate::discovery::{RepoId, RepositoryHost, RepositoryRef};
use crate::error::{FatalRunError, TransferError};
use crate::filter::{skip_reason, SkipReason};
use crate::github::{GitHubClient, GitHubSettings};
use crate::report::{OutcomeCollector, OutcomeReporter, RunResult, TransferOutcome, WebhookNotifier};
use crate::transfer::{strategy_for, Transfer};

/// Stages of a single backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Listing,
    Filtering,
    Dispatching,
    Awaiting,
    Reporting,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Listing => "listing",
            RunState::Filtering => "filtering",
            RunState::Dispatching => "dispatching",
            RunState::Awaiting => "awaiting",
            RunState::Reporting => "reporting",
            RunState::Done => "done",
        };
        f.write_str(name)
    }
}

/// One listed repository and the filter's verdict on it
#[derive(Debug, Clone)]
pub struct PlannedRepository {
    pub repo: RepositoryRef,
    pub skip: Option<SkipReason>,
}

/// Runs one backup against a host with a fixed policy and transfer strategy
pub struct Orchestrator {
    host: Arc<dyn RepositoryHost>,
    transfer: Arc<dyn Transfer>,
    policy: Arc<BackupPolicy>,
    reporter: OutcomeReporter,
    max_parallel: Option<usize>,
    state: RunState,
}

impl Orchestrator {
    pub fn new(
        host: Arc<dyn RepositoryHost>,
        transfer: Arc<dyn Transfer>,
        policy: BackupPolicy,
        reporter: OutcomeReporter,
    ) -> Self {
        Self {
            host,
            transfer,
            policy: Arc::new(policy),
            reporter,
            max_parallel: None,
            state: RunState::Idle,
        }
    }

    /// Cap the number of transfers in flight. `None` means unbounded.
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel.filter(|n| *n > 0);
        self
    }

    fn transition(&mut self, next: RunState) {
        debug!("Run state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Execute the run and report it. A fatal error is reported first and
    /// then returned.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<RunResult, FatalRunError> {
        info!(
            "Starting {} backup from {} into {}",
            self.policy.method,
            self.host.provider_name(),
            self.policy.destination_root.display()
        );
        let mut collector = OutcomeCollector::new();

        self.transition(RunState::Listing);
        let repositories = match self.host.list_repositories(&cancel).await {
            Ok(repositories) => repositories,
            Err(err) => {
                error!("Backup run failed: {}", err);
                self.transition(RunState::Reporting);
                self.reporter.report(&collector.finish(), Some(&err)).await;
                self.transition(RunState::Done);
                return Err(err);
            }
        };
        info!("Found {} repositories", repositories.len());
        collector.record_listed(repositories.len());

        self.transition(RunState::Filtering);
        let username = self.host.session().username.clone();
        let mut eligible = Vec::with_capacity(repositories.len());
        for repo in repositories {
            match skip_reason(&repo, &self.policy, &username) {
                Some(reason) => {
                    debug!("Skipping {}: {}", repo.full_name(), reason);
                    collector.record_skip(repo.id(), reason);
                }
                None => eligible.push(repo),
            }
        }
        info!("{} repositories eligible for backup", eligible.len());

        self.transition(RunState::Dispatching);
        let handles = self.dispatch(eligible, &cancel);

        self.transition(RunState::Awaiting);
        let mut pending: FuturesUnordered<_> = handles
            .into_iter()
            .map(|(id, handle)| async move { (id, handle.await) })
            .collect();

        while let Some((id, joined)) = pending.next().await {
            collector.record(outcome_from(id, joined));
        }

        self.transition(RunState::Reporting);
        let result = collector.finish();
        self.reporter.report(&result, None).await;

        self.transition(RunState::Done);
        Ok(result)
    }

    /// Spawn one task per eligible repository
    fn dispatch(
        &self,
        eligible: Vec<RepositoryRef>,
        cancel: &CancellationToken,
    ) -> Vec<(RepoId, JoinHandle<Result<(), TransferError>>)> {
        let semaphore = self.max_parallel.map(|n| Arc::new(Semaphore::new(n)));
        let method = self.transfer.method();
        match self.max_parallel {
            Some(n) => info!(
                "Dispatching {} {} transfers, at most {} at a time",
                eligible.len(),
                method,
                n
            ),
            None => info!("Dispatching {} {} transfers", eligible.len(), method),
        }

        eligible
            .into_iter()
            .map(|repo| {
                let id = repo.id();
                let transfer = Arc::clone(&self.transfer);
                let root = self.policy.destination_root.clone();
                let cancel = cancel.clone();
                let semaphore = semaphore.clone();

                let handle = tokio::spawn(async move {
                    run_transfer(transfer, repo, root, cancel, semaphore).await
                });
                (id, handle)
            })
            .collect()
    }
}

/// List and filter without transferring anything
pub async fn plan_backup(
    host: &dyn RepositoryHost,
    policy: &BackupPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<PlannedRepository>, FatalRunError> {
    let username = host.session().username.clone();
    let repositories = host.list_repositories(cancel).await?;

    Ok(repositories
        .into_iter()
        .map(|repo| {
            let skip = skip_reason(&repo, policy, &username);
            PlannedRepository { repo, skip }
        })
        .collect())
}

/// Body of one transfer task
async fn run_transfer(
    transfer: Arc<dyn Transfer>,
    repo: RepositoryRef,
    root: PathBuf,
    cancel: CancellationToken,
    semaphore: Option<Arc<Semaphore>>,
) -> Result<(), TransferError> {
    let _permit = match semaphore {
        Some(semaphore) => tokio::select! {
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            permit = semaphore.acquire_owned() => Some(permit.map_err(|_| TransferError::Aborted)?),
        },
        None => None,
    };

    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        result = transfer.transfer(&repo, &root) => result,
    }
}

fn outcome_from(id: RepoId, joined: Result<Result<(), TransferError>, JoinError>) -> TransferOutcome {
    let err = match joined {
        Ok(Ok(())) => {
            debug!("Backed up {}", id);
            return TransferOutcome::success(id);
        }
        Ok(Err(err)) => err,
        Err(join_err) if join_err.is_panic() => {
            TransferError::Panicked(panic_message(join_err.into_panic()))
        }
        Err(_) => TransferError::Aborted,
    };

    error!("Failed to back up {}: {}", id, err);
    TransferOutcome::failure(id, &err)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one backup for `config` against GitHub and report it to the
/// configured webhook.
pub async fn run_backup(
    config: &Config,
    cancel: CancellationToken,
) -> Result<RunResult, FatalRunError> {
    let notifier = WebhookNotifier::new(&config.webhook)
        .map_err(|e| FatalRunError::Client(e.to_string()))?;
    let reporter = OutcomeReporter::new(Arc::new(notifier));

    let host = match GitHubClient::authenticate(&GitHubSettings::from_config(config)).await {
        Ok(client) => Arc::new(client) as Arc<dyn RepositoryHost>,
        Err(err) => {
            error!("Backup run failed: {}", err);
            reporter.report(&RunResult::default(), Some(&err)).await;
            return Err(err);
        }
    };

    run_backup_with(config, host, reporter, cancel).await
}

/// Run one backup against an already opened host
pub async fn run_backup_with(
    config: &Config,
    host: Arc<dyn RepositoryHost>,
    reporter: OutcomeReporter,
    cancel: CancellationToken,
) -> Result<RunResult, FatalRunError> {
    let policy = config.backup_policy();
    let transfer = match strategy_for(&policy, Arc::clone(&host), &config.transfer) {
        Ok(transfer) => transfer,
        Err(err) => {
            reporter.report(&RunResult::default(), Some(&err)).await;
            return Err(err);
        }
    };

    Orchestrator::new(host, transfer, policy, reporter)
        .with_max_parallel(config.transfer.max_parallel)
        .run(cancel)
        .await
}
