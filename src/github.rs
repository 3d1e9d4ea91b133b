use async_trait::async_trait;
use octocrab::models::Repository;
use octocrab::Octocrab;
use reqwest::header::{ACCEPT, AUTHORIZATION, LOCATION, USER_AGENT};
use reqwest::{redirect, StatusCode, Url};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::discovery::{RepositoryHost, RepositoryRef, SessionInfo};
use crate::error::{FatalRunError, TransferError};

/// Repositories requested per listing page (GitHub's maximum)
const PAGE_SIZE: u8 = 100;

/// Username sent alongside a token for git basic auth. GitHub ignores it but
/// git requires a non-empty value.
pub const CLONE_USERNAME: &str = "gitsaver";

/// Settings needed to open a GitHub session
#[derive(Debug, Clone, Default)]
pub struct GitHubSettings {
    pub username: Option<String>,
    pub token: Option<String>,
    pub http_timeout: Duration,
    /// API root other than api.github.com (GitHub Enterprise)
    pub api_base: Option<String>,
}

impl GitHubSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            username: config.github.username.clone().filter(|u| !u.is_empty()),
            token: config.github.token.clone().filter(|t| !t.is_empty()),
            http_timeout: Duration::from_secs(config.transfer.http_timeout_secs),
            api_base: config.github.api_url.clone().filter(|u| !u.is_empty()),
        }
    }
}

/// GitHub client wrapper holding the session for one backup run
pub struct GitHubClient {
    client: Octocrab,
    http: reqwest::Client,
    session: SessionInfo,
    token: Option<String>,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    /// Open a session. With a token the host must accept it; without one the
    /// session is anonymous.
    pub async fn authenticate(settings: &GitHubSettings) -> Result<Self, FatalRunError> {
        let mut builder = Octocrab::builder()
            .set_connect_timeout(Some(settings.http_timeout))
            .set_read_timeout(Some(settings.http_timeout));
        if let Some(base) = &settings.api_base {
            builder = builder
                .base_uri(base.as_str())
                .map_err(|e| FatalRunError::Client(e.to_string()))?;
        }

        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(settings.http_timeout)
            .build()
            .map_err(|e| FatalRunError::Client(e.to_string()))?;

        match &settings.token {
            Some(token) => {
                let client = builder
                    .personal_token(token.clone())
                    .build()
                    .map_err(|e| FatalRunError::Client(e.to_string()))?;

                let user = client
                    .current()
                    .user()
                    .await
                    .map_err(|e| FatalRunError::Auth(e.to_string()))?;

                let username = settings
                    .username
                    .clone()
                    .unwrap_or_else(|| user.login.clone());

                info!("Authenticated as GitHub user: {}", user.login);
                if username != user.login {
                    info!("Backing up repositories for configured user: {}", username);
                }

                Ok(Self {
                    client,
                    http,
                    session: SessionInfo {
                        authenticated: true,
                        username,
                    },
                    token: Some(token.clone()),
                })
            }
            None => {
                let client = builder
                    .build()
                    .map_err(|e| FatalRunError::Client(e.to_string()))?;

                info!("No GitHub token configured, using anonymous access");

                Ok(Self {
                    client,
                    http,
                    session: SessionInfo {
                        authenticated: false,
                        username: settings.username.clone().unwrap_or_default(),
                    },
                    token: None,
                })
            }
        }
    }

    /// Get the effective username
    pub fn username(&self) -> &str {
        &self.session.username
    }

    /// Whether a token was accepted for this session
    pub fn is_authenticated(&self) -> bool {
        self.session.authenticated
    }

    /// List repositories accessible to the token identity
    async fn list_authenticated_repositories(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<RepositoryRef>, FatalRunError> {
        debug!("Fetching repositories for authenticated user");

        let mut repositories = Vec::new();
        let mut page = 1u8;

        loop {
            if cancel.is_cancelled() {
                return Err(FatalRunError::Cancelled);
            }

            let page_repos = self
                .client
                .current()
                .list_repos_for_authenticated_user()
                .per_page(PAGE_SIZE)
                .page(page)
                .send()
                .await
                .map_err(|e| FatalRunError::Listing {
                    page: u32::from(page),
                    detail: e.to_string(),
                })?;

            debug!("Page {}: {} repositories", page, page_repos.items.len());
            let has_next = page_repos.next.is_some();
            repositories.extend(page_repos.items.iter().map(repo_to_ref));

            if !has_next {
                break;
            }
            page = next_page(page)?;
        }

        info!("Found {} accessible repositories", repositories.len());
        Ok(repositories)
    }

    /// List a user's public repositories without authentication
    async fn list_public_repositories(
        &self,
        username: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<RepositoryRef>, FatalRunError> {
        debug!("Fetching public repositories for: {}", username);

        let mut repositories = Vec::new();
        let mut page = 1u8;

        loop {
            if cancel.is_cancelled() {
                return Err(FatalRunError::Cancelled);
            }

            let page_repos = self
                .client
                .users(username)
                .repos()
                .per_page(PAGE_SIZE)
                .page(page)
                .send()
                .await
                .map_err(|e| FatalRunError::Listing {
                    page: u32::from(page),
                    detail: e.to_string(),
                })?;

            debug!("Page {}: {} repositories", page, page_repos.items.len());
            let has_next = page_repos.next.is_some();
            repositories.extend(page_repos.items.iter().map(repo_to_ref));

            if !has_next {
                break;
            }
            page = next_page(page)?;
        }

        info!("Found {} public repositories for {}", repositories.len(), username);
        Ok(repositories)
    }
}

/// Advance the page counter. Running past the last addressable page would
/// silently truncate the listing, so it is reported as a listing failure.
fn next_page(page: u8) -> Result<u8, FatalRunError> {
    page.checked_add(1).ok_or_else(|| {
        warn!("Reached maximum pagination limit ({} pages)", page);
        FatalRunError::Listing {
            page: u32::from(page),
            detail: "pagination limit reached before the last page".to_string(),
        }
    })
}

/// Convert octocrab Repository to our RepositoryRef
fn repo_to_ref(repo: &Repository) -> RepositoryRef {
    let owner = repo
        .owner
        .as_ref()
        .map(|o| o.login.clone())
        .or_else(|| {
            repo.full_name
                .as_deref()
                .and_then(|full| full.split_once('/'))
                .map(|(owner, _)| owner.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    let clone_url = repo
        .clone_url
        .as_ref()
        .map(|u| u.to_string())
        .unwrap_or_else(|| format!("https://github.com/{}/{}.git", owner, repo.name));

    RepositoryRef {
        archive_url: format!("{}/tarball", repo.url.as_str().trim_end_matches('/')),
        name: repo.name.clone(),
        owner,
        clone_url,
        is_fork: repo.fork.unwrap_or(false),
        is_archived: repo.archived.unwrap_or(false),
        default_branch: repo.default_branch.clone(),
    }
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    fn session(&self) -> &SessionInfo {
        &self.session
    }

    async fn list_repositories(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<RepositoryRef>, FatalRunError> {
        if self.session.authenticated {
            self.list_authenticated_repositories(cancel).await
        } else if self.session.username.is_empty() {
            Err(FatalRunError::MissingUsername)
        } else {
            self.list_public_repositories(&self.session.username, cancel)
                .await
        }
    }

    async fn archive_link(&self, repo: &RepositoryRef) -> Result<Url, TransferError> {
        let endpoint = Url::parse(&repo.archive_url)
            .map_err(|e| TransferError::Http(format!("invalid archive URL: {}", e)))?;

        let mut request = self
            .http
            .get(endpoint.clone())
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "gitsaver");
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    TransferError::Http(format!("{} redirect without Location header", status))
                })?;
            // Location may be relative to the endpoint
            let link = endpoint
                .join(location)
                .map_err(|e| TransferError::Http(format!("invalid archive link: {}", e)))?;
            debug!("Archive link for {}: {}", repo.full_name(), link.host_str().unwrap_or(""));
            return Ok(link);
        }

        match status {
            StatusCode::NOT_FOUND => Err(TransferError::NotFound {
                repo: repo.full_name(),
            }),
            // The endpoint served the archive itself
            s if s.is_success() => Ok(endpoint),
            s => Err(TransferError::Http(format!(
                "archive link request for {} returned {}",
                repo.full_name(),
                s
            ))),
        }
    }

    fn clone_credentials(&self) -> Option<(String, String)> {
        self.token
            .as_ref()
            .map(|token| (CLONE_USERNAME.to_string(), token.clone()))
    }

    fn provider_name(&self) -> &'static str {
        "GitHub"
    }
}
