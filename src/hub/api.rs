//! Wire calls against the registry REST API.
//!
//! Every listing call asks for a single page of [`PAGE_SIZE`] entries and
//! never follows the next page, so accounts with more repositories (or
//! repositories with more tags) are truncated.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, FetchError};
use crate::types::Credential;

pub const PAGE_SIZE: usize = 100;

pub const DEFAULT_AUTH_BASE: &str = "https://hub.docker.com/v2/users";
pub const DEFAULT_REPO_BASE: &str = "https://hub.docker.com/v2/repositories";

#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Exchange a username and password for a bearer token.
    async fn login(&self, username: &str, password: &str) -> Result<String, AuthError>;

    /// Names of the repositories owned by the credential's user.
    async fn list_repositories(&self, credential: &Credential) -> Result<Vec<String>, FetchError>;

    /// Tag names of `owner/repository`, in server order.
    async fn list_tags(
        &self,
        credential: &Credential,
        owner: &str,
        repository: &str,
    ) -> Result<Vec<String>, FetchError>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    results: Vec<NamedResult>,
}

#[derive(Debug, Deserialize)]
struct NamedResult {
    name: String,
}

/// reqwest-backed client for Docker Hub style registries.
#[derive(Clone)]
pub struct HubClient {
    http: Client,
    auth_base: String,
    repo_base: String,
}

impl HubClient {
    pub fn new(
        auth_base: impl Into<String>,
        repo_base: impl Into<String>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, auth_base, repo_base))
    }

    pub fn with_client(
        http: Client,
        auth_base: impl Into<String>,
        repo_base: impl Into<String>,
    ) -> Self {
        Self {
            http,
            auth_base: auth_base.into().trim_end_matches('/').to_string(),
            repo_base: repo_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch one page of named results. `None` means the server answered
    /// with a non-success status.
    async fn fetch_names(&self, url: &str, token: &str) -> Result<Option<Vec<String>>, FetchError> {
        debug!("POST {}", url);
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, format!("JWT {}", token))
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            debug!("{} answered {}", url, response.status());
            return Ok(None);
        }

        let page: Page = response
            .json()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        if page.count == 0 || page.results.is_empty() {
            return Ok(Some(Vec::new()));
        }
        Ok(Some(
            page.results
                .into_iter()
                .take(PAGE_SIZE)
                .map(|r| r.name)
                .collect(),
        ))
    }
}

#[async_trait]
impl RegistryApi for HubClient {
    async fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let url = format!("{}/login", self.auth_base);
        debug!("POST {} as {}", url, username);
        let response = self
            .http
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Rejected(describe_status(status)));
        }

        let body: LoginResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Rejected(format!("unreadable login response: {}", e)))?;
        match body.token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(AuthError::Rejected("no token in login response".to_string())),
        }
    }

    async fn list_repositories(&self, credential: &Credential) -> Result<Vec<String>, FetchError> {
        let url = format!(
            "{}/{}?page_size={}",
            self.repo_base, credential.username, PAGE_SIZE
        );
        match self.fetch_names(&url, &credential.token).await? {
            Some(names) if !names.is_empty() => Ok(names),
            _ => Err(FetchError::NoRepositories),
        }
    }

    async fn list_tags(
        &self,
        credential: &Credential,
        owner: &str,
        repository: &str,
    ) -> Result<Vec<String>, FetchError> {
        let url = format!(
            "{}/{}/{}/tags?page_size={}",
            self.repo_base, owner, repository, PAGE_SIZE
        );
        match self.fetch_names(&url, &credential.token).await? {
            Some(names) if !names.is_empty() => Ok(names),
            _ => Err(FetchError::NoTags(repository.to_string())),
        }
    }
}

fn describe_status(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("HTTP {} {}", status.as_u16(), reason),
        None => format!("HTTP {}", status.as_u16()),
    }
}
