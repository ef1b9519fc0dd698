//! In-memory registry used by the session and inventory unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::api::RegistryApi;
use crate::error::{AuthError, FetchError};
use crate::types::Credential;

pub(crate) struct FakeApi {
    repositories: Mutex<Result<Vec<String>, FetchError>>,
    tags: Mutex<HashMap<String, Result<Vec<String>, FetchError>>>,
    hold_logins: bool,
    hold_listing: Mutex<bool>,
    login_calls: AtomicUsize,
    tag_calls: AtomicUsize,
    tags_in_flight: AtomicUsize,
    max_tags_in_flight: AtomicUsize,
    pub login_entered: Notify,
    pub listing_entered: Notify,
    pub release: Notify,
}

impl FakeApi {
    pub const PASSWORD: &'static str = "hunter2";
    pub const OFFLINE: &'static str = "offline";

    pub fn new() -> Self {
        Self {
            repositories: Mutex::new(Err(FetchError::NoRepositories)),
            tags: Mutex::new(HashMap::new()),
            hold_logins: false,
            hold_listing: Mutex::new(false),
            login_calls: AtomicUsize::new(0),
            tag_calls: AtomicUsize::new(0),
            tags_in_flight: AtomicUsize::new(0),
            max_tags_in_flight: AtomicUsize::new(0),
            login_entered: Notify::new(),
            listing_entered: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Block every login until `release` is notified.
    pub fn hold_logins(mut self) -> Self {
        self.hold_logins = true;
        self
    }

    /// Block the next repository listing until `release` is notified.
    pub fn hold_next_listing(&self) {
        *self.hold_listing.lock() = true;
    }

    pub fn set_repositories(&self, names: &[&str]) {
        *self.repositories.lock() = Ok(names.iter().map(|s| s.to_string()).collect());
    }

    pub fn fail_repositories(&self) {
        *self.repositories.lock() = Err(FetchError::NoRepositories);
    }

    pub fn set_tags(&self, repository: &str, tags: &[&str]) {
        self.tags.lock().insert(
            repository.to_string(),
            Ok(tags.iter().map(|s| s.to_string()).collect()),
        );
    }

    pub fn fail_tags(&self, repository: &str) {
        self.tags.lock().insert(
            repository.to_string(),
            Err(FetchError::Transport("connection reset".to_string())),
        );
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn tag_calls(&self) -> usize {
        self.tag_calls.load(Ordering::SeqCst)
    }

    /// Most tag listings observed running at once.
    pub fn max_tags_in_flight(&self) -> usize {
        self.max_tags_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryApi for FakeApi {
    async fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_logins {
            self.login_entered.notify_one();
            self.release.notified().await;
        }
        match password {
            Self::PASSWORD => Ok(format!("token-{}", username)),
            Self::OFFLINE => Err(AuthError::Transport("connection refused".to_string())),
            _ => Err(AuthError::Rejected("HTTP 401 Unauthorized".to_string())),
        }
    }

    async fn list_repositories(&self, _credential: &Credential) -> Result<Vec<String>, FetchError> {
        let hold = std::mem::take(&mut *self.hold_listing.lock());
        if hold {
            self.listing_entered.notify_one();
            self.release.notified().await;
        }
        self.repositories.lock().clone()
    }

    async fn list_tags(
        &self,
        _credential: &Credential,
        _owner: &str,
        repository: &str,
    ) -> Result<Vec<String>, FetchError> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.tags_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_tags_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.tags_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.tags
            .lock()
            .get(repository)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::NoTags(repository.to_string())))
    }
}
