//! Cached repository → tags inventory of the logged-in account.
//!
//! A refresh builds the new inventory off to the side and swaps it in with
//! a single write, so readers see either the previous inventory or the new
//! one, never a mix.  A failed refresh leaves the previous inventory in
//! place.  Tag listings of sibling repositories are fetched concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use log::{debug, info, warn};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::session::RemoteSession;
use crate::error::FetchError;
use crate::types::{RepositoryEntry, TagEntry};

/// Upper bound on tag listings in flight during one refresh.
pub const TAG_FETCH_CONCURRENCY: usize = 8;

#[derive(Default)]
struct Inventory {
    epoch: u64,
    owner: String,
    repositories: Vec<String>,
    tags: HashMap<String, Vec<String>>,
}

/// Outcome of a successful [`InventoryCache::refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub repositories: usize,
    /// Repositories whose tag listing failed or came back empty; they are
    /// cached with no tags.
    pub tags_failed: Vec<String>,
}

impl RefreshReport {
    pub fn is_complete(&self) -> bool {
        self.tags_failed.is_empty()
    }
}

pub struct InventoryCache {
    session: Arc<RemoteSession>,
    inventory: RwLock<Inventory>,
    // Refreshes queue behind each other.
    refresh_gate: Mutex<()>,
}

impl InventoryCache {
    pub fn new(session: Arc<RemoteSession>) -> Self {
        Self {
            session,
            inventory: RwLock::new(Inventory::default()),
            refresh_gate: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &Arc<RemoteSession> {
        &self.session
    }

    /// Re-list every repository of the current user and its tags.
    ///
    /// Fires the change signal once on success.  Per-repository tag
    /// failures are absorbed and reported in [`RefreshReport::tags_failed`].
    pub async fn refresh(&self) -> Result<RefreshReport, FetchError> {
        let _gate = self.refresh_gate.lock().await;
        let (credential, epoch) = self
            .session
            .credential()
            .ok_or(FetchError::Unauthenticated)?;
        let api = Arc::clone(self.session.api());

        let listed = api.list_repositories(&credential).await.map_err(|e| {
            warn!("Cannot list repositories of {}: {}", credential.username, e);
            FetchError::NoRepositories
        })?;

        let mut seen = HashSet::new();
        let repositories: Vec<String> = listed
            .into_iter()
            .filter(|name| seen.insert(name.clone()))
            .collect();
        debug!(
            "Listed {} repositories for {}, fetching tags",
            repositories.len(),
            credential.username
        );

        let fetches: Vec<_> = repositories.iter().map(|name| {
            let api = Arc::clone(&api);
            let credential = &credential;
            async move {
                api.list_tags(credential, &credential.username, name)
                    .await
            }
        }).collect();
        let results: Vec<_> = stream::iter(fetches)
            .buffered(TAG_FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut tags = HashMap::with_capacity(repositories.len());
        let mut tags_failed = Vec::new();
        for (name, result) in repositories.iter().zip(results) {
            match result {
                Ok(list) => {
                    tags.insert(name.clone(), list);
                }
                Err(e) => {
                    warn!("Cannot list tags of {}/{}: {}", credential.username, name, e);
                    tags_failed.push(name.clone());
                    tags.insert(name.clone(), Vec::new());
                }
            }
        }

        let report = RefreshReport {
            repositories: repositories.len(),
            tags_failed,
        };
        {
            let mut inventory = self.inventory.write();
            if self.session.epoch() != epoch {
                info!("Session changed during refresh, discarding results");
                return Err(FetchError::Superseded);
            }
            *inventory = Inventory {
                epoch,
                owner: credential.username.clone(),
                repositories,
                tags,
            };
        }

        info!(
            "Inventory refreshed: {} repositories ({} without tags)",
            report.repositories,
            report.tags_failed.len()
        );
        self.session.signal().fire();
        Ok(report)
    }

    /// Cached repositories in server order. Empty when logged out.
    pub fn list_repositories(&self) -> Vec<RepositoryEntry> {
        self.read_current(|inventory| {
            inventory
                .repositories
                .iter()
                .map(|name| RepositoryEntry {
                    name: name.clone(),
                    owner: inventory.owner.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
    }

    /// Cached tag names of `repository`. Unknown repositories yield nothing.
    pub fn list_tags(&self, repository: &str) -> Vec<String> {
        self.read_current(|inventory| inventory.tags.get(repository).cloned())
            .flatten()
            .unwrap_or_default()
    }

    pub fn list_tag_entries(&self, repository: &str) -> Vec<TagEntry> {
        self.read_current(|inventory| {
            inventory.tags.get(repository).map(|tags| {
                tags.iter()
                    .map(|tag| TagEntry {
                        owner: inventory.owner.clone(),
                        repository_name: repository.to_string(),
                        tag_name: tag.clone(),
                    })
                    .collect()
            })
        })
        .flatten()
        .unwrap_or_default()
    }

    /// Empty the inventory without touching the session.
    pub fn clear(&self) {
        *self.inventory.write() = Inventory::default();
    }

    /// Runs `f` on the inventory only if it belongs to the live session.
    fn read_current<T>(&self, f: impl FnOnce(&Inventory) -> T) -> Option<T> {
        let epoch = self.session.credential().map(|(_, epoch)| epoch)?;
        let inventory = self.inventory.read();
        if inventory.epoch != epoch || inventory.owner.is_empty() {
            return None;
        }
        Some(f(&inventory))
    }
}
