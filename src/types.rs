//! Data structures shared by the session, the inventory cache and the
//! polling refresher.
//!
//! These types are plain values.  The session owns the only live
//! [`Credential`], the inventory cache hands out [`RepositoryEntry`] and
//! [`TagEntry`] copies, and the refresher compares [`InventorySnapshot`]s
//! taken at successive sampling instants.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The authenticated identity for the remote registry API.
///
/// The token is opaque and never printed; `Debug` output redacts it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub token: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// A repository owned by the logged-in account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    pub name: String,
    pub owner: String,
}

/// A tag of a cached repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagEntry {
    pub owner: String,
    pub repository_name: String,
    pub tag_name: String,
}

impl TagEntry {
    /// The `owner/repository:tag` reference accepted by `docker pull`.
    pub fn reference(&self) -> String {
        format!("{}/{}:{}", self.owner, self.repository_name, self.tag_name)
    }
}

/// Raw listing lines captured at one sampling instant, one resource per line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventorySnapshot {
    lines: Vec<String>,
}

impl InventorySnapshot {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Split command output on runs of line terminators, dropping empty lines.
    pub fn from_output(output: &str) -> Self {
        let lines = output
            .split(|c: char| c == '\r' || c == '\n')
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Equality ignoring order and duplicates.
    pub fn set_eq(&self, other: &InventorySnapshot) -> bool {
        let ours: BTreeSet<&str> = self.lines.iter().map(String::as_str).collect();
        let theirs: BTreeSet<&str> = other.lines.iter().map(String::as_str).collect();
        ours == theirs
    }
}
