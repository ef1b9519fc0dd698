//! Error taxonomy for the session, the inventory cache and the samplers.

use thiserror::Error;

/// Failure of [`RemoteSession::login`](crate::hub::RemoteSession::login).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid {0}")]
    InvalidInput(&'static str),

    #[error("login rejected: {0}")]
    Rejected(String),

    #[error("login request failed: {0}")]
    Transport(String),

    #[error("another login is already in progress")]
    Busy,
}

/// Failure of an inventory listing call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("not logged in")]
    Unauthenticated,

    #[error("cannot get repositories")]
    NoRepositories,

    #[error("cannot get tags for {0}")]
    NoTags(String),

    #[error("registry request failed: {0}")]
    Transport(String),

    #[error("session changed while the refresh was running")]
    Superseded,
}

/// Failure of an external command run through a
/// [`CommandRunner`](crate::runtime::CommandRunner).
#[derive(Debug, Error)]
pub enum RunError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` produced non UTF-8 output")]
    Encoding { command: String },
}

/// Failure of a single sampling tick. Always absorbed by the refresher.
#[derive(Debug, Error)]
pub enum SamplingError {
    #[error(transparent)]
    Command(#[from] RunError),

    #[error("docker engine: {0}")]
    Engine(String),

    #[error("sampling task aborted: {0}")]
    Join(String),
}
