//! The authenticated session against the registry.
//!
//! A session holds at most one [`Credential`].  Every successful login and
//! every effective logout bumps the session epoch; inventory data fetched
//! under an older epoch is never shown again.

use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;
use tokio::sync::Mutex;

use super::api::RegistryApi;
use crate::error::AuthError;
use crate::signal::ChangeSignal;
use crate::types::Credential;

#[derive(Default)]
struct SessionState {
    credential: Option<Credential>,
    epoch: u64,
}

pub struct RemoteSession {
    api: Arc<dyn RegistryApi>,
    signal: Arc<ChangeSignal>,
    state: RwLock<SessionState>,
    // Held for the duration of a login; a second login fails fast with Busy.
    login_gate: Mutex<()>,
}

impl RemoteSession {
    pub fn new(api: Arc<dyn RegistryApi>, signal: Arc<ChangeSignal>) -> Self {
        Self {
            api,
            signal,
            state: RwLock::new(SessionState::default()),
            login_gate: Mutex::new(()),
        }
    }

    /// Authenticate and replace the active credential.
    ///
    /// On failure any previous credential is left untouched.  Fires the
    /// change signal once, after the credential is set.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), AuthError> {
        if username.trim().is_empty() {
            return Err(AuthError::InvalidInput("user name"));
        }
        if password.trim().is_empty() {
            return Err(AuthError::InvalidInput("password"));
        }

        let gate = self.login_gate.try_lock().map_err(|_| {
            debug!("Login for {} refused, another login is in flight", username);
            AuthError::Busy
        })?;

        let token = match self.api.login(username, password).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Login failed for {}: {}", username, e);
                return Err(e);
            }
        };

        {
            let mut state = self.state.write();
            state.credential = Some(Credential {
                username: username.to_string(),
                token,
            });
            state.epoch += 1;
        }
        drop(gate);

        info!("Logged in to registry as {}", username);
        self.signal.fire();
        Ok(())
    }

    /// Drop the active credential. Returns false (and fires nothing) when
    /// there was no session to end.
    pub fn logout(&self) -> bool {
        let previous = {
            let mut state = self.state.write();
            let previous = state.credential.take();
            if previous.is_some() {
                state.epoch += 1;
            }
            previous
        };

        match previous {
            Some(credential) => {
                info!("Logged out {}", credential.username);
                self.signal.fire();
                true
            }
            None => {
                debug!("Logout requested without an active session");
                false
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().credential.is_some()
    }

    pub fn current_user(&self) -> Option<String> {
        self.state
            .read()
            .credential
            .as_ref()
            .map(|c| c.username.clone())
    }

    pub fn epoch(&self) -> u64 {
        self.state.read().epoch
    }

    /// The active credential together with the epoch it belongs to.
    pub(crate) fn credential(&self) -> Option<(Credential, u64)> {
        let state = self.state.read();
        state.credential.clone().map(|c| (c, state.epoch))
    }

    pub(crate) fn api(&self) -> &Arc<dyn RegistryApi> {
        &self.api
    }

    pub fn signal(&self) -> &Arc<ChangeSignal> {
        &self.signal
    }
}
