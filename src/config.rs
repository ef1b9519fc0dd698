use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::hub::api::{DEFAULT_AUTH_BASE, DEFAULT_REPO_BASE};

/// Which adapter samples local resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListerKind {
    /// Shell out to the docker CLI.
    Cli,
    /// Talk to the Docker engine API.
    Engine,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Poll interval for local listings; ≤ 0 disables polling.
    pub auto_refresh_interval_ms: i64,
    pub auth_base: String,
    pub repo_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub lister: ListerKind,
    pub docker_bin: String,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_refresh_interval_ms: 0,
            auth_base: DEFAULT_AUTH_BASE.into(),
            repo_base: DEFAULT_REPO_BASE.into(),
            username: None,
            password: None,
            lister: ListerKind::Cli,
            docker_bin: "docker".into(),
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config: Config = Self::figment()
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(password_file) = std::env::var("HUBWATCH_PASSWORD_FILE") {
            config.password = Some(std::fs::read_to_string(password_file)?.trim().to_string());
        }

        Ok(config)
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("hubwatch.toml"))
            .merge(Json::file("hubwatch.json"))
            .merge(Env::prefixed("HUBWATCH_"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Username and password, when both are configured and non-blank.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pwd)) if !user.trim().is_empty() && !pwd.trim().is_empty() => {
                Some((user, pwd))
            }
            _ => None,
        }
    }
}
