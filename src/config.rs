//! Configuration loading.
//!
//! Reads `push.json` from the botster config directory and applies
//! `BOTSTER_*` environment overrides on top. Tokens are never stored here;
//! see [`crate::credentials`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

use crate::constants;

/// How the local platform answers a permission request.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPolicy {
    /// Ask interactively on the terminal; silently deny without a TTY.
    #[default]
    Prompt,
    /// Always grant (unattended setups).
    Grant,
    /// Always deny.
    Deny,
}

impl std::str::FromStr for PermissionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "prompt" => Ok(Self::Prompt),
            "grant" => Ok(Self::Grant),
            "deny" => Ok(Self::Deny),
            other => anyhow::bail!("Unknown permission policy: {other}"),
        }
    }
}

/// Configuration for the push client.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// URL of the botster server exposing the `/push/*` API.
    pub server_url: String,
    /// Push service base URL that local registrations get endpoints under.
    /// Empty disables push on this device.
    pub push_service_url: String,
    /// HTTP timeout in seconds for server calls.
    pub http_timeout_secs: u64,
    /// Settle delay before the enable prompt is shown, in milliseconds.
    pub prompt_settle_delay_ms: u64,
    /// How permission requests are answered by the local platform.
    pub permission_policy: PermissionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "https://trybotster.com".to_string(),
            push_service_url: "https://push.trybotster.com/wpush".to_string(),
            http_timeout_secs: constants::HTTP_REQUEST_TIMEOUT.as_secs(),
            prompt_settle_delay_ms: u64::try_from(constants::PROMPT_SETTLE_DELAY.as_millis())
                .unwrap_or(1500),
            permission_policy: PermissionPolicy::default(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `BOTSTER_CONFIG_DIR` env var: explicit override
    /// 2. Default: platform config dir (macOS: ~/Library/Application Support/botster)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(custom) = std::env::var("BOTSTER_CONFIG_DIR") {
            PathBuf::from(custom)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("botster")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_dir() {
            Ok(dir) => Self::load_from(&dir.join("push.json")).unwrap_or_else(|e| {
                log::debug!("Using default push config: {e:#}");
                Self::default()
            }),
            Err(e) => {
                log::warn!("No config directory, using defaults: {e:#}");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from an explicit path (no env overrides).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Config file not found: {}", path.display()))?;
        serde_json::from_str(&content).context("Invalid push config JSON")
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(server_url) = std::env::var("BOTSTER_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Ok(push_url) = std::env::var("BOTSTER_PUSH_SERVICE_URL") {
            self.push_service_url = push_url;
        }

        if let Ok(timeout) = std::env::var("BOTSTER_HTTP_TIMEOUT") {
            if let Ok(secs) = timeout.parse::<u64>() {
                self.http_timeout_secs = secs;
            }
        }

        if let Ok(delay) = std::env::var("BOTSTER_PROMPT_SETTLE_MS") {
            if let Ok(ms) = delay.parse::<u64>() {
                self.prompt_settle_delay_ms = ms;
            }
        }

        if let Ok(policy) = std::env::var("BOTSTER_PERMISSION_POLICY") {
            match policy.parse() {
                Ok(p) => self.permission_policy = p,
                Err(e) => log::warn!("Ignoring BOTSTER_PERMISSION_POLICY: {e}"),
            }
        }
    }

    /// HTTP timeout as a [`Duration`].
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Prompt settle delay as a [`Duration`].
    pub fn prompt_settle_delay(&self) -> Duration {
        Duration::from_millis(self.prompt_settle_delay_ms)
    }

    /// Directory for the local platform's state file.
    pub fn platform_state_dir() -> Result<PathBuf> {
        let dir = Self::config_dir()?.join("push");
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
