//! Bearer token lookup.
//!
//! The auth subsystem owns and rotates the token; this module only reads
//! it. Lookup order is fixed: the primary persistent key, then the
//! secondary persistent key, then the session-scoped fallback.
//!
//! # Storage
//!
//! Production: OS keyring, service `botster`, one entry per key.
//! Test mode: `{config_dir}/credentials.json`.
//! Session: in-process map, optionally seeded from `BOTSTER_SESSION_TOKEN`.

use anyhow::{Context, Result};
use keyring::Entry;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::RwLock;

use crate::constants::{KEYRING_SERVICE, TOKEN_KEY_PRIMARY, TOKEN_KEY_SECONDARY, TOKEN_KEY_SESSION};
use crate::token::AuthToken;

/// Source of the current bearer token.
pub trait TokenProvider: Send + Sync + std::fmt::Debug {
    /// Current token, or `None` when the user is not signed in.
    fn bearer_token(&self) -> Option<AuthToken>;
}

/// A key/value credential store.
pub trait CredentialStore: Send + Sync + std::fmt::Debug {
    /// Value for `key`, `None` when absent or empty.
    fn get(&self, key: &str) -> Option<String>;
}

/// OS keyring backed store.
#[derive(Debug, Clone)]
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    /// Store under the default `botster` service.
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
        }
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Option<String> {
        let entry = match Entry::new(&self.service, key) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("[WebPush] Keyring unavailable for {key}: {e}");
                return None;
            }
        };
        match entry.get_password() {
            Ok(value) if !value.is_empty() => Some(value),
            Ok(_) | Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                log::warn!("[WebPush] Keyring read failed for {key}: {e}");
                None
            }
        }
    }
}

/// JSON file backed store, used in test environments.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store reading `path` (a flat JSON object of strings).
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at `{config_dir}/credentials.json`.
    pub fn in_config_dir() -> Result<Self> {
        let dir = crate::config::Config::config_dir()?;
        Ok(Self::new(dir.join("credentials.json")))
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        serde_json::from_str(&content).context("Credentials file is not a JSON object of strings")
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        if !self.path.exists() {
            return None;
        }
        match self.load() {
            Ok(map) => map.get(key).filter(|v| !v.is_empty()).cloned(),
            Err(e) => {
                log::warn!("[WebPush] {e:#}");
                None
            }
        }
    }
}

/// In-process store. Lives as long as the session does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Session store seeded from `BOTSTER_SESSION_TOKEN`, if set.
    pub fn from_env() -> Self {
        let store = Self::new();
        if let Ok(token) = std::env::var("BOTSTER_SESSION_TOKEN") {
            store.set(TOKEN_KEY_SESSION, token);
        }
        store
    }

    /// Insert or replace a value.
    pub fn set(&self, key: &str, value: impl Into<String>) {
        let mut values = self.values.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        values.insert(key.to_string(), value.into());
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let values = self.values.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        values.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Token lookup across persistent and session stores.
#[derive(Debug)]
pub struct TokenLookup {
    persistent: Box<dyn CredentialStore>,
    session: Box<dyn CredentialStore>,
}

impl TokenLookup {
    /// Lookup over explicit stores.
    pub fn new(persistent: Box<dyn CredentialStore>, session: Box<dyn CredentialStore>) -> Self {
        Self {
            persistent,
            session,
        }
    }

    /// Default stores for the current environment.
    ///
    /// Keyring in production, credentials file in test environments.
    pub fn from_environment() -> Result<Self> {
        let persistent: Box<dyn CredentialStore> = if crate::env::should_skip_keyring() {
            Box::new(FileStore::in_config_dir()?)
        } else {
            Box::new(KeyringStore::new())
        };
        Ok(Self::new(persistent, Box::new(MemoryStore::from_env())))
    }
}

impl TokenProvider for TokenLookup {
    fn bearer_token(&self) -> Option<AuthToken> {
        self.persistent
            .get(TOKEN_KEY_PRIMARY)
            .or_else(|| self.persistent.get(TOKEN_KEY_SECONDARY))
            .or_else(|| self.session.get(TOKEN_KEY_SESSION))
            .map(AuthToken::new)
    }
}

/// Fixed token, for embedding callers and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<AuthToken>);

impl StaticToken {
    /// Provider that always returns `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(AuthToken::new(token)))
    }

    /// Provider with no token (signed out).
    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<AuthToken> {
        self.0.clone()
    }
}
