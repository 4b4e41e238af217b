//! File-backed device push platform.
//!
//! Plays the role the browser plays for a web client: it remembers the
//! permission decision, the registered worker and the current push
//! registration in `{state_dir}/platform.json`, and mints registrations
//! with real RFC 8291 key material (a P-256 ECDH keypair and a 16-byte
//! auth secret).
//!
//! A terminal stands in for the user gesture: under
//! [`PermissionPolicy::Prompt`] the user is asked on the TTY, and without
//! one the request is silently denied.

use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Permission, PushPlatform, PushSubscriptionRecord};
use crate::config::PermissionPolicy;
use crate::error::PlatformError;

const STATE_FILE: &str = "platform.json";

/// Registration plus the private half of its key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRegistration {
    record: PushSubscriptionRecord,
    /// VAPID key (base64url) the registration is bound to.
    application_server_key: String,
    /// Raw 32-byte ECDH private scalar (base64url), needed to decrypt payloads.
    private_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PlatformState {
    #[serde(default)]
    permission: Permission,
    #[serde(default)]
    worker_path: Option<String>,
    #[serde(default)]
    registration: Option<StoredRegistration>,
}

/// Device-local push platform persisted to disk.
#[derive(Debug)]
pub struct LocalPlatform {
    state_dir: PathBuf,
    push_service_url: String,
    policy: PermissionPolicy,
    state: Mutex<PlatformState>,
}

impl LocalPlatform {
    /// Open (or create) platform state under `state_dir`.
    ///
    /// An empty `push_service_url` means the device has no push capability.
    pub fn open(
        state_dir: impl Into<PathBuf>,
        push_service_url: impl Into<String>,
        policy: PermissionPolicy,
    ) -> anyhow::Result<Self> {
        let state_dir = state_dir.into();
        fs::create_dir_all(&state_dir)
            .with_context(|| format!("Failed to create {}", state_dir.display()))?;

        let path = state_dir.join(STATE_FILE);
        let state = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content).unwrap_or_else(|e| {
                log::warn!("[WebPush] Discarding corrupt platform state: {e}");
                PlatformState::default()
            })
        } else {
            PlatformState::default()
        };

        Ok(Self {
            state_dir,
            push_service_url: push_service_url.into().trim_end_matches('/').to_string(),
            policy,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &PlatformState) -> Result<(), PlatformError> {
        write_state(&self.state_dir.join(STATE_FILE), state).map_err(PlatformError::new)
    }

    /// Write `next` to disk, then make it the in-memory state.
    fn commit(&self, state: &mut PlatformState, next: PlatformState) -> Result<(), PlatformError> {
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    async fn ask_on_terminal() -> Permission {
        let answer = tokio::task::spawn_blocking(|| {
            use std::io::Write;
            print!("Allow botster to show notifications on this device? [y/N] ");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) if matches!(line.trim().to_lowercase().as_str(), "y" | "yes") => {
                Permission::Granted
            }
            _ => Permission::Denied,
        }
    }
}

fn has_terminal() -> bool {
    atty::is(atty::Stream::Stdin) && atty::is(atty::Stream::Stdout)
}

fn write_state(path: &Path, state: &PlatformState) -> anyhow::Result<()> {
    fs::write(path, serde_json::to_string_pretty(state)?)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    // Holds a private key; owner read/write only
    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

#[async_trait]
impl PushPlatform for LocalPlatform {
    fn is_supported(&self) -> bool {
        !self.push_service_url.is_empty() && self.state_dir.is_dir()
    }

    fn permission(&self) -> Permission {
        self.lock().permission
    }

    async fn request_permission(&self) -> Permission {
        let answer = match self.policy {
            PermissionPolicy::Grant => Permission::Granted,
            PermissionPolicy::Deny => Permission::Denied,
            PermissionPolicy::Prompt => {
                let current = self.permission();
                if current != Permission::Default {
                    return current;
                }
                if !has_terminal() {
                    // No gesture context: denied, and nothing is remembered
                    log::info!("[WebPush] No terminal attached, permission request denied");
                    return Permission::Denied;
                }
                Self::ask_on_terminal().await
            }
        };

        let mut state = self.lock();
        state.permission = answer;
        if let Err(e) = self.persist(&state) {
            log::warn!("[WebPush] Could not persist permission: {e}");
        }
        answer
    }

    async fn register_worker(&self, script_path: &str) -> Result<(), PlatformError> {
        if !self.is_supported() {
            return Err(PlatformError::new("push service not configured"));
        }
        let mut state = self.lock();
        if state.worker_path.as_deref() == Some(script_path) {
            return Ok(());
        }
        let next = PlatformState {
            worker_path: Some(script_path.to_string()),
            ..state.clone()
        };
        self.commit(&mut state, next)
    }

    async fn existing_registration(&self) -> Result<Option<PushSubscriptionRecord>, PlatformError> {
        Ok(self.lock().registration.as_ref().map(|r| r.record.clone()))
    }

    async fn subscribe(
        &self,
        application_server_key: &[u8],
    ) -> Result<PushSubscriptionRecord, PlatformError> {
        if application_server_key.len() != 65 || application_server_key[0] != 0x04 {
            return Err(PlatformError::new(
                "applicationServerKey must be a 65-byte uncompressed P-256 point",
            ));
        }

        let mut state = self.lock();
        if state.permission != Permission::Granted {
            return Err(PlatformError::new("notification permission not granted"));
        }
        if state.worker_path.is_none() {
            return Err(PlatformError::new("no background worker registered"));
        }

        let key_b64 = BASE64URL.encode(application_server_key);
        if let Some(existing) = &state.registration {
            if existing.application_server_key == key_b64 {
                return Ok(existing.record.clone());
            }
            return Err(PlatformError::new(
                "a registration bound to a different applicationServerKey already exists",
            ));
        }

        let secret = p256::SecretKey::random(&mut OsRng);
        let public = secret.public_key().to_encoded_point(false);
        let auth: [u8; 16] = rand::random();

        let record = PushSubscriptionRecord::new(
            format!("{}/{}", self.push_service_url, uuid::Uuid::new_v4()),
            BASE64URL.encode(public.as_bytes()),
            BASE64URL.encode(auth),
        );
        let next = PlatformState {
            registration: Some(StoredRegistration {
                record: record.clone(),
                application_server_key: key_b64,
                private_key: BASE64URL.encode(secret.to_bytes().as_slice()),
            }),
            ..state.clone()
        };
        self.commit(&mut state, next)?;

        log::info!("[WebPush] Created local push registration");
        Ok(record)
    }

    async fn unsubscribe(&self) -> Result<bool, PlatformError> {
        let mut state = self.lock();
        if state.registration.is_none() {
            return Ok(false);
        }
        let next = PlatformState {
            registration: None,
            ..state.clone()
        };
        self.commit(&mut state, next)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vapid_key() -> Vec<u8> {
        let secret = p256::SecretKey::random(&mut OsRng);
        secret.public_key().to_encoded_point(false).as_bytes().to_vec()
    }

    fn granted_platform(dir: &TempDir) -> LocalPlatform {
        LocalPlatform::open(dir.path(), "https://push.example.com/wpush/", PermissionPolicy::Grant)
            .expect("open")
    }

    #[tokio::test]
    async fn test_subscribe_mints_rfc8291_keys() {
        let dir = TempDir::new().expect("tempdir");
        let platform = granted_platform(&dir);
        platform.register_worker("/service-worker.js").await.expect("worker");
        assert_eq!(platform.request_permission().await, Permission::Granted);

        let record = platform.subscribe(&vapid_key()).await.expect("subscribe");
        assert!(record.endpoint.starts_with("https://push.example.com/wpush/"));
        assert!(!record.endpoint.contains("wpush//"));

        let p256dh = BASE64URL.decode(&record.keys.p256dh).expect("p256dh");
        assert_eq!(p256dh.len(), 65);
        assert_eq!(p256dh[0], 0x04);
        let auth = BASE64URL.decode(&record.keys.auth).expect("auth");
        assert_eq!(auth.len(), 16);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let key = vapid_key();
        let record = {
            let platform = granted_platform(&dir);
            platform.register_worker("/service-worker.js").await.expect("worker");
            platform.request_permission().await;
            platform.subscribe(&key).await.expect("subscribe")
        };

        let reopened = granted_platform(&dir);
        assert_eq!(reopened.permission(), Permission::Granted);
        assert_eq!(
            reopened.existing_registration().await.expect("existing"),
            Some(record.clone())
        );
        // Same key returns the same registration
        assert_eq!(reopened.subscribe(&key).await.expect("again"), record);
        // Different key is refused while one exists
        assert!(reopened.subscribe(&vapid_key()).await.is_err());

        assert!(reopened.unsubscribe().await.expect("unsubscribe"));
        assert!(!reopened.unsubscribe().await.expect("unsubscribe twice"));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_registration() {
        let dir = TempDir::new().expect("tempdir");
        let platform = granted_platform(&dir);
        platform.register_worker("/service-worker.js").await.expect("worker");
        platform.request_permission().await;
        let record = platform.subscribe(&vapid_key()).await.expect("subscribe");

        // State file can't be written while a directory sits in its place
        let path = dir.path().join(STATE_FILE);
        fs::remove_file(&path).expect("remove");
        fs::create_dir(&path).expect("mkdir");

        assert!(platform.unsubscribe().await.is_err());
        assert_eq!(
            platform.existing_registration().await.expect("existing"),
            Some(record)
        );

        fs::remove_dir(&path).expect("rmdir");
        assert!(platform.unsubscribe().await.expect("unsubscribe"));
        assert_eq!(platform.existing_registration().await.expect("existing"), None);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_bad_key_and_missing_permission() {
        let dir = TempDir::new().expect("tempdir");
        let platform = granted_platform(&dir);
        platform.register_worker("/service-worker.js").await.expect("worker");

        assert!(platform.subscribe(&[1, 2, 3]).await.is_err());
        // Permission still default
        assert!(platform.subscribe(&vapid_key()).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_push_service_is_unsupported() {
        let dir = TempDir::new().expect("tempdir");
        let platform =
            LocalPlatform::open(dir.path(), "", PermissionPolicy::Grant).expect("open");
        assert!(!platform.is_supported());
        assert!(platform.register_worker("/service-worker.js").await.is_err());
    }

    #[tokio::test]
    async fn test_deny_policy_persists() {
        let dir = TempDir::new().expect("tempdir");
        let platform =
            LocalPlatform::open(dir.path(), "https://push.example.com", PermissionPolicy::Deny)
                .expect("open");
        assert_eq!(platform.request_permission().await, Permission::Denied);
        assert_eq!(platform.permission(), Permission::Denied);
    }
}
