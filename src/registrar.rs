//! Subscription registrar.
//!
//! Owns the local push registration and is the only component that creates
//! or destroys it. Coordinates three parties for every operation:
//!
//! ```text
//! PermissionGate ──► PushPlatform (local registration)
//!        │
//!        ▼
//! SubscriptionRegistrar ──► PushBackend (/push/* API, bearer auth)
//!        │
//!        └── VapidKeyCache (fetched once, shared)
//! ```
//!
//! Operations return typed [`PushError`]s, except the status check, which
//! gates passive UI decisions and therefore never fails.

// Rust guideline compliant 2026-02

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::backend::{PushBackend, SubscriptionStatus};
use crate::constants::WORKER_SCRIPT_PATH;
use crate::credentials::TokenProvider;
use crate::error::{PlatformError, PushError};
use crate::gate::PermissionGate;
use crate::platform::{Permission, PushPlatform, PushSubscriptionRecord};
use crate::token::AuthToken;
use crate::vapid::{self, VapidKeyCache};

/// Performs subscribe/unsubscribe against the platform and the backend.
#[derive(Debug)]
pub struct SubscriptionRegistrar {
    gate: PermissionGate,
    platform: Arc<dyn PushPlatform>,
    backend: Arc<dyn PushBackend>,
    tokens: Arc<dyn TokenProvider>,
    vapid: Arc<VapidKeyCache>,
    loading: watch::Sender<bool>,
    worker_failed: AtomicBool,
}

impl SubscriptionRegistrar {
    /// Registrar using the process-wide VAPID key cache.
    pub fn new(
        platform: Arc<dyn PushPlatform>,
        backend: Arc<dyn PushBackend>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self::with_vapid_cache(platform, backend, tokens, VapidKeyCache::global())
    }

    /// Registrar with an explicit key cache.
    pub fn with_vapid_cache(
        platform: Arc<dyn PushPlatform>,
        backend: Arc<dyn PushBackend>,
        tokens: Arc<dyn TokenProvider>,
        vapid: Arc<VapidKeyCache>,
    ) -> Self {
        let (loading, _) = watch::channel(false);
        Self {
            gate: PermissionGate::new(Arc::clone(&platform)),
            platform,
            backend,
            tokens,
            vapid,
            loading,
            worker_failed: AtomicBool::new(false),
        }
    }

    /// Register the background worker at its well-known path.
    ///
    /// Failure is logged and only disables push for this registrar; it is
    /// never fatal to the host. Returns whether push is usable.
    pub async fn initialize(&self) -> bool {
        if !self.gate.check_support() {
            log::info!("[WebPush] Push not supported on this device");
            return false;
        }
        match self.platform.register_worker(WORKER_SCRIPT_PATH).await {
            Ok(()) => {
                log::debug!("[WebPush] Background worker registered at {WORKER_SCRIPT_PATH}");
                self.worker_failed.store(false, Ordering::Release);
                true
            }
            Err(e) => {
                log::warn!("[WebPush] Background worker registration failed, push disabled: {e}");
                self.worker_failed.store(true, Ordering::Release);
                false
            }
        }
    }

    /// The permission gate this registrar consults.
    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    /// Support confirmed and worker registration did not fail.
    pub fn check_support(&self) -> bool {
        self.gate.check_support() && !self.worker_failed.load(Ordering::Acquire)
    }

    /// Current permission.
    pub fn check_permission(&self) -> Permission {
        self.gate.check_permission()
    }

    /// Loading flag: true while a subscribe/unsubscribe/resync is running.
    pub fn loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    /// Whether an operation is in progress right now.
    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    /// Set loading for the lifetime of the returned guard.
    fn loading_scope(&self) -> scopeguard::ScopeGuard<(), impl FnOnce(()) + '_> {
        self.loading.send_replace(true);
        scopeguard::guard((), move |()| {
            self.loading.send_replace(false);
        })
    }

    /// VAPID public key, fetched on first use and cached.
    ///
    /// Never fails; `None` means the key is unavailable right now.
    pub async fn fetch_vapid_key(&self) -> Option<String> {
        self.vapid.get_or_fetch(&self.backend).await
    }

    /// Bearer token from the provider, read on the blocking pool.
    ///
    /// Providers may sit on the OS keyring, whose reads block.
    async fn bearer_token(&self) -> Option<AuthToken> {
        let tokens = Arc::clone(&self.tokens);
        match tokio::task::spawn_blocking(move || tokens.bearer_token()).await {
            Ok(token) => token,
            Err(e) => {
                log::warn!("[WebPush] Token lookup failed: {e}");
                None
            }
        }
    }

    /// Bearer token, checked for presence and expiry. No network involved.
    async fn valid_token(&self) -> Result<AuthToken, PushError> {
        let token = self.bearer_token().await.ok_or(PushError::AuthTokenMissing)?;
        if token.is_expired() {
            log::warn!("[WebPush] Bearer token expired, re-authentication required");
            return Err(PushError::AuthTokenExpired);
        }
        Ok(token)
    }

    /// Create a push registration and record it on the server.
    ///
    /// Preconditions, in order: device support, a live bearer token (checked
    /// before any network call), the VAPID key, and granted permission
    /// (requested inline when still `Default`).
    pub async fn subscribe(&self) -> Result<PushSubscriptionRecord, PushError> {
        if !self.check_support() {
            return Err(PushError::Unsupported);
        }
        let token = self.valid_token().await?;

        let _loading = self.loading_scope();

        let key = self
            .fetch_vapid_key()
            .await
            .ok_or_else(|| PushError::MissingKey("server did not provide a key".to_string()))?;
        let key_bytes = vapid::decode_public_key(&key)?;

        match self.gate.check_permission() {
            Permission::Granted => {}
            Permission::Denied => return Err(PushError::PermissionDenied),
            Permission::Default => {
                if self.gate.request_permission().await != Permission::Granted {
                    return Err(PushError::PermissionDenied);
                }
            }
        }

        let record = self.platform.subscribe(&key_bytes).await?;

        if let Err(e) = self.backend.subscribe(&token, &record).await {
            match &e {
                PushError::ServerRejected { status: 401, .. } => {
                    log::error!(
                        "[WebPush] Subscribe rejected: bearer token invalid or expired (401)"
                    );
                }
                PushError::ServerRejected { status, .. } => {
                    log::error!("[WebPush] Subscribe rejected by server (HTTP {status})");
                }
                other => log::error!("[WebPush] Subscribe request failed: {other}"),
            }
            // Don't leave a registration the server never recorded
            if let Err(cleanup) = self.platform.unsubscribe().await {
                log::warn!("[WebPush] Could not roll back local registration: {cleanup}");
            }
            return Err(e);
        }

        log::info!("[WebPush] Subscribed to push notifications");
        Ok(record)
    }

    /// Drop the local registration, then tell the server (best effort).
    ///
    /// Local cleanup always happens first. Only a failing platform
    /// unregister, or a missing token, is reported as an error.
    pub async fn unsubscribe(&self) -> Result<(), PushError> {
        let _loading = self.loading_scope();

        let endpoint = match self.platform.existing_registration().await? {
            Some(record) => {
                self.platform.unsubscribe().await?;
                Some(record.endpoint)
            }
            None => None,
        };

        let Some(token) = self.bearer_token().await else {
            log::warn!("[WebPush] Local registration removed, but no token to notify the server");
            return Err(PushError::AuthTokenMissing);
        };

        if let Err(e) = self.backend.unsubscribe(&token, endpoint.as_deref()).await {
            log::warn!("[WebPush] Server unsubscribe failed (local state already cleared): {e}");
        } else {
            log::info!("[WebPush] Unsubscribed from push notifications");
        }
        Ok(())
    }

    /// Server-side subscription status for the current principal.
    ///
    /// Fails soft: any problem reads as "not subscribed".
    pub async fn check_subscription_status(&self) -> SubscriptionStatus {
        let Some(token) = self.bearer_token().await else {
            log::debug!("[WebPush] No token, treating server status as unsubscribed");
            return SubscriptionStatus::default();
        };
        if token.is_expired() {
            log::debug!("[WebPush] Token expired, treating server status as unsubscribed");
            return SubscriptionStatus::default();
        }

        match self.backend.status(&token).await {
            Ok(status) => status,
            Err(e) => {
                log::warn!("[WebPush] Status check failed: {e}");
                SubscriptionStatus::default()
            }
        }
    }

    /// Whether the platform holds a push registration. Errors read as `false`.
    pub async fn has_local_registration(&self) -> bool {
        if !self.check_support() {
            return false;
        }
        match self.platform.existing_registration().await {
            Ok(record) => record.is_some(),
            Err(e) => {
                log::warn!("[WebPush] Could not read local registration: {e}");
                false
            }
        }
    }

    /// Re-send the existing local registration to the server.
    ///
    /// Never creates a registration; fails with [`PushError::Platform`] when
    /// there is none.
    pub async fn resync(&self) -> Result<PushSubscriptionRecord, PushError> {
        if !self.check_support() {
            return Err(PushError::Unsupported);
        }
        let token = self.valid_token().await?;

        let _loading = self.loading_scope();

        let record = self
            .platform
            .existing_registration()
            .await?
            .ok_or_else(|| PlatformError::new("no local registration to resync"))?;
        self.backend.subscribe(&token, &record).await?;

        log::info!("[WebPush] Re-sent local registration to server");
        Ok(record)
    }
}
