//! Subscription reconciliation.
//!
//! Derives one canonical [`SubscriptionState`] from two sources that can
//! disagree: the device-local registration and the server's record.
//!
//! `is_subscribed = permission == Granted && (has_local || server_subscribed)`
//!
//! The OR tolerates server indexing lag right after a subscribe and a local
//! registration that was wiped while the server still holds the record. The
//! rule lives in the pure [`evaluate`] function; [`ReconciliationEngine`] is
//! the thin async adapter that probes, publishes and orchestrates
//! enable/disable.

// Rust guideline compliant 2026-02

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backend::SubscriptionStatus;
use crate::error::PushError;
use crate::platform::Permission;
use crate::registrar::SubscriptionRegistrar;

/// Canonical subscription state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    /// Host can't do push at all.
    Unsupported,
    /// Probes still outstanding.
    Checking,
    /// Supported, not subscribed.
    Unsubscribed,
    /// Permission granted and at least one side holds a subscription.
    Subscribed,
    /// User blocked notifications.
    PermissionDenied,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unsupported => "unsupported",
            Self::Checking => "checking",
            Self::Unsubscribed => "unsubscribed",
            Self::Subscribed => "subscribed",
            Self::PermissionDenied => "permission denied",
        };
        f.write_str(s)
    }
}

/// Everything [`evaluate`] looks at. `None` means "not known yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileInputs {
    /// Worker and push capability present.
    pub supported: bool,
    /// Current notification permission.
    pub permission: Permission,
    /// Local registration exists.
    pub has_local: Option<bool>,
    /// Server's view.
    pub server: Option<SubscriptionStatus>,
}

/// Subscription rule on already-known facts.
pub fn derive_is_subscribed(
    permission: Permission,
    has_local: bool,
    server_subscribed: bool,
) -> bool {
    permission == Permission::Granted && (has_local || server_subscribed)
}

/// Derive the canonical state. Pure.
pub fn evaluate(inputs: &ReconcileInputs) -> SubscriptionState {
    if !inputs.supported {
        return SubscriptionState::Unsupported;
    }
    if inputs.permission == Permission::Denied {
        return SubscriptionState::PermissionDenied;
    }
    let (Some(has_local), Some(server)) = (inputs.has_local, inputs.server) else {
        return SubscriptionState::Checking;
    };
    if derive_is_subscribed(inputs.permission, has_local, server.subscribed) {
        SubscriptionState::Subscribed
    } else {
        SubscriptionState::Unsubscribed
    }
}

/// Mismatch between the local and server views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Divergence {
    /// Both sides agree, or a side is still unknown.
    None,
    /// Device holds a registration the server doesn't list.
    LocalOnly,
    /// Server lists a subscription but the device has none.
    ServerOnly,
}

/// What the engine last published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineSnapshot {
    /// Derived state.
    pub state: SubscriptionState,
    /// Permission at the last probe.
    pub permission: Permission,
    /// Registrar operation in progress.
    pub loading: bool,
    /// Raw local probe result.
    pub has_local: Option<bool>,
    /// Raw server probe result.
    pub server: Option<SubscriptionStatus>,
    /// User-facing message of the last failed enable/disable/repair.
    pub last_error: Option<String>,
}

impl EngineSnapshot {
    /// Derived `is_subscribed`.
    pub fn is_subscribed(&self) -> bool {
        self.state == SubscriptionState::Subscribed
    }

    /// Past the initial `Checking` phase.
    pub fn is_settled(&self) -> bool {
        self.state != SubscriptionState::Checking
    }

    /// Local/server mismatch, once both are known.
    pub fn divergence(&self) -> Divergence {
        match (self.has_local, self.server) {
            (Some(true), Some(server)) if !server.subscribed => Divergence::LocalOnly,
            (Some(false), Some(server)) if server.subscribed => Divergence::ServerOnly,
            _ => Divergence::None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Probe {
    supported: bool,
    permission: Permission,
    has_local: bool,
    server: SubscriptionStatus,
}

/// Local and server probes, run concurrently and joined.
async fn probe(registrar: &SubscriptionRegistrar) -> Probe {
    let supported = registrar.check_support();
    let permission = registrar.check_permission();
    if !supported {
        return Probe {
            supported,
            permission,
            has_local: false,
            server: SubscriptionStatus::default(),
        };
    }
    let (has_local, server) = tokio::join!(
        registrar.has_local_registration(),
        registrar.check_subscription_status()
    );
    Probe {
        supported,
        permission,
        has_local,
        server,
    }
}

/// Publishes the canonical subscription state and runs enable/disable.
#[derive(Debug)]
pub struct ReconciliationEngine {
    registrar: Arc<SubscriptionRegistrar>,
    snapshot: watch::Sender<EngineSnapshot>,
    /// Bumped to invalidate probes started before a state-changing action.
    generation: AtomicU64,
    /// Set by disable until the next successful enable.
    ignore_server: AtomicBool,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ReconciliationEngine {
    /// Create the engine and start watching the registrar.
    ///
    /// Runs an initial probe, then one after every registrar operation
    /// (loading going back to false). Must be called inside a tokio runtime.
    pub fn start(registrar: Arc<SubscriptionRegistrar>) -> Arc<Self> {
        let initial = EngineSnapshot {
            state: SubscriptionState::Checking,
            permission: registrar.check_permission(),
            loading: registrar.is_loading(),
            has_local: None,
            server: None,
            last_error: None,
        };
        let (snapshot, _) = watch::channel(initial);
        let engine = Arc::new(Self {
            registrar: Arc::clone(&registrar),
            snapshot,
            generation: AtomicU64::new(0),
            ignore_server: AtomicBool::new(false),
            watcher: Mutex::new(None),
        });

        let handle = tokio::spawn(watch_registrar(Arc::downgrade(&engine), registrar));
        *engine.watcher.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        engine
    }

    /// The registrar this engine drives.
    pub fn registrar(&self) -> &Arc<SubscriptionRegistrar> {
        &self.registrar
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot.subscribe()
    }

    /// Current local/server mismatch.
    pub fn divergence(&self) -> Divergence {
        self.snapshot.borrow().divergence()
    }

    /// Re-run both probes and publish the result.
    pub async fn refresh(&self) -> SubscriptionState {
        let generation = self.generation.load(Ordering::Acquire);
        let probed = probe(&self.registrar).await;
        self.apply(generation, probed)
    }

    fn apply(&self, generation: u64, probed: Probe) -> SubscriptionState {
        if generation != self.generation.load(Ordering::Acquire) {
            log::debug!("[WebPush] Discarding stale subscription probe");
            return self.snapshot.borrow().state;
        }

        let server = if self.ignore_server.load(Ordering::Acquire) {
            SubscriptionStatus::default()
        } else {
            probed.server
        };
        let state = evaluate(&ReconcileInputs {
            supported: probed.supported,
            permission: probed.permission,
            has_local: Some(probed.has_local),
            server: Some(server),
        });

        self.snapshot.send_modify(|snap| {
            if snap.state != state {
                log::debug!("[WebPush] Subscription state {} -> {}", snap.state, state);
            }
            snap.state = state;
            snap.permission = probed.permission;
            snap.has_local = Some(probed.has_local);
            snap.server = Some(probed.server);
        });
        state
    }

    fn record_error(&self, error: Option<&PushError>) {
        let message = error.map(PushError::user_message);
        self.snapshot.send_if_modified(|snap| {
            if snap.last_error == message {
                return false;
            }
            snap.last_error = message;
            true
        });
    }

    /// Subscribe, then re-check both sides.
    ///
    /// Never errors: failures are logged and their user-facing message is
    /// kept in [`EngineSnapshot::last_error`].
    pub async fn enable_notifications(&self) -> bool {
        match self.registrar.subscribe().await {
            Ok(record) => {
                log::info!("[WebPush] Notifications enabled ({})", record.endpoint);
                self.ignore_server.store(false, Ordering::Release);
                self.record_error(None);
                self.refresh().await;
                true
            }
            Err(e) => {
                if e.requires_reauth() {
                    log::warn!("[WebPush] Enable failed, sign in again: {e}");
                } else {
                    log::error!("[WebPush] Enable failed: {e}");
                }
                self.record_error(Some(&e));
                self.refresh().await;
                false
            }
        }
    }

    /// Unsubscribe and report unsubscribed regardless of the server answer.
    ///
    /// Server reports are ignored until the next successful enable. Returns
    /// `false` only when the local unregister failed.
    pub async fn disable_notifications(&self) -> bool {
        self.ignore_server.store(true, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);

        let result = self.registrar.unsubscribe().await;

        self.generation.fetch_add(1, Ordering::AcqRel);
        self.snapshot.send_modify(|snap| {
            if snap.state == SubscriptionState::Subscribed {
                snap.state = SubscriptionState::Unsubscribed;
            }
        });

        match result {
            Ok(()) => {
                self.record_error(None);
                true
            }
            Err(PushError::AuthTokenMissing) => {
                log::warn!("[WebPush] Disabled locally; server not notified (no token)");
                self.record_error(None);
                true
            }
            Err(e) => {
                log::error!("[WebPush] Disable failed: {e}");
                self.record_error(Some(&e));
                !matches!(e, PushError::Platform(_))
            }
        }
    }

    /// Re-send a local registration the server doesn't know about.
    ///
    /// Only acts on [`Divergence::LocalOnly`]; returns whether a repair was
    /// made.
    pub async fn repair(&self) -> bool {
        let divergence = self.divergence();
        if divergence != Divergence::LocalOnly {
            log::debug!("[WebPush] Nothing to repair ({divergence:?})");
            return false;
        }
        match self.registrar.resync().await {
            Ok(_) => {
                self.ignore_server.store(false, Ordering::Release);
                self.record_error(None);
                self.refresh().await;
                true
            }
            Err(e) => {
                log::warn!("[WebPush] Repair failed: {e}");
                self.record_error(Some(&e));
                false
            }
        }
    }
}

impl Drop for ReconciliationEngine {
    fn drop(&mut self) {
        let watcher = self.watcher.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = watcher.take() {
            handle.abort();
        }
    }
}

/// Initial probe, then a probe after each registrar operation.
///
/// Holds only a `Weak` to the engine so probe results that arrive after the
/// engine is gone are dropped.
async fn watch_registrar(
    engine: Weak<ReconciliationEngine>,
    registrar: Arc<SubscriptionRegistrar>,
) {
    let mut loading = registrar.loading();

    if !refresh_weak(&engine, &registrar).await {
        return;
    }

    while loading.changed().await.is_ok() {
        let now_loading = *loading.borrow_and_update();
        let Some(strong) = engine.upgrade() else {
            return;
        };
        strong.snapshot.send_if_modified(|snap| {
            let changed = snap.loading != now_loading;
            snap.loading = now_loading;
            changed
        });
        drop(strong);

        // Any change that lands on false closed an operation, even if the
        // true edge was coalesced away.
        if !now_loading && !refresh_weak(&engine, &registrar).await {
            return;
        }
    }
}

async fn refresh_weak(
    engine: &Weak<ReconciliationEngine>,
    registrar: &SubscriptionRegistrar,
) -> bool {
    let Some(generation) = engine.upgrade().map(|e| e.generation.load(Ordering::Acquire)) else {
        return false;
    };
    let probed = probe(registrar).await;
    match engine.upgrade() {
        Some(strong) => {
            strong.apply(generation, probed);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, PushBackend};
    use crate::credentials::StaticToken;
    use crate::platform::{MemoryPlatform, PushPlatform, PushSubscriptionRecord};
    use crate::vapid::VapidKeyCache;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

    fn inputs(
        permission: Permission,
        has_local: Option<bool>,
        server: Option<bool>,
    ) -> ReconcileInputs {
        ReconcileInputs {
            supported: true,
            permission,
            has_local,
            server: server.map(|subscribed| SubscriptionStatus {
                subscribed,
                count: u32::from(subscribed),
            }),
        }
    }

    #[test]
    fn test_evaluate_or_rule() {
        assert_eq!(
            evaluate(&inputs(Permission::Granted, Some(true), Some(false))),
            SubscriptionState::Subscribed
        );
        assert_eq!(
            evaluate(&inputs(Permission::Granted, Some(false), Some(true))),
            SubscriptionState::Subscribed
        );
        assert_eq!(
            evaluate(&inputs(Permission::Granted, Some(false), Some(false))),
            SubscriptionState::Unsubscribed
        );
    }

    #[test]
    fn test_evaluate_requires_granted() {
        // Local registration alone isn't enough without permission
        assert_eq!(
            evaluate(&inputs(Permission::Default, Some(true), Some(true))),
            SubscriptionState::Unsubscribed
        );
        assert_eq!(
            evaluate(&inputs(Permission::Denied, Some(true), Some(true))),
            SubscriptionState::PermissionDenied
        );
    }

    #[test]
    fn test_evaluate_unknown_and_unsupported() {
        assert_eq!(
            evaluate(&inputs(Permission::Granted, None, Some(true))),
            SubscriptionState::Checking
        );
        let mut unsupported = inputs(Permission::Granted, None, None);
        unsupported.supported = false;
        assert_eq!(evaluate(&unsupported), SubscriptionState::Unsupported);
    }

    #[test]
    fn test_snapshot_divergence() {
        let mut snap = EngineSnapshot {
            state: SubscriptionState::Subscribed,
            permission: Permission::Granted,
            loading: false,
            has_local: Some(true),
            server: Some(SubscriptionStatus::default()),
            last_error: None,
        };
        assert_eq!(snap.divergence(), Divergence::LocalOnly);

        snap.has_local = Some(false);
        snap.server = Some(SubscriptionStatus { subscribed: true, count: 2 });
        assert_eq!(snap.divergence(), Divergence::ServerOnly);

        snap.server = None;
        assert_eq!(snap.divergence(), Divergence::None);
    }

    fn engine_with(
        platform: &Arc<MemoryPlatform>,
        backend: &Arc<MemoryBackend>,
    ) -> Arc<ReconciliationEngine> {
        let registrar = SubscriptionRegistrar::with_vapid_cache(
            Arc::clone(platform) as Arc<dyn PushPlatform>,
            Arc::clone(backend) as Arc<dyn PushBackend>,
            Arc::new(StaticToken::new("tok")),
            Arc::new(VapidKeyCache::new()),
        );
        ReconciliationEngine::start(Arc::new(registrar))
    }

    fn vapid_key() -> String {
        let mut bytes = vec![0x04];
        bytes.extend([9u8; 64]);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    async fn settled(engine: &ReconciliationEngine) -> EngineSnapshot {
        let mut rx = engine.subscribe();
        let snap = rx.wait_for(EngineSnapshot::is_settled).await.expect("engine alive");
        snap.clone()
    }

    #[tokio::test]
    async fn test_engine_initial_probe() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.set_permission(Permission::Granted);
        let record = PushSubscriptionRecord::new("https://push.example.test/1", "p", "a");
        platform.set_registration(Some(record));
        let backend = Arc::new(MemoryBackend::new(Some(vapid_key())));

        let engine = engine_with(&platform, &backend);
        let snap = settled(&engine).await;

        assert!(snap.is_subscribed());
        assert_eq!(engine.divergence(), Divergence::LocalOnly);
    }

    #[tokio::test]
    async fn test_enable_then_disable() {
        let platform = Arc::new(MemoryPlatform::new());
        let backend = Arc::new(MemoryBackend::new(Some(vapid_key())));
        let engine = engine_with(&platform, &backend);
        settled(&engine).await;

        assert!(engine.enable_notifications().await);
        assert!(engine.snapshot().is_subscribed());
        assert_eq!(engine.snapshot().last_error, None);

        assert!(engine.disable_notifications().await);
        assert!(!engine.snapshot().is_subscribed());
        assert!(backend.subscriptions("tok").is_empty());
    }

    #[tokio::test]
    async fn test_enable_failure_records_message() {
        let platform = Arc::new(MemoryPlatform::new());
        let backend = Arc::new(MemoryBackend::new(Some(vapid_key())));
        backend.fail_subscribe(Some(PushError::ServerRejected {
            status: 422,
            message: Some("endpoint not allowed".to_string()),
        }));
        let engine = engine_with(&platform, &backend);
        settled(&engine).await;

        assert!(!engine.enable_notifications().await);
        let snap = engine.snapshot();
        assert!(!snap.is_subscribed());
        assert_eq!(snap.last_error.as_deref(), Some("endpoint not allowed"));
    }

    #[tokio::test]
    async fn test_repair_resends_local_only_registration() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.set_permission(Permission::Granted);
        let record = PushSubscriptionRecord::new("https://push.example.test/7", "p", "a");
        platform.set_registration(Some(record.clone()));
        let backend = Arc::new(MemoryBackend::new(Some(vapid_key())));
        let engine = engine_with(&platform, &backend);
        settled(&engine).await;

        assert!(engine.repair().await);
        assert_eq!(backend.subscriptions("tok"), vec![record]);
        assert_eq!(engine.divergence(), Divergence::None);
        // Nothing left to repair
        assert!(!engine.repair().await);
    }

    #[tokio::test]
    async fn test_dropped_engine_stops_watcher() {
        let platform = Arc::new(MemoryPlatform::new());
        let backend = Arc::new(MemoryBackend::new(Some(vapid_key())));
        let engine = engine_with(&platform, &backend);
        let mut rx = engine.subscribe();
        drop(engine);

        // Sender lives in the engine; dropping it closes the channel
        assert!(rx.changed().await.is_err());
    }
}
