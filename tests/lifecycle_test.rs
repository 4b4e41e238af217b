//! Integration tests for the subscription lifecycle.
//!
//! Drive the engine end to end over the in-memory platform and backend.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use botster_push::{
    EngineSnapshot, MemoryBackend, MemoryPlatform, Permission, PushBackend, PushError, PushPlatform,
    PushSubscriptionRecord, ReconciliationEngine, StaticToken, SubscriptionRegistrar, SubscriptionState,
    SubscriptionStatus, VapidKeyCache,
};
use std::sync::Arc;

fn vapid_key_bytes() -> Vec<u8> {
    let mut bytes = vec![0x04];
    bytes.extend((0..64u8).map(|b| b.wrapping_mul(3)));
    bytes
}

/// Structured token whose `exp` claim is `exp`.
fn token_expiring_at(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"42","exp":{exp}}}"#));
    format!("{header}.{claims}.sig")
}

struct Harness {
    platform: Arc<MemoryPlatform>,
    backend: Arc<MemoryBackend>,
    engine: Arc<ReconciliationEngine>,
}

async fn harness(platform: MemoryPlatform, token: StaticToken) -> Harness {
    let platform = Arc::new(platform);
    let backend = Arc::new(MemoryBackend::new(Some(URL_SAFE_NO_PAD.encode(vapid_key_bytes()))));
    let registrar = Arc::new(SubscriptionRegistrar::with_vapid_cache(
        Arc::clone(&platform) as Arc<dyn PushPlatform>,
        Arc::clone(&backend) as Arc<dyn PushBackend>,
        Arc::new(token),
        Arc::new(VapidKeyCache::new()),
    ));
    registrar.initialize().await;
    let engine = ReconciliationEngine::start(registrar);
    settled(&engine).await;
    Harness {
        platform,
        backend,
        engine,
    }
}

async fn settled(engine: &ReconciliationEngine) -> EngineSnapshot {
    let mut rx = engine.subscribe();
    let snap = rx.wait_for(EngineSnapshot::is_settled).await.expect("engine alive");
    snap.clone()
}

#[tokio::test]
async fn test_denied_permission_sends_no_subscribe() {
    let platform = MemoryPlatform::new();
    platform.set_permission(Permission::Denied);
    let h = harness(platform, StaticToken::new("tok")).await;

    assert_eq!(h.engine.snapshot().state, SubscriptionState::PermissionDenied);
    assert!(!h.engine.enable_notifications().await);

    assert_eq!(h.backend.counts().subscribe, 0);
    assert!(h.platform.subscribe_keys().is_empty());
    assert_eq!(h.platform.permission_requests(), 0);
    assert!(h.engine.snapshot().last_error.is_some());
}

#[tokio::test]
async fn test_local_registration_counts_when_server_lags() {
    let platform = MemoryPlatform::new();
    platform.set_permission(Permission::Granted);
    platform.set_registration(Some(PushSubscriptionRecord::new("https://push.example.test/lag", "p", "a")));
    let h = harness(platform, StaticToken::new("tok")).await;

    let snap = h.engine.snapshot();
    assert_eq!(snap.server, Some(SubscriptionStatus::default()));
    assert!(snap.is_subscribed());
}

#[tokio::test]
async fn test_server_record_counts_when_local_is_gone() {
    let platform = MemoryPlatform::new();
    platform.set_permission(Permission::Granted);
    let backend_status = SubscriptionStatus { subscribed: true, count: 1 };
    let h = harness(platform, StaticToken::new("tok")).await;
    h.backend.override_status(Some(backend_status));

    assert_eq!(h.engine.refresh().await, SubscriptionState::Subscribed);
    assert_eq!(h.engine.divergence(), botster_push::Divergence::ServerOnly);
}

#[tokio::test]
async fn test_disable_stays_unsubscribed_after_server_error() {
    let h = harness(MemoryPlatform::new(), StaticToken::new("tok")).await;
    assert!(h.engine.enable_notifications().await);
    assert!(h.engine.snapshot().is_subscribed());

    h.backend.fail_unsubscribe(Some(PushError::ServerRejected {
        status: 500,
        message: None,
    }));
    // Server still reports the subscription it failed to delete
    h.backend.override_status(Some(SubscriptionStatus { subscribed: true, count: 1 }));

    assert!(h.engine.disable_notifications().await);
    assert!(!h.engine.snapshot().is_subscribed());

    // Later probes keep ignoring the server until the next enable
    assert_eq!(h.engine.refresh().await, SubscriptionState::Unsubscribed);
    assert!(h.platform.registration().is_none());
}

#[tokio::test]
async fn test_enable_after_disable_trusts_server_again() {
    let h = harness(MemoryPlatform::new(), StaticToken::new("tok")).await;
    assert!(h.engine.enable_notifications().await);
    assert!(h.engine.disable_notifications().await);

    assert!(h.engine.enable_notifications().await);
    h.backend.override_status(Some(SubscriptionStatus { subscribed: true, count: 1 }));
    assert_eq!(h.engine.refresh().await, SubscriptionState::Subscribed);
}

#[tokio::test]
async fn test_expired_token_fails_before_any_network_call() {
    let expired = token_expiring_at(chrono::Utc::now().timestamp() - 60);
    let h = harness(MemoryPlatform::new(), StaticToken::new(expired)).await;
    let before = h.backend.counts();

    let err = h.engine.registrar().subscribe().await.expect_err("expired");
    assert_eq!(err, PushError::AuthTokenExpired);
    assert!(err.requires_reauth());

    assert_eq!(h.backend.counts(), before);
    assert_eq!(h.backend.counts().vapid, 0);
    assert!(h.platform.subscribe_keys().is_empty());
}

#[tokio::test]
async fn test_unexpired_structured_token_subscribes() {
    let fresh = token_expiring_at(chrono::Utc::now().timestamp() + 3600);
    let h = harness(MemoryPlatform::new(), StaticToken::new(fresh.clone())).await;

    assert!(h.engine.enable_notifications().await);
    assert_eq!(h.backend.subscriptions(&fresh).len(), 1);
}

#[tokio::test]
async fn test_unsupported_host() {
    let h = harness(MemoryPlatform::unsupported(), StaticToken::new("tok")).await;

    assert_eq!(h.engine.snapshot().state, SubscriptionState::Unsupported);
    assert!(!h.engine.enable_notifications().await);
    assert_eq!(h.backend.counts().total(), 0);
    assert!(h.platform.worker_path().is_none());
}

#[tokio::test]
async fn test_happy_path_end_to_end() {
    let h = harness(MemoryPlatform::new(), StaticToken::new("tok")).await;
    assert_eq!(h.engine.snapshot().state, SubscriptionState::Unsubscribed);

    assert!(h.engine.enable_notifications().await);

    assert_eq!(h.platform.worker_path().as_deref(), Some("/service-worker.js"));
    assert_eq!(h.backend.counts().vapid, 1);
    assert_eq!(h.platform.subscribe_keys(), vec![vapid_key_bytes()]);

    let stored = h.backend.subscriptions("tok");
    assert_eq!(stored.len(), 1);
    assert_eq!(Some(&stored[0]), h.platform.registration().as_ref());

    let snap = h.engine.snapshot();
    assert!(snap.is_subscribed());
    assert_eq!(snap.permission, Permission::Granted);
    assert_eq!(snap.last_error, None);

    // A second enable reuses the cached key
    assert!(h.engine.enable_notifications().await);
    assert_eq!(h.backend.counts().vapid, 1);
}

#[tokio::test]
async fn test_subscribed_implies_granted() {
    let platform = MemoryPlatform::new();
    platform.set_registration(Some(PushSubscriptionRecord::new("https://push.example.test/x", "p", "a")));
    let h = harness(platform, StaticToken::new("tok")).await;

    // Registration exists but permission was never granted
    let snap = h.engine.snapshot();
    assert_eq!(snap.permission, Permission::Default);
    assert!(!snap.is_subscribed());
}

#[tokio::test]
async fn test_missing_token_status_is_soft() {
    let platform = MemoryPlatform::new();
    platform.set_permission(Permission::Granted);
    let h = harness(platform, StaticToken::none()).await;

    assert_eq!(h.engine.snapshot().state, SubscriptionState::Unsubscribed);
    assert_eq!(h.backend.counts().status, 0);
    assert!(!h.engine.enable_notifications().await);
    assert_eq!(
        h.engine.snapshot().last_error.as_deref(),
        Some(PushError::AuthTokenMissing.user_message().as_str())
    );
}
