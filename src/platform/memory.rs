//! In-process push platform.
//!
//! Holds its registration in memory and records every call it receives.
//! Embedding hosts can drive it directly; tests use it as the platform
//! double.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Permission, PushPlatform, PushSubscriptionRecord};
use crate::error::PlatformError;

#[derive(Debug)]
struct State {
    supported: bool,
    permission: Permission,
    /// What the next `request_permission` resolves to.
    permission_answer: Permission,
    registration: Option<PushSubscriptionRecord>,
    worker_path: Option<String>,
    fail_worker: bool,
    fail_subscribe: bool,
    fail_unsubscribe: bool,
    permission_requests: usize,
    subscribe_keys: Vec<Vec<u8>>,
    unsubscribe_calls: usize,
    next_id: u64,
}

/// Push platform living entirely in memory.
#[derive(Debug)]
pub struct MemoryPlatform {
    state: Mutex<State>,
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPlatform {
    /// Supported platform, permission `default`, requests answered `granted`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                supported: true,
                permission: Permission::Default,
                permission_answer: Permission::Granted,
                registration: None,
                worker_path: None,
                fail_worker: false,
                fail_subscribe: false,
                fail_unsubscribe: false,
                permission_requests: 0,
                subscribe_keys: Vec::new(),
                unsubscribe_calls: 0,
                next_id: 1,
            }),
        }
    }

    /// Platform without worker/push support.
    pub fn unsupported() -> Self {
        let platform = Self::new();
        platform.lock().supported = false;
        platform
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the current permission.
    pub fn set_permission(&self, permission: Permission) {
        self.lock().permission = permission;
    }

    /// Set what the next permission request resolves to.
    pub fn set_permission_answer(&self, answer: Permission) {
        self.lock().permission_answer = answer;
    }

    /// Install a registration as if it pre-existed.
    pub fn set_registration(&self, record: Option<PushSubscriptionRecord>) {
        self.lock().registration = record;
    }

    /// Make worker registration fail.
    pub fn fail_worker_registration(&self, fail: bool) {
        self.lock().fail_worker = fail;
    }

    /// Make `subscribe` fail.
    pub fn fail_subscribe(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    /// Make `unsubscribe` fail.
    pub fn fail_unsubscribe(&self, fail: bool) {
        self.lock().fail_unsubscribe = fail;
    }

    /// Number of `request_permission` calls.
    pub fn permission_requests(&self) -> usize {
        self.lock().permission_requests
    }

    /// Application server keys passed to each `subscribe` call.
    pub fn subscribe_keys(&self) -> Vec<Vec<u8>> {
        self.lock().subscribe_keys.clone()
    }

    /// Number of `unsubscribe` calls.
    pub fn unsubscribe_calls(&self) -> usize {
        self.lock().unsubscribe_calls
    }

    /// Path of the registered worker, if any.
    pub fn worker_path(&self) -> Option<String> {
        self.lock().worker_path.clone()
    }

    /// Current registration without going through the async API.
    pub fn registration(&self) -> Option<PushSubscriptionRecord> {
        self.lock().registration.clone()
    }
}

#[async_trait]
impl PushPlatform for MemoryPlatform {
    fn is_supported(&self) -> bool {
        self.lock().supported
    }

    fn permission(&self) -> Permission {
        self.lock().permission
    }

    async fn request_permission(&self) -> Permission {
        let mut state = self.lock();
        state.permission_requests += 1;
        state.permission = state.permission_answer;
        state.permission
    }

    async fn register_worker(&self, script_path: &str) -> Result<(), PlatformError> {
        let mut state = self.lock();
        if state.fail_worker || !state.supported {
            return Err(PlatformError::new(format!("cannot register worker at {script_path}")));
        }
        state.worker_path = Some(script_path.to_string());
        Ok(())
    }

    async fn existing_registration(&self) -> Result<Option<PushSubscriptionRecord>, PlatformError> {
        Ok(self.lock().registration.clone())
    }

    async fn subscribe(
        &self,
        application_server_key: &[u8],
    ) -> Result<PushSubscriptionRecord, PlatformError> {
        let mut state = self.lock();
        state.subscribe_keys.push(application_server_key.to_vec());
        if state.fail_subscribe {
            return Err(PlatformError::new("push service refused registration"));
        }
        if state.permission != Permission::Granted {
            return Err(PlatformError::new("permission not granted"));
        }
        if let Some(existing) = &state.registration {
            return Ok(existing.clone());
        }

        let id = state.next_id;
        state.next_id += 1;
        let record = PushSubscriptionRecord::new(
            format!("https://push.example.test/sub/{id}"),
            format!("p256dh-{id}"),
            format!("auth-{id}"),
        );
        state.registration = Some(record.clone());
        Ok(record)
    }

    async fn unsubscribe(&self) -> Result<bool, PlatformError> {
        let mut state = self.lock();
        state.unsubscribe_calls += 1;
        if state.fail_unsubscribe {
            return Err(PlatformError::new("unsubscribe failed"));
        }
        Ok(state.registration.take().is_some())
    }
}
