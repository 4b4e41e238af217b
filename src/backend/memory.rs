//! In-process push backend.
//!
//! Keeps subscriptions per bearer token and counts every request, so it can
//! stand in for the server offline and in tests. Failure modes can be
//! switched on per operation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{PushBackend, SubscriptionStatus};
use crate::error::PushError;
use crate::platform::PushSubscriptionRecord;
use crate::token::AuthToken;

/// Request counters, one per endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    /// `GET /push/vapid-public-key`.
    pub vapid: usize,
    /// `POST /push/subscribe`.
    pub subscribe: usize,
    /// `POST /push/unsubscribe`.
    pub unsubscribe: usize,
    /// `GET /push/status`.
    pub status: usize,
}

impl RequestCounts {
    /// All requests combined.
    pub fn total(&self) -> usize {
        self.vapid + self.subscribe + self.unsubscribe + self.status
    }
}

#[derive(Debug, Default)]
struct State {
    vapid_key: Option<String>,
    subscriptions: HashMap<String, Vec<PushSubscriptionRecord>>,
    counts: RequestCounts,
    subscribe_error: Option<PushError>,
    unsubscribe_error: Option<PushError>,
    status_error: Option<PushError>,
    /// When set, status reports this instead of the stored subscriptions.
    status_override: Option<SubscriptionStatus>,
}

/// Push backend living entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
}

impl MemoryBackend {
    /// Backend serving `vapid_key` (base64url). `None` makes key fetches fail.
    pub fn new(vapid_key: Option<String>) -> Self {
        Self {
            state: Mutex::new(State {
                vapid_key,
                ..State::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request counters so far.
    pub fn counts(&self) -> RequestCounts {
        self.lock().counts
    }

    /// Subscriptions stored for `token`.
    pub fn subscriptions(&self, token: &str) -> Vec<PushSubscriptionRecord> {
        self.lock().subscriptions.get(token).cloned().unwrap_or_default()
    }

    /// Replace the served VAPID key.
    pub fn set_vapid_key(&self, key: Option<String>) {
        self.lock().vapid_key = key;
    }

    /// Fail every subscribe with `error` (`None` to succeed again).
    pub fn fail_subscribe(&self, error: Option<PushError>) {
        self.lock().subscribe_error = error;
    }

    /// Fail every unsubscribe with `error`.
    pub fn fail_unsubscribe(&self, error: Option<PushError>) {
        self.lock().unsubscribe_error = error;
    }

    /// Fail every status check with `error`.
    pub fn fail_status(&self, error: Option<PushError>) {
        self.lock().status_error = error;
    }

    /// Report `status` regardless of what is stored (models index lag).
    pub fn override_status(&self, status: Option<SubscriptionStatus>) {
        self.lock().status_override = status;
    }
}

#[async_trait]
impl PushBackend for MemoryBackend {
    async fn vapid_public_key(&self) -> Result<String, PushError> {
        let mut state = self.lock();
        state.counts.vapid += 1;
        state
            .vapid_key
            .clone()
            .ok_or(PushError::ServerRejected { status: 404, message: None })
    }

    async fn subscribe(
        &self,
        token: &AuthToken,
        record: &PushSubscriptionRecord,
    ) -> Result<(), PushError> {
        let mut state = self.lock();
        state.counts.subscribe += 1;
        if let Some(err) = state.subscribe_error.clone() {
            return Err(err);
        }
        let records = state.subscriptions.entry(token.as_str().to_string()).or_default();
        records.retain(|r| r.endpoint != record.endpoint);
        records.push(record.clone());
        Ok(())
    }

    async fn unsubscribe(
        &self,
        token: &AuthToken,
        endpoint: Option<&str>,
    ) -> Result<(), PushError> {
        let mut state = self.lock();
        state.counts.unsubscribe += 1;
        if let Some(err) = state.unsubscribe_error.clone() {
            return Err(err);
        }
        if let Some(records) = state.subscriptions.get_mut(token.as_str()) {
            match endpoint {
                Some(endpoint) => records.retain(|r| r.endpoint != endpoint),
                None => records.clear(),
            }
        }
        Ok(())
    }

    async fn status(&self, token: &AuthToken) -> Result<SubscriptionStatus, PushError> {
        let mut state = self.lock();
        state.counts.status += 1;
        if let Some(err) = state.status_error.clone() {
            return Err(err);
        }
        if let Some(status) = state.status_override {
            return Ok(status);
        }
        let count = state.subscriptions.get(token.as_str()).map_or(0, Vec::len);
        Ok(SubscriptionStatus {
            subscribed: count > 0,
            count: u32::try_from(count).unwrap_or(u32::MAX),
        })
    }
}
