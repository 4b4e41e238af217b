//! VAPID public key cache (RFC 8292).
//!
//! The key is fetched from the server at most once for the lifetime of a
//! cache. Callers that arrive while the first fetch is still in flight
//! await that same request instead of issuing their own. A failed fetch,
//! or one that returns an undecodable key, leaves the cache empty so a
//! later call can try again.

// Rust guideline compliant 2026-02

use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine,
};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::backend::PushBackend;
use crate::error::PushError;

type KeyFetch = Shared<BoxFuture<'static, Option<String>>>;

#[derive(Default)]
enum CacheState {
    #[default]
    Empty,
    InFlight(KeyFetch),
    Ready(String),
}

/// Write-once VAPID public key cache with single-flight initialization.
#[derive(Default)]
pub struct VapidKeyCache {
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for VapidKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.lock() {
            CacheState::Empty => "empty",
            CacheState::InFlight(_) => "in-flight",
            CacheState::Ready(_) => "ready",
        };
        f.debug_struct("VapidKeyCache").field("state", &state).finish()
    }
}

impl VapidKeyCache {
    /// Fresh, empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<VapidKeyCache>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached key, without fetching.
    pub fn cached(&self) -> Option<String> {
        match &*self.lock() {
            CacheState::Ready(key) => Some(key.clone()),
            _ => None,
        }
    }

    /// Return the cached key or fetch it from `backend`.
    ///
    /// Never fails: fetch errors and keys that don't decode to a P-256 point
    /// are logged and reported as `None`, leaving the cache empty.
    pub async fn get_or_fetch(&self, backend: &Arc<dyn PushBackend>) -> Option<String> {
        let fetch = {
            let mut state = self.lock();
            let in_flight = match &*state {
                CacheState::Ready(key) => return Some(key.clone()),
                CacheState::InFlight(fetch) => Some(fetch.clone()),
                CacheState::Empty => None,
            };

            if let Some(fetch) = in_flight {
                fetch
            } else {
                let backend = Arc::clone(backend);
                let fetch = async move {
                    log::debug!("[WebPush] Fetching VAPID public key");
                    let key = match backend.vapid_public_key().await {
                        Ok(key) => key,
                        Err(e) => {
                            log::warn!("[WebPush] Failed to fetch VAPID public key: {e}");
                            return None;
                        }
                    };
                    match decode_public_key(&key) {
                        Ok(_) => Some(key),
                        Err(e) => {
                            log::warn!("[WebPush] Server sent an unusable VAPID public key: {e}");
                            None
                        }
                    }
                }
                .boxed()
                .shared();
                *state = CacheState::InFlight(fetch.clone());
                fetch
            }
        };

        let result = fetch.clone().await;

        // Only the fetch this caller awaited may settle the state
        let mut state = self.lock();
        if matches!(&*state, CacheState::InFlight(current) if current.ptr_eq(&fetch)) {
            *state = match &result {
                Some(key) => CacheState::Ready(key.clone()),
                None => CacheState::Empty,
            };
        }
        result
    }
}

/// Decode a base64url VAPID public key into its 65 raw bytes.
///
/// Accepts padded and unpadded input, and standard-alphabet base64 from
/// servers that don't use the URL-safe alphabet.
pub fn decode_public_key(key_b64: &str) -> Result<Vec<u8>, PushError> {
    let trimmed = key_b64.trim().trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .map_err(|e| PushError::MissingKey(format!("invalid base64 in VAPID key: {e}")))?;

    if bytes.len() != 65 || bytes[0] != 0x04 {
        return Err(PushError::MissingKey(format!(
            "VAPID public key must be a 65-byte uncompressed P-256 point, got {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes)
}
