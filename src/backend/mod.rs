//! Server side of the push subscription contract.
//!
//! [`HttpBackend`] speaks the botster `/push/*` REST API. The registrar only
//! sees the [`PushBackend`] trait; [`MemoryBackend`] is an in-process
//! server for offline use and tests.

pub mod http;
pub mod memory;

pub use http::HttpBackend;
pub use memory::MemoryBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PushError;
use crate::platform::PushSubscriptionRecord;
use crate::token::AuthToken;

/// Server-reported subscription status for the current principal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    /// At least one subscription is on record.
    pub subscribed: bool,
    /// Number of subscriptions on record.
    #[serde(default)]
    pub count: u32,
}

/// Server operations the registrar depends on.
#[async_trait]
pub trait PushBackend: Send + Sync + std::fmt::Debug {
    /// `GET /push/vapid-public-key`.
    async fn vapid_public_key(&self) -> Result<String, PushError>;

    /// `POST /push/subscribe`.
    async fn subscribe(
        &self,
        token: &AuthToken,
        record: &PushSubscriptionRecord,
    ) -> Result<(), PushError>;

    /// `POST /push/unsubscribe`, scoped to `endpoint` when known.
    async fn unsubscribe(&self, token: &AuthToken, endpoint: Option<&str>) -> Result<(), PushError>;

    /// `GET /push/status`.
    async fn status(&self, token: &AuthToken) -> Result<SubscriptionStatus, PushError>;
}
