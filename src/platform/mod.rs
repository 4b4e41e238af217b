//! Host push/permission capability.
//!
//! Everything the subsystem needs from the host is behind [`PushPlatform`]
//! so the state machines can run against [`MemoryPlatform`] in tests and
//! against [`LocalPlatform`] on a real device.
//!
//! ```text
//! PushPlatform (trait)
//!     │
//!     ├── MemoryPlatform   in-process, records every call
//!     │
//!     └── LocalPlatform    file-backed device registration (P-256 keys)
//! ```

pub mod local;
pub mod memory;

pub use local::LocalPlatform;
pub use memory::MemoryPlatform;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_CONTENT_ENCODING;
use crate::error::PlatformError;

/// Notification permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Not yet asked (or the user closed the prompt without answering).
    #[default]
    Default,
    /// Notifications allowed.
    Granted,
    /// Notifications blocked. Cannot be re-requested programmatically.
    Denied,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Granted => write!(f, "granted"),
            Self::Denied => write!(f, "denied"),
        }
    }
}

/// Encryption keys of a push subscription (RFC 8291).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    /// Subscriber's P-256 ECDH public key (base64url, uncompressed point).
    pub p256dh: String,
    /// 16-byte shared auth secret (base64url).
    pub auth: String,
}

/// A platform-issued push registration.
///
/// Created by [`PushPlatform::subscribe`]; owned by the registrar until it
/// is handed to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscriptionRecord {
    /// Push service endpoint. Opaque, unique per device and browser.
    pub endpoint: String,
    /// Encryption keys.
    pub keys: SubscriptionKeys,
    /// Payload content encoding (normally `aes128gcm`).
    #[serde(default = "default_content_encoding")]
    pub content_encoding: String,
}

fn default_content_encoding() -> String {
    DEFAULT_CONTENT_ENCODING.to_string()
}

impl PushSubscriptionRecord {
    /// Record with the default content encoding.
    pub fn new(
        endpoint: impl Into<String>,
        p256dh: impl Into<String>,
        auth: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            keys: SubscriptionKeys {
                p256dh: p256dh.into(),
                auth: auth.into(),
            },
            content_encoding: default_content_encoding(),
        }
    }
}

/// Host push and permission APIs.
///
/// `request_permission` must only be called as the direct consequence of
/// a user gesture; platforms are free to deny silently otherwise.
#[async_trait]
pub trait PushPlatform: Send + Sync + std::fmt::Debug {
    /// Background worker and push messaging are both available.
    fn is_supported(&self) -> bool;

    /// Current permission. No side effects.
    fn permission(&self) -> Permission;

    /// Ask the user for permission and return the answer.
    async fn request_permission(&self) -> Permission;

    /// Register the background worker at `script_path`.
    async fn register_worker(&self, script_path: &str) -> Result<(), PlatformError>;

    /// The current push registration, if one exists.
    async fn existing_registration(&self) -> Result<Option<PushSubscriptionRecord>, PlatformError>;

    /// Create a push registration bound to `application_server_key`
    /// (the raw 65-byte VAPID public key).
    async fn subscribe(
        &self,
        application_server_key: &[u8],
    ) -> Result<PushSubscriptionRecord, PlatformError>;

    /// Drop the current push registration. Returns whether one existed.
    async fn unsubscribe(&self) -> Result<bool, PlatformError>;
}
