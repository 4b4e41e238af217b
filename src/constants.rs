//! Application-wide constants for botster-push.
//!
//! Centralizes magic numbers, endpoint paths and storage keys so the
//! components agree on them.

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for push API calls.
///
/// The subsystem itself has no timeout logic; this is handed to the
/// reqwest client and overridable via config.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Settle delay before the enable prompt may become visible.
///
/// Long enough for the local and server probes to land on a cold start so
/// an already-subscribed user never sees the prompt flash.
pub const PROMPT_SETTLE_DELAY: Duration = Duration::from_millis(1500);

// ============================================================================
// Server API
// ============================================================================

/// VAPID public key endpoint (no auth).
pub const VAPID_KEY_PATH: &str = "/push/vapid-public-key";

/// Subscription registration endpoint.
pub const SUBSCRIBE_PATH: &str = "/push/subscribe";

/// Subscription removal endpoint.
pub const UNSUBSCRIBE_PATH: &str = "/push/unsubscribe";

/// Per-principal subscription status endpoint.
pub const STATUS_PATH: &str = "/push/status";

// ============================================================================
// Platform
// ============================================================================

/// Well-known path the background worker is registered at.
pub const WORKER_SCRIPT_PATH: &str = "/service-worker.js";

/// Content encoding advertised for new subscriptions (RFC 8291).
pub const DEFAULT_CONTENT_ENCODING: &str = "aes128gcm";

// ============================================================================
// Credentials
// ============================================================================

/// Primary persistent storage key for the bearer token.
pub const TOKEN_KEY_PRIMARY: &str = "auth_token";

/// Secondary persistent storage key, checked when the primary is empty.
pub const TOKEN_KEY_SECONDARY: &str = "access_token";

/// Session-scoped fallback key.
pub const TOKEN_KEY_SESSION: &str = "session_token";

/// Keyring service name.
pub const KEYRING_SERVICE: &str = "botster";
