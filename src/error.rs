//! Error taxonomy for push subscription operations.
//!
//! Registrar-level operations return [`PushError`]. The reconciliation
//! engine is the boundary that logs these and converts them to booleans;
//! nothing above it sees a raw error.

use thiserror::Error;

/// Generic text shown when the server gave no message of its own.
pub const GENERIC_FAILURE_MESSAGE: &str = "Could not enable notifications. Please try again.";

/// Failure reported by the host push/permission platform.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("platform error: {0}")]
pub struct PlatformError(pub String);

impl PlatformError {
    /// Wrap any displayable error.
    pub fn new(msg: impl std::fmt::Display) -> Self {
        Self(msg.to_string())
    }
}

/// Errors surfaced by [`crate::registrar::SubscriptionRegistrar`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// Host has no background worker or push capability. Terminal.
    #[error("push notifications are not supported in this environment")]
    Unsupported,

    /// User (or platform) refused notification permission.
    #[error("notification permission denied")]
    PermissionDenied,

    /// VAPID public key unavailable or malformed. Retry by fetching again.
    #[error("VAPID public key unavailable: {0}")]
    MissingKey(String),

    /// No bearer token in any credential store.
    #[error("no authentication token available")]
    AuthTokenMissing,

    /// Structured token whose `exp` claim is in the past.
    #[error("authentication token expired")]
    AuthTokenExpired,

    /// Backend answered with a non-2xx status.
    #[error("server rejected request (HTTP {status}){}", message_suffix(.message))]
    ServerRejected {
        /// HTTP status code.
        status: u16,
        /// `message` field from the response body, if any.
        message: Option<String>,
    },

    /// Transport-level failure. No automatic retry at this layer.
    #[error("network failure: {0}")]
    Network(String),

    /// Local platform registration call failed.
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

fn message_suffix(message: &Option<String>) -> String {
    message.as_deref().map(|m| format!(": {m}")).unwrap_or_default()
}

impl PushError {
    /// Whether re-invoking the operation may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MissingKey(_) | Self::Network(_))
    }

    /// Whether upstream should re-authenticate before trying again.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::AuthTokenMissing
                | Self::AuthTokenExpired
                | Self::ServerRejected { status: 401, .. }
        )
    }

    /// Text suitable for showing to the user after a failed enable.
    ///
    /// Uses the server-provided message when there is one.
    pub fn user_message(&self) -> String {
        match self {
            Self::ServerRejected {
                message: Some(msg), ..
            } if !msg.trim().is_empty() => msg.clone(),
            Self::PermissionDenied => {
                "Notifications are blocked. Allow them in your settings to enable.".to_string()
            }
            Self::Unsupported => "Notifications are not supported on this device.".to_string(),
            Self::AuthTokenMissing | Self::AuthTokenExpired => {
                "Your session has expired. Please sign in again.".to_string()
            }
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

impl From<reqwest::Error> for PushError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}
