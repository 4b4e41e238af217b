//! Bearer token inspection.
//!
//! Tokens are opaque to this crate except for one check: when a token is a
//! three-segment structured token (`header.claims.signature`), the claims
//! segment is decoded and its `exp` claim compared against the clock. The
//! signature is never verified here; that is the server's job.

use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use serde::Deserialize;

/// Claims we care about. Everything else in the payload is ignored.
#[derive(Debug, Deserialize)]
struct ExpiryClaims {
    #[serde(default)]
    exp: Option<i64>,
}

/// Read-only view over a bearer token string.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret
        write!(f, "AuthToken({} chars)", self.0.len())
    }
}

impl AuthToken {
    /// Wrap a raw token string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw token, for the `Authorization` header.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `exp` claim (epoch seconds) if this is a structured token carrying one.
    ///
    /// Returns `None` for opaque tokens and for structured tokens whose
    /// payload cannot be decoded.
    pub fn expires_at(&self) -> Option<i64> {
        let mut segments = self.0.split('.');
        let (Some(_), Some(payload), Some(_), None) =
            (segments.next(), segments.next(), segments.next(), segments.next())
        else {
            return None;
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .or_else(|_| URL_SAFE.decode(payload))
            .ok()?;
        let claims: ExpiryClaims = serde_json::from_slice(&bytes).ok()?;
        claims.exp
    }

    /// Whether the token's `exp` is at or before `now` (epoch seconds).
    ///
    /// Opaque tokens never expire from our point of view.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at().is_some_and(|exp| exp <= now)
    }

    /// [`Self::is_expired_at`] against the system clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }
}
