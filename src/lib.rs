//! Botster Push - web push subscription lifecycle.
//!
//! Decides when to ask for notification permission, creates and destroys
//! the device's push registration, keeps it in sync with the server, and
//! drives a one-time "enable notifications" prompt.
//!
//! # Architecture
//!
//! Each layer only consumes the layer below it:
//!
//! - **PermissionGate** - support probe and permission requests
//! - **SubscriptionRegistrar** - owns the local registration, talks to `/push/*`
//! - **ReconciliationEngine** - derives one canonical subscription state
//! - **PromptController** - debounced prompt state machine
//!
//! Host APIs sit behind [`PushPlatform`]; the server behind [`PushBackend`].
//!
//! # Modules
//!
//! - [`gate`] - Permission gate
//! - [`registrar`] - Subscribe / unsubscribe / status
//! - [`reconcile`] - Canonical state and enable/disable orchestration
//! - [`prompt`] - Enable prompt
//! - [`config`] - Configuration loading/saving

pub mod backend;
pub mod config;
pub mod constants;
pub mod credentials;
pub mod env;
pub mod error;
pub mod gate;
pub mod platform;
pub mod prompt;
pub mod reconcile;
pub mod registrar;
pub mod token;
pub mod vapid;

// Re-export commonly used types
pub use backend::{HttpBackend, MemoryBackend, PushBackend, SubscriptionStatus};
pub use config::{Config, PermissionPolicy};
pub use credentials::{StaticToken, TokenLookup, TokenProvider};
pub use error::{PlatformError, PushError};
pub use gate::PermissionGate;
pub use platform::{LocalPlatform, MemoryPlatform, Permission, PushPlatform, PushSubscriptionRecord};
pub use prompt::{PromptController, PromptMachine, PromptMode, PromptVisibility};
pub use reconcile::{Divergence, EngineSnapshot, ReconciliationEngine, SubscriptionState};
pub use registrar::SubscriptionRegistrar;
pub use token::AuthToken;
pub use vapid::VapidKeyCache;
