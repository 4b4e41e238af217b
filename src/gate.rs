//! Permission gate: support probe and notification permission.

use std::sync::Arc;

use crate::platform::{Permission, PushPlatform};

/// Thin view over the platform's permission and capability APIs.
#[derive(Debug, Clone)]
pub struct PermissionGate {
    platform: Arc<dyn PushPlatform>,
}

impl PermissionGate {
    /// Gate over `platform`.
    pub fn new(platform: Arc<dyn PushPlatform>) -> Self {
        Self { platform }
    }

    /// Host exposes both a background worker and push messaging.
    pub fn check_support(&self) -> bool {
        self.platform.is_supported()
    }

    /// Current permission, without prompting.
    pub fn check_permission(&self) -> Permission {
        self.platform.permission()
    }

    /// Prompt the user. Call only in response to a user gesture.
    ///
    /// Resolves to `Granted` or `Denied`; a prompt closed without an answer
    /// counts as `Denied` for this request (the stored permission stays
    /// `Default`, so a later gesture may ask again).
    pub async fn request_permission(&self) -> Permission {
        match self.platform.request_permission().await {
            Permission::Granted => Permission::Granted,
            other => {
                log::info!("[WebPush] Notification permission not granted ({other})");
                Permission::Denied
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryPlatform;

    #[tokio::test]
    async fn test_request_permission_normalizes_default() {
        let platform = Arc::new(MemoryPlatform::new());
        platform.set_permission_answer(Permission::Default);
        let gate = PermissionGate::new(Arc::clone(&platform) as Arc<dyn PushPlatform>);

        assert_eq!(gate.request_permission().await, Permission::Denied);
        assert_eq!(gate.check_permission(), Permission::Default);
        assert_eq!(platform.permission_requests(), 1);
    }

    #[tokio::test]
    async fn test_request_permission_granted() {
        let platform = Arc::new(MemoryPlatform::new());
        let gate = PermissionGate::new(Arc::clone(&platform) as Arc<dyn PushPlatform>);

        assert!(gate.check_support());
        assert_eq!(gate.check_permission(), Permission::Default);
        assert_eq!(gate.request_permission().await, Permission::Granted);
        assert_eq!(gate.check_permission(), Permission::Granted);
    }

    #[test]
    fn test_unsupported_probe() {
        let gate = PermissionGate::new(Arc::new(MemoryPlatform::unsupported()));
        assert!(!gate.check_support());
    }
}
