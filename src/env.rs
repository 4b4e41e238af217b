//! Runtime environment detection.
//!
//! Single source of truth for whether we are running under test, based on
//! the `BOTSTER_ENV` environment variable. Test environments keep the OS
//! keyring out of the picture and store credentials in a plain file.
//!
//! Set `BOTSTER_ENV` to one of:
//! - `test` - Test mode (file-backed credentials, no keyring prompts)
//! - `system_test` - System test mode (same storage rules as `test`)
//! - `development` or `dev` - Development mode
//! - (anything else or unset) - Production mode

/// Runtime environment for the push client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment.
    Test,
    /// System test environment, driven by an external test harness.
    SystemTest,
}

impl Environment {
    /// Detect current environment from `BOTSTER_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("BOTSTER_ENV").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("system_test") => Self::SystemTest,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` if running in any test mode (test or system_test).
    #[must_use]
    pub fn is_any_test(self) -> bool {
        matches!(self, Self::Test | Self::SystemTest)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
            Self::SystemTest => write!(f, "system_test"),
        }
    }
}

/// Returns `true` if the OS keyring should be bypassed.
///
/// Always true under `cfg(test)` so unit tests never trigger keychain
/// prompts.
#[must_use]
pub fn should_skip_keyring() -> bool {
    #[cfg(test)]
    {
        true
    }

    #[cfg(not(test))]
    {
        Environment::current().is_any_test()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_environment() {
        assert_eq!(Environment::parse(Some("test")), Environment::Test);
        assert_eq!(Environment::parse(Some("system_test")), Environment::SystemTest);
        assert_eq!(Environment::parse(Some("dev")), Environment::Development);
        assert_eq!(Environment::parse(Some("development")), Environment::Development);
        assert_eq!(Environment::parse(Some("staging")), Environment::Production);
        assert_eq!(Environment::parse(None), Environment::Production);
    }

    #[test]
    fn test_is_any_test() {
        assert!(Environment::Test.is_any_test());
        assert!(Environment::SystemTest.is_any_test());
        assert!(!Environment::Production.is_any_test());
        assert_eq!(Environment::SystemTest.to_string(), "system_test");
    }

    #[test]
    fn test_keyring_skipped_under_unit_tests() {
        assert!(should_skip_keyring());
    }
}
