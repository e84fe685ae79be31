//! Error types for authentication configuration.

use svchost_core::HostError;
use thiserror::Error;

/// Result type alias for auth configuration.
pub type Result<T> = std::result::Result<T, AuthConfigError>;

/// Why an auth section of the host configuration was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthConfigError {
    // ═══════════════════════════════════════════════════════════
    // Configuration Errors
    // ═══════════════════════════════════════════════════════════
    /// The section is absent.
    #[error("Missing auth configuration: {section}")]
    Missing {
        /// Dotted path of the section
        section: &'static str,
    },

    /// The section does not have the expected shape.
    #[error("Invalid auth configuration in {section}: {reason}")]
    Invalid {
        /// Dotted path of the section
        section: &'static str,
        /// Deserializer message
        reason: String,
    },

    /// A credential entry is unusable.
    #[error("Invalid credential for {username}: {reason}")]
    Credential {
        /// User the entry belongs to
        username: String,
        /// What is wrong with it
        reason: String,
    },
}

impl From<AuthConfigError> for HostError {
    fn from(err: AuthConfigError) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = AuthConfigError::Missing {
            section: "auth.basic",
        };
        assert_eq!(err.to_string(), "Missing auth configuration: auth.basic");

        let host: HostError = err.into();
        assert!(matches!(host, HostError::Validation(_)));
    }
}
