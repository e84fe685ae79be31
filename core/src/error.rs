//! Error taxonomy shared by the registry, the dispatcher and the protocol layer.

use crate::service::Phase;
use http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for host operations.
pub type Result<T> = std::result::Result<T, HostError>;

/// Every failure the host can report.
///
/// Registry errors abort the startup sequence. Protocol errors are turned into
/// error envelopes at the dispatcher boundary and never crash the process.
///
/// The type is `Clone` because in-flight lifecycle transitions are shared
/// between concurrent callers, and every caller receives the same outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    // ═══════════════════════════════════════════════════════════
    // Registry Errors
    // ═══════════════════════════════════════════════════════════
    /// A selector or argument was malformed.
    #[error("Invalid argument: {0}")]
    Validation(String),

    /// No service matched the selector.
    #[error("Service not found: {0}")]
    NotFound(String),

    /// More than one service matched a selector that must be unique.
    #[error("Multiple services found for {0}")]
    Ambiguous(String),

    /// Dependencies named in a factory manifest never appeared.
    #[error("Some dependencies for {service} failed to start: {}", missing.join(", "))]
    DependencyTimeout {
        /// Service whose construction was waiting
        service: String,
        /// Dependency names still missing when the wait gave up
        missing: Vec<String>,
    },

    /// A lifecycle phase was requested before its predecessor completed.
    #[error("Service has not been {required}: {service} [{id}]")]
    LifecycleOrder {
        /// Name of the offending service
        service: String,
        /// Record id of the offending service
        id: Uuid,
        /// Phase that must be reached first
        required: Phase,
    },

    // ═══════════════════════════════════════════════════════════
    // Protocol Errors
    // ═══════════════════════════════════════════════════════════
    /// An explicit HTTP status, passed through to the client as-is.
    #[error("{message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Client-facing message
        message: String,
    },

    /// Anything else. Reported to clients as a generic 500.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl HostError {
    /// HTTP error with the canonical reason phrase as its message.
    ///
    /// # Examples
    ///
    /// ```
    /// # use svchost_core::HostError;
    /// let err = HostError::http(404);
    /// assert_eq!(err.to_string(), "Not Found");
    /// assert_eq!(err.status_code(), 404);
    /// ```
    #[must_use]
    pub fn http(status: u16) -> Self {
        let message = StatusCode::from_u16(status)
            .ok()
            .and_then(|code| code.canonical_reason())
            .unwrap_or("Unknown Error")
            .to_string();
        Self::Http { status, message }
    }

    /// HTTP error with a custom message.
    #[must_use]
    pub fn http_with_message(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Wrap any displayable failure as [`HostError::Unexpected`].
    #[must_use]
    pub fn unexpected(err: impl std::fmt::Display) -> Self {
        Self::Unexpected(err.to_string())
    }

    /// Status code clients see for this error.
    ///
    /// Only [`HostError::Http`] carries its own code; everything else is a 500.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Http { status, .. } => *status,
            _ => 500,
        }
    }

    /// Short error class name, used in exception details.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::NotFound(_) => "NotFoundError",
            Self::Ambiguous(_) => "AmbiguousError",
            Self::DependencyTimeout { .. } => "DependencyTimeoutError",
            Self::LifecycleOrder { .. } => "LifecycleOrderError",
            Self::Http { .. } => "HTTPError",
            Self::Unexpected(_) => "UnexpectedError",
        }
    }

    /// Returns `true` for programmer errors that must never be retried.
    ///
    /// # Examples
    ///
    /// ```
    /// # use svchost_core::{HostError, Phase};
    /// # use uuid::Uuid;
    /// let err = HostError::LifecycleOrder {
    ///     service: "Db".to_string(),
    ///     id: Uuid::nil(),
    ///     required: Phase::Configured,
    /// };
    /// assert!(err.is_fatal());
    /// assert!(!HostError::http(404).is_fatal());
    /// ```
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::LifecycleOrder { .. })
    }

    /// Returns `true` if the error carries an explicit HTTP status.
    #[must_use]
    pub const fn is_http(&self) -> bool {
        matches!(self, Self::Http { .. })
    }
}

impl From<serde_json::Error> for HostError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_uses_reason_phrase() {
        assert_eq!(HostError::http(405).to_string(), "Method Not Allowed");
        assert_eq!(HostError::http(401).status_code(), 401);
    }

    #[test]
    fn test_non_http_errors_map_to_500() {
        assert_eq!(HostError::NotFound("Db".into()).status_code(), 500);
        assert_eq!(HostError::unexpected("boom").status_code(), 500);
    }

    #[test]
    fn test_dependency_timeout_message_lists_missing() {
        let err = HostError::DependencyTimeout {
            service: "Api".into(),
            missing: vec!["Db".into(), "Cache".into()],
        };
        assert_eq!(
            err.to_string(),
            "Some dependencies for Api failed to start: Db, Cache"
        );
    }

    #[test]
    fn test_lifecycle_order_message() {
        let err = HostError::LifecycleOrder {
            service: "Db".into(),
            id: Uuid::nil(),
            required: Phase::Initialized,
        };
        assert_eq!(
            err.to_string(),
            "Service has not been initialized: Db [00000000-0000-0000-0000-000000000000]"
        );
        assert_eq!(err.kind(), "LifecycleOrderError");
    }
}
