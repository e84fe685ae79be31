//! Error envelopes.
//!
//! Bridges [`HostError`] into the JSON error shape clients receive, and into
//! Axum responses for code paths outside the dispatcher.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use svchost_core::{HostError, Reply};

/// Message clients see for anything that is not an explicit HTTP error.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal Service Error";

/// Client-facing description of a failed request.
///
/// [`HostError::Http`] keeps its status and message; every other error is
/// reported as a 500 with a generic message. Outside production the original
/// error is attached as `exception`.
///
/// # Examples
///
/// ```
/// use svchost_core::HostError;
/// use svchost_web::ErrorEnvelope;
///
/// let envelope = ErrorEnvelope::from_error(&HostError::http(404), "http://h/x", true);
/// assert_eq!(envelope.status().as_u16(), 404);
/// assert_eq!(envelope.to_json()["message"], "Not Found");
/// ```
#[derive(Debug, Clone)]
pub struct ErrorEnvelope {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Reference URL of the failed request
    reference: String,
    /// Internal detail, withheld in production
    exception: Option<Exception>,
}

#[derive(Debug, Clone, Serialize)]
struct Exception {
    #[serde(rename = "$type")]
    type_chain: Vec<&'static str>,
    kind: &'static str,
    message: String,
    source: Vec<String>,
}

impl ErrorEnvelope {
    /// Envelope with an explicit status and message.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            reference: reference.into(),
            exception: None,
        }
    }

    /// Classify `err`.
    #[must_use]
    pub fn from_error(err: &HostError, reference: impl Into<String>, production: bool) -> Self {
        let mut envelope = match err {
            HostError::Http { status, message } => Self::new(
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                message.clone(),
                reference,
            ),
            _ => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                INTERNAL_ERROR_MESSAGE,
                reference,
            ),
        };
        if !production {
            envelope.exception = Some(Exception::from(err));
        }
        envelope
    }

    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Client-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether internal detail is attached.
    #[must_use]
    pub const fn has_exception(&self) -> bool {
        self.exception.is_some()
    }

    /// `{$type:"error", $ref, $statusCode, code, message[, exception]}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let code = self.status.as_u16();
        let mut body = json!({
            "$type": "error",
            "$ref": self.reference,
            "$statusCode": code,
            "code": code,
            "message": self.message,
        });
        if let (Some(exception), Some(map)) = (&self.exception, body.as_object_mut()) {
            if let Ok(exception) = serde_json::to_value(exception) {
                map.insert("exception".to_string(), exception);
            }
        }
        body
    }

    /// Reply for the dispatcher chain.
    #[must_use]
    pub fn to_reply(&self) -> Reply {
        Reply::Json(self.status, self.to_json())
    }
}

impl From<&HostError> for Exception {
    fn from(err: &HostError) -> Self {
        let mut source: Vec<String> = err.to_string().lines().map(str::to_string).collect();
        let mut cause = std::error::Error::source(err);
        while let Some(inner) = cause {
            source.extend(inner.to_string().lines().map(|line| format!("caused by: {line}")));
            cause = inner.source();
        }
        Self {
            type_chain: vec![err.kind(), "HostError"],
            kind: err.kind(),
            message: err.to_string(),
            source,
        }
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status.as_u16(), self.message)
    }
}

impl IntoResponse for ErrorEnvelope {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                message = %self.message,
                reference = %self.reference,
                "Internal server error"
            );
        }
        (self.status, Json(self.to_json())).into_response()
    }
}
