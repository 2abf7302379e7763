//! Stage failure taxonomy.
//!
//! Any stage may fail with a [`StageError`]. Failures skip every remaining
//! stage and are turned into a response by the
//! [`ErrorBoundary`](crate::stages::ErrorBoundary).

use http::{Method, StatusCode};
use thiserror::Error;

/// A request-scoped failure raised by a stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// No stage claimed the request.
    #[error("resource not found: {path}")]
    NotFound {
        /// Request path.
        path: String,
    },

    /// The path exists but does not support the method.
    #[error("method {method} not allowed")]
    MethodNotAllowed {
        /// Request method.
        method: Method,
        /// Methods the resource supports.
        allow: Vec<Method>,
    },

    /// The request is malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Access to the resource is refused.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// A collaborator the stage depends on is not available.
    #[error("{collaborator} unavailable: {message}")]
    Upstream {
        /// Name of the collaborator (e.g. `"data store"`).
        collaborator: &'static str,
        /// Detail.
        message: String,
    },

    /// The request exceeded its time budget.
    #[error("request timed out")]
    Timeout,

    /// Any other failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// A stage panicked while handling the request.
    #[error("stage panicked: {0}")]
    Panicked(String),
}

impl StageError {
    /// Create a not-found error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a bad-request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create an upstream-unavailable error.
    pub fn upstream(collaborator: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            collaborator,
            message: message.into(),
        }
    }

    /// Create an internal error from anything displayable.
    pub fn internal(error: impl std::fmt::Display) -> Self {
        Self::Internal(error.to_string())
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Upstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Internal(_) | Self::Panicked(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::MethodNotAllowed { .. } => "METHOD_NOT_ALLOWED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Upstream { .. } => "SERVICE_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::Internal(_) | Self::Panicked(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns `true` for failures caused by the request itself.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}
