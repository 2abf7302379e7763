//! Terminal error boundary.
//!
//! Converts any [`StageError`] (including caught panics and timeouts) into
//! a response. Browsers get a short plain-text message; clients whose
//! `Accept` header prefers JSON get the standard envelope:
//!
//! ```json
//! {
//!   "error": {
//!     "code": "NOT_FOUND",
//!     "message": "Sorry, that resource was not found.",
//!     "request_id": "0190c1f2-…"
//!   }
//! }
//! ```

use http::header::{HeaderValue, ALLOW};
use meridian_telemetry::fields;

use crate::context::{RequestContext, RequestHead};
use crate::error::StageError;
use crate::types::{Response, ResponseExt};

/// Turns stage failures into responses.
#[derive(Debug, Clone, Default)]
pub struct ErrorBoundary {
    expose_internal_errors: bool,
}

impl ErrorBoundary {
    /// Creates a boundary that hides internal error details.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Includes internal error details in responses.
    ///
    /// Only enable this in development.
    #[must_use]
    pub fn expose_internal_errors(mut self, expose: bool) -> Self {
        self.expose_internal_errors = expose;
        self
    }

    /// The message sent to the client for `error`.
    #[must_use]
    pub fn public_message(&self, error: &StageError) -> String {
        match error {
            StageError::NotFound { .. } => "Sorry, that resource was not found.".to_string(),
            StageError::MethodNotAllowed { .. } => {
                "Sorry, that method is not supported.".to_string()
            }
            StageError::BadRequest(message) => message.clone(),
            StageError::Forbidden(_) => "Sorry, access to that resource is forbidden.".to_string(),
            StageError::Upstream { .. } => "Sorry, a required service is unavailable.".to_string(),
            StageError::Timeout => "Sorry, the request took too long.".to_string(),
            StageError::Internal(_) | StageError::Panicked(_) if self.expose_internal_errors => {
                format!("Sorry, an unexpected error occurred: {error}")
            }
            StageError::Internal(_) | StageError::Panicked(_) => {
                "Sorry, an unexpected error occurred.".to_string()
            }
        }
    }

    /// Produces the response for a failed request.
    #[must_use]
    pub fn handle(&self, error: &StageError, ctx: &RequestContext, head: &RequestHead) -> Response {
        let status = error.status_code();
        let request_id = ctx.request_id().to_string();

        if error.is_client_error() {
            tracing::debug!(
                { fields::REQUEST_ID } = %request_id,
                { fields::HTTP_METHOD } = %head.method,
                { fields::HTTP_PATH } = %head.path,
                { fields::HTTP_STATUS } = status.as_u16(),
                { fields::ERROR } = %error,
                "request rejected"
            );
        } else {
            tracing::error!(
                { fields::REQUEST_ID } = %request_id,
                { fields::HTTP_METHOD } = %head.method,
                { fields::HTTP_PATH } = %head.path,
                { fields::HTTP_STATUS } = status.as_u16(),
                { fields::ERROR } = %error,
                "request failed"
            );
        }

        let message = self.public_message(error);
        let mut response = if head.prefers_json() {
            Response::json_error(status, error.code(), &message, Some(&request_id))
        } else {
            Response::text(status, message)
        };

        if let StageError::MethodNotAllowed { allow, .. } = error {
            let allow = allow
                .iter()
                .map(http::Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::try_from(allow) {
                response.headers_mut().insert(ALLOW, value);
            }
        }

        response
    }
}
