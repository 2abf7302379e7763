//! Common types used throughout the pipeline.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::Full;

/// The HTTP request type used in the pipeline.
///
/// The body has already been collected by the listener.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the pipeline.
pub type Response = http::Response<Full<Bytes>>;

/// Extension trait for building common responses.
pub trait ResponseExt {
    /// A `text/plain` response.
    fn text(status: StatusCode, body: impl Into<String>) -> Response;

    /// A `text/html` response.
    fn html(status: StatusCode, body: impl Into<String>) -> Response;

    /// An `application/json` response, optionally pretty-printed.
    fn json(status: StatusCode, body: &serde_json::Value, pretty: bool) -> Response;

    /// The standard JSON error envelope.
    fn json_error(
        status: StatusCode,
        code: &str,
        message: &str,
        request_id: Option<&str>,
    ) -> Response;
}

fn with_body(status: StatusCode, content_type: &'static str, body: Bytes) -> Response {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

impl ResponseExt for Response {
    fn text(status: StatusCode, body: impl Into<String>) -> Response {
        with_body(status, "text/plain; charset=utf-8", Bytes::from(body.into()))
    }

    fn html(status: StatusCode, body: impl Into<String>) -> Response {
        with_body(status, "text/html; charset=utf-8", Bytes::from(body.into()))
    }

    fn json(status: StatusCode, body: &serde_json::Value, pretty: bool) -> Response {
        let rendered = if pretty {
            serde_json::to_string_pretty(body)
        } else {
            serde_json::to_string(body)
        }
        .unwrap_or_else(|_| body.to_string());

        with_body(status, "application/json", Bytes::from(rendered))
    }

    fn json_error(
        status: StatusCode,
        code: &str,
        message: &str,
        request_id: Option<&str>,
    ) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message,
                "request_id": request_id,
            }
        });

        Self::json(status, &body, false)
    }
}
