//! Per-request context.
//!
//! A [`RequestContext`] is created for each request by the pipeline and
//! dropped with it. Stages use it to hand data forward (the script nonce)
//! and to queue headers that must appear on whatever response is finally
//! produced, including error responses.

use std::time::{Duration, Instant};

use http::header::{HeaderName, HeaderValue, ACCEPT};
use http::{HeaderMap, Method};
use uuid::Uuid;

use crate::stage::StageKind;
use crate::types::Request;

/// Context that flows through the stage pipeline.
///
/// # Example
///
/// ```
/// use meridian_middleware::RequestContext;
///
/// let mut ctx = RequestContext::new();
/// assert!(ctx.nonce().is_none());
///
/// ctx.set_nonce("3f2a".to_string());
/// assert_eq!(ctx.nonce(), Some("3f2a"));
/// ```
#[derive(Debug)]
pub struct RequestContext {
    request_id: Uuid,
    nonce: Option<String>,
    started_at: Instant,
    response_headers: HeaderMap,
    visited: Vec<StageKind>,
}

impl RequestContext {
    /// Creates a context with a fresh request ID (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            nonce: None,
            started_at: Instant::now(),
            response_headers: HeaderMap::new(),
            visited: Vec::new(),
        }
    }

    /// Returns the request ID.
    #[must_use]
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Returns the script nonce, if one was issued for this request.
    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// Sets the script nonce.
    pub fn set_nonce(&mut self, nonce: String) {
        self.nonce = Some(nonce);
    }

    /// Time since the request entered the pipeline.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Queues a header for the final response.
    ///
    /// Headers set by the producing stage take precedence.
    pub fn insert_response_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    /// Headers queued for the final response.
    #[must_use]
    pub fn response_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    /// Stages that have been entered so far, in order.
    #[must_use]
    pub fn visited(&self) -> &[StageKind] {
        &self.visited
    }

    pub(crate) fn record_stage(&mut self, kind: StageKind) {
        self.visited.push(kind);
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The parts of a request the error boundary needs after the request
/// itself has been consumed by the stages.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// Request method.
    pub method: Method,
    /// Request path.
    pub path: String,
    /// Raw `Accept` header.
    pub accept: Option<String>,
}

impl RequestHead {
    /// Captures the head of `request`.
    #[must_use]
    pub fn of(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            accept: request
                .headers()
                .get(ACCEPT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }

    /// Whether the client asked for JSON rather than a page.
    #[must_use]
    pub fn prefers_json(&self) -> bool {
        self.accept.as_deref().is_some_and(|accept| {
            let accept = accept.to_ascii_lowercase();
            accept.contains("json") && !accept.contains("text/html")
        })
    }
}
