//! Core stage trait and types.
//!
//! This module defines the [`Stage`] trait every pipeline entry implements.
//! A stage receives the request and a [`Next`] handle and does exactly one
//! of three things:
//!
//! - produces a response (`Ok(response)`) without calling `next`
//! - forwards by calling `next.run(ctx, request)` and returning its result,
//!   optionally transforming it on the way back
//! - fails (`Err(StageError)`), which skips every remaining stage
//!
//! # Example
//!
//! ```ignore
//! use meridian_middleware::{BoxFuture, Next, RequestContext, Request, Stage, StageKind, StageResult};
//!
//! struct Timing;
//!
//! impl Stage for Timing {
//!     fn kind(&self) -> StageKind {
//!         StageKind::Compression
//!     }
//!
//!     fn handle<'a>(
//!         &'a self,
//!         ctx: &'a mut RequestContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, StageResult> {
//!         Box::pin(async move {
//!             let response = next.run(ctx, request).await;
//!             tracing::debug!(elapsed = ?ctx.elapsed(), "downstream finished");
//!             response
//!         })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

use meridian_telemetry::fields;

use crate::context::RequestContext;
use crate::error::StageError;
use crate::pipeline::PipelineEntry;
use crate::types::{Request, Response};

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a stage.
pub type StageResult = Result<Response, StageError>;

/// A unit in the ordered request-handling chain.
pub trait Stage: Send + Sync + 'static {
    /// The position this stage occupies in the pipeline.
    fn kind(&self) -> StageKind;

    /// Returns the stage name used in logs.
    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Handles the request.
    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, StageResult>;
}

impl std::fmt::Debug for dyn Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle to the rest of the pipeline.
///
/// Consuming `run` guarantees the remainder is invoked at most once.
pub struct Next<'a> {
    remaining: &'a [PipelineEntry],
}

impl<'a> Next<'a> {
    pub(crate) fn new(remaining: &'a [PipelineEntry]) -> Self {
        Self { remaining }
    }

    /// Invokes the first remaining stage whose route matches.
    ///
    /// If no remaining stage matches, the request fails with
    /// [`StageError::NotFound`].
    pub async fn run(self, ctx: &mut RequestContext, request: Request) -> StageResult {
        let mut rest = self.remaining;
        while let Some((entry, tail)) = rest.split_first() {
            if entry.route.matches(request.method(), request.uri().path()) {
                ctx.record_stage(entry.stage.kind());
                tracing::trace!({ fields::STAGE } = entry.stage.name(), "entering stage");
                return entry.stage.handle(ctx, request, Next::new(tail)).await;
            }
            rest = tail;
        }

        Err(StageError::not_found(request.uri().path()))
    }
}

/// The fixed positions a stage can occupy, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum StageKind {
    /// Issues a per-request script nonce (development).
    NonceInjector = 1,
    /// Applies the security header set (production).
    SecurityHeaders = 2,
    /// Compresses response bodies.
    Compression = 3,
    /// Serves the service-worker script.
    ServiceWorker = 4,
    /// Serves the offline fallback page.
    OfflinePage = 5,
    /// Serves the client bundle.
    StaticBundle = 6,
    /// Serves public assets from the site root.
    StaticPublic = 7,
    /// Query endpoint.
    QueryEndpoint = 8,
    /// Catch-all page renderer.
    RenderEndpoint = 9,
    /// Converts failures into responses.
    ErrorBoundary = 10,
}

impl StageKind {
    /// Returns the stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::NonceInjector => "nonce_injector",
            Self::SecurityHeaders => "security_headers",
            Self::Compression => "compression",
            Self::ServiceWorker => "service_worker",
            Self::OfflinePage => "offline_page",
            Self::StaticBundle => "static_bundle",
            Self::StaticPublic => "static_public",
            Self::QueryEndpoint => "query_endpoint",
            Self::RenderEndpoint => "render_endpoint",
            Self::ErrorBoundary => "error_boundary",
        }
    }

    /// Returns `true` for the two environment-selected first stages.
    #[must_use]
    pub const fn is_request_guard(self) -> bool {
        matches!(self, Self::NonceInjector | Self::SecurityHeaders)
    }

    /// Returns all kinds in order.
    #[must_use]
    pub const fn all() -> [StageKind; 10] {
        [
            Self::NonceInjector,
            Self::SecurityHeaders,
            Self::Compression,
            Self::ServiceWorker,
            Self::OfflinePage,
            Self::StaticBundle,
            Self::StaticPublic,
            Self::QueryEndpoint,
            Self::RenderEndpoint,
            Self::ErrorBoundary,
        ]
    }
}
