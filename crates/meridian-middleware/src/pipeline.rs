//! Ordered stage pipeline.
//!
//! A [`Pipeline`] is an immutable list of `(Route, Stage)` entries evaluated
//! first-match-wins, followed by an [`ErrorBoundary`] that turns any failure
//! into a response. The first entry is always the environment-selected
//! [`RequestGuard`]; it is supplied when the builder is created and cannot be
//! added any other way, so a pipeline never has both or neither.
//!
//! ```ignore
//! let pipeline = PipelineBuilder::new(RequestGuard::Nonce(NonceInjector::new()))
//!     .stage(Route::All, CompressionStage::default())
//!     .stage(Route::mount("/client/"), bundle)
//!     .stage(Route::GetFallback, render)
//!     .request_timeout(Duration::from_secs(30))
//!     .build(ErrorBoundary::default())?;
//!
//! let response = pipeline.dispatch(request).await;
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use meridian_telemetry::fields;
use thiserror::Error;

use crate::context::{RequestContext, RequestHead};
use crate::error::StageError;
use crate::route::Route;
use crate::stage::{Next, Stage, StageKind};
use crate::stages::{ErrorBoundary, NonceInjector, SecurityHeaders};
use crate::types::{Request, Response};

/// One routed stage.
#[derive(Debug, Clone)]
pub struct PipelineEntry {
    /// Which requests reach the stage.
    pub route: Route,
    /// The stage itself.
    pub stage: Arc<dyn Stage>,
}

/// The environment-selected first stage.
#[derive(Debug, Clone)]
pub enum RequestGuard {
    /// Development: issue a script nonce per request.
    Nonce(NonceInjector),
    /// Production: apply the security header set.
    SecurityHeaders(SecurityHeaders),
}

impl RequestGuard {
    /// The kind of stage this guard installs.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Nonce(_) => StageKind::NonceInjector,
            Self::SecurityHeaders(_) => StageKind::SecurityHeaders,
        }
    }

    fn into_stage(self) -> Arc<dyn Stage> {
        match self {
            Self::Nonce(stage) => Arc::new(stage),
            Self::SecurityHeaders(stage) => Arc::new(stage),
        }
    }
}

/// Errors raised while assembling a pipeline.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// A stage was added after one that must follow it.
    #[error("stage {next} cannot follow {previous}")]
    OutOfOrder {
        /// Name of the stage already installed.
        previous: &'static str,
        /// Name of the stage being added.
        next: &'static str,
    },

    /// A request guard or the error boundary was added as an ordinary stage.
    #[error("stage {0} cannot be added as an ordinary stage")]
    Reserved(&'static str),
}

/// Builder for [`Pipeline`].
#[derive(Debug)]
pub struct PipelineBuilder {
    guard_kind: StageKind,
    entries: Vec<PipelineEntry>,
    pending: Vec<(Route, Arc<dyn Stage>)>,
    request_timeout: Option<Duration>,
}

impl PipelineBuilder {
    /// Starts a pipeline with its request guard.
    #[must_use]
    pub fn new(guard: RequestGuard) -> Self {
        let guard_kind = guard.kind();
        Self {
            guard_kind,
            entries: vec![PipelineEntry {
                route: Route::All,
                stage: guard.into_stage(),
            }],
            pending: Vec::new(),
            request_timeout: None,
        }
    }

    /// Appends a stage behind everything added so far.
    #[must_use]
    pub fn stage<S: Stage>(mut self, route: Route, stage: S) -> Self {
        self.pending.push((route, Arc::new(stage)));
        self
    }

    /// Bounds the time a request may spend inside the stages.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Finishes the pipeline with its error boundary.
    ///
    /// # Errors
    ///
    /// Returns an error if stages were added out of precedence order or a
    /// reserved stage kind was added through [`stage`](Self::stage).
    pub fn build(self, boundary: ErrorBoundary) -> Result<Pipeline, PipelineError> {
        let mut previous = self.guard_kind;
        let mut entries = self.entries;

        for (route, stage) in self.pending {
            let kind = stage.kind();
            if kind.is_request_guard() || kind == StageKind::ErrorBoundary {
                return Err(PipelineError::Reserved(kind.name()));
            }
            if kind <= previous {
                return Err(PipelineError::OutOfOrder {
                    previous: previous.name(),
                    next: kind.name(),
                });
            }
            previous = kind;
            entries.push(PipelineEntry { route, stage });
        }

        Ok(Pipeline {
            entries,
            boundary,
            request_timeout: self.request_timeout,
        })
    }
}

/// The assembled, immutable pipeline.
#[derive(Debug)]
pub struct Pipeline {
    entries: Vec<PipelineEntry>,
    boundary: ErrorBoundary,
    request_timeout: Option<Duration>,
}

impl Pipeline {
    /// Dispatches a request with a fresh context.
    pub async fn dispatch(&self, request: Request) -> Response {
        self.dispatch_with_context(RequestContext::new(), request).await
    }

    /// Dispatches a request with a caller-supplied context.
    ///
    /// Always produces a response: stage failures, panics and timeouts are
    /// handed to the error boundary.
    pub async fn dispatch_with_context(
        &self,
        mut ctx: RequestContext,
        request: Request,
    ) -> Response {
        let head = RequestHead::of(&request);

        let result = {
            let chain = Next::new(&self.entries).run(&mut ctx, request);
            let chain = AssertUnwindSafe(chain).catch_unwind();
            let outcome = match self.request_timeout {
                Some(limit) => tokio::time::timeout(limit, chain)
                    .await
                    .unwrap_or(Ok(Err(StageError::Timeout))),
                None => chain.await,
            };
            outcome.unwrap_or_else(|panic| {
                Err(StageError::Panicked(panic_message(panic.as_ref())))
            })
        };

        let mut response = match result {
            Ok(response) => response,
            Err(error) => {
                ctx.record_stage(StageKind::ErrorBoundary);
                self.boundary.handle(&error, &ctx, &head)
            }
        };

        let headers = response.headers_mut();
        for (name, value) in ctx.response_headers() {
            headers.entry(name).or_insert_with(|| value.clone());
        }

        tracing::debug!(
            { fields::REQUEST_ID } = %ctx.request_id(),
            { fields::HTTP_METHOD } = %head.method,
            { fields::HTTP_PATH } = %head.path,
            { fields::HTTP_STATUS } = response.status().as_u16(),
            { fields::DURATION_MS } =
                u64::try_from(ctx.elapsed().as_millis()).unwrap_or(u64::MAX),
            "request dispatched"
        );

        response
    }

    /// Names of all stages in evaluation order, ending with the boundary.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.kinds().into_iter().map(StageKind::name).collect()
    }

    /// Kinds of all stages in evaluation order, ending with the boundary.
    #[must_use]
    pub fn kinds(&self) -> Vec<StageKind> {
        self.entries
            .iter()
            .map(|entry| entry.stage.kind())
            .chain(std::iter::once(StageKind::ErrorBoundary))
            .collect()
    }

    /// The routed entries, excluding the boundary.
    #[must_use]
    pub fn entries(&self) -> &[PipelineEntry] {
        &self.entries
    }

    /// Returns `true` if a stage of this kind is installed.
    #[must_use]
    pub fn contains(&self, kind: StageKind) -> bool {
        self.kinds().contains(&kind)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
