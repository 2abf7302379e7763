//! The page-render catch-all.

use std::sync::Arc;

use async_trait::async_trait;
use http::header::{HeaderValue, CACHE_CONTROL, LOCATION};
use http::StatusCode;
use meridian_middleware::{
    BoxFuture, Next, Request, RequestContext, Response, ResponseExt, Stage, StageError,
    StageKind, StageResult,
};
use thiserror::Error;

use crate::datastore::DataStoreHandle;

/// What the renderer is asked to draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Request path.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Script nonce issued for this request.
    pub nonce: Option<String>,
}

/// The result of rendering a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// A document with the status the router chose (200, 404, ...).
    Page {
        /// Response status.
        status: StatusCode,
        /// Full HTML document.
        html: String,
    },
    /// The router redirected.
    Redirect(String),
}

impl RenderOutcome {
    /// A 200 page.
    #[must_use]
    pub fn ok(html: impl Into<String>) -> Self {
        Self::Page {
            status: StatusCode::OK,
            html: html.into(),
        }
    }
}

/// Rendering failures.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A template or manifest the renderer needs is unreadable.
    #[error("render assets unavailable: {0}")]
    Assets(String),

    /// The renderer failed.
    #[error("render failed: {0}")]
    Failed(String),
}

/// Produces server-rendered pages.
#[async_trait]
pub trait Renderer: Send + Sync + 'static {
    /// Renders the page for `request`.
    async fn render(&self, request: RenderRequest) -> Result<RenderOutcome, RenderError>;
}

/// Hands every remaining `GET` to the [`Renderer`].
pub struct RenderEndpoint {
    renderer: Arc<dyn Renderer>,
    data_store: Option<DataStoreHandle>,
}

impl std::fmt::Debug for RenderEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEndpoint")
            .field("data_store", &self.data_store.as_ref().map(|h| h.state()))
            .finish_non_exhaustive()
    }
}

impl RenderEndpoint {
    /// Creates the endpoint.
    #[must_use]
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            renderer,
            data_store: None,
        }
    }

    /// Refuse renders with a 503 until the data store is connected.
    #[must_use]
    pub fn data_store(mut self, handle: DataStoreHandle) -> Self {
        self.data_store = Some(handle);
        self
    }
}

impl Stage for RenderEndpoint {
    fn kind(&self) -> StageKind {
        StageKind::RenderEndpoint
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        _next: Next<'a>,
    ) -> BoxFuture<'a, StageResult> {
        Box::pin(async move {
            if let Some(handle) = &self.data_store {
                handle.ensure_ready()?;
            }

            let render = RenderRequest {
                path: request.uri().path().to_string(),
                query: request.uri().query().map(str::to_string),
                nonce: ctx.nonce().map(str::to_string),
            };

            match self.renderer.render(render).await {
                Ok(RenderOutcome::Page { status, html }) => {
                    let mut response = Response::html(status, html);
                    response
                        .headers_mut()
                        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
                    Ok(response)
                }
                Ok(RenderOutcome::Redirect(location)) => {
                    let location = HeaderValue::try_from(location)
                        .map_err(|e| StageError::internal(format!("bad redirect target: {e}")))?;
                    let mut response = Response::text(StatusCode::FOUND, "");
                    response.headers_mut().insert(LOCATION, location);
                    Ok(response)
                }
                Err(error) => Err(StageError::internal(error)),
            }
        })
    }
}
