//! HTTP/1.1 listener.
//!
//! Binding and serving are separate steps so the caller decides when the
//! process starts listening, and learns the bound address (useful with
//! port 0) before the first connection arrives.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use meridian_middleware::stages::{ErrorBoundary, NonceInjector};
//! use meridian_middleware::{PipelineBuilder, RequestGuard};
//! use meridian_server::{Server, ShutdownSignal};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = PipelineBuilder::new(RequestGuard::Nonce(NonceInjector::new()))
//!         .build(ErrorBoundary::new())?;
//!
//!     let listening = Server::new().bind("127.0.0.1:1337").await?;
//!     listening
//!         .serve(Arc::new(pipeline), ShutdownSignal::with_os_signals())
//!         .await?;
//!     Ok(())
//! }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use meridian_middleware::{Pipeline, RequestContext, Response, ResponseExt};
use meridian_telemetry::fields;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Listener failures. Each one is fatal at startup.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The address could not be bound.
    #[error("bind error: failed to bind to {addr}: {source}")]
    Bind {
        /// The requested address.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Other I/O failure on the listening socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Listener settings.
#[derive(Debug, Clone, Copy)]
pub struct Server {
    body_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            body_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Server {
    /// Creates a listener with 30 second body and shutdown timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Time allowed to receive a request body.
    #[must_use]
    pub fn body_timeout(mut self, timeout: Duration) -> Self {
        self.body_timeout = timeout;
        self
    }

    /// Time allowed for open connections to finish after shutdown.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Binds `addr` (`host:port`).
    pub async fn bind(self, addr: &str) -> Result<Listening, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            addr = %local_addr,
            "✔ server listening on port {}",
            local_addr.port()
        );

        Ok(Listening {
            listener,
            local_addr,
            settings: self,
        })
    }
}

/// A bound listener that has not started accepting yet.
#[derive(Debug)]
pub struct Listening {
    listener: TcpListener,
    local_addr: SocketAddr,
    settings: Server,
}

impl Listening {
    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections and dispatches every request through `pipeline`
    /// until `shutdown` fires, then waits for open connections to finish.
    pub async fn serve(
        self,
        pipeline: Arc<Pipeline>,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServerError> {
        let tracker = ConnectionTracker::new();
        let body_timeout = self.settings.body_timeout;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        let guard = tracker.open();
                        let pipeline = Arc::clone(&pipeline);
                        let shutdown = shutdown.clone();

                        tokio::spawn(async move {
                            if let Err(error) =
                                serve_connection(stream, pipeline, body_timeout, shutdown).await
                            {
                                tracing::debug!(
                                    remote_addr = %remote_addr,
                                    { fields::ERROR } = %error,
                                    "connection error"
                                );
                            }
                            drop(guard);
                        });
                    }
                    Err(error) => {
                        tracing::error!({ fields::ERROR } = %error, "failed to accept connection");
                    }
                },
                reason = shutdown.recv() => {
                    tracing::info!(reason = %reason, "listener stopping");
                    break;
                }
            }
        }
        drop(self.listener);

        let grace = self.settings.shutdown_timeout;
        tracing::info!(
            open_connections = tracker.open_connections(),
            timeout_secs = grace.as_secs(),
            "waiting for connections to close"
        );
        if tokio::time::timeout(grace, tracker.drained()).await.is_err() {
            tracing::warn!(
                open_connections = tracker.open_connections(),
                "shutdown timeout reached with connections still open"
            );
        }

        tracing::info!("server stopped");
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    pipeline: Arc<Pipeline>,
    body_timeout: Duration,
    shutdown: ShutdownSignal,
) -> Result<(), hyper::Error> {
    let service = service_fn(move |request: http::Request<Incoming>| {
        let pipeline = Arc::clone(&pipeline);
        async move { Ok::<_, Infallible>(handle_request(&pipeline, request, body_timeout).await) }
    });

    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.recv() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    }
}

async fn handle_request(
    pipeline: &Pipeline,
    request: http::Request<Incoming>,
    body_timeout: Duration,
) -> Response {
    let ctx = RequestContext::new();
    let span = tracing::info_span!(
        "http_request",
        { fields::REQUEST_ID } = %ctx.request_id(),
        { fields::HTTP_METHOD } = %request.method(),
        { fields::HTTP_PATH } = %request.uri().path(),
        { fields::HTTP_STATUS } = tracing::field::Empty,
    );

    async move {
        let request_id = ctx.request_id().to_string();
        let (parts, body) = request.into_parts();

        let response = match tokio::time::timeout(body_timeout, body.collect()).await {
            Ok(Ok(collected)) => {
                let request = http::Request::from_parts(parts, Full::new(collected.to_bytes()));
                pipeline.dispatch_with_context(ctx, request).await
            }
            Ok(Err(error)) => {
                tracing::warn!({ fields::ERROR } = %error, "failed to read request body");
                Response::json_error(
                    StatusCode::BAD_REQUEST,
                    "BODY_READ_ERROR",
                    "Failed to read request body",
                    Some(&request_id),
                )
            }
            Err(_) => {
                tracing::warn!("request body timed out");
                Response::json_error(
                    StatusCode::REQUEST_TIMEOUT,
                    "REQUEST_TIMEOUT",
                    "Request body collection timed out",
                    Some(&request_id),
                )
            }
        };

        tracing::Span::current().record(fields::HTTP_STATUS, response.status().as_u16());
        response
    }
    .instrument(span)
    .await
}
