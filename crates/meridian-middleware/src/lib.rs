//! # Meridian Middleware
//!
//! The ordered request stage pipeline for Meridian.
//!
//! Every request is evaluated against an immutable list of routed stages.
//! The first stage whose route matches is entered; it either responds,
//! forwards to the next matching stage, or fails. Failures skip the rest of
//! the list and reach the error boundary, which always produces a response.
//!
//! ## Stage Order
//!
//! ```text
//! Request → Guard → Compression → SW → Offline → Bundle → Public → Query → Render
//!                                                                            ↓
//!                                            Response ← ErrorBoundary ←──────┘
//! ```
//!
//! The guard is either the nonce injector (development) or the security
//! header set (production), never both.
//!
//! ## Example
//!
//! ```
//! use meridian_middleware::StageKind;
//!
//! let kinds = StageKind::all();
//! assert_eq!(kinds.len(), 10);
//! assert_eq!(kinds[0].name(), "nonce_injector");
//! assert_eq!(kinds[9].name(), "error_boundary");
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod error;
pub mod pipeline;
pub mod route;
pub mod stage;
pub mod stages;
pub mod types;

pub use context::{RequestContext, RequestHead};
pub use error::StageError;
pub use pipeline::{Pipeline, PipelineBuilder, PipelineEntry, PipelineError, RequestGuard};
pub use route::Route;
pub use stage::{BoxFuture, Next, Stage, StageKind, StageResult};
pub use types::{Request, Response, ResponseExt};
