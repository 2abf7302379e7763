//! # Meridian Server
//!
//! Listener, data-store connector and routed stages for Meridian.
//!
//! This crate provides:
//!
//! - [`Server`]: HTTP/1.1 listener with graceful shutdown and connection
//!   draining
//! - [`DataStoreConnector`]: a single fail-fast connection attempt whose
//!   outcome is observed through a [`DataStoreHandle`]
//! - [`StaticFiles`]: file serving with validators, ranges and traversal
//!   protection
//! - [`stages`]: service worker, static mounts, the query endpoint and
//!   the render catch-all
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use meridian_server::{DataStoreConnector, Server, ShutdownSignal};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let data_store = DataStoreConnector::new(Duration::from_secs(10))
//!         .connect("localhost:27017/app");
//!     data_store.terminal().await;
//!
//!     let listening = Server::new().bind("0.0.0.0:1337").await?;
//!     listening.serve(Arc::new(pipeline), ShutdownSignal::with_os_signals()).await?;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/meridian-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod datastore;
pub mod server;
pub mod shutdown;
pub mod stages;
pub mod static_files;

pub use datastore::{
    Connection, ConnectionState, ConnectionTarget, DataStoreConnector, DataStoreError, DataStoreHandle,
    TcpTransport, Transport,
};
pub use server::{Listening, Server, ServerError};
pub use shutdown::{ConnectionGuard, ConnectionTracker, ShutdownReason, ShutdownSignal};
pub use static_files::{StaticFileError, StaticFiles};
