//! # Meridian
//!
//! Boot and request-dispatch layer for a server-rendered web application.
//!
//! - [`assembler`]: builds the ordered stage pipeline for the environment
//! - [`bootstrap`]: configuration, logging, the fail-fast data-store
//!   connection and the listener lifecycle
//! - [`schema`]: the built-in status query executor
//! - [`render`]: the built-in HTML shell renderer
//!
//! ## Example
//!
//! ```rust,no_run
//! use meridian::bootstrap::{run, BootOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     if let Err(error) = run(BootOptions::default()).await {
//!         eprintln!("{error}");
//!         std::process::exit(error.exit_code());
//!     }
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/meridian/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod assembler;
pub mod bootstrap;
pub mod render;
pub mod schema;

pub use assembler::{assemble, Collaborators};
pub use bootstrap::{Application, BootError, BootOptions, Running};
pub use render::ShellRenderer;
pub use schema::{StatusSchema, VERSION};
