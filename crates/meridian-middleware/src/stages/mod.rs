//! Built-in pipeline stages.
//!
//! | Kind | Stage | Purpose |
//! |------|-------|---------|
//! | 1 | [`NonceInjector`] | Per-request script nonce (development) |
//! | 2 | [`SecurityHeaders`] | CSP and hardening headers (production) |
//! | 3 | [`CompressionStage`] | `Accept-Encoding` negotiation |
//! | 10 | [`ErrorBoundary`] | Failure to response conversion |
//!
//! The file, query and render stages that fill kinds 4 to 9 live in
//! `meridian-server`.

pub mod compression;
pub mod error_boundary;
pub mod nonce;
pub mod security_headers;

pub use compression::{Algorithm, CompressionLevel, CompressionStage};
pub use error_boundary::ErrorBoundary;
pub use nonce::{generate_nonce, NonceInjector};
pub use security_headers::SecurityHeaders;
