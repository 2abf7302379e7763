//! Logging setup for Meridian.
//!
//! Every Meridian process logs through `tracing`. This crate installs the
//! global subscriber once at startup:
//!
//! - **Development**: pretty, multi-line output at `debug`
//! - **Production**: one JSON object per event at `info`
//!
//! `RUST_LOG`, when set, overrides the configured level.
//!
//! # Example
//!
//! ```rust,ignore
//! use meridian_telemetry::{init_logging, LogConfig, LogFormat};
//!
//! let config = LogConfig::production().with_format(LogFormat::Compact);
//! init_logging(&config).expect("logging");
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;

pub use error::TelemetryError;
pub use logging::{create_env_filter, fields, init_logging, LogConfig, LogFormat};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
