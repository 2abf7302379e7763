//! Configuration error types.

use std::fmt::Display;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while layering or resolving configuration.
///
/// Every variant is startup-fatal.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly named configuration file is absent.
    #[error("configuration file {} does not exist", path.display())]
    MissingFile {
        /// The requested path.
        path: PathBuf,
    },

    /// A configuration file exists but could not be read.
    #[error("cannot read configuration file {}", path.display())]
    UnreadableFile {
        /// The file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A layer is not valid TOML or JSON.
    #[error("{origin}: {message}")]
    Syntax {
        /// File path or `inline <format>`.
        origin: String,
        /// Parser message.
        message: String,
    },

    /// A layer is neither TOML nor JSON.
    #[error("{origin}: unsupported configuration format")]
    UnsupportedFormat {
        /// File path or the format name given.
        origin: String,
    },

    /// The `.env` file exists but is malformed.
    #[error("malformed .env file: {0}")]
    DotEnv(String),

    /// A `PREFIX__SECTION__KEY` variable could not be applied.
    #[error("environment override {var} rejected: {reason}")]
    Override {
        /// The variable name.
        var: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A key the application reads is absent.
    #[error("missing configuration key '{key}'")]
    MissingKey {
        /// Dotted key path.
        key: String,
    },

    /// A key holds a value of the wrong type or out of range.
    #[error("configuration key '{key}' is invalid: {reason}")]
    InvalidKey {
        /// Dotted key path.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// `bundles.client.webPath` is not a `/`-delimited URL prefix.
    #[error("bundles.client.webPath must start and end with '/', got '{0}'")]
    WebPath(String),

    /// A file name setting names a path instead of a single file.
    #[error("{key} must be a bare file name, got '{name}'")]
    FileName {
        /// Dotted key path.
        key: String,
        /// The rejected value.
        name: String,
    },
}

impl ConfigError {
    pub(crate) fn syntax(origin: impl Display, error: impl Display) -> Self {
        Self::Syntax {
            origin: origin.to_string(),
            message: error.to_string(),
        }
    }

    pub(crate) fn override_rejected(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Override {
            var: var.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingKey { key: key.into() }
    }

    pub(crate) fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if a required key is absent.
    #[must_use]
    pub fn is_missing_key(&self) -> bool {
        matches!(self, Self::MissingKey { .. })
    }

    /// The configuration key this error is about, if any.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::MissingKey { key } | Self::InvalidKey { key, .. } | Self::FileName { key, .. } => {
                Some(key)
            }
            Self::WebPath(_) => Some("bundles.client.webPath"),
            _ => None,
        }
    }
}
