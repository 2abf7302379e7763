//! Runtime environment classification.
//!
//! Two independent switches shape the request pipeline:
//!
//! - **Deployment mode**, read from `MERIDIAN_ENV`. Only `development`
//!   selects [`DeploymentMode::Development`]; anything else, including an
//!   absent variable, is production.
//! - **Build mode**, read from `BUILD_FLAG_IS_DEV`. The build counts as a
//!   production build only when the flag is exactly `false`.
//!
//! Classification never fails. Ambiguous input resolves to production
//! deployment and a dev build, which keeps service-worker routes off.

use std::fmt;

/// Environment variable selecting the deployment mode.
pub const DEPLOYMENT_ENV_VAR: &str = "MERIDIAN_ENV";

/// Environment variable carrying the build-mode flag.
pub const BUILD_FLAG_ENV_VAR: &str = "BUILD_FLAG_IS_DEV";

/// Deployment mode of the running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentMode {
    /// Local development.
    Development,
    /// Anything that is not development.
    Production,
}

impl DeploymentMode {
    /// Classifies a raw `MERIDIAN_ENV` value.
    ///
    /// ```
    /// use meridian_config::DeploymentMode;
    ///
    /// assert_eq!(DeploymentMode::from_value(Some("development")), DeploymentMode::Development);
    /// assert_eq!(DeploymentMode::from_value(Some("staging")), DeploymentMode::Production);
    /// assert_eq!(DeploymentMode::from_value(None), DeploymentMode::Production);
    /// ```
    #[must_use]
    pub fn from_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("development") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns the canonical name of this mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Environment flags computed once at process start.
///
/// # Example
///
/// ```
/// use meridian_config::{DeploymentMode, EnvironmentFlags};
///
/// let flags = EnvironmentFlags::classify(
///     |name| match name {
///         "MERIDIAN_ENV" => Some("production".to_string()),
///         "BUILD_FLAG_IS_DEV" => Some("false".to_string()),
///         _ => None,
///     },
///     true,
/// );
///
/// assert_eq!(flags.deployment_mode, DeploymentMode::Production);
/// assert!(!flags.is_dev_build);
/// assert!(flags.service_worker_routes_enabled());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvironmentFlags {
    /// Deployment mode.
    pub deployment_mode: DeploymentMode,
    /// Whether the client bundle was produced by a development build.
    pub is_dev_build: bool,
    /// Value of `serviceWorker.enabled`.
    pub service_worker_enabled: bool,
}

impl EnvironmentFlags {
    /// Classifies the environment from a variable lookup.
    pub fn classify<F>(lookup: F, service_worker_enabled: bool) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let deployment_mode = DeploymentMode::from_value(lookup(DEPLOYMENT_ENV_VAR).as_deref());
        let is_dev_build = !matches!(
            lookup(BUILD_FLAG_ENV_VAR).as_deref().map(str::trim),
            Some(v) if v.eq_ignore_ascii_case("false")
        );

        Self {
            deployment_mode,
            is_dev_build,
            service_worker_enabled,
        }
    }

    /// Classifies the environment from the process environment.
    pub fn from_process_env(service_worker_enabled: bool) -> Self {
        Self::classify(|name| std::env::var(name).ok(), service_worker_enabled)
    }

    /// Returns `true` in development deployment mode.
    #[must_use]
    pub const fn is_development(&self) -> bool {
        matches!(self.deployment_mode, DeploymentMode::Development)
    }

    /// Returns `true` in production deployment mode.
    #[must_use]
    pub const fn is_production(&self) -> bool {
        !self.is_development()
    }

    /// Whether the service-worker and offline-page routes are installed.
    #[must_use]
    pub const fn service_worker_routes_enabled(&self) -> bool {
        !self.is_dev_build && self.service_worker_enabled
    }
}
