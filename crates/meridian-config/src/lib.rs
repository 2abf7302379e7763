//! Configuration for Meridian.
//!
//! This crate provides:
//! - [`ConfigStore`]: an immutable tree of settings addressed by dotted key
//!   paths (`serviceWorker.fileName`, `bundles.client.webPath`, ...)
//! - [`ConfigLoader`]: layered loading (defaults → file → env)
//! - [`AppSettings`]: every key the application needs, resolved and
//!   validated once at startup
//! - [`EnvironmentFlags`]: deployment and build mode classification
//!
//! # Example
//!
//! ```no_run
//! use meridian_config::{AppSettings, ConfigLoader, EnvironmentFlags};
//!
//! # fn main() -> Result<(), meridian_config::ConfigError> {
//! let store = ConfigLoader::new()
//!     .with_defaults()
//!     .with_optional_file("meridian.toml")?
//!     .with_env_prefix("MERIDIAN")
//!     .load()?;
//!
//! let settings = AppSettings::resolve(&store)?;
//! let flags = EnvironmentFlags::from_process_env(settings.service_worker.enabled);
//! println!("{} on port {}", flags.deployment_mode, settings.server.port);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 1337
//! publicAssetsPath = "./public"
//! browserCacheMaxAge = 31536000
//!
//! [bundles.client]
//! outputPath = "./build/client"
//! webPath = "/client/"
//! assetsFileName = "assets.json"
//!
//! [serviceWorker]
//! enabled = true
//! fileName = "sw.js"
//! offlinePageFileName = "offline.html"
//!
//! [dataStore]
//! connectTimeoutMs = 10000
//! awaitConnection = true
//!
//! [graphql]
//! explorer = true
//!
//! [server]
//! requestTimeoutMs = 30000
//! shutdownTimeoutSecs = 30
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! # Environment Variable Overrides
//!
//! Any key can be overridden with `PREFIX__SECTION__KEY`, segments in
//! SCREAMING_SNAKE_CASE:
//!
//! - `MERIDIAN__PORT=8080`
//! - `MERIDIAN__SERVICE_WORKER__ENABLED=false`
//! - `MERIDIAN__BUNDLES__CLIENT__WEB_PATH=/assets/`

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod environment;
mod error;
mod loader;
mod settings;
mod store;

pub use environment::{DeploymentMode, EnvironmentFlags, BUILD_FLAG_ENV_VAR, DEPLOYMENT_ENV_VAR};
pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use settings::{
    AppSettings, ClientBundleSettings, DataStoreSettings, LoggingSettings, QuerySettings,
    ServerSettings, ServiceWorkerSettings,
};
pub use store::ConfigStore;
