//! Typed application settings.
//!
//! [`AppSettings::resolve`] reads every key the pipeline, listener and
//! data-store connector need from a [`ConfigStore`] in one pass. A missing
//! or malformed key surfaces here, at startup, rather than while a request
//! is being served.

use std::path::PathBuf;
use std::time::Duration;

use meridian_telemetry::LogFormat;

use crate::{ConfigError, ConfigStore};

/// Client bundle locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientBundleSettings {
    /// Directory the bundler writes client assets to.
    pub output_path: PathBuf,
    /// URL prefix the client bundle is mounted under (e.g. `/client/`).
    pub web_path: String,
    /// Asset manifest file inside `output_path`.
    pub assets_file_name: String,
}

/// Service worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceWorkerSettings {
    /// `serviceWorker.enabled`.
    pub enabled: bool,
    /// Worker script name, served at `/{file_name}`.
    pub file_name: String,
    /// Offline page name, served at `{web_path}{offline_page_file_name}`.
    pub offline_page_file_name: String,
}

impl ServiceWorkerSettings {
    /// Request path of the worker script.
    #[must_use]
    pub fn script_path(&self) -> String {
        format!("/{}", self.file_name)
    }
}

/// Data store connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataStoreSettings {
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,
    /// Whether the listener waits for the connection before binding.
    pub await_connection: bool,
}

/// Query endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySettings {
    /// Whether browsers get the interactive explorer page.
    pub explorer: bool,
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind; `0` picks an ephemeral port.
    pub port: u16,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// How long shutdown waits for in-flight connections.
    pub shutdown_timeout: Duration,
}

impl ServerSettings {
    /// `host:port` string for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Optional logging overrides; unset values fall back to the mode preset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingSettings {
    /// `logging.level`.
    pub level: Option<String>,
    /// `logging.format`.
    pub format: Option<LogFormat>,
}

/// Every configuration value the application reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Directory served at `/`.
    pub public_assets_path: PathBuf,
    /// `max-age` for client bundle responses.
    pub browser_cache_max_age: Duration,
    /// Client bundle settings.
    pub client_bundle: ClientBundleSettings,
    /// Service worker settings.
    pub service_worker: ServiceWorkerSettings,
    /// Data store settings.
    pub data_store: DataStoreSettings,
    /// Query endpoint settings.
    pub query: QuerySettings,
    /// Logging overrides.
    pub logging: LoggingSettings,
}

impl AppSettings {
    /// Resolves and validates all settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingKey`] for any absent key and
    /// [`ConfigError::InvalidKey`] for malformed ones.
    ///
    /// # Example
    ///
    /// ```
    /// use meridian_config::{AppSettings, ConfigLoader};
    ///
    /// let store = ConfigLoader::new().with_defaults().load().unwrap();
    /// let settings = AppSettings::resolve(&store).unwrap();
    /// assert_eq!(settings.service_worker.script_path(), "/sw.js");
    /// ```
    pub fn resolve(store: &ConfigStore) -> Result<Self, ConfigError> {
        let settings = Self {
            server: ServerSettings {
                host: store.get("host")?,
                port: store.get("port")?,
                request_timeout: Duration::from_millis(store.get("server.requestTimeoutMs")?),
                shutdown_timeout: Duration::from_secs(store.get("server.shutdownTimeoutSecs")?),
            },
            public_assets_path: store.get("publicAssetsPath")?,
            browser_cache_max_age: Duration::from_secs(store.get("browserCacheMaxAge")?),
            client_bundle: ClientBundleSettings {
                output_path: store.get("bundles.client.outputPath")?,
                web_path: store.get("bundles.client.webPath")?,
                assets_file_name: store.get("bundles.client.assetsFileName")?,
            },
            service_worker: ServiceWorkerSettings {
                enabled: store.get("serviceWorker.enabled")?,
                file_name: store.get("serviceWorker.fileName")?,
                offline_page_file_name: store.get("serviceWorker.offlinePageFileName")?,
            },
            data_store: DataStoreSettings {
                connect_timeout: Duration::from_millis(store.get("dataStore.connectTimeoutMs")?),
                await_connection: store.get("dataStore.awaitConnection")?,
            },
            query: QuerySettings {
                explorer: store.get("graphql.explorer")?,
            },
            logging: LoggingSettings {
                level: store.get_optional("logging.level")?,
                format: store.get_optional("logging.format")?,
            },
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::WebPath`], [`ConfigError::FileName`] or
    /// [`ConfigError::InvalidKey`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let web_path = &self.client_bundle.web_path;
        if !web_path.starts_with('/') || !web_path.ends_with('/') {
            return Err(ConfigError::WebPath(web_path.clone()));
        }

        for (field, name) in [
            ("serviceWorker.fileName", &self.service_worker.file_name),
            (
                "serviceWorker.offlinePageFileName",
                &self.service_worker.offline_page_file_name,
            ),
            ("bundles.client.assetsFileName", &self.client_bundle.assets_file_name),
        ] {
            validate_file_name(field, name)?;
        }

        if self.public_assets_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid_key("publicAssetsPath", "must not be empty"));
        }
        if self.client_bundle.output_path.as_os_str().is_empty() {
            return Err(ConfigError::invalid_key(
                "bundles.client.outputPath",
                "must not be empty",
            ));
        }
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::invalid_key("host", "must not be empty"));
        }
        if self.server.request_timeout.is_zero() {
            return Err(ConfigError::invalid_key(
                "server.requestTimeoutMs",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}

fn validate_file_name(field: &str, name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::invalid_key(field, "must not be empty"));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(ConfigError::FileName {
            key: field.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConfigLoader;
    use serde_json::json;

    fn defaults() -> ConfigStore {
        ConfigLoader::new().with_defaults().load().unwrap()
    }

    fn with(json: &str) -> Result<AppSettings, ConfigError> {
        let store = ConfigLoader::new()
            .with_defaults()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();
        AppSettings::resolve(&store)
    }

    #[test]
    fn test_resolve_defaults() {
        let settings = AppSettings::resolve(&defaults()).unwrap();
        assert_eq!(settings.server.port, 1337);
        assert_eq!(settings.server.bind_addr(), "0.0.0.0:1337");
        assert_eq!(settings.client_bundle.web_path, "/client/");
        assert_eq!(settings.client_bundle.output_path, PathBuf::from("./build/client"));
        assert_eq!(settings.public_assets_path, PathBuf::from("./public"));
        assert!(settings.service_worker.enabled);
        assert_eq!(settings.service_worker.file_name, "sw.js");
        assert_eq!(settings.service_worker.offline_page_file_name, "offline.html");
        assert!(settings.data_store.await_connection);
        assert!(settings.query.explorer);
        assert_eq!(settings.data_store.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.server.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.logging, LoggingSettings::default());
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let store = ConfigStore::from_value(json!({ "port": 1337 }));
        let err = AppSettings::resolve(&store).unwrap_err();
        assert!(err.is_missing_key());
    }

    #[test]
    fn test_missing_service_worker_file_name_is_reported_by_path() {
        let mut tree = defaults().as_value().clone();
        tree["serviceWorker"]
            .as_object_mut()
            .unwrap()
            .remove("fileName");

        let err = AppSettings::resolve(&ConfigStore::from_value(tree)).unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingKey { ref key } if key == "serviceWorker.fileName")
        );
    }

    #[test]
    fn test_logging_overrides() {
        let settings = with(r#"{"logging": {"level": "warn", "format": "compact"}}"#).unwrap();
        assert_eq!(settings.logging.level.as_deref(), Some("warn"));
        assert_eq!(settings.logging.format, Some(LogFormat::Compact));
    }

    #[test]
    fn test_unknown_log_format_is_invalid() {
        let err = with(r#"{"logging": {"format": "xml"}}"#).unwrap_err();
        assert_eq!(err.key(), Some("logging.format"));
    }

    #[test]
    fn test_web_path_must_be_slash_delimited() {
        let err = with(r#"{"bundles": {"client": {"webPath": "client/"}}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::WebPath(ref path) if path == "client/"));
        assert!(with(r#"{"bundles": {"client": {"webPath": "/client"}}}"#).is_err());
        assert!(with(r#"{"bundles": {"client": {"webPath": "/"}}}"#).is_ok());
    }

    #[test]
    fn test_file_names_must_be_bare() {
        let err = with(r#"{"serviceWorker": {"fileName": "js/sw.js"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::FileName { ref name, .. } if name == "js/sw.js"));
        assert!(with(r#"{"serviceWorker": {"offlinePageFileName": ""}}"#).is_err());
        assert!(with(r#"{"serviceWorker": {"fileName": ".."}}"#).is_err());
    }

    #[test]
    fn test_port_out_of_range() {
        let err = with(r#"{"port": 65536}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidKey { ref key, .. } if key == "port"));
    }

    #[test]
    fn test_zero_request_timeout_rejected() {
        assert!(with(r#"{"server": {"requestTimeoutMs": 0}}"#).is_err());
    }

    #[test]
    fn test_script_path() {
        let settings = with(r#"{"serviceWorker": {"fileName": "worker.js"}}"#).unwrap();
        assert_eq!(settings.service_worker.script_path(), "/worker.js");
    }
}
