//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for building a
//! [`ConfigStore`] from defaults, files, and environment variables.

use std::env;
use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};

use crate::{ConfigError, ConfigStore};

/// Configuration loader with layered approach.
///
/// Layers are deep-merged in the order they are added, later layers
/// overriding earlier ones key by key:
/// 1. Default values (built into the code)
/// 2. Configuration files (TOML or JSON)
/// 3. Environment variables (applied by [`load`](Self::load))
///
/// # Example
///
/// ```no_run
/// use meridian_config::ConfigLoader;
///
/// # fn main() -> Result<(), meridian_config::ConfigError> {
/// let store = ConfigLoader::new()
///     .with_defaults()
///     .with_optional_file("meridian.toml")?
///     .with_env_prefix("MERIDIAN")
///     .load()?;
///
/// let port: u16 = store.get("port")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    root: Value,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create an empty configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
            env_prefix: None,
        }
    }

    /// Merge the built-in default values.
    ///
    /// # Example
    ///
    /// ```
    /// use meridian_config::ConfigLoader;
    ///
    /// let store = ConfigLoader::new().with_defaults().load().unwrap();
    /// assert_eq!(store.get::<String>("serviceWorker.fileName").unwrap(), "sw.js");
    /// ```
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        deep_merge(&mut self.root, default_values());
        self
    }

    /// Merge a configuration file.
    ///
    /// The format is chosen by extension (`.toml` or `.json`).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file does not exist, cannot be read,
    /// or does not parse.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::MissingFile {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::UnreadableFile {
            path: path.to_path_buf(),
            source,
        })?;

        let layer = Self::parse_file(&content, path)?;
        deep_merge(&mut self.root, layer);

        Ok(self)
    }

    /// Merge a configuration file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be read or parsed.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Merge configuration from a string.
    ///
    /// # Arguments
    ///
    /// * `content` - Configuration content
    /// * `format` - `"toml"` or `"json"`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails or the format is unknown.
    ///
    /// # Example
    ///
    /// ```
    /// use meridian_config::ConfigLoader;
    ///
    /// let store = ConfigLoader::new()
    ///     .with_defaults()
    ///     .with_string("[serviceWorker]\nenabled = false", "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert!(!store.get::<bool>("serviceWorker.enabled").unwrap());
    /// assert_eq!(store.get::<String>("serviceWorker.fileName").unwrap(), "sw.js");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let origin = format!("inline {format}");
        let layer: Value = match format.to_lowercase().as_str() {
            "toml" => toml::from_str(content).map_err(|e| ConfigError::syntax(&origin, e))?,
            "json" => {
                serde_json::from_str(content).map_err(|e| ConfigError::syntax(&origin, e))?
            }
            _ => return Err(ConfigError::UnsupportedFormat { origin }),
        };

        deep_merge(&mut self.root, layer);
        Ok(self)
    }

    /// Set the environment variable prefix for overrides.
    ///
    /// Variables use the form `PREFIX__SECTION__KEY`; each segment is
    /// SCREAMING_SNAKE_CASE and maps to a camelCase key:
    /// - `MERIDIAN__PORT=8080` sets `port`
    /// - `MERIDIAN__SERVICE_WORKER__ENABLED=false` sets `serviceWorker.enabled`
    /// - `MERIDIAN__BUNDLES__CLIENT__WEB_PATH=/assets/` sets `bundles.client.webPath`
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file into the process environment, if one exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a `.env` file exists but is malformed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(ConfigError::DotEnv(e.to_string())),
        }
    }

    /// Finalize and return the configuration store.
    ///
    /// Applies environment variable overrides if a prefix was set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed.
    pub fn load(mut self) -> Result<ConfigStore, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_vars(env::vars(), &prefix)?;
        }

        Ok(ConfigStore::from_value(self.root))
    }

    // Parse configuration file based on extension
    fn parse_file(content: &str, path: &Path) -> Result<Value, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        let origin = path.display();
        match extension.as_deref() {
            Some("toml") => toml::from_str(content).map_err(|e| ConfigError::syntax(&origin, e)),
            Some("json") => {
                serde_json::from_str(content).map_err(|e| ConfigError::syntax(&origin, e))
            }
            _ => Err(ConfigError::UnsupportedFormat {
                origin: origin.to_string(),
            }),
        }
    }

    // Apply every `PREFIX__...` variable from `vars`
    fn apply_env_vars<I>(&mut self, vars: I, prefix: &str) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let marker = format!("{prefix}__");
        let mut matching: Vec<(String, String)> = vars
            .into_iter()
            .filter(|(k, _)| k.starts_with(&marker))
            .collect();
        matching.sort();

        for (key, value) in matching {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    // Apply a single environment variable
    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::override_rejected(key, "invalid key format"))?;

        let segments: Vec<String> = key_without_prefix
            .split("__")
            .map(screaming_snake_to_camel)
            .collect();

        if segments.iter().any(String::is_empty) {
            return Err(ConfigError::override_rejected(key, "empty key segment"));
        }

        let existing = lookup_path(&self.root, &segments);
        let parsed = coerce_like(existing, value)
            .ok_or_else(|| ConfigError::override_rejected(key, expected_kind(existing)))?;

        set_path(&mut self.root, &segments, parsed);
        Ok(())
    }
}

/// Built-in default values.
fn default_values() -> Value {
    json!({
        "host": "0.0.0.0",
        "port": 1337,
        "publicAssetsPath": "./public",
        "browserCacheMaxAge": 31_536_000,
        "bundles": {
            "client": {
                "outputPath": "./build/client",
                "webPath": "/client/",
                "assetsFileName": "assets.json"
            }
        },
        "serviceWorker": {
            "enabled": true,
            "fileName": "sw.js",
            "offlinePageFileName": "offline.html"
        },
        "dataStore": {
            "connectTimeoutMs": 10_000,
            "awaitConnection": true
        },
        "graphql": {
            "explorer": true
        },
        "server": {
            "requestTimeoutMs": 30_000,
            "shutdownTimeoutSecs": 30
        }
    })
}

/// Recursively merges `overlay` into `base`; non-object values replace.
fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn lookup_path<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = root;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn set_path(root: &mut Value, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = root;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        current = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(last.clone(), value);
    }
}

/// Parses `raw` into the same kind of value as `existing`.
///
/// Unknown keys are inferred: boolean, then integer, then float, then string.
fn coerce_like(existing: Option<&Value>, raw: &str) -> Option<Value> {
    match existing {
        Some(Value::Bool(_)) => parse_bool(raw).map(Value::Bool),
        Some(Value::Number(n)) if n.is_f64() => raw.trim().parse::<f64>().ok().map(Value::from),
        Some(Value::Number(_)) => raw.trim().parse::<i64>().ok().map(Value::from),
        Some(Value::String(_)) => Some(Value::String(raw.to_string())),
        _ => Some(infer_scalar(raw)),
    }
}

fn expected_kind(existing: Option<&Value>) -> &'static str {
    match existing {
        Some(Value::Bool(_)) => "expected boolean",
        Some(Value::Number(n)) if n.is_f64() => "expected float",
        Some(Value::Number(_)) => "expected integer",
        _ => "unparseable value",
    }
}

fn infer_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(raw.to_string())
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// `SERVICE_WORKER` → `serviceWorker`, `PORT` → `port`.
fn screaming_snake_to_camel(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for (i, word) in segment.split('_').filter(|w| !w.is_empty()).enumerate() {
        let lower = word.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}
