//! Built-in HTML shell renderer.
//!
//! Renders a document that boots the client bundle: the stylesheet and
//! script of the `index` entry from the bundler's asset manifest, every
//! inline and external script tagged with the request nonce, and the
//! service-worker registration when worker routes are installed.
//!
//! The manifest is read on every render so a rebuilt bundle is picked up
//! without a restart. Its shape is:
//!
//! ```json
//! { "index": { "js": "/client/index-3f9a.js", "css": "/client/index-3f9a.css" } }
//! ```

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use meridian_config::AppSettings;
use meridian_server::stages::{RenderError, RenderOutcome, RenderRequest, Renderer};
use serde::Deserialize;

/// Manifest entry that boots the application.
pub const ENTRY_CHUNK: &str = "index";

#[derive(Debug, Default, Deserialize)]
struct ManifestEntry {
    js: Option<String>,
    css: Option<String>,
}

/// Renders the client bootstrap document.
#[derive(Debug, Clone)]
pub struct ShellRenderer {
    manifest_path: PathBuf,
    title: String,
    service_worker_path: Option<String>,
}

impl ShellRenderer {
    /// Creates a renderer reading the manifest at `manifest_path`.
    #[must_use]
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            title: "Meridian".to_string(),
            service_worker_path: None,
        }
    }

    /// Creates a renderer for the configured bundle.
    ///
    /// `register_service_worker` should match whether the worker routes are
    /// installed.
    #[must_use]
    pub fn from_settings(settings: &AppSettings, register_service_worker: bool) -> Self {
        let bundle = &settings.client_bundle;
        let renderer = Self::new(bundle.output_path.join(&bundle.assets_file_name));
        if register_service_worker {
            renderer.service_worker(settings.service_worker.script_path())
        } else {
            renderer
        }
    }

    /// Sets the document title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Registers the worker script at `path` once the page loads.
    #[must_use]
    pub fn service_worker(mut self, path: impl Into<String>) -> Self {
        self.service_worker_path = Some(path.into());
        self
    }

    async fn entry(&self) -> Result<ManifestEntry, RenderError> {
        let content = tokio::fs::read_to_string(&self.manifest_path)
            .await
            .map_err(|e| {
                RenderError::Assets(format!("{}: {e}", self.manifest_path.display()))
            })?;
        let mut manifest: HashMap<String, ManifestEntry> = serde_json::from_str(&content)
            .map_err(|e| {
                RenderError::Assets(format!("{}: {e}", self.manifest_path.display()))
            })?;
        Ok(manifest.remove(ENTRY_CHUNK).unwrap_or_default())
    }

    fn document(&self, entry: &ManifestEntry, nonce: Option<&str>) -> String {
        let nonce_attr = nonce
            .map(|n| format!(" nonce=\"{}\"", escape(n)))
            .unwrap_or_default();

        let mut head = String::new();
        if let Some(css) = &entry.css {
            let _ = write!(head, "\n    <link rel=\"stylesheet\" href=\"{}\" />", escape(css));
        }

        let mut scripts = String::new();
        if let Some(js) = &entry.js {
            let _ = write!(
                scripts,
                "\n    <script{nonce_attr} src=\"{}\" defer></script>",
                escape(js)
            );
        }
        if let Some(worker) = &self.service_worker_path {
            let worker = serde_json::to_string(worker)
                .unwrap_or_default()
                .replace("</", "<\\/");
            let _ = write!(
                scripts,
                "\n    <script{nonce_attr}>\
                 if ('serviceWorker' in navigator) {{ \
                 window.addEventListener('load', function () {{ \
                 navigator.serviceWorker.register({worker}); }}); }}\
                 </script>"
            );
        }

        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n  <head>\n    <meta charset=\"utf-8\" />\n    \
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />\n    \
             <title>{title}</title>{head}\n  </head>\n  <body>\n    \
             <div id=\"app\"></div>{scripts}\n  </body>\n</html>\n",
            title = escape(&self.title),
        )
    }
}

#[async_trait]
impl Renderer for ShellRenderer {
    async fn render(&self, request: RenderRequest) -> Result<RenderOutcome, RenderError> {
        let entry = self.entry().await?;
        if entry.js.is_none() {
            tracing::warn!(
                manifest = %self.manifest_path.display(),
                path = %request.path,
                "asset manifest has no {ENTRY_CHUNK} script"
            );
        }
        Ok(RenderOutcome::ok(
            self.document(&entry, request.nonce.as_deref()),
        ))
    }
}

fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}
