//! Static file serving.
//!
//! [`StaticFiles`] serves a directory tree with:
//!
//! - validators (`ETag`, `Last-Modified`) and `304 Not Modified`
//! - single byte ranges (`206`, `416`)
//! - a configurable `Cache-Control` value
//! - protection against traversal out of the root
//!
//! Request paths are percent-decoded segment by segment before lookup.
//! Hidden files (any decoded segment starting with `.`) are reported as not
//! found unless explicitly enabled.
//!
//! ```rust
//! use meridian_server::StaticFiles;
//!
//! let bundle = StaticFiles::new("./build/client")
//!     .cache_control("public, max-age=31536000");
//! assert_eq!(bundle.root().to_str(), Some("./build/client"));
//! ```

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::header::{
    HeaderValue, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, ETAG,
    IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED, RANGE,
};
use http::{HeaderMap, Method, StatusCode};
use http_body_util::Full;
use meridian_middleware::Response;
use percent_encoding::percent_decode_str;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Errors raised while serving a static file.
#[derive(Debug, Error)]
pub enum StaticFileError {
    /// No file at this path.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The path tries to leave the root.
    #[error("forbidden path: {0}")]
    Forbidden(String),

    /// Only `GET` and `HEAD` are served.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// The file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StaticFileError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` when another handler may still serve the request.
    #[must_use]
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::MethodNotAllowed)
    }
}

/// A directory served over HTTP.
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    index_file: Option<String>,
    cache_control: Option<HeaderValue>,
    etag: bool,
    last_modified: bool,
    serve_hidden: bool,
    mime_overrides: HashMap<String, String>,
}

impl StaticFiles {
    /// Serves files beneath `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_file: None,
            cache_control: None,
            etag: true,
            last_modified: true,
            serve_hidden: false,
            mime_overrides: HashMap::new(),
        }
    }

    /// Serves this file for directory requests.
    #[must_use]
    pub fn index(mut self, file_name: impl Into<String>) -> Self {
        self.index_file = Some(file_name.into());
        self
    }

    /// Sets the `Cache-Control` value sent with every file.
    ///
    /// Values that are not valid header text are ignored.
    #[must_use]
    pub fn cache_control(mut self, value: impl AsRef<str>) -> Self {
        self.cache_control = HeaderValue::from_str(value.as_ref()).ok();
        self
    }

    /// Enables or disables `ETag` validation.
    #[must_use]
    pub fn etag(mut self, enabled: bool) -> Self {
        self.etag = enabled;
        self
    }

    /// Enables or disables `Last-Modified` validation.
    #[must_use]
    pub fn last_modified(mut self, enabled: bool) -> Self {
        self.last_modified = enabled;
        self
    }

    /// Serves dotfiles.
    #[must_use]
    pub fn serve_hidden(mut self, enabled: bool) -> Self {
        self.serve_hidden = enabled;
        self
    }

    /// Overrides the content type for an extension.
    #[must_use]
    pub fn mime_type(mut self, extension: &str, content_type: impl Into<String>) -> Self {
        self.mime_overrides
            .insert(extension.to_ascii_lowercase(), content_type.into());
        self
    }

    /// The served directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serves `request_path`, relative to the root.
    ///
    /// # Errors
    ///
    /// Returns [`StaticFileError::NotFound`] for missing files, directories
    /// without an index and hidden files; [`StaticFileError::Forbidden`] for
    /// traversal attempts; [`StaticFileError::MethodNotAllowed`] for methods
    /// other than `GET` and `HEAD`.
    pub async fn serve(
        &self,
        request_path: &str,
        method: &Method,
        headers: &HeaderMap,
    ) -> Result<Response, StaticFileError> {
        if method != Method::GET && method != Method::HEAD {
            return Err(StaticFileError::MethodNotAllowed);
        }

        let mut path = self.resolve(request_path).await?;
        let mut metadata = tokio::fs::metadata(&path).await?;

        if metadata.is_dir() {
            let index = self
                .index_file
                .as_deref()
                .ok_or_else(|| StaticFileError::NotFound(request_path.to_string()))?;
            path = path.join(index);
            metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|_| StaticFileError::NotFound(request_path.to_string()))?;
        }

        if !metadata.is_file() {
            return Err(StaticFileError::NotFound(request_path.to_string()));
        }

        let size = metadata.len();
        let modified = metadata.modified().ok();
        let etag = self
            .etag
            .then(|| modified.map(|m| weak_etag(size, m)))
            .flatten();
        let last_modified = self
            .last_modified
            .then(|| modified.map(httpdate::fmt_http_date))
            .flatten();

        let mut validators = HeaderMap::new();
        if let Some(value) = etag.as_deref().and_then(|e| HeaderValue::from_str(e).ok()) {
            validators.insert(ETAG, value);
        }
        if let Some(value) = last_modified
            .as_deref()
            .and_then(|d| HeaderValue::from_str(d).ok())
        {
            validators.insert(LAST_MODIFIED, value);
        }
        if let Some(value) = &self.cache_control {
            validators.insert(CACHE_CONTROL, value.clone());
        }

        if is_fresh(headers, etag.as_deref(), modified) {
            return Ok(with_headers(StatusCode::NOT_MODIFIED, Bytes::new(), validators));
        }

        let mut response_headers = validators;
        response_headers.insert(CONTENT_TYPE, self.content_type(&path));
        response_headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

        let range = headers
            .get(RANGE)
            .and_then(|v| v.to_str().ok())
            .map(|v| parse_range(v, size));

        let (status, body, length) = match range {
            Some(Err(())) => {
                response_headers.remove(CONTENT_TYPE);
                if let Ok(value) = HeaderValue::try_from(format!("bytes */{size}")) {
                    response_headers.insert(CONTENT_RANGE, value);
                }
                return Ok(with_headers(
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    Bytes::new(),
                    response_headers,
                ));
            }
            Some(Ok((start, end))) => {
                if let Ok(value) = HeaderValue::try_from(format!("bytes {start}-{end}/{size}")) {
                    response_headers.insert(CONTENT_RANGE, value);
                }
                let length = end - start + 1;
                let body = if method == Method::HEAD {
                    Bytes::new()
                } else {
                    read_range(&path, start, length).await?
                };
                (StatusCode::PARTIAL_CONTENT, body, length)
            }
            None => {
                let body = if method == Method::HEAD {
                    Bytes::new()
                } else {
                    Bytes::from(tokio::fs::read(&path).await?)
                };
                (StatusCode::OK, body, size)
            }
        };

        response_headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        Ok(with_headers(status, body, response_headers))
    }

    async fn resolve(&self, request_path: &str) -> Result<PathBuf, StaticFileError> {
        let forbidden = || StaticFileError::Forbidden(request_path.to_string());
        let not_found = || StaticFileError::NotFound(request_path.to_string());

        let mut relative = PathBuf::new();
        for raw in request_path.split('/') {
            let segment = percent_decode_str(raw)
                .decode_utf8()
                .map_err(|_| not_found())?;
            match segment.as_ref() {
                "" | "." => {}
                ".." => return Err(forbidden()),
                s if s.contains(['/', '\\', '\0']) => return Err(forbidden()),
                s if !self.serve_hidden && s.starts_with('.') => return Err(not_found()),
                s => relative.push(s),
            }
        }

        let root = tokio::fs::canonicalize(&self.root)
            .await
            .map_err(|_| not_found())?;
        let candidate = tokio::fs::canonicalize(root.join(relative))
            .await
            .map_err(|_| not_found())?;

        if !candidate.starts_with(&root) {
            return Err(forbidden());
        }

        Ok(candidate)
    }

    fn content_type(&self, path: &Path) -> HeaderValue {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if let Some(value) = self
            .mime_overrides
            .get(&extension)
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            return value;
        }

        HeaderValue::from_static(mime_for_extension(&extension))
    }
}

/// Content type for a lowercase file extension.
#[must_use]
pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "webmanifest" | "manifest" => "application/manifest+json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

fn weak_etag(size: u64, modified: SystemTime) -> String {
    let millis = modified
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    format!("W/\"{size:x}-{millis:x}\"")
}

/// Whether the client's cached copy is still current.
///
/// `If-None-Match` takes precedence over `If-Modified-Since`.
fn is_fresh(headers: &HeaderMap, etag: Option<&str>, modified: Option<SystemTime>) -> bool {
    if let Some(candidates) = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok()) {
        let Some(etag) = etag else {
            return false;
        };
        let opaque = etag.trim_start_matches("W/");
        return candidates
            .split(',')
            .map(str::trim)
            .any(|c| c == "*" || c.trim_start_matches("W/") == opaque);
    }

    let since = headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| httpdate::parse_http_date(v).ok());

    match (since, modified) {
        (Some(since), Some(modified)) => {
            let secs = |t: SystemTime| t.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
            secs(modified) <= secs(since)
        }
        _ => false,
    }
}

/// Parses a single `bytes=` range against a file of `size` bytes.
///
/// Returns the inclusive `(start, end)` or `Err(())` if unsatisfiable.
fn parse_range(value: &str, size: u64) -> Result<(u64, u64), ()> {
    let spec = value.trim().strip_prefix("bytes=").ok_or(())?;
    if spec.contains(',') || size == 0 {
        return Err(());
    }
    let (start, end) = spec.split_once('-').ok_or(())?;
    let (start, end) = (start.trim(), end.trim());

    let (start, end) = if start.is_empty() {
        let suffix: u64 = end.parse().map_err(|_| ())?;
        if suffix == 0 {
            return Err(());
        }
        (size.saturating_sub(suffix), size - 1)
    } else {
        let start: u64 = start.parse().map_err(|_| ())?;
        let end = if end.is_empty() {
            size - 1
        } else {
            end.parse::<u64>().map_err(|_| ())?.min(size - 1)
        };
        (start, end)
    };

    if start > end || start >= size {
        return Err(());
    }
    Ok((start, end))
}

async fn read_range(path: &Path, start: u64, length: u64) -> Result<Bytes, StaticFileError> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;
    let mut buffer = Vec::new();
    file.take(length).read_to_end(&mut buffer).await?;
    Ok(Bytes::from(buffer))
}

fn with_headers(status: StatusCode, body: Bytes, headers: HeaderMap) -> Response {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tempfile::TempDir;

    fn fixture() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log('hi');").unwrap();
        std::fs::write(dir.path().join("style.css"), "body{}").unwrap();
        std::fs::write(dir.path().join(".env"), "SECRET=1").unwrap();
        std::fs::create_dir(dir.path().join("img")).unwrap();
        std::fs::write(dir.path().join("img/logo.svg"), "<svg/>").unwrap();
        dir
    }

    async fn body(response: Response) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    // ============== Serving Tests ==============

    #[tokio::test]
    async fn test_serves_javascript() {
        let dir = fixture();
        let files = StaticFiles::new(dir.path());
        let response = files
            .serve("/app.js", &Method::GET, &HeaderMap::new())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "text/javascript; charset=utf-8"
        );
        assert_eq!(response.headers().get(CONTENT_LENGTH).unwrap(), "18");
        assert!(response.headers().contains_key(ETAG));
        assert!(response.headers().contains_key(LAST_MODIFIED));
        assert_eq!(&body(response).await[..], b"console.log('hi');");
    }

    #[tokio::test]
    async fn test_serves_nested_file() {
        let dir = fixture();
        let response = StaticFiles::new(dir.path())
            .serve("/img/logo.svg", &Method::GET, &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "image/svg+xml");
    }

    #[tokio::test]
    async fn test_decodes_encoded_space() {
        let dir = fixture();
        std::fs::write(dir.path().join("my file.png"), "png").unwrap();

        let response = StaticFiles::new(dir.path())
            .serve("/my%20file.png", &Method::GET, &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "image/png");
        assert_eq!(&body(response).await[..], b"png");
    }

    #[tokio::test]
    async fn test_decodes_encoded_utf8() {
        let dir = fixture();
        std::fs::create_dir(dir.path().join("menü")).unwrap();
        std::fs::write(dir.path().join("menü/café.png"), "png").unwrap();

        let response = StaticFiles::new(dir.path())
            .serve("/men%C3%BC/caf%C3%A9.png", &Method::GET, &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let err = StaticFiles::new(dir.path())
            .serve("/caf%FF.png", &Method::GET, &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(err.is_miss());
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let dir = fixture();
        let response = StaticFiles::new(dir.path())
            .serve("/style.css", &Method::HEAD, &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.headers().get(CONTENT_LENGTH).unwrap(), "6");
        assert!(body(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_cache_control() {
        let dir = fixture();
        let response = StaticFiles::new(dir.path())
            .cache_control("public, max-age=31536000")
            .serve("/style.css", &Method::GET, &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(CACHE_CONTROL).unwrap(),
            "public, max-age=31536000"
        );
    }

    #[tokio::test]
    async fn test_directory_requires_index() {
        let dir = fixture();
        let err = StaticFiles::new(dir.path())
            .serve("/", &Method::GET, &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(err.is_miss());

        let response = StaticFiles::new(dir.path())
            .index("index.html")
            .serve("/", &Method::GET, &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(&body(response).await[..], b"<h1>home</h1>");
    }

    // ============== Rejection Tests ==============

    #[tokio::test]
    async fn test_missing_file_is_miss() {
        let dir = fixture();
        let err = StaticFiles::new(dir.path())
            .serve("/nope.js", &Method::GET, &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StaticFileError::NotFound(_)));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_post_is_miss() {
        let dir = fixture();
        let err = StaticFiles::new(dir.path())
            .serve("/app.js", &Method::POST, &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StaticFileError::MethodNotAllowed));
        assert!(err.is_miss());
    }

    #[tokio::test]
    async fn test_traversal_forbidden() {
        let dir = fixture();
        let err = StaticFiles::new(dir.path().join("img"))
            .serve("/../app.js", &Method::GET, &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StaticFileError::Forbidden(_)));
        assert!(!err.is_miss());
    }

    #[tokio::test]
    async fn test_encoded_traversal_forbidden() {
        let dir = fixture();
        let files = StaticFiles::new(dir.path().join("img"));
        for path in ["/%2e%2e/app.js", "/%2E%2E%2Fapp.js", "/..%5Capp.js"] {
            let err = files
                .serve(path, &Method::GET, &HeaderMap::new())
                .await
                .unwrap_err();
            assert!(matches!(err, StaticFileError::Forbidden(_)), "{path}");
        }
    }

    #[tokio::test]
    async fn test_encoded_hidden_file_is_a_miss() {
        let dir = fixture();
        let err = StaticFiles::new(dir.path())
            .serve("/%2eenv", &Method::GET, &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(err.is_miss());
    }

    #[tokio::test]
    async fn test_hidden_files() {
        let dir = fixture();
        let err = StaticFiles::new(dir.path())
            .serve("/.env", &Method::GET, &HeaderMap::new())
            .await
            .unwrap_err();
        assert!(err.is_miss());

        let response = StaticFiles::new(dir.path())
            .serve_hidden(true)
            .serve("/.env", &Method::GET, &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // ============== Conditional and Range Tests ==============

    #[tokio::test]
    async fn test_if_none_match_304() {
        let dir = fixture();
        let files = StaticFiles::new(dir.path());
        let first = files
            .serve("/app.js", &Method::GET, &HeaderMap::new())
            .await
            .unwrap();
        let etag = first.headers().get(ETAG).unwrap().clone();

        let mut headers = HeaderMap::new();
        headers.insert(IF_NONE_MATCH, etag);
        let second = files.serve("/app.js", &Method::GET, &headers).await.unwrap();
        assert_eq!(second.status(), StatusCode::NOT_MODIFIED);
        assert!(body(second).await.is_empty());
    }

    #[tokio::test]
    async fn test_if_modified_since_304() {
        let dir = fixture();
        let mut headers = HeaderMap::new();
        let future = SystemTime::now() + std::time::Duration::from_secs(3600);
        headers.insert(
            IF_MODIFIED_SINCE,
            HeaderValue::from_str(&httpdate::fmt_http_date(future)).unwrap(),
        );
        let response = StaticFiles::new(dir.path())
            .serve("/app.js", &Method::GET, &headers)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_range_request() {
        let dir = fixture();
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static("bytes=0-6"));
        let response = StaticFiles::new(dir.path())
            .serve("/app.js", &Method::GET, &headers)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers().get(CONTENT_RANGE).unwrap(), "bytes 0-6/18");
        assert_eq!(&body(response).await[..], b"console");
    }

    #[tokio::test]
    async fn test_unsatisfiable_range() {
        let dir = fixture();
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static("bytes=100-"));
        let response = StaticFiles::new(dir.path())
            .serve("/app.js", &Method::GET, &headers)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers().get(CONTENT_RANGE).unwrap(), "bytes */18");
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=0-99", 1000), Ok((0, 99)));
        assert_eq!(parse_range("bytes=900-", 1000), Ok((900, 999)));
        assert_eq!(parse_range("bytes=-100", 1000), Ok((900, 999)));
        assert_eq!(parse_range("bytes=0-5000", 1000), Ok((0, 999)));
        assert_eq!(parse_range("bytes=5-1", 1000), Err(()));
        assert_eq!(parse_range("bytes=0-1,4-5", 1000), Err(()));
        assert_eq!(parse_range("items=0-1", 1000), Err(()));
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(mime_for_extension("html"), "text/html; charset=utf-8");
        assert_eq!(mime_for_extension("webmanifest"), "application/manifest+json");
        assert_eq!(mime_for_extension("bin"), "application/octet-stream");

        let files = StaticFiles::new(".").mime_type("JS", "application/javascript");
        assert_eq!(
            files.content_type(Path::new("sw.js")),
            "application/javascript"
        );
    }
}
