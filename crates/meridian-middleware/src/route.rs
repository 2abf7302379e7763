//! Route predicates for pipeline entries.

use http::Method;

/// Which requests a pipeline entry sees.
///
/// Entries whose route does not match are skipped without being entered.
///
/// # Example
///
/// ```
/// use http::Method;
/// use meridian_middleware::Route;
///
/// let bundle = Route::mount("/client/");
/// assert!(bundle.matches(&Method::GET, "/client/main.js"));
/// assert!(!bundle.matches(&Method::GET, "/clientele"));
///
/// let worker = Route::get("/sw.js");
/// assert!(worker.matches(&Method::HEAD, "/sw.js"));
/// assert!(!worker.matches(&Method::POST, "/sw.js"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Every request.
    All,
    /// `GET` or `HEAD` on exactly this path.
    Get(String),
    /// Any method, on the prefix or beneath it at a segment boundary.
    Mount(String),
    /// `GET` or `HEAD` on any path.
    GetFallback,
}

impl Route {
    /// Exact `GET`/`HEAD` route.
    pub fn get(path: impl Into<String>) -> Self {
        Self::Get(path.into())
    }

    /// Prefix mount for any method.
    pub fn mount(prefix: impl Into<String>) -> Self {
        Self::Mount(prefix.into())
    }

    /// Returns `true` if a request with this method and path is routed here.
    #[must_use]
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        match self {
            Self::All => true,
            Self::Get(exact) => is_read(method) && path == exact,
            Self::Mount(prefix) => mount_remainder(prefix, path).is_some(),
            Self::GetFallback => is_read(method),
        }
    }
}

/// Strips a mount prefix from `path`.
///
/// Returns the remainder (always starting with `/`) when `path` is the
/// prefix itself or lies beneath it at a segment boundary.
///
/// ```
/// use meridian_middleware::route::mount_remainder;
///
/// assert_eq!(mount_remainder("/client/", "/client/js/app.js"), Some("/js/app.js"));
/// assert_eq!(mount_remainder("/client/", "/client"), Some("/"));
/// assert_eq!(mount_remainder("/", "/favicon.ico"), Some("/favicon.ico"));
/// assert_eq!(mount_remainder("/client/", "/clients"), None);
/// ```
#[must_use]
pub fn mount_remainder<'p>(prefix: &str, path: &'p str) -> Option<&'p str> {
    let base = prefix.trim_end_matches('/');
    if base.is_empty() {
        return Some(if path.is_empty() { "/" } else { path });
    }

    let rest = path.strip_prefix(base)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn is_read(method: &Method) -> bool {
    method == Method::GET || method == Method::HEAD
}
