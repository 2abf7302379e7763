//! Fixed-file routes for the service worker and its offline page.
//!
//! Both files are build outputs in the client bundle directory. They are
//! only routed for production builds with the service worker enabled, and
//! sit ahead of the bundle mount so they win over any same-named asset.

use std::path::PathBuf;

use meridian_middleware::{
    BoxFuture, Next, Request, RequestContext, Stage, StageError, StageKind, StageResult,
};
use meridian_telemetry::fields;

use crate::static_files::{StaticFileError, StaticFiles};

/// Serves one named file from a directory, whatever the request path.
#[derive(Debug, Clone)]
pub struct FileRoute {
    kind: StageKind,
    file_name: String,
    files: StaticFiles,
}

impl FileRoute {
    /// The service-worker script, revalidated on every load.
    #[must_use]
    pub fn service_worker(output_path: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            kind: StageKind::ServiceWorker,
            file_name: file_name.into(),
            files: StaticFiles::new(output_path).cache_control("no-cache"),
        }
    }

    /// The offline fallback page.
    #[must_use]
    pub fn offline_page(output_path: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self {
            kind: StageKind::OfflinePage,
            file_name: file_name.into(),
            files: StaticFiles::new(output_path)
                .cache_control("no-cache")
                .mime_type("html", "text/html; charset=utf-8"),
        }
    }
}

impl Stage for FileRoute {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn handle<'a>(
        &'a self,
        _ctx: &'a mut RequestContext,
        request: Request,
        _next: Next<'a>,
    ) -> BoxFuture<'a, StageResult> {
        Box::pin(async move {
            let served = self
                .files
                .serve(&self.file_name, request.method(), request.headers())
                .await;

            served.map_err(|error| match error {
                StaticFileError::Io(error) => StageError::internal(error),
                _ => {
                    tracing::warn!(
                        { fields::STAGE } = self.name(),
                        file = %self.files.root().join(&self.file_name).display(),
                        "build output missing"
                    );
                    StageError::not_found(request.uri().path())
                }
            })
        })
    }
}
