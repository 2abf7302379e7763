//! Mounted static directories.
//!
//! A [`StaticMount`] serves a directory beneath a URL prefix. Misses (no
//! file, a directory without index, a method other than `GET`/`HEAD`) are
//! forwarded so later stages still see the request.

use std::time::Duration;

use meridian_middleware::route::mount_remainder;
use meridian_middleware::{
    BoxFuture, Next, Request, RequestContext, Stage, StageError, StageKind, StageResult,
};
use meridian_telemetry::fields;

use crate::static_files::{StaticFileError, StaticFiles};

/// A static directory mounted at a prefix.
#[derive(Debug, Clone)]
pub struct StaticMount {
    kind: StageKind,
    prefix: String,
    files: StaticFiles,
}

impl StaticMount {
    /// The client bundle, cached by browsers for `max_age`.
    #[must_use]
    pub fn client_bundle(
        web_path: impl Into<String>,
        files: StaticFiles,
        max_age: Duration,
    ) -> Self {
        Self {
            kind: StageKind::StaticBundle,
            prefix: web_path.into(),
            files: files.cache_control(format!("public, max-age={}", max_age.as_secs())),
        }
    }

    /// Public assets served from the site root.
    #[must_use]
    pub fn public_root(files: StaticFiles) -> Self {
        Self {
            kind: StageKind::StaticPublic,
            prefix: "/".to_string(),
            files: files.cache_control("public, max-age=0"),
        }
    }
}

impl Stage for StaticMount {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, StageResult> {
        Box::pin(async move {
            let Some(relative) = mount_remainder(&self.prefix, request.uri().path()) else {
                return next.run(ctx, request).await;
            };

            let served = self
                .files
                .serve(relative, request.method(), request.headers())
                .await;

            match served {
                Ok(response) => Ok(response),
                Err(error) if error.is_miss() => {
                    tracing::trace!(
                        { fields::STAGE } = self.name(),
                        path = relative,
                        "static miss"
                    );
                    next.run(ctx, request).await
                }
                Err(StaticFileError::Forbidden(path)) => Err(StageError::Forbidden(path)),
                Err(error) => Err(StageError::internal(error)),
            }
        })
    }
}
