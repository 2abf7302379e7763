//! Pipeline assembly.
//!
//! [`assemble`] turns resolved settings and environment flags into the
//! request pipeline. The order is fixed:
//!
//! | # | Stage | Installed when |
//! |---|-------|----------------|
//! | 1 | nonce injector | development deployment |
//! | 1 | security headers | production deployment |
//! | 2 | compression | always |
//! | 3 | service worker script, offline page | production build and `serviceWorker.enabled` |
//! | 4 | client bundle at `webPath` | always |
//! | 5 | public assets at `/` | always |
//! | 6 | query endpoint at `/graphql` | always |
//! | 7 | render catch-all for `GET` | always |
//! | 8 | error boundary | always |

use std::sync::Arc;

use meridian_config::{AppSettings, EnvironmentFlags};
use meridian_middleware::stages::{
    CompressionStage, ErrorBoundary, NonceInjector, SecurityHeaders,
};
use meridian_middleware::{Pipeline, PipelineBuilder, PipelineError, RequestGuard, Route};
use meridian_server::stages::{
    FileRoute, QueryEndpoint, QueryExecutor, RenderEndpoint, Renderer, StaticMount,
    EXPLORER_ASSET_ORIGIN,
};
use meridian_server::{DataStoreHandle, StaticFiles};

/// Route of the query endpoint.
pub const QUERY_PATH: &str = "/graphql";

/// Application collaborators plugged into the pipeline.
#[derive(Clone)]
pub struct Collaborators {
    /// Answers `/graphql` queries.
    pub executor: Arc<dyn QueryExecutor>,
    /// Renders pages for the catch-all route.
    pub renderer: Arc<dyn Renderer>,
    /// The data-store connection the query and render stages wait on.
    pub data_store: DataStoreHandle,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("data_store", &self.data_store.state())
            .finish_non_exhaustive()
    }
}

/// Picks the first stage for the deployment mode.
///
/// In production the policy admits the explorer's stylesheet origin when
/// the explorer page is served.
#[must_use]
pub fn request_guard(flags: &EnvironmentFlags, explorer: bool) -> RequestGuard {
    if flags.is_development() {
        return RequestGuard::Nonce(NonceInjector::new());
    }
    let headers = SecurityHeaders::new();
    RequestGuard::SecurityHeaders(if explorer {
        headers.allow_source("style-src", EXPLORER_ASSET_ORIGIN)
    } else {
        headers
    })
}

/// Builds the request pipeline.
///
/// # Errors
///
/// Returns [`PipelineError`] only if the stage order is violated, which
/// would be a defect in this function.
pub fn assemble(
    settings: &AppSettings,
    flags: &EnvironmentFlags,
    collaborators: Collaborators,
) -> Result<Pipeline, PipelineError> {
    let bundle = &settings.client_bundle;
    let explorer = settings.query.explorer;
    let mut builder = PipelineBuilder::new(request_guard(flags, explorer))
        .stage(Route::All, CompressionStage::new());

    if flags.service_worker_routes_enabled() {
        let worker = &settings.service_worker;
        builder = builder
            .stage(
                Route::get(worker.script_path()),
                FileRoute::service_worker(&bundle.output_path, &worker.file_name),
            )
            .stage(
                Route::get(format!("{}{}", bundle.web_path, worker.offline_page_file_name)),
                FileRoute::offline_page(&bundle.output_path, &worker.offline_page_file_name),
            );
    }

    let pipeline = builder
        .stage(
            Route::mount(bundle.web_path.clone()),
            StaticMount::client_bundle(
                bundle.web_path.clone(),
                StaticFiles::new(&bundle.output_path),
                settings.browser_cache_max_age,
            ),
        )
        .stage(
            Route::mount("/"),
            StaticMount::public_root(StaticFiles::new(&settings.public_assets_path)),
        )
        .stage(
            Route::mount(QUERY_PATH),
            QueryEndpoint::new(collaborators.executor)
                .explorer(explorer)
                .data_store(collaborators.data_store.clone()),
        )
        .stage(
            Route::GetFallback,
            RenderEndpoint::new(collaborators.renderer).data_store(collaborators.data_store),
        )
        .request_timeout(settings.server.request_timeout)
        .build(ErrorBoundary::new().expose_internal_errors(flags.is_development()))?;

    tracing::info!(
        mode = %flags.deployment_mode,
        dev_build = flags.is_dev_build,
        stages = ?pipeline.stage_names(),
        "pipeline assembled"
    );

    Ok(pipeline)
}
