//! Routed stages that need the file system, the data store or an
//! application collaborator.
//!
//! | Kind | Stage | Route |
//! |------|-------|-------|
//! | 4 | [`FileRoute::service_worker`] | `GET /{fileName}` |
//! | 5 | [`FileRoute::offline_page`] | `GET {webPath}{offlinePageFileName}` |
//! | 6 | [`StaticMount::client_bundle`] | `{webPath}` mount |
//! | 7 | [`StaticMount::public_root`] | `/` mount |
//! | 8 | [`QueryEndpoint`] | `/graphql` mount |
//! | 9 | [`RenderEndpoint`] | any `GET` |

pub mod file_route;
pub mod query;
pub mod render;
pub mod static_mount;

pub use file_route::FileRoute;
pub use query::{
    ExecutorError, QueryEndpoint, QueryExecutor, QueryRequest, EXPLORER_ASSET_ORIGIN,
};
pub use render::{RenderEndpoint, RenderError, RenderOutcome, RenderRequest, Renderer};
pub use static_mount::StaticMount;
