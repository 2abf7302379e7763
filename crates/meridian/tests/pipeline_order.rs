//! Stage precedence observed through dispatch.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use meridian::{assemble, Collaborators, ShellRenderer, StatusSchema};
use meridian_config::{AppSettings, ConfigLoader, DeploymentMode, EnvironmentFlags};
use meridian_middleware::{Pipeline, Request, Response};
use meridian_server::DataStoreHandle;
use tempfile::TempDir;

struct Site {
    _root: TempDir,
    settings: AppSettings,
}

fn site() -> Site {
    let root = TempDir::new().unwrap();
    let build = root.path().join("build");
    let public = root.path().join("public");
    std::fs::create_dir_all(&build).unwrap();
    std::fs::create_dir_all(&public).unwrap();

    std::fs::write(build.join("sw.js"), "// bundled worker").unwrap();
    std::fs::write(build.join("offline.html"), "<p>offline</p>").unwrap();
    std::fs::write(build.join("index.js"), "console.log('app')").unwrap();
    std::fs::write(
        build.join("assets.json"),
        r#"{"index":{"js":"/client/index.js"}}"#,
    )
    .unwrap();
    std::fs::write(public.join("sw.js"), "// public copy").unwrap();
    std::fs::write(public.join("favicon.ico"), [0u8, 0, 1, 0]).unwrap();
    std::fs::write(public.join("my file.png"), "png").unwrap();

    let store = ConfigLoader::new()
        .with_defaults()
        .with_string(&config_toml(&build, &public), "toml")
        .unwrap()
        .load()
        .unwrap();

    Site {
        settings: AppSettings::resolve(&store).unwrap(),
        _root: root,
    }
}

fn config_toml(build: &Path, public: &Path) -> String {
    format!(
        "port = 0\npublicAssetsPath = '{}'\n[bundles.client]\noutputPath = '{}'\n",
        public.display(),
        build.display()
    )
}

fn pipeline(site: &Site, mode: DeploymentMode, is_dev_build: bool) -> Pipeline {
    let flags = EnvironmentFlags {
        deployment_mode: mode,
        is_dev_build,
        service_worker_enabled: true,
    };
    let data_store = DataStoreHandle::connected();
    assemble(
        &site.settings,
        &flags,
        Collaborators {
            executor: Arc::new(StatusSchema::new(mode, data_store.clone())),
            renderer: Arc::new(ShellRenderer::from_settings(
                &site.settings,
                flags.service_worker_routes_enabled(),
            )),
            data_store,
        },
    )
    .unwrap()
}

fn get(path: &str) -> Request {
    http::Request::builder()
        .method(Method::GET)
        .uri(path)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

async fn body(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn test_worker_route_shadows_public_file_in_production_build() {
    let site = site();
    let pipeline = pipeline(&site, DeploymentMode::Production, false);

    let response = pipeline.dispatch(get("/sw.js")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "text/javascript; charset=utf-8"
    );
    assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-cache");
    assert_eq!(body(response).await, "// bundled worker");
}

#[tokio::test]
async fn test_public_file_served_in_dev_build() {
    let site = site();
    let pipeline = pipeline(&site, DeploymentMode::Production, true);

    let response = pipeline.dispatch(get("/sw.js")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(response).await, "// public copy");
}

#[tokio::test]
async fn test_offline_page_under_web_path() {
    let site = site();

    let production = pipeline(&site, DeploymentMode::Production, false);
    let response = production.dispatch(get("/client/offline.html")).await;
    assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-cache");
    assert_eq!(body(response).await, "<p>offline</p>");

    // Without the worker routes the bundle mount serves the same file.
    let development = pipeline(&site, DeploymentMode::Development, true);
    let response = development.dispatch(get("/client/offline.html")).await;
    assert_eq!(
        response.headers().get(CACHE_CONTROL).unwrap(),
        "public, max-age=31536000"
    );
}

#[tokio::test]
async fn test_bundle_before_public_before_render() {
    let site = site();
    let pipeline = pipeline(&site, DeploymentMode::Development, true);

    let response = pipeline.dispatch(get("/client/index.js")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(response).await, "console.log('app')");

    let response = pipeline.dispatch(get("/favicon.ico")).await;
    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "image/x-icon");

    let response = pipeline.dispatch(get("/client/missing.js")).await;
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "text/html; charset=utf-8"
    );
    assert!(body(response).await.contains("<div id=\"app\"></div>"));
}

#[tokio::test]
async fn test_guard_headers_reach_every_stage() {
    let site = site();
    let production = pipeline(&site, DeploymentMode::Production, false);

    for path in ["/sw.js", "/client/index.js", "/favicon.ico", "/page", "/graphql"] {
        let response = production.dispatch(get(path)).await;
        assert!(
            response.headers().contains_key("content-security-policy"),
            "missing CSP on {path}"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
    }

    let development = pipeline(&site, DeploymentMode::Development, true);
    let response = development.dispatch(get("/page")).await;
    assert!(!response.headers().contains_key("content-security-policy"));
}

#[tokio::test]
async fn test_encoded_public_path_is_served_not_rendered() {
    let site = site();
    let pipeline = pipeline(&site, DeploymentMode::Production, false);

    let response = pipeline.dispatch(get("/my%20file.png")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "image/png");
    assert_eq!(body(response).await, "png");
}

#[tokio::test]
async fn test_explorer_stylesheet_allowed_in_production() {
    let site = site();
    let pipeline = pipeline(&site, DeploymentMode::Production, false);

    let mut browser = get("/graphql");
    browser.headers_mut().insert(
        http::header::ACCEPT,
        http::HeaderValue::from_static("text/html"),
    );
    let response = pipeline.dispatch(browser).await;
    assert_eq!(response.status(), StatusCode::OK);

    let policy = response
        .headers()
        .get("content-security-policy")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let style_src = policy
        .split("; ")
        .find(|d| d.starts_with("style-src"))
        .unwrap();
    assert!(style_src.contains("https://unpkg.com"));
    assert!(body(response).await.contains("https://unpkg.com/graphiql@3/graphiql.min.css"));
}
