//! Whole-application behavior, in memory and over a socket.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE, HOST};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use meridian::{assemble, Application, BootError, Collaborators, ShellRenderer, StatusSchema};
use meridian_config::{AppSettings, ConfigLoader, DeploymentMode, EnvironmentFlags};
use meridian_middleware::{Pipeline, Request, Response};
use meridian_server::{
    Connection, ConnectionTarget, DataStoreConnector, DataStoreError, DataStoreHandle,
    ShutdownReason, ShutdownSignal, Transport,
};
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpStream;

fn write_build(root: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let build = root.join("build");
    let public = root.join("public");
    std::fs::create_dir_all(&build).unwrap();
    std::fs::create_dir_all(&public).unwrap();
    std::fs::write(build.join("sw.js"), "self.skipWaiting();").unwrap();
    std::fs::write(
        build.join("assets.json"),
        r#"{"index":{"js":"/client/index.js","css":"/client/index.css"}}"#,
    )
    .unwrap();
    (build, public)
}

fn settings(root: &Path) -> AppSettings {
    let (build, public) = write_build(root);
    let toml = format!(
        "host = '127.0.0.1'\nport = 0\npublicAssetsPath = '{}'\n\
         [bundles.client]\noutputPath = '{}'\n\
         [server]\nshutdownTimeoutSecs = 1\n",
        public.display(),
        build.display()
    );
    let store = ConfigLoader::new()
        .with_defaults()
        .with_string(&toml, "toml")
        .unwrap()
        .load()
        .unwrap();
    AppSettings::resolve(&store).unwrap()
}

fn production() -> EnvironmentFlags {
    EnvironmentFlags {
        deployment_mode: DeploymentMode::Production,
        is_dev_build: false,
        service_worker_enabled: true,
    }
}

fn in_memory(settings: &AppSettings) -> Pipeline {
    let flags = production();
    let data_store = DataStoreHandle::connected();
    assemble(
        settings,
        &flags,
        Collaborators {
            executor: Arc::new(StatusSchema::new(flags.deployment_mode, data_store.clone())),
            renderer: Arc::new(ShellRenderer::from_settings(settings, true)),
            data_store,
        },
    )
    .unwrap()
}

fn request(method: Method, uri: &str, body: &'static str) -> Request {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}

async fn text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============== In-Memory Tests ==============

#[tokio::test]
async fn test_query_endpoint_pretty_json() {
    let root = TempDir::new().unwrap();
    let pipeline = in_memory(&settings(root.path()));

    let response = pipeline
        .dispatch(request(
            Method::POST,
            "/graphql",
            r#"{"query":"{ version environment dataStore }"}"#,
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json");

    let body = text(response).await;
    assert!(body.starts_with("{\n  \"data\": {\n"));
    let value: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(value["data"]["version"], meridian::VERSION);
    assert_eq!(value["data"]["environment"], "production");
    assert_eq!(value["data"]["dataStore"], "connected");
}

#[tokio::test]
async fn test_unmatched_path_renders_page_with_request_nonce() {
    let root = TempDir::new().unwrap();
    let pipeline = in_memory(&settings(root.path()));

    let response = pipeline.dispatch(request(Method::GET, "/products/42", "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let csp = response
        .headers()
        .get("content-security-policy")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let page = text(response).await;
    let nonce = page
        .split("nonce=\"")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .unwrap()
        .to_string();
    assert!(csp.contains(&format!("'nonce-{nonce}'")));
    assert!(page.contains("src=\"/client/index.js\""));
    assert!(page.contains("navigator.serviceWorker.register(\"/sw.js\")"));
}

#[tokio::test]
async fn test_worker_script_in_production_build() {
    let root = TempDir::new().unwrap();
    let pipeline = in_memory(&settings(root.path()));

    let response = pipeline.dispatch(request(Method::GET, "/sw.js", "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "text/javascript; charset=utf-8"
    );
}

#[tokio::test]
async fn test_failures_do_not_leak_between_requests() {
    let root = TempDir::new().unwrap();
    let pipeline = in_memory(&settings(root.path()));

    let response = pipeline
        .dispatch(request(Method::POST, "/graphql", r#"{"query":"{ nope }"}"#))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = pipeline
        .dispatch(request(Method::POST, "/graphql", r#"{"query":"{ version }"}"#))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

// ============== Socket Tests ==============

struct Reachable;

#[async_trait]
impl Transport for Reachable {
    async fn open(
        &self,
        _: &ConnectionTarget,
        _: Duration,
    ) -> Result<Connection, DataStoreError> {
        Ok(Connection::detached())
    }
}

struct Refused;

#[async_trait]
impl Transport for Refused {
    async fn open(
        &self,
        target: &ConnectionTarget,
        _: Duration,
    ) -> Result<Connection, DataStoreError> {
        Err(DataStoreError::Unreachable {
            host: target.host.clone(),
            port: target.port,
            reason: "connection refused".into(),
        })
    }
}

async fn get(addr: std::net::SocketAddr, path: &str) -> (StatusCode, String) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, connection) = http1::handshake(TokioIo::new(stream)).await.unwrap();
    tokio::spawn(connection);

    let request = http::Request::builder()
        .uri(path)
        .header(HOST, addr.to_string())
        .header(ACCEPT, "application/json")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = sender.send_request(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_application_over_socket() {
    let root = TempDir::new().unwrap();
    let settings = settings(root.path());
    let timeout = settings.data_store.connect_timeout;

    let running = Application::new(settings, production(), "mongodb://localhost/meridian")
        .connector(DataStoreConnector::with_transport(Reachable, timeout))
        .start()
        .await
        .unwrap();
    let addr = running.local_addr();

    let shutdown = ShutdownSignal::new();
    let server = tokio::spawn(running.run(shutdown.clone()));

    let (status, body) = get(addr, "/graphql?query=%7B%20dataStore%20%7D").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"dataStore\": \"connected\""));

    let (status, body) = get(addr, "/sw.js").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "self.skipWaiting();");

    shutdown.trigger(ShutdownReason::Signal("SIGTERM"));
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_unreachable_data_store_never_listens() {
    let root = TempDir::new().unwrap();
    let settings = settings(root.path());
    let timeout = settings.data_store.connect_timeout;

    let result = Application::new(settings, production(), "localhost:1")
        .connector(DataStoreConnector::with_transport(Refused, timeout))
        .start()
        .await;

    match result {
        Err(error @ BootError::DataStore(_)) => assert_eq!(error.exit_code(), 1),
        other => panic!("expected data store failure, got {other:?}"),
    }
}
