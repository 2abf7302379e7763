//! The query endpoint.
//!
//! Accepts query documents over `GET` and `POST`, hands them to a
//! [`QueryExecutor`] and answers with pretty-printed JSON. Browsers that
//! open the endpoint directly get the explorer page instead.
//!
//! Parameters are read from the URL first, then from the body:
//!
//! | Content type | Body |
//! |--------------|------|
//! | `application/json` | `{"query": .., "variables": .., "operationName": ..}` |
//! | `application/graphql` | the query document |
//! | `application/x-www-form-urlencoded` | same keys as the URL |

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use meridian_middleware::{
    BoxFuture, Next, Request, RequestContext, Response, ResponseExt, Stage, StageError,
    StageKind, StageResult,
};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::datastore::DataStoreHandle;

/// One query to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// The query document.
    pub query: String,
    /// Variables, always a JSON value once parsed.
    pub variables: Option<Value>,
    /// Operation to run when the document holds several.
    pub operation_name: Option<String>,
}

/// Why an executor could not answer.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The query is invalid; reported to the client as a 400.
    #[error("{0}")]
    Invalid(String),

    /// A backing service is down.
    #[error("{0}")]
    Unavailable(String),

    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

/// Executes queries against an application schema.
#[async_trait]
pub trait QueryExecutor: Send + Sync + 'static {
    /// Runs `request` and returns the `data` member of the response.
    async fn execute(&self, request: QueryRequest) -> Result<Value, ExecutorError>;
}

/// Raw parameters as they arrive in a URL or form body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawParams {
    query: Option<String>,
    variables: Option<String>,
    operation_name: Option<String>,
    raw: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonParams {
    query: Option<String>,
    variables: Option<Value>,
    operation_name: Option<String>,
}

/// Parameters merged from the URL and the body.
#[derive(Debug, Default)]
struct Params {
    query: Option<String>,
    variables: Option<Value>,
    operation_name: Option<String>,
    raw: bool,
}

/// Origin the explorer page loads its scripts and stylesheet from.
///
/// A content security policy must allow it in `style-src`; scripts carry
/// the request nonce.
pub const EXPLORER_ASSET_ORIGIN: &str = "https://unpkg.com";

/// The `/graphql` stage.
pub struct QueryEndpoint {
    executor: Arc<dyn QueryExecutor>,
    data_store: Option<DataStoreHandle>,
    explorer: bool,
    pretty: bool,
}

impl std::fmt::Debug for QueryEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEndpoint")
            .field("data_store", &self.data_store.as_ref().map(|h| h.state()))
            .field("explorer", &self.explorer)
            .field("pretty", &self.pretty)
            .finish_non_exhaustive()
    }
}

impl QueryEndpoint {
    /// Creates the endpoint with the explorer page and pretty output enabled.
    #[must_use]
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            executor,
            data_store: None,
            explorer: true,
            pretty: true,
        }
    }

    /// Refuse queries with a 503 until the data store is connected.
    #[must_use]
    pub fn data_store(mut self, handle: DataStoreHandle) -> Self {
        self.data_store = Some(handle);
        self
    }

    /// Enables or disables the explorer page.
    #[must_use]
    pub fn explorer(mut self, enabled: bool) -> Self {
        self.explorer = enabled;
        self
    }

    /// Enables or disables pretty-printed JSON.
    #[must_use]
    pub fn pretty(mut self, enabled: bool) -> Self {
        self.pretty = enabled;
        self
    }

    async fn respond(&self, ctx: &RequestContext, request: Request) -> StageResult {
        let (parts, body) = request.into_parts();
        if parts.method != Method::GET && parts.method != Method::POST {
            return Err(StageError::MethodNotAllowed {
                method: parts.method,
                allow: vec![Method::GET, Method::POST],
            });
        }

        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(never) => match never {},
        };
        let content_type = parts
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let params = match parse_params(parts.uri.query(), content_type, &body) {
            Ok(params) => params,
            Err(message) => return Ok(self.errors(StatusCode::BAD_REQUEST, &message)),
        };

        let accepts_html = parts
            .headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"));
        if self.explorer && parts.method == Method::GET && accepts_html && !params.raw {
            return Ok(Response::html(
                StatusCode::OK,
                explorer_page(&params, ctx.nonce()),
            ));
        }

        let Some(query) = params.query.filter(|q| !q.trim().is_empty()) else {
            return Ok(self.errors(StatusCode::BAD_REQUEST, "Must provide query string."));
        };

        if let Some(handle) = &self.data_store {
            handle.ensure_ready()?;
        }

        let outcome = self
            .executor
            .execute(QueryRequest {
                query,
                variables: params.variables,
                operation_name: params.operation_name,
            })
            .await;

        match outcome {
            Ok(data) => Ok(Response::json(
                StatusCode::OK,
                &json!({ "data": data }),
                self.pretty,
            )),
            Err(ExecutorError::Invalid(message)) => {
                Ok(self.errors(StatusCode::BAD_REQUEST, &message))
            }
            Err(ExecutorError::Unavailable(message)) => {
                Err(StageError::upstream("query executor", message))
            }
            Err(ExecutorError::Internal(message)) => Err(StageError::Internal(message)),
        }
    }

    fn errors(&self, status: StatusCode, message: &str) -> Response {
        Response::json(
            status,
            &json!({ "errors": [{ "message": message }] }),
            self.pretty,
        )
    }
}

impl Stage for QueryEndpoint {
    fn kind(&self) -> StageKind {
        StageKind::QueryEndpoint
    }

    fn handle<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        request: Request,
        _next: Next<'a>,
    ) -> BoxFuture<'a, StageResult> {
        Box::pin(self.respond(ctx, request))
    }
}

fn parse_params(
    url_query: Option<&str>,
    content_type: &str,
    body: &Bytes,
) -> Result<Params, String> {
    let url: RawParams = serde_urlencoded::from_str(url_query.unwrap_or_default())
        .map_err(|e| format!("Invalid query string: {e}"))?;

    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let from_body = match media_type.as_str() {
        _ if body.is_empty() => JsonParams::default(),
        "application/json" => {
            serde_json::from_slice(body).map_err(|_| "POST body sent invalid JSON.".to_string())?
        }
        "application/graphql" => JsonParams {
            query: Some(String::from_utf8_lossy(body).into_owned()),
            ..JsonParams::default()
        },
        "application/x-www-form-urlencoded" => {
            let form: RawParams = serde_urlencoded::from_bytes(body)
                .map_err(|e| format!("Invalid form body: {e}"))?;
            JsonParams {
                query: form.query,
                variables: form.variables.map(Value::String),
                operation_name: form.operation_name,
            }
        }
        _ => JsonParams::default(),
    };

    let variables = match url.variables.map(Value::String).or(from_body.variables) {
        Some(Value::String(text)) if text.trim().is_empty() => None,
        Some(Value::String(text)) => Some(
            serde_json::from_str(&text).map_err(|_| "Variables are invalid JSON.".to_string())?,
        ),
        Some(Value::Null) | None => None,
        other => other,
    };

    Ok(Params {
        query: url.query.or(from_body.query),
        variables,
        operation_name: url.operation_name.or(from_body.operation_name),
        raw: url.raw.is_some(),
    })
}

/// JSON for embedding inside a `<script>` element.
fn script_json(value: &impl serde::Serialize) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "null".to_string())
        .replace("</", "<\\/")
        .replace("<!--", "<\\!--")
}

fn explorer_page(params: &Params, nonce: Option<&str>) -> String {
    let nonce_attr = nonce
        .map(|n| format!(" nonce=\"{n}\""))
        .unwrap_or_default();
    let query = script_json(&params.query);
    let variables = script_json(
        &params
            .variables
            .as_ref()
            .and_then(|v| serde_json::to_string_pretty(v).ok()),
    );
    let operation_name = script_json(&params.operation_name);

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8" />
  <title>GraphiQL</title>
  <meta name="robots" content="noindex" />
  <link href="{cdn}/graphiql@3/graphiql.min.css" rel="stylesheet" />
  <style>body {{ margin: 0; height: 100vh; }} #graphiql {{ height: 100vh; }}</style>
</head>
<body>
  <div id="graphiql">Loading...</div>
  <script{nonce_attr} crossorigin src="{cdn}/react@18/umd/react.production.min.js"></script>
  <script{nonce_attr} crossorigin src="{cdn}/react-dom@18/umd/react-dom.production.min.js"></script>
  <script{nonce_attr} crossorigin src="{cdn}/graphiql@3/graphiql.min.js"></script>
  <script{nonce_attr}>
    var fetcher = GraphiQL.createFetcher({{ url: window.location.pathname }});
    ReactDOM.createRoot(document.getElementById('graphiql')).render(
      React.createElement(GraphiQL, {{
        fetcher: fetcher,
        defaultQuery: {query},
        variables: {variables},
        operationName: {operation_name}
      }})
    );
  </script>
</body>
</html>"#,
        cdn = EXPLORER_ASSET_ORIGIN,
    )
}
