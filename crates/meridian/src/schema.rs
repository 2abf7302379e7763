//! Built-in status schema.
//!
//! Answers queries that select top-level fields of the `Query` type:
//!
//! ```graphql
//! type Query {
//!   version: String!
//!   environment: String!
//!   dataStore: String!
//! }
//! ```
//!
//! Nested selections, arguments and fragments are rejected. Applications
//! with a real schema provide their own [`QueryExecutor`].

use async_trait::async_trait;
use meridian_config::DeploymentMode;
use meridian_server::stages::{ExecutorError, QueryExecutor, QueryRequest};
use meridian_server::DataStoreHandle;
use serde_json::{Map, Value};

/// Crate version reported by the `version` field.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Executor for the status fields.
#[derive(Debug, Clone)]
pub struct StatusSchema {
    environment: DeploymentMode,
    data_store: DataStoreHandle,
}

impl StatusSchema {
    /// Creates the schema.
    #[must_use]
    pub fn new(environment: DeploymentMode, data_store: DataStoreHandle) -> Self {
        Self {
            environment,
            data_store,
        }
    }

    fn resolve(&self, field: &str) -> Result<Value, ExecutorError> {
        let value = match field {
            "version" => VERSION,
            "environment" => self.environment.as_str(),
            "dataStore" => self.data_store.state().as_str(),
            "__typename" => "Query",
            other => {
                return Err(ExecutorError::Invalid(format!(
                    "Cannot query field \"{other}\" on type \"Query\"."
                )))
            }
        };
        Ok(Value::String(value.to_string()))
    }
}

#[async_trait]
impl QueryExecutor for StatusSchema {
    async fn execute(&self, request: QueryRequest) -> Result<Value, ExecutorError> {
        let fields = selected_fields(&request.query)?;
        let mut data = Map::new();
        for field in fields {
            let (alias, name) = match field.split_once(':') {
                Some((alias, name)) => (alias.trim(), name.trim()),
                None => (field, field),
            };
            data.insert(alias.to_string(), self.resolve(name)?);
        }
        Ok(Value::Object(data))
    }
}

/// Extracts the top-level selection of a single query operation.
fn selected_fields(query: &str) -> Result<Vec<&str>, ExecutorError> {
    let document = query.trim();
    let open = document
        .find('{')
        .ok_or_else(|| ExecutorError::Invalid("Syntax Error: Expected \"{\".".into()))?;

    let header = document[..open].trim();
    let operation = header.split_whitespace().next().unwrap_or("query");
    if operation != "query" {
        return Err(ExecutorError::Invalid(format!(
            "Operation \"{operation}\" is not supported."
        )));
    }

    let body = document[open + 1..]
        .strip_suffix('}')
        .ok_or_else(|| ExecutorError::Invalid("Syntax Error: Expected \"}\".".into()))?;
    if body.contains(['{', '}', '(', '.']) {
        return Err(ExecutorError::Invalid(
            "Only top-level fields without arguments are supported.".into(),
        ));
    }

    let fields: Vec<&str> = body
        .split([',', '\n'])
        .flat_map(split_selection)
        .collect();
    if fields.is_empty() {
        return Err(ExecutorError::Invalid("Syntax Error: Expected Name.".into()));
    }
    Ok(fields)
}

/// Splits `a b alias: c` into `["a", "b", "alias: c"]`.
fn split_selection(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut rest = line.trim();
    while !rest.is_empty() {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let token = &rest[..end];
        let after = rest[end..].trim_start();

        if token.ends_with(':') || after.starts_with(':') {
            let after = after.trim_start_matches(':').trim_start();
            let name_end = after.find(char::is_whitespace).unwrap_or(after.len());
            let span = rest.len() - after.len() + name_end;
            fields.push(rest[..span].trim());
            rest = rest[span..].trim_start();
        } else {
            fields.push(token);
            rest = after;
        }
    }
    fields
}
