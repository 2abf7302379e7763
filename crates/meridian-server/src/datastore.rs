//! Fail-fast data-store connector.
//!
//! [`DataStoreConnector::connect`] starts exactly one connection attempt on a
//! spawned task and returns immediately with a [`DataStoreHandle`]. The same
//! task keeps the established [`Connection`] and watches it until it is lost.
//! The handle publishes every state change:
//!
//! ```text
//! Connecting ──► Connected ──► Failed(lost)
//!     │
//!     └────────► Failed(reason)
//! ```
//!
//! There is no retry or reconnect. A failure is logged and is meant to stop
//! the process; the orchestrator decides how.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use meridian_middleware::StageError;
use meridian_telemetry::fields;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Default port for `mongodb://` connection strings.
pub const DEFAULT_PORT: u16 = 27017;

/// Errors from a connection attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataStoreError {
    /// The connection string could not be parsed.
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// The attempt did not finish in time.
    #[error("connection to {host}:{port} timed out after {timeout:?}")]
    Timeout {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// The configured timeout.
        timeout: Duration,
    },

    /// The transport refused or dropped the connection.
    #[error("connection to {host}:{port} failed: {reason}")]
    Unreachable {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// OS or transport error text.
        reason: String,
    },
}

/// A parsed `mongodb://host[:port][/database][?options]` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Database name, if present.
    pub database: Option<String>,
}

impl ConnectionTarget {
    /// Parses a connection string, with or without the `mongodb://` scheme.
    ///
    /// Credentials are accepted and discarded. Only the first host of a
    /// seed list is used.
    ///
    /// ```rust
    /// use meridian_server::ConnectionTarget;
    ///
    /// let target = ConnectionTarget::parse("localhost/meridian").unwrap();
    /// assert_eq!(target.host, "localhost");
    /// assert_eq!(target.port, 27017);
    /// assert_eq!(target.database.as_deref(), Some("meridian"));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`DataStoreError::InvalidConnectionString`] when the string
    /// has no host, an unsupported scheme or an invalid port.
    pub fn parse(input: &str) -> Result<Self, DataStoreError> {
        let invalid = || DataStoreError::InvalidConnectionString(input.to_string());
        let trimmed = input.trim();

        let rest = match trimmed.split_once("://") {
            Some(("mongodb", rest)) => rest,
            Some(_) => return Err(invalid()),
            None => trimmed,
        };

        let (authority, tail) = match rest.find(['/', '?']) {
            Some(index) => rest.split_at(index),
            None => (rest, ""),
        };
        let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
        let first_host = authority.split(',').next().unwrap_or_default();

        let (host, port) = if let Some(bracketed) = first_host.strip_prefix('[') {
            let (host, after) = bracketed.split_once(']').ok_or_else(invalid)?;
            match after.strip_prefix(':') {
                Some(port) => (host, port.parse::<u16>().map_err(|_| invalid())?),
                None if after.is_empty() => (host, DEFAULT_PORT),
                None => return Err(invalid()),
            }
        } else {
            match first_host.rsplit_once(':') {
                Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
                None => (first_host, DEFAULT_PORT),
            }
        };
        if host.is_empty() {
            return Err(invalid());
        }

        let database = tail
            .strip_prefix('/')
            .map(|t| t.split('?').next().unwrap_or_default())
            .filter(|db| !db.is_empty())
            .map(str::to_string);

        Ok(Self {
            host: host.to_string(),
            port,
            database,
        })
    }
}

impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)?;
        if let Some(db) = &self.database {
            write!(f, "/{db}")?;
        }
        Ok(())
    }
}

/// An established data-store connection.
///
/// Resolves, through [`closed`](Self::closed), with the error that ended it.
pub struct Connection {
    closed: BoxFuture<'static, DataStoreError>,
}

impl Connection {
    /// Wraps a future that completes when the connection is lost.
    #[must_use]
    pub fn new(closed: impl Future<Output = DataStoreError> + Send + 'static) -> Self {
        Self {
            closed: Box::pin(closed),
        }
    }

    /// A connection that is never reported lost.
    #[must_use]
    pub fn detached() -> Self {
        Self::new(std::future::pending())
    }

    /// Waits until the connection is lost.
    pub async fn closed(self) -> DataStoreError {
        self.closed.await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens the underlying connection.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connects to `target`, failing after `timeout`.
    async fn open(
        &self,
        target: &ConnectionTarget,
        timeout: Duration,
    ) -> Result<Connection, DataStoreError>;
}

/// TCP transport.
///
/// The attempt succeeds once the socket is established. The socket is then
/// held open and read until the peer closes it or it errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn open(
        &self,
        target: &ConnectionTarget,
        timeout: Duration,
    ) -> Result<Connection, DataStoreError> {
        let unreachable = |reason: String| DataStoreError::Unreachable {
            host: target.host.clone(),
            port: target.port,
            reason,
        };

        let attempt = async {
            let addr = format!("{}:{}", target.host, target.port);
            let addrs: Vec<SocketAddr> = tokio::net::lookup_host(addr)
                .await
                .map_err(|e| unreachable(e.to_string()))?
                .collect();

            let mut last_error = String::from("no addresses resolved");
            for addr in addrs {
                match TcpStream::connect(addr).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => last_error = e.to_string(),
                }
            }
            Err(unreachable(last_error))
        };

        let stream = tokio::time::timeout(timeout, attempt)
            .await
            .unwrap_or_else(|_| {
                Err(DataStoreError::Timeout {
                    host: target.host.clone(),
                    port: target.port,
                    timeout,
                })
            })?;

        Ok(Connection::new(watch_stream(stream, target.clone())))
    }
}

/// Reads from `stream` until it ends and reports why.
async fn watch_stream(mut stream: TcpStream, target: ConnectionTarget) -> DataStoreError {
    let mut buf = [0u8; 512];
    let reason = loop {
        match stream.read(&mut buf).await {
            Ok(0) => break "connection closed by peer".to_string(),
            Ok(_) => {}
            Err(e) => break e.to_string(),
        }
    };
    DataStoreError::Unreachable {
        host: target.host,
        port: target.port,
        reason,
    }
}

/// State of the connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// The attempt is in flight.
    Connecting,
    /// The data store is reachable.
    Connected,
    /// The attempt failed or the connection was later lost; no retry follows.
    Failed(DataStoreError),
}

impl ConnectionState {
    /// Returns `true` once the attempt has settled.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Connecting)
    }

    /// Short name for logs and status responses.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed(_) => "failed",
        }
    }
}

/// Starts connection attempts.
#[derive(Clone)]
pub struct DataStoreConnector {
    transport: Arc<dyn Transport>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for DataStoreConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStoreConnector")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl DataStoreConnector {
    /// Creates a connector over TCP.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self::with_transport(TcpTransport, connect_timeout)
    }

    /// Creates a connector over a custom transport.
    #[must_use]
    pub fn with_transport(transport: impl Transport, connect_timeout: Duration) -> Self {
        Self {
            transport: Arc::new(transport),
            connect_timeout,
        }
    }

    /// Starts one attempt and returns without waiting for it.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn connect(&self, connection_string: &str) -> DataStoreHandle {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let handle = DataStoreHandle {
            state: Arc::new(state),
        };

        let target = match ConnectionTarget::parse(connection_string) {
            Ok(target) => target,
            Err(error) => {
                handle.settle(Err(error));
                return handle;
            }
        };

        tracing::debug!(target = %target, "connecting to data store");
        let transport = Arc::clone(&self.transport);
        let timeout = self.connect_timeout;
        let publisher = handle.clone();
        tokio::spawn(async move {
            match transport.open(&target, timeout).await {
                Ok(connection) => {
                    publisher.settle(Ok(()));
                    let error = connection.closed().await;
                    publisher.lose(error);
                }
                Err(error) => publisher.settle(Err(error)),
            }
        });

        handle
    }
}

/// Observes one connection attempt. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DataStoreHandle {
    state: Arc<watch::Sender<ConnectionState>>,
}

impl DataStoreHandle {
    /// A handle that is already connected.
    #[must_use]
    pub fn connected() -> Self {
        let (state, _) = watch::channel(ConnectionState::Connected);
        Self {
            state: Arc::new(state),
        }
    }

    /// A handle whose attempt already failed.
    #[must_use]
    pub fn failed(error: DataStoreError) -> Self {
        let (state, _) = watch::channel(ConnectionState::Failed(error));
        Self {
            state: Arc::new(state),
        }
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Waits until the attempt settles as `Connected` or `Failed`.
    pub async fn terminal(&self) -> ConnectionState {
        let mut receiver = self.state.subscribe();
        let state = match receiver.wait_for(ConnectionState::is_terminal).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }

    /// Fails with [`StageError::Upstream`] unless connected.
    pub fn ensure_ready(&self) -> Result<(), StageError> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Connecting => {
                Err(StageError::upstream("data store", "connection in progress"))
            }
            ConnectionState::Failed(error) => {
                Err(StageError::upstream("data store", error.to_string()))
            }
        }
    }

    /// Waits until the data store fails, during the attempt or later.
    pub async fn failure(&self) -> DataStoreError {
        let mut receiver = self.state.subscribe();
        let failed = receiver
            .wait_for(|state| matches!(state, ConnectionState::Failed(_)))
            .await
            .ok()
            .and_then(|state| match &*state {
                ConnectionState::Failed(error) => Some(error.clone()),
                _ => None,
            });
        match failed {
            Some(error) => error,
            None => std::future::pending().await,
        }
    }

    fn settle(&self, outcome: Result<(), DataStoreError>) {
        let next = match outcome {
            Ok(()) => {
                tracing::info!("✔ connected to data store");
                ConnectionState::Connected
            }
            Err(error) => {
                tracing::error!({ fields::ERROR } = %error, "✗ data store connection error");
                ConnectionState::Failed(error)
            }
        };

        self.state.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = next;
            true
        });
    }

    fn lose(&self, error: DataStoreError) {
        self.state.send_if_modified(|current| {
            if *current != ConnectionState::Connected {
                return false;
            }
            tracing::error!({ fields::ERROR } = %error, "✗ data store connection lost");
            *current = ConnectionState::Failed(error);
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    struct Scripted(Result<(), DataStoreError>);

    #[async_trait]
    impl Transport for Scripted {
        async fn open(
            &self,
            _: &ConnectionTarget,
            _: Duration,
        ) -> Result<Connection, DataStoreError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.0.clone().map(|()| Connection::detached())
        }
    }

    struct Dropping(DataStoreError);

    #[async_trait]
    impl Transport for Dropping {
        async fn open(
            &self,
            _: &ConnectionTarget,
            _: Duration,
        ) -> Result<Connection, DataStoreError> {
            let error = self.0.clone();
            Ok(Connection::new(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                error
            }))
        }
    }

    // ============== Parsing Tests ==============

    #[test]
    fn test_parse_with_scheme() {
        let target =
            ConnectionTarget::parse("mongodb://db.internal:27018/app?w=majority").unwrap();
        assert_eq!(target.host, "db.internal");
        assert_eq!(target.port, 27018);
        assert_eq!(target.database.as_deref(), Some("app"));
    }

    #[test]
    fn test_parse_without_scheme() {
        let target = ConnectionTarget::parse("localhost").unwrap();
        assert_eq!(target.host, "localhost");
        assert_eq!(target.port, DEFAULT_PORT);
        assert_eq!(target.database, None);
    }

    #[test]
    fn test_parse_credentials_and_seed_list() {
        let target = ConnectionTarget::parse("user:pw@a.example:1,b.example:2/db").unwrap();
        assert_eq!(target.host, "a.example");
        assert_eq!(target.port, 1);
        assert_eq!(target.to_string(), "a.example:1/db");
    }

    #[test]
    fn test_parse_ipv6() {
        let target = ConnectionTarget::parse("[::1]:27018").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 27018);

        let target = ConnectionTarget::parse("[::1]/db").unwrap();
        assert_eq!(target.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ConnectionTarget::parse("").is_err());
        assert!(ConnectionTarget::parse("postgres://x").is_err());
        assert!(ConnectionTarget::parse("host:notaport").is_err());
        assert!(ConnectionTarget::parse("/dbonly").is_err());
    }

    // ============== Connector Tests ==============

    #[tokio::test]
    async fn test_scripted_success() {
        let connector =
            DataStoreConnector::with_transport(Scripted(Ok(())), Duration::from_secs(1));
        let handle = connector.connect("localhost/test");
        assert_eq!(handle.state(), ConnectionState::Connecting);
        assert!(handle.ensure_ready().is_err());

        assert_eq!(handle.terminal().await, ConnectionState::Connected);
        assert!(handle.ensure_ready().is_ok());
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let error = DataStoreError::Unreachable {
            host: "localhost".into(),
            port: 1,
            reason: "refused".into(),
        };
        let connector = DataStoreConnector::with_transport(
            Scripted(Err(error.clone())),
            Duration::from_secs(1),
        );
        let handle = connector.connect("localhost:1");

        assert_eq!(handle.terminal().await, ConnectionState::Failed(error));
        let err = handle.ensure_ready().unwrap_err();
        assert_eq!(err.status_code(), http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_invalid_string_fails_immediately() {
        let handle = DataStoreConnector::new(Duration::from_secs(1)).connect("redis://x");
        assert!(matches!(
            handle.state(),
            ConnectionState::Failed(DataStoreError::InvalidConnectionString(_))
        ));
    }

    #[tokio::test]
    async fn test_tcp_transport_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = DataStoreConnector::new(Duration::from_secs(2))
            .connect(&format!("mongodb://127.0.0.1:{port}/test"));
        assert_eq!(handle.terminal().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_tcp_transport_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let handle = DataStoreConnector::new(Duration::from_secs(2))
            .connect(&format!("127.0.0.1:{port}"));
        assert!(matches!(
            handle.terminal().await,
            ConnectionState::Failed(DataStoreError::Unreachable { .. })
        ));
    }

    #[tokio::test]
    async fn test_lost_connection_fails_handle() {
        let lost = DataStoreError::Unreachable {
            host: "localhost".into(),
            port: 27017,
            reason: "connection closed by peer".into(),
        };
        let connector =
            DataStoreConnector::with_transport(Dropping(lost.clone()), Duration::from_secs(1));
        let handle = connector.connect("localhost/test");

        assert_eq!(handle.terminal().await, ConnectionState::Connected);
        assert_eq!(handle.failure().await, lost);
        assert_eq!(handle.state(), ConnectionState::Failed(lost));
        assert!(handle.ensure_ready().is_err());
    }

    #[tokio::test]
    async fn test_tcp_peer_close_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handle = DataStoreConnector::new(Duration::from_secs(2))
            .connect(&format!("127.0.0.1:{port}"));
        let (socket, _) = listener.accept().await.unwrap();
        assert_eq!(handle.terminal().await, ConnectionState::Connected);

        drop(socket);
        let error = tokio::time::timeout(Duration::from_secs(2), handle.failure())
            .await
            .unwrap();
        assert!(matches!(error, DataStoreError::Unreachable { port: p, .. } if p == port));
    }

    #[tokio::test]
    async fn test_failure_reports_failed_attempt() {
        let handle = DataStoreHandle::failed(DataStoreError::InvalidConnectionString("x".into()));
        assert!(matches!(
            handle.failure().await,
            DataStoreError::InvalidConnectionString(_)
        ));
    }

    #[test]
    fn test_prebuilt_handles() {
        assert!(DataStoreHandle::connected().ensure_ready().is_ok());
        let failed = DataStoreHandle::failed(DataStoreError::InvalidConnectionString("x".into()));
        assert_eq!(failed.state().as_str(), "failed");
    }
}
