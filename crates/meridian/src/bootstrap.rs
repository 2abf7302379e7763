//! Process bootstrap.
//!
//! Startup runs in this order:
//!
//! 1. load configuration (defaults, file, `MERIDIAN__*` overrides)
//! 2. initialise logging for the deployment mode
//! 3. classify the environment
//! 4. start the single data-store connection attempt
//! 5. assemble the pipeline while the attempt runs
//! 6. wait for the attempt's terminal event, unless
//!    `dataStore.awaitConnection` is off
//! 7. bind and serve until shutdown
//!
//! A data-store failure at any point stops the process with a failure
//! exit code. Before binding it is returned as [`BootError::DataStore`];
//! after binding it triggers shutdown and [`Running::run`] returns the
//! same error once connections have drained.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use meridian_config::{AppSettings, ConfigError, ConfigLoader, EnvironmentFlags};
use meridian_middleware::{Pipeline, PipelineError};
use meridian_server::stages::{QueryExecutor, Renderer};
use meridian_server::{
    ConnectionState, DataStoreConnector, DataStoreError, DataStoreHandle, Listening, Server,
    ServerError, ShutdownReason, ShutdownSignal,
};
use meridian_telemetry::{init_logging, LogConfig, TelemetryError};
use thiserror::Error;

use crate::assembler::{assemble, Collaborators};
use crate::render::ShellRenderer;
use crate::schema::StatusSchema;

/// Environment variable holding the data-store connection string.
pub const CONNECTION_STRING_ENV_VAR: &str = "MONGODB_URI";

/// Environment variable naming a configuration file.
pub const CONFIG_FILE_ENV_VAR: &str = "MERIDIAN_CONFIG";

/// Configuration file read from the working directory when present.
pub const DEFAULT_CONFIG_FILE: &str = "meridian.toml";

/// Startup-fatal errors. Every variant maps to exit code 1.
#[derive(Debug, Error)]
pub enum BootError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Logging could not be initialised.
    #[error("logging error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// The connection string is not set.
    #[error("MONGODB_URI is not set")]
    MissingConnectionString,

    /// The data-store connection attempt failed.
    #[error("data store connection failed: {0}")]
    DataStore(#[from] DataStoreError),

    /// The pipeline could not be assembled.
    #[error("pipeline assembly failed: {0}")]
    Assembly(#[from] PipelineError),

    /// The listener failed.
    #[error("server error: {0}")]
    Server(#[from] ServerError),
}

impl BootError {
    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}

/// Command-line and environment inputs.
#[derive(Debug, Clone, Default)]
pub struct BootOptions {
    /// Configuration file given with `--config`.
    pub config_file: Option<PathBuf>,
}

/// Loads the configuration store and resolves [`AppSettings`].
///
/// `--config` wins over `MERIDIAN_CONFIG`; both must exist. Without either,
/// `meridian.toml` is read if present.
pub fn load_settings(options: &BootOptions) -> Result<AppSettings, BootError> {
    let loader = ConfigLoader::new().with_dotenv()?.with_defaults();
    let explicit = options
        .config_file
        .clone()
        .or_else(|| std::env::var_os(CONFIG_FILE_ENV_VAR).map(PathBuf::from));

    let loader = match explicit {
        Some(path) => loader.with_file(path)?,
        None => loader.with_optional_file(DEFAULT_CONFIG_FILE)?,
    };

    let store = loader.with_env_prefix("MERIDIAN").load()?;
    Ok(AppSettings::resolve(&store)?)
}

/// Logging preset for the deployment mode, with configured overrides.
#[must_use]
pub fn log_config(settings: &AppSettings, flags: &EnvironmentFlags) -> LogConfig {
    let mut config = if flags.is_development() {
        LogConfig::development()
    } else {
        LogConfig::production()
    };
    if let Some(level) = &settings.logging.level {
        config = config.with_level(level.clone());
    }
    if let Some(format) = settings.logging.format {
        config = config.with_format(format);
    }
    config
}

/// The application before it starts listening.
pub struct Application {
    settings: AppSettings,
    flags: EnvironmentFlags,
    connection_string: String,
    connector: DataStoreConnector,
    executor: Option<Arc<dyn QueryExecutor>>,
    renderer: Option<Arc<dyn Renderer>>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("settings", &self.settings)
            .field("flags", &self.flags)
            .field("connector", &self.connector)
            .finish_non_exhaustive()
    }
}

impl Application {
    /// Creates the application with the built-in status schema and shell
    /// renderer.
    #[must_use]
    pub fn new(
        settings: AppSettings,
        flags: EnvironmentFlags,
        connection_string: impl Into<String>,
    ) -> Self {
        let connector = DataStoreConnector::new(settings.data_store.connect_timeout);
        Self {
            settings,
            flags,
            connection_string: connection_string.into(),
            connector,
            executor: None,
            renderer: None,
        }
    }

    /// Replaces the data-store connector.
    #[must_use]
    pub fn connector(mut self, connector: DataStoreConnector) -> Self {
        self.connector = connector;
        self
    }

    /// Answers `/graphql` with an application schema.
    #[must_use]
    pub fn executor(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Renders pages with an application renderer.
    #[must_use]
    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Connects, assembles and binds.
    ///
    /// With `dataStore.awaitConnection` on (the default), a failed
    /// connection attempt is returned before anything listens.
    pub async fn start(self) -> Result<Running, BootError> {
        let Self {
            settings,
            flags,
            connection_string,
            connector,
            executor,
            renderer,
        } = self;

        let data_store = connector.connect(&connection_string);

        let executor: Arc<dyn QueryExecutor> = match executor {
            Some(executor) => executor,
            None => Arc::new(StatusSchema::new(flags.deployment_mode, data_store.clone())),
        };
        let renderer: Arc<dyn Renderer> = match renderer {
            Some(renderer) => renderer,
            None => Arc::new(ShellRenderer::from_settings(
                &settings,
                flags.service_worker_routes_enabled(),
            )),
        };
        let pipeline = assemble(
            &settings,
            &flags,
            Collaborators {
                executor,
                renderer,
                data_store: data_store.clone(),
            },
        )?;

        if settings.data_store.await_connection {
            if let ConnectionState::Failed(error) = data_store.terminal().await {
                return Err(BootError::DataStore(error));
            }
        }

        let listening = Server::new()
            .body_timeout(settings.server.request_timeout)
            .shutdown_timeout(settings.server.shutdown_timeout)
            .bind(&settings.server.bind_addr())
            .await?;

        Ok(Running {
            listening,
            pipeline: Arc::new(pipeline),
            data_store,
        })
    }
}

/// A bound application.
#[derive(Debug)]
pub struct Running {
    listening: Listening,
    pipeline: Arc<Pipeline>,
    data_store: DataStoreHandle,
}

impl Running {
    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.listening.local_addr()
    }

    /// The assembled pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// The data-store connection.
    #[must_use]
    pub fn data_store(&self) -> &DataStoreHandle {
        &self.data_store
    }

    /// Serves until `shutdown` fires or the data-store attempt fails.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), BootError> {
        let watcher = {
            let data_store = self.data_store.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                data_store.failure().await;
                shutdown.trigger(ShutdownReason::DataStoreFailed);
            })
        };

        let served = self.listening.serve(self.pipeline, shutdown.clone()).await;
        watcher.abort();
        served?;

        match (shutdown.reason(), self.data_store.state()) {
            (Some(ShutdownReason::DataStoreFailed), ConnectionState::Failed(error)) => {
                Err(BootError::DataStore(error))
            }
            _ => Ok(()),
        }
    }
}

/// Runs the whole process until shutdown.
pub async fn run(options: BootOptions) -> Result<(), BootError> {
    let settings = load_settings(&options)?;
    let flags = EnvironmentFlags::from_process_env(settings.service_worker.enabled);
    init_logging(&log_config(&settings, &flags))?;

    tracing::info!(
        mode = %flags.deployment_mode,
        dev_build = flags.is_dev_build,
        service_worker_routes = flags.service_worker_routes_enabled(),
        "starting meridian {}",
        crate::VERSION
    );

    let connection_string = std::env::var(CONNECTION_STRING_ENV_VAR)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(BootError::MissingConnectionString)?;

    let running = Application::new(settings, flags, connection_string)
        .start()
        .await?;
    running.run(ShutdownSignal::with_os_signals()).await
}
