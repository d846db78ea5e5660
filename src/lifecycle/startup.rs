//! Startup orchestration.
//!
//! # Phases
//! ```text
//! Resolving → ConnectingDb → Binding → Attaching → Running
//!     any of them → Failed
//! ```
//!
//! # Ordering
//! - Ephemeral store: connect first, then bind (the endpoint only exists
//!   once the store is provisioned)
//! - Persistent store: bind first, then start the retry loop in the
//!   background, so the server listens while the database converges
//! - The realtime channel is attached once, after binding, before serving
//!
//! # Design Decisions
//! - Fail fast: every startup error is fatal and logged exactly once
//! - Transient database errors never reach this layer

use axum::Router;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{self, ConfigError, ServerConfig, StoreMode};
use crate::db::{DatabaseConnector, DatabaseError, DatabaseHandle, DatabaseResult, MongoDriver, StoreDriver};
use crate::http::websocket::{RealtimeAttacher, WebSocketHub};
use crate::lifecycle::shutdown::Shutdown;
use crate::net::{self, TransportError};
use crate::observability::metrics;

/// Orchestrator phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolving,
    ConnectingDb,
    Binding,
    Attaching,
    Running,
    Failed,
}

/// Fatal startup or runtime error.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Wires configuration, database, transport and realtime channel together.
pub struct Orchestrator<D = MongoDriver, R = WebSocketHub> {
    driver: D,
    realtime: R,
    shutdown: Shutdown,
    phase: watch::Sender<Phase>,
}

impl Orchestrator {
    /// Orchestrator with the MongoDB driver and the WebSocket hub.
    pub fn new() -> Self {
        let (phase, _) = watch::channel(Phase::Resolving);
        Self {
            driver: MongoDriver,
            realtime: WebSocketHub::default(),
            shutdown: Shutdown::new(),
            phase,
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl<D, R> Orchestrator<D, R>
where
    D: StoreDriver,
    R: RealtimeAttacher,
{
    /// Use `driver` for persistent endpoints. The in-process store always
    /// speaks the line protocol.
    pub fn with_driver<D2: StoreDriver>(self, driver: D2) -> Orchestrator<D2, R> {
        Orchestrator {
            driver,
            realtime: self.realtime,
            shutdown: self.shutdown,
            phase: self.phase,
        }
    }

    pub fn with_realtime<R2: RealtimeAttacher>(self, realtime: R2) -> Orchestrator<D, R2> {
        Orchestrator {
            driver: self.driver,
            realtime,
            shutdown: self.shutdown,
            phase: self.phase,
        }
    }

    /// Handle that stops the orchestrator gracefully when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Receiver tracking the current phase.
    pub fn phases(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Resolve configuration through `lookup`, then start and run the server.
    ///
    /// `app` builds the request handler tree from the database handle.
    pub async fn run<F, A>(self, lookup: F, app: A) -> Result<(), StartupError>
    where
        F: Fn(&str) -> Option<String>,
        A: FnOnce(DatabaseHandle) -> Router,
    {
        enter(&self.phase, Phase::Resolving);
        match config::resolve(lookup) {
            Ok(config) => self.run_with_config(config, app).await,
            Err(e) => {
                fail(&self.phase, &e);
                Err(e.into())
            }
        }
    }

    /// Start and run the server with an already resolved configuration.
    ///
    /// Returns `Ok` after a graceful shutdown.
    pub async fn run_with_config<A>(self, config: ServerConfig, app: A) -> Result<(), StartupError>
    where
        A: FnOnce(DatabaseHandle) -> Router,
    {
        let Orchestrator {
            driver,
            realtime,
            shutdown,
            phase,
        } = self;

        let result = start(driver, &realtime, &shutdown, &phase, config, app).await;
        if let Err(e) = &result {
            fail(&phase, e);
        }
        result
    }
}

async fn start<D, R, A>(
    driver: D,
    realtime: &R,
    shutdown: &Shutdown,
    phase: &watch::Sender<Phase>,
    config: ServerConfig,
    app: A,
) -> Result<(), StartupError>
where
    D: StoreDriver,
    R: RealtimeAttacher,
    A: FnOnce(DatabaseHandle) -> Router,
{
    tracing::info!(
        store = config.store.name(),
        transport = config.transport.name(),
        address = %config.listen_address(),
        "Configuration resolved"
    );

    if let Some(addr) = config.observability.metrics_address {
        metrics::init_metrics(addr);
    }

    let connector = DatabaseConnector::new(driver, config.database.clone());
    let db = connector.handle();

    let (mut socket, mut database_task): (_, JoinHandle<DatabaseResult<()>>) = match config.store.clone() {
        StoreMode::Ephemeral => {
            enter(phase, Phase::ConnectingDb);
            let (store, session) = connector.connect_ephemeral().await?;

            enter(phase, Phase::Binding);
            let socket = net::bind(&config, app(db)).await?;

            let signal = shutdown.subscribe();
            let task = tokio::spawn(async move {
                connector.keep_alive(store, session, signal).await;
                Ok(())
            });
            (socket, task)
        }
        StoreMode::Persistent(endpoint) => {
            enter(phase, Phase::Binding);
            let socket = net::bind(&config, app(db)).await?;

            enter(phase, Phase::ConnectingDb);
            let task = tokio::spawn(connector.supervise(endpoint, shutdown.subscribe()));
            (socket, task)
        }
    };

    enter(phase, Phase::Attaching);
    if let Err(e) = socket.attach(realtime) {
        database_task.abort();
        return Err(e.into());
    }

    enter(phase, Phase::Running);
    let scheme = if socket.is_encrypted() { "https" } else { "http" };
    tracing::info!(address = %socket.local_addr(), "Listening for {} connections", scheme);

    let serve = socket.serve(shutdown.subscribe());
    tokio::select! {
        served = serve => {
            // The database task observes the same signal
            shutdown.trigger();
            served?;
            database_task.await??;
        }
        finished = &mut database_task => {
            shutdown.trigger();
            finished??;
        }
    }

    Ok(())
}

fn enter(phase: &watch::Sender<Phase>, next: Phase) {
    let previous = phase.send_replace(next);
    if previous != next {
        tracing::debug!(from = ?previous, to = ?next, "Startup phase changed");
    }
}

fn fail(phase: &watch::Sender<Phase>, error: &dyn std::fmt::Display) {
    enter(phase, Phase::Failed);
    tracing::error!(error = %error, "Startup failed");
}
