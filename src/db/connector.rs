//! Database connector: establishes and supervises the store session.
//!
//! # Strategies
//! - Ephemeral: provision an in-process store, connect once over the line
//!   protocol, no retry
//! - Persistent: connect through the configured driver (MongoDB by default)
//!   with the retry policy, re-enter the retry loop whenever the heartbeat
//!   reports the session lost
//!
//! Attempts run strictly one after another inside a single task. Failed
//! attempts become scheduled retries; only an exhausted bounded policy is
//! reported to the caller.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::DatabaseConfig;
use crate::db::driver::{MongoDriver, StoreDriver, WireDriver};
use crate::db::memory::EphemeralStore;
use crate::db::session::{DatabaseHandle, DatabaseSession};
use crate::db::state::{ConnectionMonitor, ConnectionState};
use crate::db::types::{DatabaseError, DatabaseResult, Endpoint};
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::observability::metrics;

/// Why a heartbeat loop ended.
enum SessionEnd {
    Lost,
    Shutdown,
}

/// Owns the connection state and the current session.
///
/// `D` is the driver used for persistent endpoints.
pub struct DatabaseConnector<D = MongoDriver> {
    driver: D,
    config: DatabaseConfig,
    monitor: Arc<ConnectionMonitor>,
    sessions: watch::Sender<Option<DatabaseSession>>,
}

impl DatabaseConnector<MongoDriver> {
    pub fn with_mongo_driver(config: DatabaseConfig) -> Self {
        Self::new(MongoDriver, config)
    }
}

impl DatabaseConnector<WireDriver> {
    pub fn with_wire_driver(config: DatabaseConfig) -> Self {
        Self::new(WireDriver, config)
    }
}

impl<D: StoreDriver> DatabaseConnector<D> {
    pub fn new(driver: D, config: DatabaseConfig) -> Self {
        let (sessions, _) = watch::channel(None);
        Self {
            driver,
            config,
            monitor: Arc::new(ConnectionMonitor::new()),
            sessions,
        }
    }

    /// Read-only handle for collaborators.
    pub fn handle(&self) -> DatabaseHandle {
        DatabaseHandle::new(Arc::clone(&self.monitor), self.sessions.subscribe())
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    /// One connection attempt, with state transitions and logging.
    async fn attempt<T: StoreDriver>(
        &self,
        driver: &T,
        endpoint: &Endpoint,
        attempt: u32,
    ) -> DatabaseResult<DatabaseSession> {
        self.monitor.transition(ConnectionState::Connecting);
        tracing::info!(endpoint = %endpoint, attempt, "Connecting to database");

        match driver.connect(endpoint, &self.config.timeouts).await {
            Ok(session) => {
                self.sessions.send_replace(Some(session.clone()));
                self.monitor.transition(ConnectionState::Connected);
                metrics::record_connect_attempt(true);
                tracing::info!(endpoint = %endpoint, attempt, "Database connected");
                Ok(session)
            }
            Err(e) => {
                self.monitor.transition(ConnectionState::Errored);
                metrics::record_connect_attempt(false);
                tracing::error!(endpoint = %endpoint, attempt, error = %e, "Database connection failed");
                Err(e)
            }
        }
    }

    /// Provision an ephemeral store and connect to its generated endpoint once.
    ///
    /// Any failure is fatal; there is nothing external to wait for.
    pub async fn connect_ephemeral(&self) -> DatabaseResult<(EphemeralStore, DatabaseSession)> {
        tracing::info!("Starting ephemeral store");
        let store = EphemeralStore::provision().await?;
        let session = self.attempt(&WireDriver, store.endpoint(), 1).await?;
        Ok((store, session))
    }

    /// Connect to `endpoint`, retrying per policy until success.
    ///
    /// Returns [`DatabaseError::Shutdown`] if shutdown fires first and
    /// [`DatabaseError::RetriesExhausted`] if a bounded policy runs out.
    pub async fn connect_with_retry(
        &self,
        endpoint: &Endpoint,
        shutdown: &mut ShutdownSignal,
    ) -> DatabaseResult<DatabaseSession> {
        let policy = self.config.retry;
        let mut attempt: u32 = 1;

        loop {
            let result = tokio::select! {
                result = self.attempt(&self.driver, endpoint, attempt) => result,
                _ = shutdown.recv() => return Err(DatabaseError::Shutdown),
            };

            let error = match result {
                Ok(session) => return Ok(session),
                Err(e) => e,
            };

            if !policy.allows_retry(attempt) {
                tracing::error!(endpoint = %endpoint, attempts = attempt, "Database retry policy exhausted");
                return Err(DatabaseError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let delay = policy.delay_for(attempt);
            tracing::warn!(
                endpoint = %endpoint,
                delay_ms = delay.as_millis() as u64,
                next_attempt = attempt + 1,
                "Database retry scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => return Err(DatabaseError::Shutdown),
            }
            attempt = attempt.saturating_add(1);
        }
    }

    /// Ping the session every heartbeat interval until it fails or shutdown.
    async fn heartbeat(&self, session: &DatabaseSession, shutdown: &mut ShutdownSignal) -> SessionEnd {
        let period = self.config.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = session.ping().await {
                        self.sessions.send_replace(None);
                        self.monitor.transition(ConnectionState::Disconnected);
                        tracing::warn!(endpoint = %session.endpoint(), error = %e, "Database connection lost");
                        return SessionEnd::Lost;
                    }
                }
                _ = shutdown.recv() => return SessionEnd::Shutdown,
            }
        }
    }

    /// Persistent mode: connect, heartbeat, reconnect after loss.
    ///
    /// Runs until shutdown (`Ok`) or until a bounded policy is exhausted.
    pub async fn supervise(self, endpoint: Endpoint, mut shutdown: ShutdownSignal) -> DatabaseResult<()> {
        loop {
            let session = match self.connect_with_retry(&endpoint, &mut shutdown).await {
                Ok(session) => session,
                Err(DatabaseError::Shutdown) => return Ok(()),
                Err(e) => return Err(e),
            };

            match self.heartbeat(&session, &mut shutdown).await {
                SessionEnd::Lost => {
                    tracing::info!(endpoint = %endpoint, "Re-establishing database connection");
                }
                SessionEnd::Shutdown => return Ok(()),
            }
        }
    }

    /// Ephemeral mode: keep the store alive and heartbeat it until shutdown.
    ///
    /// A lost session is logged but not re-established.
    pub async fn keep_alive(self, store: EphemeralStore, session: DatabaseSession, mut shutdown: ShutdownSignal) {
        if let SessionEnd::Lost = self.heartbeat(&session, &mut shutdown).await {
            shutdown.recv().await;
        }
        drop(store);
    }
}
