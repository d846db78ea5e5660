//! Database sessions and the read-only handle given to collaborators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::TryStreamExt;
use mongodb::bson::{self, doc, Bson, Document};
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::timeout;

use crate::db::state::{ConnectionMonitor, ConnectionState, StateChange};
use crate::db::types::{DatabaseError, DatabaseResult, Endpoint};
use crate::db::wire::{read_frame, write_frame, Command, Reply};

/// A live connection to a store.
///
/// Cloning is cheap; clones share the underlying connection. Every command
/// is bounded by the socket timeout. On the line protocol any I/O failure or
/// timeout poisons the session and every later command returns
/// [`DatabaseError::Closed`]; a MongoDB session relies on the driver's pool.
#[derive(Clone)]
pub struct DatabaseSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    endpoint: Endpoint,
    socket_timeout: Duration,
    backend: Backend,
    broken: AtomicBool,
}

enum Backend {
    Line(Mutex<BufReader<TcpStream>>),
    Mongo(mongodb::Database),
}

impl DatabaseSession {
    /// Session over the line protocol spoken by the in-process store.
    pub(crate) fn new(endpoint: Endpoint, stream: TcpStream, socket_timeout: Duration) -> Self {
        Self::with_backend(endpoint, Backend::Line(Mutex::new(BufReader::new(stream))), socket_timeout)
    }

    /// Session over a MongoDB client, bound to one database.
    pub(crate) fn mongo(endpoint: Endpoint, database: mongodb::Database, socket_timeout: Duration) -> Self {
        Self::with_backend(endpoint, Backend::Mongo(database), socket_timeout)
    }

    fn with_backend(endpoint: Endpoint, backend: Backend, socket_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                endpoint,
                socket_timeout,
                backend,
                broken: AtomicBool::new(false),
            }),
        }
    }

    /// The endpoint this session is connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.inner.broken.load(Ordering::Acquire)
    }

    /// Send one command and wait for its reply, bounded by the socket timeout.
    pub async fn command(&self, command: &Command) -> DatabaseResult<Reply> {
        if self.is_closed() {
            return Err(DatabaseError::Closed);
        }

        let result = match timeout(self.inner.socket_timeout, self.dispatch(command)).await {
            Ok(result) => result,
            Err(_) => Err(DatabaseError::Timeout {
                stage: "socket",
                after: self.inner.socket_timeout,
            }),
        };

        if result.is_err() && matches!(self.inner.backend, Backend::Line(_)) {
            self.inner.broken.store(true, Ordering::Release);
        }
        result
    }

    async fn dispatch(&self, command: &Command) -> DatabaseResult<Reply> {
        match &self.inner.backend {
            Backend::Line(stream) => {
                let mut stream = stream.lock().await;
                write_frame(&mut *stream, command).await?;
                read_frame::<_, Reply>(&mut *stream)
                    .await?
                    .ok_or(DatabaseError::Closed)
            }
            Backend::Mongo(database) => mongo_command(database, command).await,
        }
    }

    /// Liveness check.
    pub async fn ping(&self) -> DatabaseResult<()> {
        let reply = self.command(&Command::Ping).await?;
        expect_ok(reply).map(|_| ())
    }

    pub async fn insert(&self, collection: &str, document: Value) -> DatabaseResult<()> {
        let reply = self
            .command(&Command::Insert {
                collection: collection.to_string(),
                document,
            })
            .await?;
        expect_ok(reply).map(|_| ())
    }

    pub async fn find(&self, collection: &str) -> DatabaseResult<Vec<Value>> {
        let reply = self
            .command(&Command::Find {
                collection: collection.to_string(),
            })
            .await?;
        Ok(expect_ok(reply)?.documents.unwrap_or_default())
    }
}

/// Run a command against MongoDB, translating documents to and from JSON.
async fn mongo_command(database: &mongodb::Database, command: &Command) -> DatabaseResult<Reply> {
    match command {
        Command::Ping => {
            database.run_command(doc! { "ping": 1 }).await?;
            Ok(Reply::ok())
        }
        Command::Insert { collection, document } => {
            let document = match bson::to_document(document) {
                Ok(document) => document,
                Err(e) => return Ok(Reply::error(format!("document is not an object: {}", e))),
            };
            database.collection::<Document>(collection).insert_one(document).await?;
            Ok(Reply::ok())
        }
        Command::Find { collection } => {
            let cursor = database.collection::<Document>(collection).find(doc! {}).await?;
            let documents: Vec<Document> = cursor.try_collect().await?;
            Ok(Reply::documents(
                documents
                    .into_iter()
                    .map(|d| Bson::Document(d).into_relaxed_extjson())
                    .collect(),
            ))
        }
    }
}

fn expect_ok(reply: Reply) -> DatabaseResult<Reply> {
    if reply.ok {
        Ok(reply)
    } else {
        Err(DatabaseError::Protocol(
            reply.error.unwrap_or_else(|| "command failed".to_string()),
        ))
    }
}

impl std::fmt::Debug for DatabaseSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.inner.backend {
            Backend::Line(_) => "line",
            Backend::Mongo(_) => "mongodb",
        };
        f.debug_struct("DatabaseSession")
            .field("endpoint", &self.inner.endpoint.to_string())
            .field("backend", &backend)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Read-only view of the database for request handlers.
///
/// In persistent mode the server may accept requests before any session
/// exists; handlers check [`DatabaseHandle::session`] and degrade.
#[derive(Debug, Clone)]
pub struct DatabaseHandle {
    monitor: Arc<ConnectionMonitor>,
    session: watch::Receiver<Option<DatabaseSession>>,
}

impl DatabaseHandle {
    pub(crate) fn new(
        monitor: Arc<ConnectionMonitor>,
        session: watch::Receiver<Option<DatabaseSession>>,
    ) -> Self {
        Self { monitor, session }
    }

    pub fn state(&self) -> ConnectionState {
        self.monitor.current()
    }

    /// Receiver tracking the latest connection state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.monitor.watch()
    }

    /// Receiver for every state transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.monitor.subscribe()
    }

    /// The current session, if connected.
    pub fn session(&self) -> Option<DatabaseSession> {
        self.session.borrow().clone()
    }

    /// Wait until a session is available.
    ///
    /// Returns `None` if the connector has gone away.
    pub async fn connected(&self) -> Option<DatabaseSession> {
        let mut session = self.session.clone();
        let current = session
            .wait_for(|s| s.is_some())
            .await
            .ok()
            .and_then(|s| (*s).clone());
        current
    }
}
