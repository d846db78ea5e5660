//! Ephemeral in-process store.
//!
//! # Responsibilities
//! - Bind a loopback listener on an OS-assigned port
//! - Serve the store wire protocol from an in-memory collection map
//! - Report its generated endpoint so the connector can dial it
//!
//! # Design Decisions
//! - Nothing survives the process; dropping the store closes every client
//! - Same session type as a remote store, so callers cannot tell them apart

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};

use crate::db::types::{DatabaseError, DatabaseResult, Endpoint};
use crate::db::wire::{read_frame_within, write_frame, Command, Reply, MAX_FRAME_BYTES};
use crate::resilience::backoff::exponential_delay;

const ACCEPT_RETRY_BASE: Duration = Duration::from_millis(10);
const ACCEPT_RETRY_MAX: Duration = Duration::from_secs(1);

type Collections = Arc<DashMap<String, Vec<Value>>>;

/// A throwaway store living inside this process.
pub struct EphemeralStore {
    endpoint: Endpoint,
    collections: Collections,
    accept_task: JoinHandle<()>,
}

impl EphemeralStore {
    /// Start a new store on `127.0.0.1` with an OS-assigned port.
    pub async fn provision() -> DatabaseResult<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(DatabaseError::Provisioning)?;
        let addr: SocketAddr = listener.local_addr().map_err(DatabaseError::Provisioning)?;

        let collections: Collections = Arc::new(DashMap::new());
        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&collections)));

        let endpoint = Endpoint::local(addr);
        tracing::info!(endpoint = %endpoint, "Ephemeral store provisioned");

        Ok(Self {
            endpoint,
            collections,
            accept_task,
        })
    }

    /// The generated endpoint clients should connect to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of documents currently held in `collection`.
    pub fn document_count(&self, collection: &str) -> usize {
        self.collections.get(collection).map(|docs| docs.len()).unwrap_or(0)
    }
}

impl Drop for EphemeralStore {
    fn drop(&mut self) {
        // Client tasks live in the accept task's JoinSet and go with it
        self.accept_task.abort();
        tracing::debug!(endpoint = %self.endpoint, "Ephemeral store stopped");
    }
}

async fn accept_loop(listener: TcpListener, collections: Collections) {
    let mut clients = JoinSet::new();
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    failures = 0;
                    tracing::trace!(peer_addr = %peer, "Store client connected");
                    clients.spawn(serve_client(stream, Arc::clone(&collections), MAX_FRAME_BYTES));
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let pause = accept_pause(failures);
                    tracing::warn!(error = %e, pause_ms = pause.as_millis() as u64, "Ephemeral store accept failed");
                    tokio::time::sleep(pause).await;
                }
            },
            Some(_) = clients.join_next(), if !clients.is_empty() => {}
        }
    }
}

/// Pause after the `failures`-th consecutive accept error.
fn accept_pause(failures: u32) -> Duration {
    exponential_delay(ACCEPT_RETRY_BASE, failures, ACCEPT_RETRY_MAX)
}

async fn serve_client(stream: TcpStream, collections: Collections, frame_limit: u64) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let (reply, close) = match read_frame_within::<_, Command>(&mut reader, frame_limit).await {
            Ok(Some(command)) => (apply(&collections, command), false),
            Ok(None) => break,
            Err(DatabaseError::Protocol(message)) => (Reply::error(message), false),
            // The tail of the line is still buffered
            Err(e @ DatabaseError::FrameTooLarge { .. }) => (Reply::error(e.to_string()), true),
            Err(e) => {
                tracing::debug!(error = %e, "Store client read failed");
                break;
            }
        };

        if write_frame(&mut write_half, &reply).await.is_err() || close {
            break;
        }
    }
}

fn apply(collections: &DashMap<String, Vec<Value>>, command: Command) -> Reply {
    match command {
        Command::Ping => Reply::ok(),
        Command::Insert { collection, document } => {
            collections.entry(collection).or_default().push(document);
            Reply::ok()
        }
        Command::Find { collection } => Reply::documents(
            collections
                .get(&collection)
                .map(|docs| docs.value().clone())
                .unwrap_or_default(),
        ),
    }
}
