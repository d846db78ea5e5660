//! Store drivers: how a session is opened against an endpoint.
//!
//! - [`MongoDriver`]: remote MongoDB deployments (single host, replica set
//!   seed lists, `mongodb+srv://`), through the official driver
//! - [`WireDriver`]: the line protocol spoken by the in-process store

use std::future::Future;

use mongodb::options::ClientOptions;
use mongodb::Client;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;

use crate::config::TimeoutConfig;
use crate::db::session::DatabaseSession;
use crate::db::types::{DatabaseError, DatabaseResult, Endpoint};

/// Database pinged when the connection string names none.
pub const DEFAULT_DATABASE: &str = "admin";

/// Opens sessions against a store endpoint.
///
/// One call is one connection attempt; retrying is the connector's job.
pub trait StoreDriver: Send + Sync + 'static {
    fn connect(
        &self,
        endpoint: &Endpoint,
        timeouts: &TimeoutConfig,
    ) -> impl Future<Output = DatabaseResult<DatabaseSession>> + Send;
}

/// Driver for remote MongoDB deployments.
///
/// An attempt parses the connection string (SRV lookups included, bounded by
/// the server selection timeout), builds a client with the configured
/// timeouts and confirms the deployment answers `ping`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoDriver;

impl StoreDriver for MongoDriver {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeouts: &TimeoutConfig,
    ) -> DatabaseResult<DatabaseSession> {
        let mut options = timeout(timeouts.server_selection, async {
            ClientOptions::parse(endpoint.uri()).await
        })
        .await
        .map_err(|_| DatabaseError::Timeout {
            stage: "connection string resolution",
            after: timeouts.server_selection,
        })??;

        options.server_selection_timeout = Some(timeouts.server_selection);
        options.connect_timeout = Some(timeouts.connect);
        if options.app_name.is_none() {
            options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        }

        let client = Client::with_options(options)?;
        let database = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));
        tracing::debug!(endpoint = %endpoint, database = database.name(), "MongoDB client created");

        let session = DatabaseSession::mongo(endpoint.clone(), database, timeouts.socket);
        session.ping().await?;
        Ok(session)
    }
}

/// Driver speaking the store line protocol over TCP.
///
/// An attempt is: resolve the host (server selection timeout), connect to
/// the first reachable address (connect timeout), then ping (socket timeout).
#[derive(Debug, Clone, Copy, Default)]
pub struct WireDriver;

impl StoreDriver for WireDriver {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        timeouts: &TimeoutConfig,
    ) -> DatabaseResult<DatabaseSession> {
        let (host, port) = endpoint.socket_target()?;

        let addrs: Vec<_> = timeout(timeouts.server_selection, lookup_host((host.as_str(), port)))
            .await
            .map_err(|_| DatabaseError::Timeout {
                stage: "server selection",
                after: timeouts.server_selection,
            })?
            .map_err(|source| DatabaseError::Resolve {
                host: host.clone(),
                source,
            })?
            .collect();

        let mut last_error = DatabaseError::NoAddress(host);
        for addr in addrs {
            match timeout(timeouts.connect, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    stream.set_nodelay(true)?;
                    let session = DatabaseSession::new(endpoint.clone(), stream, timeouts.socket);
                    session.ping().await?;
                    return Ok(session);
                }
                Ok(Err(source)) => {
                    tracing::debug!(addr = %addr, error = %source, "Store address unreachable");
                    last_error = DatabaseError::Connect { addr, source };
                }
                Err(_) => {
                    tracing::debug!(addr = %addr, "Store connect timed out");
                    last_error = DatabaseError::Timeout {
                        stage: "connect",
                        after: timeouts.connect,
                    };
                }
            }
        }

        Err(last_error)
    }
}
