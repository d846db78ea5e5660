//! Configuration schema definitions.
//!
//! The resolved configuration is immutable once built. Mode invariants are
//! carried by the types: a persistent store always has a non-empty endpoint and
//! an encrypted transport always has both TLS paths.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::db::Endpoint;
use crate::resilience::retries::{Backoff, RetryPolicy};

/// Sentinel value of `DB_CONNECTION_STRING` selecting the ephemeral store.
pub const MEMORY_SENTINEL: &str = "memory";

pub const DEFAULT_HTTP_PORT: u16 = 3000;
pub const DEFAULT_SERVER_PORT: u16 = 3001;
pub const DEFAULT_HTTPS_PORT: u16 = 3001;

/// Root configuration for the bootstrapped server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Which database backend to bring up.
    pub store: StoreMode,

    /// Plain or encrypted listener.
    pub transport: Transport,

    /// Address the listener binds on.
    pub bind_host: IpAddr,

    /// Plain listener port (already resolved for the store mode).
    pub http_port: u16,

    /// Encrypted listener port.
    pub https_port: u16,

    /// Database timeouts, retry policy and heartbeat.
    pub database: DatabaseConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ServerConfig {
    /// Address of the listener that will actually be bound.
    pub fn listen_address(&self) -> SocketAddr {
        let port = match self.transport {
            Transport::Plain => self.http_port,
            Transport::Encrypted(_) => self.https_port,
        };
        SocketAddr::new(self.bind_host, port)
    }

    /// Configuration for an ephemeral store over plain HTTP with defaults.
    pub fn ephemeral() -> Self {
        Self {
            store: StoreMode::Ephemeral,
            transport: Transport::Plain,
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            database: DatabaseConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }

    /// Configuration for a persistent store over plain HTTP with defaults.
    pub fn persistent(endpoint: Endpoint) -> Self {
        Self {
            store: StoreMode::Persistent(endpoint),
            http_port: DEFAULT_SERVER_PORT,
            ..Self::ephemeral()
        }
    }
}

/// Database backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreMode {
    /// Throwaway in-process store, provisioned at startup.
    Ephemeral,
    /// Remote store reached over the network.
    Persistent(Endpoint),
}

impl StoreMode {
    pub fn name(&self) -> &'static str {
        match self {
            StoreMode::Ephemeral => "ephemeral",
            StoreMode::Persistent(_) => "persistent",
        }
    }
}

/// Listener transport selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Plain,
    Encrypted(TlsConfig),
}

impl Transport {
    pub fn name(&self) -> &'static str {
        match self {
            Transport::Plain => "plain",
            Transport::Encrypted(_) => "encrypted",
        }
    }
}

/// TLS material locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to private key file (PEM).
    pub key_path: PathBuf,

    /// Path to certificate chain file (PEM).
    pub cert_path: PathBuf,
}

/// Database connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub timeouts: TimeoutConfig,

    /// Policy for persistent-mode connection retries.
    pub retry: RetryPolicy,

    /// Interval between liveness pings once connected.
    pub heartbeat_interval: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutConfig::default(),
            retry: RetryPolicy::default(),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

/// Timeouts applied to each database connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Time allowed to resolve the endpoint to a server address.
    pub server_selection: Duration,

    /// Time allowed to establish the TCP connection.
    pub connect: Duration,

    /// Time allowed for a single command round trip.
    pub socket: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            server_selection: Duration::from_secs(30),
            connect: Duration::from_secs(30),
            socket: Duration::from_secs(45),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_attempts: None,
            backoff: Backoff::Fixed,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Default)]
pub struct ObservabilityConfig {
    /// Prometheus exporter bind address; disabled when unset.
    pub metrics_address: Option<SocketAddr>,
}
