//! Endpoint type and error definitions.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use url::{Host, Url};

/// Errors that can occur while provisioning or talking to a store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The in-process store could not be started.
    #[error("failed to provision ephemeral store: {0}")]
    Provisioning(#[source] std::io::Error),

    /// Host name lookup failed.
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        source: std::io::Error,
    },

    /// Host name resolved to nothing.
    #[error("no addresses found for {0}")]
    NoAddress(String),

    /// TCP connection could not be established.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// An attempt stage exceeded its deadline.
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection string cannot be dialled by this driver.
    #[error("unusable connection string: {0}")]
    Endpoint(#[from] EndpointError),

    /// Error reported by the MongoDB driver.
    #[error("mongodb: {0}")]
    Driver(#[from] mongodb::error::Error),

    /// A single frame exceeded the size limit.
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// The store sent something that is not a valid reply.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The session is no longer usable.
    #[error("session closed")]
    Closed,

    /// A bounded retry policy ran out of attempts.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<DatabaseError>,
    },

    /// Connection attempts were cancelled by process shutdown.
    #[error("connection attempts cancelled by shutdown")]
    Shutdown,
}

/// Result type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Error returned when a connection string cannot be dialled directly.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EndpointError {
    #[error("not a valid connection string: {0}")]
    Parse(#[from] url::ParseError),

    #[error("connection string has no host")]
    MissingHost,

    /// Seed lists and SRV records are only understood by the MongoDB driver.
    #[error("connection string names more than one server or an SRV record")]
    NotSingleHost,
}

/// A store connection string, kept verbatim.
///
/// Display redacts any password embedded in the string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    uri: String,
}

impl Endpoint {
    /// Port used when the connection string does not name one.
    pub const DEFAULT_PORT: u16 = 27017;

    /// Wrap a connection string without interpreting it.
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// Build the endpoint of a locally bound store.
    pub fn local(addr: SocketAddr) -> Self {
        Self::new(format!("mongodb://{}/", addr))
    }

    /// The connection string as given.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Host and port of a `scheme://[user:pass@]host[:port][/path]` string.
    pub fn socket_target(&self) -> Result<(String, u16), EndpointError> {
        if self.uri.starts_with("mongodb+srv://") {
            return Err(EndpointError::NotSingleHost);
        }
        if let Some((_, rest)) = self.uri.split_once("://") {
            if authority(rest).contains(',') {
                return Err(EndpointError::NotSingleHost);
            }
        }

        let url = Url::parse(&self.uri)?;
        let host = match url.host() {
            Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => return Err(EndpointError::MissingHost),
        };
        Ok((host, url.port().unwrap_or(Self::DEFAULT_PORT)))
    }

    /// Redact the password of a connection string for logging.
    pub fn redact(uri: &str) -> String {
        let Some((scheme, rest)) = uri.split_once("://") else {
            return uri.to_string();
        };
        let Some(at) = authority(rest).rfind('@') else {
            return uri.to_string();
        };
        match rest[..at].split_once(':') {
            Some((user, _)) => format!("{}://{}:****@{}", scheme, user, &rest[at + 1..]),
            None => uri.to_string(),
        }
    }
}

/// The `[user:pass@]hosts` part after the scheme.
fn authority(rest: &str) -> &str {
    let end = rest.find(|c| c == '/' || c == '?').unwrap_or(rest.len());
    &rest[..end]
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&Self::redact(&self.uri))
    }
}
