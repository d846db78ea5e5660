//! Configuration resolution from the process environment.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::config::schema::{
    DatabaseConfig, ObservabilityConfig, ServerConfig, StoreMode, TimeoutConfig, TlsConfig,
    Transport, DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT, DEFAULT_SERVER_PORT, MEMORY_SENTINEL,
};
use crate::config::validation::validate_config;
use crate::db::Endpoint;
use crate::resilience::retries::{Backoff, RetryPolicy};

pub const DB_CONNECTION_STRING: &str = "DB_CONNECTION_STRING";
pub const USE_SSL: &str = "USE_SSL";
pub const SSL_KEY_FILE: &str = "SSL_KEY_FILE";
pub const SSL_CRT_FILE: &str = "SSL_CRT_FILE";
pub const HTTP_PORT: &str = "HTTP_PORT";
pub const HTTPS_PORT: &str = "HTTPS_PORT";
pub const SERVER_PORT: &str = "SERVER_PORT";
pub const BIND_HOST: &str = "BIND_HOST";
pub const DB_SERVER_SELECTION_TIMEOUT_MS: &str = "DB_SERVER_SELECTION_TIMEOUT_MS";
pub const DB_CONNECT_TIMEOUT_MS: &str = "DB_CONNECT_TIMEOUT_MS";
pub const DB_SOCKET_TIMEOUT_MS: &str = "DB_SOCKET_TIMEOUT_MS";
pub const DB_RETRY_DELAY_MS: &str = "DB_RETRY_DELAY_MS";
pub const DB_RETRY_MAX_ATTEMPTS: &str = "DB_RETRY_MAX_ATTEMPTS";
pub const DB_RETRY_BACKOFF: &str = "DB_RETRY_BACKOFF";
pub const DB_RETRY_MAX_DELAY_MS: &str = "DB_RETRY_MAX_DELAY_MS";
pub const DB_HEARTBEAT_INTERVAL_MS: &str = "DB_HEARTBEAT_INTERVAL_MS";
pub const METRICS_ADDRESS: &str = "METRICS_ADDRESS";

/// Error type for configuration resolution.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    #[error("missing required setting {var}: {hint}")]
    Missing { var: &'static str, hint: &'static str },

    /// A variable is set but cannot be used.
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Resolve configuration from the process environment.
pub fn resolve_from_env() -> Result<ServerConfig, ConfigError> {
    resolve(|key| std::env::var(key).ok())
}

/// Resolve configuration through an arbitrary variable lookup.
///
/// Empty values are treated the same as unset ones.
pub fn resolve<F>(lookup: F) -> Result<ServerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env { lookup };

    let connection_string = env.get(DB_CONNECTION_STRING).ok_or(ConfigError::Missing {
        var: DB_CONNECTION_STRING,
        hint: "no database configured; use \"memory\" for an in-process store or a connection string for a remote one",
    })?;

    let store = if connection_string == MEMORY_SENTINEL {
        StoreMode::Ephemeral
    } else {
        // Interpreted by the driver on each attempt
        StoreMode::Persistent(Endpoint::new(connection_string))
    };

    let use_ssl = env.get(USE_SSL).as_deref() == Some("true");

    let transport = if use_ssl {
        let key_path = env.get(SSL_KEY_FILE).ok_or(ConfigError::Missing {
            var: SSL_KEY_FILE,
            hint: "USE_SSL=true requires a private key path",
        })?;
        let cert_path = env.get(SSL_CRT_FILE).ok_or(ConfigError::Missing {
            var: SSL_CRT_FILE,
            hint: "USE_SSL=true requires a certificate path",
        })?;
        Transport::Encrypted(TlsConfig {
            key_path: PathBuf::from(key_path),
            cert_path: PathBuf::from(cert_path),
        })
    } else {
        Transport::Plain
    };

    let http_port = match store {
        StoreMode::Ephemeral => env.parse(HTTP_PORT)?.unwrap_or(DEFAULT_HTTP_PORT),
        StoreMode::Persistent(_) => env.parse(SERVER_PORT)?.unwrap_or(DEFAULT_SERVER_PORT),
    };
    let https_port = env.parse(HTTPS_PORT)?.unwrap_or(DEFAULT_HTTPS_PORT);
    let bind_host: Option<IpAddr> = env.parse(BIND_HOST)?;

    let defaults = DatabaseConfig::default();
    let timeouts = TimeoutConfig {
        server_selection: env
            .millis(DB_SERVER_SELECTION_TIMEOUT_MS)?
            .unwrap_or(defaults.timeouts.server_selection),
        connect: env
            .millis(DB_CONNECT_TIMEOUT_MS)?
            .unwrap_or(defaults.timeouts.connect),
        socket: env
            .millis(DB_SOCKET_TIMEOUT_MS)?
            .unwrap_or(defaults.timeouts.socket),
    };

    let backoff = match env.get(DB_RETRY_BACKOFF).as_deref() {
        None | Some("fixed") => Backoff::Fixed,
        Some("exponential") => Backoff::Exponential {
            max_delay: env
                .millis(DB_RETRY_MAX_DELAY_MS)?
                .unwrap_or(Duration::from_secs(60)),
        },
        Some(other) => {
            return Err(ConfigError::Invalid {
                var: DB_RETRY_BACKOFF,
                value: other.to_string(),
                reason: "expected \"fixed\" or \"exponential\"".to_string(),
            })
        }
    };

    let retry = RetryPolicy {
        delay: env.millis(DB_RETRY_DELAY_MS)?.unwrap_or(defaults.retry.delay),
        max_attempts: env.parse(DB_RETRY_MAX_ATTEMPTS)?,
        backoff,
    };

    let metrics_address: Option<SocketAddr> = env.parse(METRICS_ADDRESS)?;

    let config = ServerConfig {
        store,
        transport,
        bind_host: bind_host.unwrap_or(ServerConfig::ephemeral().bind_host),
        http_port,
        https_port,
        database: DatabaseConfig {
            timeouts,
            retry,
            heartbeat_interval: env
                .millis(DB_HEARTBEAT_INTERVAL_MS)?
                .unwrap_or(defaults.heartbeat_interval),
        },
        observability: ObservabilityConfig { metrics_address },
    };

    validate_config(&config)?;
    Ok(config)
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(var) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn millis(&self, var: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(var)?.map(Duration::from_millis))
    }
}
