//! Configuration validation.
//!
//! Mode invariants (endpoint present, TLS paths present) are carried by the
//! schema types; this pass checks value ranges the types cannot express.

use std::time::Duration;

use crate::config::loader::{
    ConfigError, DB_CONNECT_TIMEOUT_MS, DB_HEARTBEAT_INTERVAL_MS, DB_RETRY_MAX_ATTEMPTS,
    DB_SERVER_SELECTION_TIMEOUT_MS, DB_SOCKET_TIMEOUT_MS,
};
use crate::config::schema::ServerConfig;

/// Validate a resolved configuration, reporting the first failing setting.
pub fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
    let db = &config.database;

    non_zero(DB_SERVER_SELECTION_TIMEOUT_MS, db.timeouts.server_selection)?;
    non_zero(DB_CONNECT_TIMEOUT_MS, db.timeouts.connect)?;
    non_zero(DB_SOCKET_TIMEOUT_MS, db.timeouts.socket)?;
    non_zero(DB_HEARTBEAT_INTERVAL_MS, db.heartbeat_interval)?;

    if db.retry.max_attempts == Some(0) {
        return Err(ConfigError::Invalid {
            var: DB_RETRY_MAX_ATTEMPTS,
            value: "0".to_string(),
            reason: "at least one attempt is required; unset it for unbounded retries".to_string(),
        });
    }

    Ok(())
}

fn non_zero(var: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}
