//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! process environment
//!     → loader.rs (read variables, apply defaults, select modes)
//!     → validation.rs (range checks)
//!     → ServerConfig (validated, immutable)
//!     → handed by reference to every subsystem
//! ```
//!
//! # Design Decisions
//! - Config is immutable once resolved
//! - Only `DB_CONNECTION_STRING` is required; everything else has a default
//! - A missing required value is fatal, never defaulted

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{resolve, resolve_from_env, ConfigError};
pub use schema::{
    DatabaseConfig, ObservabilityConfig, ServerConfig, StoreMode, TimeoutConfig, TlsConfig,
    Transport,
};
