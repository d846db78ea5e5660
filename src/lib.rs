//! Server bootstrap library.
//!
//! Chooses a database backend (ephemeral in-process store or persistent
//! remote store), a transport (plain or TLS), attaches a realtime channel
//! and keeps the process listening through transient database outages.

pub mod config;
pub mod db;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use config::ServerConfig;
pub use lifecycle::{Orchestrator, Shutdown};
