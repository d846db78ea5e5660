//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ServerConfig.transport
//!     → Plain: listener.rs binds TCP on http_port
//!     → Encrypted: tls.rs reads key + cert, listener.rs binds TLS on https_port
//!     → ListeningSocket (router held until serve)
//!     → realtime channel attached once
//!     → serve until shutdown
//! ```
//!
//! # Design Decisions
//! - Transports are mutually exclusive; exactly one listener per process
//! - TLS material is fully loaded before anything is bound
//! - The TLS flag selects the transport, never the database mode

pub mod listener;
pub mod tls;

pub use listener::{bind, ListeningSocket, TransportError};
