//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! ListeningSocket (plain or TLS)
//!     → server.rs (Axum router: /health, tracing)
//!     → websocket.rs (realtime channel merged in at attach time)
//! ```

pub mod server;
pub mod websocket;

pub use server::build_router;
pub use websocket::{RealtimeAttacher, WebSocketHub};
