//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! connector, listener, orchestrator
//!     → logging.rs (structured tracing events, one per transition)
//!     → metrics.rs (attempt counter, connection gauge)
//! ```

pub mod logging;
pub mod metrics;
