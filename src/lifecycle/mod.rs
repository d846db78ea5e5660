//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Resolve config → Database (mode-dependent order) → Bind → Attach → Run
//!
//! Shutdown (shutdown.rs):
//!     Trigger → server drains → retry loop / heartbeat stop → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger shutdown
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
pub use startup::{Orchestrator, Phase, StartupError};
