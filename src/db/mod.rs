//! Database subsystem.
//!
//! # Data Flow
//! ```text
//! ServerConfig.store
//!     → Ephemeral: memory.rs (provision loopback store, generated endpoint)
//!     → Persistent: configured Endpoint, taken verbatim
//!     → connector.rs (attempts, retry policy, heartbeat)
//!     → driver.rs (MongoDriver for remote stores, WireDriver for the
//!       in-process one; connect → ping, under timeouts)
//!     → session.rs (DatabaseSession, published through DatabaseHandle)
//!
//! State (state.rs):
//!     Disconnected → Connecting → Connected | Errored → Connecting ...
//! ```
//!
//! # Design Decisions
//! - No global client: sessions are values handed out through a handle
//! - State changes are data on channels, not callbacks
//! - The in-process store and WireDriver share one line protocol (wire.rs)

pub mod connector;
pub mod driver;
pub mod memory;
pub mod session;
pub mod state;
pub mod types;
pub mod wire;

pub use connector::DatabaseConnector;
pub use driver::{MongoDriver, StoreDriver, WireDriver};
pub use memory::EphemeralStore;
pub use session::{DatabaseHandle, DatabaseSession};
pub use state::{ConnectionMonitor, ConnectionState, StateChange};
pub use types::{DatabaseError, DatabaseResult, Endpoint, EndpointError};
