//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Database connection attempt fails:
//!     → retries.rs (is another attempt allowed? how long to wait?)
//!     → backoff.rs (jittered exponential delay, when configured)
//! ```
//!
//! # Design Decisions
//! - Every connection attempt has a deadline (see config TimeoutConfig)
//! - The retry policy is a plain value so tests can make it deterministic

pub mod backoff;
pub mod retries;

pub use retries::{Backoff, RetryPolicy};
