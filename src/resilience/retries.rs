//! Retry policy for database connection attempts.
//!
//! # Responsibilities
//! - Decide whether another attempt is allowed after a failure
//! - Compute the delay before the next attempt
//!
//! # Design Decisions
//! - Unbounded by default: the persistent store is awaited until it appears
//! - Fixed delay by default so retry timing is reproducible
//! - Exponential backoff reuses the jittered calculation in backoff.rs

use std::time::Duration;

use crate::resilience::backoff::exponential_delay;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles per failed attempt, with jitter, up to `max_delay`.
    Exponential { max_delay: Duration },
}

/// Retry policy. See `Default` in the config schema for the stock values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base delay between a failure and the next attempt.
    pub delay: Duration,
    /// Total attempts allowed, `None` for unbounded.
    pub max_attempts: Option<u32>,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Fixed-delay policy that never gives up.
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
            backoff: Backoff::Fixed,
        }
    }

    /// Fixed-delay policy allowing `max_attempts` attempts in total.
    pub fn bounded(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts),
            backoff: Backoff::Fixed,
        }
    }

    /// Whether another attempt may follow `attempts_made` failed attempts.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        match self.max_attempts {
            None => true,
            Some(max) => attempts_made < max,
        }
    }

    /// Delay to wait after the `failed_attempts`-th consecutive failure.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max_delay } => exponential_delay(self.delay, failed_attempts, max_delay),
        }
    }
}
