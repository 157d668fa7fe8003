//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Submission attempt:
//!     → timeouts.rs (deadline per attempt)
//!     → On failure: retries.rs (resubmit, rebuild or give up)
//!     → backoff.rs (exponential delay with jitter before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Every network call has a deadline
//! - A timeout is an unknown outcome, resolved by a status query before any retry
//! - The retry budget comes from the configuration snapshot of the transaction

pub mod backoff;
pub mod retries;
pub mod timeouts;
