//! Submission engine subsystem.
//!
//! # Data Flow
//! ```text
//! LedgerEvent
//!     → submission.rs (claim, link, build, submit, classify)
//!     → sequence.rs (per-account sequence reservation)
//!     → locks.rs (per-account and per-event mutual exclusion)
//!     → state.rs (PendingTransaction persisted at every transition)
//! ```
//!
//! # Design Decisions
//! - Transactions of one external account are serialized; different
//!   accounts proceed concurrently
//! - Durable state is written before any externally visible step

pub mod locks;
pub mod sequence;
pub mod state;
pub mod submission;

pub use locks::{AccountLocks, Claim};
pub use sequence::SequenceCursors;
pub use state::{FailureKind, FailureReason, PendingTransaction, TxStatus};
pub use submission::{RecoveryReport, SubmissionEngine};
