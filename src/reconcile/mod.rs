//! Reconciliation subsystem.
//!
//! # Data Flow
//! ```text
//! every poll interval:
//!     SUBMITTED older than one interval → SubmissionEngine::verify_submitted
//!     idle link, network sequence ahead → ReconciliationFlag
//!                                       → quarantine + RECONCILIATION_REQUIRED
//! ```

pub mod flag;
pub mod listener;

pub use flag::ReconciliationFlag;
pub use listener::{ReconciliationListener, TickReport};
