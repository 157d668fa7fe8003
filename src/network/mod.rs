//! External network subsystem.
//!
//! # Data Flow
//! ```text
//! SubmissionEngine / AccountLinker / ReconciliationListener
//!     → client.rs (NetworkClient trait)
//!         → horizon.rs (HTTP, timeouts, failover)
//!         → scripted.rs (in-memory ledger for tests and dry runs)
//! ```
//!
//! # Design Decisions
//! - A transport error on submit means "unknown outcome", never "failed"
//! - Definitive rejections are typed so the engine can tell a sequence
//!   conflict from a final refusal

pub mod client;
pub mod horizon;
pub mod scripted;
pub mod types;

pub use client::NetworkClient;
pub use horizon::HorizonClient;
pub use scripted::{ScriptedNetwork, SubmitStep};
pub use types::{ExternalTxStatus, NetworkError, RejectionReason, SubmitOutcome};
