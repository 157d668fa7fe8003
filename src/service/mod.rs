//! Bridge service.
//!
//! # Data Flow
//! ```text
//! mpsc::Receiver<LedgerEvent>
//!     → dispatcher.rs (halted? hold; quarantined? park)
//!     → per-account worker queue
//!     → SubmissionEngine::process_event
//!     → error scope: halt | park account | drop event | retry with backoff
//! ```

pub mod dispatcher;

pub use dispatcher::BridgeService;
