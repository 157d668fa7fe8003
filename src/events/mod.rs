//! Event bus adapter.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     internal ledger (NDJSON, or any producer)
//!         → feed.rs → mpsc::Sender<LedgerEvent> → BridgeService
//!
//! Outbound:
//!     ConfigurationStore / SubmissionEngine / ReconciliationListener
//!         → EventPublisher (publisher.rs)
//!         → INITIALIZE, PUT_CONFIG, PAYMENT_SETTLED, PAYMENT_FAILED,
//!           RECONCILIATION_REQUIRED
//! ```
//!
//! # Design Decisions
//! - Inbound delivery is at-least-once; de-duplication is the engine's job
//! - Publishing is synchronous and infallible from the caller's view

pub mod feed;
pub mod publisher;
pub mod types;

pub use feed::{FeedStats, NdjsonFeed};
pub use publisher::{BroadcastPublisher, EventPublisher, EventRecorder};
pub use types::{Direction, LedgerEvent, LifecycleEvent, LifecycleKind};
