//! Stellar bridge synchronization engine.
//!
//! Mirrors deposit and withdrawal events of an internal ledger as signed
//! payment transactions on a Stellar-style network, with at most one
//! confirmed transaction per internal event.

pub mod builder;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod linker;
pub mod network;
pub mod observability;
pub mod reconcile;
pub mod resilience;
pub mod service;
pub mod store;

pub use config::{BridgeConfiguration, BridgeSettings, ConfigurationStore, VersionedConfiguration};
pub use engine::{PendingTransaction, SubmissionEngine, TxStatus};
pub use error::{BridgeError, BridgeResult, ErrorScope};
pub use events::{LedgerEvent, LifecycleEvent, LifecycleKind};
pub use lifecycle::{Bridge, BridgeHandle, Shutdown};
