//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! settings file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → BridgeSettings (process wiring, read once)
//!     → [bridge] section seeded into store.rs
//!
//! Configuration update (authorized principal or file reload):
//!     → validation.rs validates
//!     → store.rs persists the new version
//!     → atomic swap of Arc<VersionedConfiguration>
//!     → PUT_CONFIG lifecycle event
//!     → builders and the engine take a snapshot per call
//! ```
//!
//! # Design Decisions
//! - A snapshot is passed into every build/submit call; in-flight work keeps
//!   the version it started with
//! - Old versions are retained for audit and for resuming in-flight work
//! - All settings fields have defaults to allow minimal files

pub mod loader;
pub mod schema;
pub mod store;
pub mod validation;
pub mod watcher;

pub use schema::{
    BridgeConfiguration, BridgeSettings, LogFormat, NetworkConfig, ObservabilityConfig, RetryPolicy, ServiceConfig,
    StoreConfig, VersionedConfiguration, TESTNET_PASSPHRASE,
};
pub use store::{ConfigurationStore, SYSTEM_PRINCIPAL};
