//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     settings → record store → configuration store (restore, seed)
//!     → linker, engine, listener, service → recover() → INITIALIZE
//!     → spawn listener and dispatcher
//!
//! Shutdown (shutdown.rs):
//!     signal → stop taking events → in-flight submissions finish → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown; second signal → immediate exit
//! ```
//!
//! # Design Decisions
//! - Recovery finishes before any new event is taken
//! - Shutdown has a deadline; tasks still running after it are aborted

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{drain, Shutdown};
pub use startup::{Bridge, BridgeHandle};
