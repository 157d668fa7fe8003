//! Account linking subsystem.
//!
//! # Data Flow
//! ```text
//! LedgerEvent.internal_account_id
//!     → linker.rs (existing link, or provision.rs + network sequence)
//!     → trustline NONE → PENDING → ESTABLISHED
//!     → AccountLink handed to the builder
//! ```

pub mod link;
#[allow(clippy::module_inception)]
pub mod linker;
pub mod provision;

pub use link::{AccountLink, TrustlineStatus};
pub use linker::AccountLinker;
pub use provision::{AccountProvisioner, DerivedAccountProvisioner};
