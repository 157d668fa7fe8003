//! Transaction builder and signer.
//!
//! # Data Flow
//! ```text
//! Environment (BRIDGE_FUNDING_SECRET)
//!     → signer.rs (key loading, signing)
//! LedgerEvent + AccountLink + configuration snapshot
//!     → transaction.rs (validate, unsigned body, sign)
//!     → envelope.rs (stellar-xdr transaction, network hash, base64 envelope)
//!     → PendingTransaction (BUILT)
//! ```
//!
//! # Security Constraints
//! - The funding secret comes ONLY from the environment
//! - Never log the secret or anything derived from it other than the public id
//! - Building is pure; nothing here touches the network

pub mod envelope;
pub mod signer;
pub mod strkey;
pub mod transaction;

pub use envelope::SignedEnvelope;
pub use signer::{FundingSigner, FUNDING_SECRET_ENV_VAR};
pub use transaction::TransactionBuilder;
