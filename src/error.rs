//! Bridge error taxonomy.
//!
//! Each error carries the scope it affects:
//!
//! | Error                    | Scope   | Effect                                   |
//! |--------------------------|---------|------------------------------------------|
//! | `Configuration`          | Halt    | no new events until the config changes   |
//! | `Linking`                | Account | that account's queue is quarantined      |
//! | `Build`                  | Event   | event recorded FAILED, never retried     |
//! | `TransientNetwork`       | Retry   | retried per retry policy                 |
//! | `SequenceConflict`       | Retry   | retried after a forced sequence refresh  |
//! | `IrrecoverableSubmission`| Event   | ABANDONED, operator intervention         |
//! | `SequenceRegression`     | Account | link state refused the update            |
//! | `Store`                  | Halt    | durable state unavailable                |

use thiserror::Error;

use crate::network::NetworkError;
use crate::store::StoreError;

/// Problems with the bridge configuration or the signing identity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no bridge configuration has been set")]
    Absent,

    #[error("principal '{0}' is not authorized to update the bridge configuration")]
    Unauthorized(String),

    #[error("invalid bridge configuration: {0}")]
    Invalid(String),

    #[error("signing unavailable: {0}")]
    Signing(String),
}

/// Per-event problems found while building a transaction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("invalid event {event_id}: {reason}")]
    InvalidEvent { event_id: String, reason: String },

    #[error("envelope encoding failed: {0}")]
    Encoding(String),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("linking error for account {account}: {reason}")]
    Linking { account: String, reason: String },

    #[error("build error: {0}")]
    Build(#[from] BuildError),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("sequence conflict on {account}: {detail}")]
    SequenceConflict { account: String, detail: String },

    #[error("submission abandoned for event {event_id}: {reason}")]
    IrrecoverableSubmission { event_id: String, reason: String },

    #[error("sequence regression on {account}: stored {stored}, proposed {proposed}")]
    SequenceRegression { account: String, stored: u64, proposed: u64 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// How far an error propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Stop taking new events.
    Halt,
    /// Quarantine one account.
    Account,
    /// Affects one event only.
    Event,
    /// Try again later.
    Retry,
}

impl BridgeError {
    pub fn linking(account: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Linking {
            account: account.into(),
            reason: reason.into(),
        }
    }

    pub fn scope(&self) -> ErrorScope {
        match self {
            BridgeError::Configuration(_) | BridgeError::Store(_) => ErrorScope::Halt,
            BridgeError::Linking { .. } | BridgeError::SequenceRegression { .. } => ErrorScope::Account,
            BridgeError::Build(_) | BridgeError::IrrecoverableSubmission { .. } => ErrorScope::Event,
            BridgeError::TransientNetwork(_) | BridgeError::SequenceConflict { .. } => ErrorScope::Retry,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.scope() == ErrorScope::Retry
    }
}

impl From<NetworkError> for BridgeError {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::Configuration(reason) => ConfigurationError::Invalid(reason).into(),
            other => BridgeError::TransientNetwork(other.to_string()),
        }
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
