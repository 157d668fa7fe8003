//! Durable record store.
//!
//! # Responsibilities
//! - Persist account links, pending transactions, configuration versions and
//!   reconciliation flags
//! - Return only after a write is durable
//!
//! # Design Decisions
//! - One trait, two implementations: in-memory for tests and dry runs, a JSON
//!   snapshot file for single-node deployments
//! - Synchronous API; callers hold per-account locks, never a store lock,
//!   across network calls
//! - Records are keyed by their natural ids (internal account id, internal
//!   event id), so a second write for the same key replaces the first

pub mod file;
pub mod memory;

use thiserror::Error;

use crate::config::VersionedConfiguration;
use crate::engine::{PendingTransaction, TxStatus};
use crate::linker::AccountLink;
use crate::reconcile::ReconciliationFlag;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store encoding failed: {0}")]
    Serde(#[from] serde_json::Error),
}

pub trait BridgeStore: Send + Sync {
    fn get_link(&self, internal_account_id: &str) -> Result<Option<AccountLink>, StoreError>;

    fn find_link_by_external(&self, external_account_id: &str) -> Result<Option<AccountLink>, StoreError> {
        Ok(self
            .links()?
            .into_iter()
            .find(|l| l.external_account_id == external_account_id))
    }

    fn put_link(&self, link: &AccountLink) -> Result<(), StoreError>;

    fn remove_link(&self, internal_account_id: &str) -> Result<Option<AccountLink>, StoreError>;

    /// All links, ordered by internal account id.
    fn links(&self) -> Result<Vec<AccountLink>, StoreError>;

    fn get_transaction(&self, internal_event_id: &str) -> Result<Option<PendingTransaction>, StoreError>;

    fn put_transaction(&self, tx: &PendingTransaction) -> Result<(), StoreError>;

    /// All transactions, ordered by internal event id.
    fn transactions(&self) -> Result<Vec<PendingTransaction>, StoreError>;

    fn transactions_with_status(&self, status: TxStatus) -> Result<Vec<PendingTransaction>, StoreError> {
        Ok(self
            .transactions()?
            .into_iter()
            .filter(|tx| tx.status == status)
            .collect())
    }

    fn append_configuration(&self, configuration: &VersionedConfiguration) -> Result<(), StoreError>;

    /// All persisted configuration versions, oldest first.
    fn configurations(&self) -> Result<Vec<VersionedConfiguration>, StoreError>;

    fn put_flag(&self, flag: &ReconciliationFlag) -> Result<(), StoreError>;

    fn flags(&self) -> Result<Vec<ReconciliationFlag>, StoreError>;
}
