//! In-memory record store.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::config::VersionedConfiguration;
use crate::engine::PendingTransaction;
use crate::linker::AccountLink;
use crate::reconcile::ReconciliationFlag;
use crate::store::{BridgeStore, StoreError};

/// A thread-safe, process-local store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    links: Arc<DashMap<String, AccountLink>>,
    transactions: Arc<DashMap<String, PendingTransaction>>,
    configurations: Arc<Mutex<Vec<VersionedConfiguration>>>,
    flags: Arc<Mutex<Vec<ReconciliationFlag>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }
}

impl BridgeStore for MemoryStore {
    fn get_link(&self, internal_account_id: &str) -> Result<Option<AccountLink>, StoreError> {
        Ok(self.links.get(internal_account_id).map(|r| r.value().clone()))
    }

    fn put_link(&self, link: &AccountLink) -> Result<(), StoreError> {
        self.links.insert(link.internal_account_id.clone(), link.clone());
        Ok(())
    }

    fn remove_link(&self, internal_account_id: &str) -> Result<Option<AccountLink>, StoreError> {
        Ok(self.links.remove(internal_account_id).map(|(_, link)| link))
    }

    fn links(&self) -> Result<Vec<AccountLink>, StoreError> {
        let mut links: Vec<_> = self.links.iter().map(|r| r.value().clone()).collect();
        links.sort_by(|a, b| a.internal_account_id.cmp(&b.internal_account_id));
        Ok(links)
    }

    fn get_transaction(&self, internal_event_id: &str) -> Result<Option<PendingTransaction>, StoreError> {
        Ok(self.transactions.get(internal_event_id).map(|r| r.value().clone()))
    }

    fn put_transaction(&self, tx: &PendingTransaction) -> Result<(), StoreError> {
        self.transactions.insert(tx.internal_event_id.clone(), tx.clone());
        Ok(())
    }

    fn transactions(&self) -> Result<Vec<PendingTransaction>, StoreError> {
        let mut txs: Vec<_> = self.transactions.iter().map(|r| r.value().clone()).collect();
        txs.sort_by(|a, b| a.internal_event_id.cmp(&b.internal_event_id));
        Ok(txs)
    }

    fn append_configuration(&self, configuration: &VersionedConfiguration) -> Result<(), StoreError> {
        self.configurations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(configuration.clone());
        Ok(())
    }

    fn configurations(&self) -> Result<Vec<VersionedConfiguration>, StoreError> {
        Ok(self.configurations.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn put_flag(&self, flag: &ReconciliationFlag) -> Result<(), StoreError> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner()).push(flag.clone());
        Ok(())
    }

    fn flags(&self) -> Result<Vec<ReconciliationFlag>, StoreError> {
        Ok(self.flags.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("links", &self.links.len())
            .field("transactions", &self.transactions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_operations() {
        let store = MemoryStore::new();
        assert!(store.get_link("A1").unwrap().is_none());

        store.put_link(&AccountLink::new("B2", "GB", 5)).unwrap();
        store.put_link(&AccountLink::new("A1", "GA", 1)).unwrap();

        let links = store.links().unwrap();
        assert_eq!(links[0].internal_account_id, "A1");
        assert_eq!(store.find_link_by_external("GB").unwrap().unwrap().internal_account_id, "B2");

        assert!(store.remove_link("A1").unwrap().is_some());
        assert!(store.get_link("A1").unwrap().is_none());
    }

    #[test]
    fn test_flags_append() {
        let store = MemoryStore::new();
        store.put_flag(&ReconciliationFlag::sequence_ahead("GA", 9, 7)).unwrap();
        let flags = store.flags().unwrap();
        assert_eq!(flags.len(), 1);
        assert!(flags[0].detail.contains("ahead"));
    }
}
