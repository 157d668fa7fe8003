//! JSON snapshot file store.
//!
//! Every mutation rewrites the whole snapshot to a temporary file and renames
//! it over the previous one, so a crash leaves either the old or the new
//! state on disk. Suitable for a single bridge process with a modest number
//! of records.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::config::VersionedConfiguration;
use crate::engine::PendingTransaction;
use crate::linker::AccountLink;
use crate::reconcile::ReconciliationFlag;
use crate::store::{BridgeStore, StoreError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Snapshot {
    links: BTreeMap<String, AccountLink>,
    transactions: BTreeMap<String, PendingTransaction>,
    configurations: Vec<VersionedConfiguration>,
    flags: Vec<ReconciliationFlag>,
}

/// File-backed store.
pub struct JsonFileStore {
    path: PathBuf,
    state: Mutex<Snapshot>,
}

impl JsonFileStore {
    /// Open the store, loading the snapshot if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let snapshot: Snapshot = serde_json::from_reader(reader)?;
            tracing::info!(
                path = %path.display(),
                links = snapshot.links.len(),
                transactions = snapshot.transactions.len(),
                configurations = snapshot.configurations.len(),
                "Loaded bridge records"
            );
            snapshot
        } else {
            tracing::info!(path = %path.display(), "Starting with an empty record file");
            Snapshot::default()
        };

        Ok(Self {
            path,
            state: Mutex::new(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read<T>(&self, f: impl FnOnce(&Snapshot) -> T) -> T {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    /// Apply `f` to a copy, write the copy, then make it current.
    fn write<T>(&self, f: impl FnOnce(&mut Snapshot) -> T) -> Result<T, StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = state.clone();
        let result = f(&mut next);
        self.persist(&next)?;
        *state = next;
        Ok(result)
    }

    fn persist(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let tmp = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, snapshot)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl BridgeStore for JsonFileStore {
    fn get_link(&self, internal_account_id: &str) -> Result<Option<AccountLink>, StoreError> {
        Ok(self.read(|s| s.links.get(internal_account_id).cloned()))
    }

    fn put_link(&self, link: &AccountLink) -> Result<(), StoreError> {
        self.write(|s| {
            s.links.insert(link.internal_account_id.clone(), link.clone());
        })
    }

    fn remove_link(&self, internal_account_id: &str) -> Result<Option<AccountLink>, StoreError> {
        self.write(|s| s.links.remove(internal_account_id))
    }

    fn links(&self) -> Result<Vec<AccountLink>, StoreError> {
        Ok(self.read(|s| s.links.values().cloned().collect()))
    }

    fn get_transaction(&self, internal_event_id: &str) -> Result<Option<PendingTransaction>, StoreError> {
        Ok(self.read(|s| s.transactions.get(internal_event_id).cloned()))
    }

    fn put_transaction(&self, tx: &PendingTransaction) -> Result<(), StoreError> {
        self.write(|s| {
            s.transactions.insert(tx.internal_event_id.clone(), tx.clone());
        })
    }

    fn transactions(&self) -> Result<Vec<PendingTransaction>, StoreError> {
        Ok(self.read(|s| s.transactions.values().cloned().collect()))
    }

    fn append_configuration(&self, configuration: &VersionedConfiguration) -> Result<(), StoreError> {
        self.write(|s| s.configurations.push(configuration.clone()))
    }

    fn configurations(&self) -> Result<Vec<VersionedConfiguration>, StoreError> {
        Ok(self.read(|s| s.configurations.clone()))
    }

    fn put_flag(&self, flag: &ReconciliationFlag) -> Result<(), StoreError> {
        self.write(|s| s.flags.push(flag.clone()))
    }

    fn flags(&self) -> Result<Vec<ReconciliationFlag>, StoreError> {
        Ok(self.read(|s| s.flags.clone()))
    }
}

impl std::fmt::Debug for JsonFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileStore").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfiguration;

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.put_link(&AccountLink::new("A1", "GA", 3)).unwrap();
        store
            .append_configuration(&VersionedConfiguration {
                version: 1,
                configuration: BridgeConfiguration::new("GF", "https://horizon.example"),
                updated_by: "system".into(),
                updated_at: 0,
            })
            .unwrap();
        drop(store);

        let loaded = JsonFileStore::open(&path).unwrap();
        assert_eq!(loaded.get_link("A1").unwrap().unwrap().last_known_sequence, 3);
        assert_eq!(loaded.configurations().unwrap()[0].version, 1);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(JsonFileStore::open(&path), Err(StoreError::Serde(_))));
    }

    #[test]
    fn test_failed_write_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("records.json");
        let store = JsonFileStore::open(&path).unwrap();

        assert!(store.put_link(&AccountLink::new("A1", "GA", 3)).is_err());
        assert!(store.get_link("A1").unwrap().is_none());
    }
}
