//! Versioned bridge configuration store.
//!
//! # Responsibilities
//! - Hold exactly one active [`VersionedConfiguration`]
//! - Keep every previous version for audit
//! - Gate updates on an authorized principal and structural checks
//! - Publish `PUT_CONFIG` after each accepted update
//!
//! # Design Decisions
//! - Readers get an `Arc` snapshot through `ArcSwapOption`; a reader never
//!   observes a half-applied update
//! - A version is persisted before it is swapped in
//! - Absent configuration is an error, never a silent default

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use tokio::sync::watch;

use crate::clock::unix_millis;
use crate::config::schema::{BridgeConfiguration, VersionedConfiguration};
use crate::config::validation::{describe, validate_bridge_configuration};
use crate::error::{BridgeResult, ConfigurationError};
use crate::events::{EventPublisher, LifecycleEvent};
use crate::observability::metrics;
use crate::store::BridgeStore;

/// Principal used for configuration coming from the settings file.
pub const SYSTEM_PRINCIPAL: &str = "system";

pub struct ConfigurationStore {
    current: ArcSwapOption<VersionedConfiguration>,
    /// Every accepted version, oldest first. Also serializes writers.
    history: Mutex<Vec<Arc<VersionedConfiguration>>>,
    authorized: HashSet<String>,
    records: Arc<dyn BridgeStore>,
    publisher: Arc<dyn EventPublisher>,
    changes: watch::Sender<u64>,
}

impl ConfigurationStore {
    /// Open the store, restoring the persisted version history.
    pub fn open(
        records: Arc<dyn BridgeStore>,
        publisher: Arc<dyn EventPublisher>,
        authorized_users: impl IntoIterator<Item = String>,
    ) -> BridgeResult<Self> {
        let mut versions = records.configurations()?;
        versions.sort_by_key(|v| v.version);
        let history: Vec<_> = versions.into_iter().map(Arc::new).collect();
        let current = history.last().cloned();
        let current_version = current.as_ref().map(|c| c.version).unwrap_or(0);

        if let Some(cfg) = &current {
            tracing::info!(version = cfg.version, updated_by = %cfg.updated_by, "Restored bridge configuration");
            metrics::set_config_version(cfg.version);
        }

        let mut authorized: HashSet<String> = authorized_users.into_iter().collect();
        authorized.insert(SYSTEM_PRINCIPAL.to_string());

        let (changes, _) = watch::channel(current_version);

        Ok(Self {
            current: ArcSwapOption::new(current),
            history: Mutex::new(history),
            authorized,
            records,
            publisher,
            changes,
        })
    }

    /// Whether `principal` may replace the configuration.
    pub fn is_authorized(&self, principal: &str) -> bool {
        self.authorized.contains(principal)
    }

    /// Replace the active configuration.
    pub fn set(&self, principal: &str, configuration: BridgeConfiguration) -> BridgeResult<Arc<VersionedConfiguration>> {
        if !self.is_authorized(principal) {
            tracing::warn!(principal = %principal, "Rejected unauthorized configuration update");
            return Err(ConfigurationError::Unauthorized(principal.to_string()).into());
        }
        validate_bridge_configuration(&configuration)
            .map_err(|errors| ConfigurationError::Invalid(describe(&errors)))?;

        let versioned = {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            let version = history.last().map(|v| v.version + 1).unwrap_or(1);
            let versioned = Arc::new(VersionedConfiguration {
                version,
                configuration,
                updated_by: principal.to_string(),
                updated_at: unix_millis(),
            });

            self.records.append_configuration(&versioned)?;
            history.push(versioned.clone());
            self.current.store(Some(versioned.clone()));
            versioned
        };

        tracing::info!(
            version = versioned.version,
            updated_by = %versioned.updated_by,
            endpoint = %versioned.external_network_endpoint,
            "Bridge configuration updated"
        );
        metrics::set_config_version(versioned.version);
        self.changes.send_replace(versioned.version);
        self.publisher.publish(LifecycleEvent::put_config(versioned.version));

        Ok(versioned)
    }

    /// Current configuration snapshot.
    pub fn get(&self) -> Result<Arc<VersionedConfiguration>, ConfigurationError> {
        self.current.load_full().ok_or(ConfigurationError::Absent)
    }

    /// A specific historical version.
    pub fn version(&self, version: u64) -> Option<Arc<VersionedConfiguration>> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().find(|v| v.version == version).cloned()
    }

    /// All versions, oldest first.
    pub fn history(&self) -> Vec<Arc<VersionedConfiguration>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Receiver that observes every version change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Apply the configuration from the settings file unless it is already active.
    pub fn seed(&self, initial: Option<BridgeConfiguration>) -> BridgeResult<Option<Arc<VersionedConfiguration>>> {
        let Some(initial) = initial else {
            return Ok(None);
        };
        if let Ok(current) = self.get() {
            if current.configuration == initial {
                tracing::debug!(version = current.version, "Settings configuration already active");
                return Ok(None);
            }
        }
        self.set(SYSTEM_PRINCIPAL, initial).map(Some)
    }
}

impl std::fmt::Debug for ConfigurationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationStore")
            .field("version", &self.current.load().as_ref().map(|c| c.version))
            .field("authorized", &self.authorized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::events::{EventRecorder, LifecycleKind};
    use crate::store::MemoryStore;

    const ZERO_ACCOUNT: &str = "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHF";

    fn open(records: Arc<MemoryStore>, recorder: Arc<EventRecorder>) -> ConfigurationStore {
        ConfigurationStore::open(records, recorder, vec!["homer".to_string()]).unwrap()
    }

    fn sample(endpoint: &str) -> BridgeConfiguration {
        BridgeConfiguration::new(ZERO_ACCOUNT, endpoint).with_asset("USD", ZERO_ACCOUNT)
    }

    #[test]
    fn test_set_then_get_round_trip() {
        let recorder = Arc::new(EventRecorder::new());
        let store = open(Arc::new(MemoryStore::new()), recorder.clone());

        let config = sample("https://horizon-testnet.stellar.org");
        let versioned = store.set("homer", config.clone()).unwrap();
        assert_eq!(versioned.version, 1);
        assert_eq!(store.get().unwrap().configuration, config);
        assert_eq!(recorder.count(LifecycleKind::PutConfig, Some("1")), 1);
    }

    #[test]
    fn test_absent_configuration_is_error() {
        let store = open(Arc::new(MemoryStore::new()), Arc::new(EventRecorder::new()));
        assert_eq!(store.get().unwrap_err(), ConfigurationError::Absent);
    }

    #[test]
    fn test_unauthorized_update_rejected() {
        let recorder = Arc::new(EventRecorder::new());
        let store = open(Arc::new(MemoryStore::new()), recorder.clone());

        let err = store.set("marge", sample("https://horizon.example")).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Configuration(ConfigurationError::Unauthorized(ref p)) if p == "marge"
        ));
        assert!(store.get().is_err());
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_opaque_values_round_trip() {
        let recorder = Arc::new(EventRecorder::new());
        let store = open(Arc::new(MemoryStore::new()), recorder.clone());

        let mut config = BridgeConfiguration::new("blah", "blah").with_asset("blah", "blah");
        config.network_passphrase = "blah".into();
        let versioned = store.set("homer", config.clone()).unwrap();

        assert_eq!(versioned.updated_by, "homer");
        assert_eq!(store.get().unwrap().configuration, config);
        assert_eq!(recorder.count(LifecycleKind::PutConfig, Some("1")), 1);
    }

    #[test]
    fn test_structurally_invalid_configuration_rejected() {
        let recorder = Arc::new(EventRecorder::new());
        let store = open(Arc::new(MemoryStore::new()), recorder.clone());
        let mut config = sample("");
        config.retry_policy.max_attempts = 0;

        let err = store.set("homer", config).unwrap_err();
        assert!(matches!(err, BridgeError::Configuration(ConfigurationError::Invalid(_))));
        assert!(store.get().is_err());
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_history_retained_and_restored() {
        let records = Arc::new(MemoryStore::new());
        let store = open(records.clone(), Arc::new(EventRecorder::new()));
        store.set("homer", sample("https://a.example")).unwrap();
        store.set("homer", sample("https://b.example")).unwrap();

        assert_eq!(store.history().len(), 2);
        assert_eq!(store.version(1).unwrap().external_network_endpoint, "https://a.example");

        let reopened = open(records, Arc::new(EventRecorder::new()));
        assert_eq!(reopened.get().unwrap().version, 2);
        assert_eq!(reopened.get().unwrap().external_network_endpoint, "https://b.example");
        assert_eq!(reopened.history().len(), 2);
    }

    #[test]
    fn test_seed_is_idempotent() {
        let store = open(Arc::new(MemoryStore::new()), Arc::new(EventRecorder::new()));
        let config = sample("https://horizon.example");
        assert!(store.seed(Some(config.clone())).unwrap().is_some());
        assert!(store.seed(Some(config)).unwrap().is_none());
        assert!(store.seed(None).unwrap().is_none());
        assert_eq!(store.get().unwrap().updated_by, SYSTEM_PRINCIPAL);
    }

    #[tokio::test]
    async fn test_subscribe_observes_change() {
        let store = open(Arc::new(MemoryStore::new()), Arc::new(EventRecorder::new()));
        let mut rx = store.subscribe();
        store.set("homer", sample("https://horizon.example")).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
