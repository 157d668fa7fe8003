//! Settings file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_settings;
use crate::config::schema::BridgeSettings;
use crate::config::store::{ConfigurationStore, SYSTEM_PRINCIPAL};

/// A watcher that monitors the settings file for changes.
pub struct SettingsWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<BridgeSettings>,
}

impl SettingsWatcher {
    /// Create a new watcher.
    ///
    /// Returns the watcher and a receiver for reloaded settings.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<BridgeSettings>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. The returned watcher must be kept alive.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!("Settings file change detected, reloading...");
                        match load_settings(&path) {
                            Ok(settings) => {
                                let _ = tx.send(settings);
                            }
                            Err(e) => {
                                tracing::error!("Failed to reload settings: {}. Keeping current configuration.", e);
                            }
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Settings watcher started");
        Ok(watcher)
    }
}

/// Push the `[bridge]` section of reloaded settings into the configuration store.
///
/// Other sections only take effect on restart.
pub async fn apply_reloads(config: Arc<ConfigurationStore>, mut updates: mpsc::UnboundedReceiver<BridgeSettings>) {
    while let Some(settings) = updates.recv().await {
        let Some(bridge) = settings.bridge else {
            tracing::debug!("Reloaded settings carry no bridge section");
            continue;
        };
        let unchanged = config
            .get()
            .map(|current| current.configuration == bridge)
            .unwrap_or(false);
        if unchanged {
            continue;
        }
        if let Err(e) = config.set(SYSTEM_PRINCIPAL, bridge) {
            tracing::error!(error = %e, "Reloaded bridge configuration rejected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BridgeConfiguration;
    use crate::events::EventRecorder;
    use crate::store::MemoryStore;

    const ZERO_ACCOUNT: &str = "GAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAWHF";

    #[tokio::test]
    async fn test_apply_reloads_sets_new_versions_only() {
        let config = Arc::new(
            ConfigurationStore::open(Arc::new(MemoryStore::new()), Arc::new(EventRecorder::new()), Vec::new()).unwrap(),
        );
        let (tx, rx) = mpsc::unbounded_channel();

        let mut settings = BridgeSettings::default();
        settings.bridge = Some(BridgeConfiguration::new(ZERO_ACCOUNT, "https://a.example"));
        tx.send(settings.clone()).unwrap();
        tx.send(settings.clone()).unwrap();
        settings.bridge = Some(BridgeConfiguration::new(ZERO_ACCOUNT, "https://b.example"));
        tx.send(settings).unwrap();
        tx.send(BridgeSettings::default()).unwrap();
        drop(tx);

        apply_reloads(config.clone(), rx).await;

        assert_eq!(config.history().len(), 2);
        assert_eq!(config.get().unwrap().external_network_endpoint, "https://b.example");
    }
}
