//! Startup orchestration.
//!
//! # Responsibilities
//! - Wire the subsystems in dependency order
//! - Restore configuration and resolve unfinished transactions before the
//!   first new event is taken
//! - Announce the bridge with `INITIALIZE`
//! - Start the reconciliation listener and the event dispatcher
//!
//! # Design Decisions
//! - Fail fast: an error while restoring state is fatal
//! - The record store, network client and publisher are passed in, so the
//!   daemon, the dry-run mode and the tests share one wiring path

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::builder::TransactionBuilder;
use crate::config::{BridgeSettings, ConfigurationStore};
use crate::engine::{AccountLocks, RecoveryReport, SubmissionEngine};
use crate::error::BridgeResult;
use crate::events::{EventPublisher, LedgerEvent, LifecycleEvent};
use crate::lifecycle::shutdown::{drain, Shutdown};
use crate::linker::{AccountLinker, AccountProvisioner};
use crate::network::NetworkClient;
use crate::reconcile::ReconciliationListener;
use crate::service::BridgeService;
use crate::store::BridgeStore;

/// Every long-lived component of a running bridge.
pub struct Bridge {
    pub store: Arc<dyn BridgeStore>,
    pub network: Arc<dyn NetworkClient>,
    pub publisher: Arc<dyn EventPublisher>,
    pub config: Arc<ConfigurationStore>,
    pub linker: Arc<AccountLinker>,
    pub engine: Arc<SubmissionEngine>,
    pub listener: Arc<ReconciliationListener>,
    pub service: Arc<BridgeService>,
    pub shutdown: Shutdown,
}

impl Bridge {
    /// Restore the configuration history from `store` and seed the
    /// `[bridge]` section of `settings` when it differs from the active one.
    pub fn open_config(
        settings: &BridgeSettings,
        store: Arc<dyn BridgeStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> BridgeResult<Arc<ConfigurationStore>> {
        let config = Arc::new(ConfigurationStore::open(
            store,
            publisher,
            settings.service.authorized_users.iter().cloned(),
        )?);
        config.seed(settings.bridge.clone())?;
        Ok(config)
    }

    /// Wire the components around an opened configuration store.
    pub fn assemble(
        settings: &BridgeSettings,
        store: Arc<dyn BridgeStore>,
        config: Arc<ConfigurationStore>,
        network: Arc<dyn NetworkClient>,
        publisher: Arc<dyn EventPublisher>,
        builder: Arc<TransactionBuilder>,
        provisioner: Arc<dyn AccountProvisioner>,
    ) -> Self {
        let locks = AccountLocks::new();
        let linker = Arc::new(AccountLinker::new(
            store.clone(),
            network.clone(),
            provisioner,
            builder.clone(),
            locks.clone(),
        ));
        let engine = Arc::new(SubmissionEngine::new(
            store.clone(),
            linker.clone(),
            builder,
            network.clone(),
            config.clone(),
            publisher.clone(),
            locks,
        ));
        let listener = Arc::new(ReconciliationListener::new(
            engine.clone(),
            store.clone(),
            network.clone(),
            config.clone(),
            publisher.clone(),
        ));

        let shutdown = Shutdown::new();
        let service = Arc::new(BridgeService::new(
            engine.clone(),
            config.clone(),
            shutdown.clone(),
            settings.service.account_queue_capacity,
            settings.service.worker_idle_timeout(),
        ));

        Self {
            store,
            network,
            publisher,
            config,
            linker,
            engine,
            listener,
            service,
            shutdown,
        }
    }

    /// Resolve unfinished work, announce the bridge and start taking events.
    pub async fn start(&self, events: mpsc::Receiver<LedgerEvent>) -> BridgeResult<BridgeHandle> {
        let recovery = match self.config.get() {
            Ok(_) => self.engine.recover().await?,
            Err(_) => {
                tracing::warn!("No bridge configuration yet, recovery deferred until one is set");
                RecoveryReport::default()
            }
        };

        let version = env!("CARGO_PKG_VERSION");
        self.publisher.publish(LifecycleEvent::initialize(version));
        tracing::info!(version = version, "Bridge initialized");

        let listener = tokio::spawn(self.listener.clone().run(self.shutdown.subscribe()));
        let dispatcher = tokio::spawn(self.service.clone().run(events));

        Ok(BridgeHandle {
            recovery,
            service: self.service.clone(),
            shutdown: self.shutdown.clone(),
            listener,
            dispatcher,
        })
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.config)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

/// Running bridge tasks.
#[derive(Debug)]
pub struct BridgeHandle {
    pub recovery: RecoveryReport,
    service: Arc<BridgeService>,
    shutdown: Shutdown,
    listener: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl BridgeHandle {
    /// Stop taking events and wait for in-flight work, up to `deadline`.
    pub async fn stop(self, deadline: Duration) -> bool {
        self.shutdown.trigger();
        let stopped = drain(vec![self.dispatcher, self.listener], deadline).await;
        stopped && drain(self.service.take_tasks(), deadline).await
    }

    /// Wait until the dispatcher stops (feed closed or shutdown triggered),
    /// give queued events `deadline` to finish, then stop the listener.
    pub async fn finish(self, deadline: Duration) -> bool {
        if let Err(e) = self.dispatcher.await {
            tracing::error!(error = %e, "Dispatcher task failed");
        }
        let processed = drain(self.service.take_tasks(), deadline).await;
        self.shutdown.trigger();
        let stopped = drain(vec![self.listener], deadline).await;
        processed && stopped
    }
}
