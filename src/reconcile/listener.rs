//! Reconciliation listener.
//!
//! # Responsibilities
//! - Re-check SUBMITTED transactions that have been waiting for a full poll
//!   interval, handing them back to the engine
//! - Detect accounts whose network sequence moved without the bridge, flag
//!   them for manual review and quarantine them
//!
//! # Design Decisions
//! - The poll interval is re-read from the configuration every tick
//! - Unknown network activity is never adopted automatically; an operator
//!   releases the account
//! - The network is queried outside the account lock; the comparison is made
//!   under it against freshly loaded link state

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::clock::unix_millis;
use crate::config::ConfigurationStore;
use crate::engine::{SubmissionEngine, TxStatus};
use crate::error::BridgeResult;
use crate::events::{EventPublisher, LifecycleEvent};
use crate::linker::AccountLink;
use crate::network::NetworkClient;
use crate::observability::metrics;
use crate::reconcile::flag::ReconciliationFlag;
use crate::store::BridgeStore;

/// Interval used while no configuration is active.
const IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// What one tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// SUBMITTED transactions handed back to the engine.
    pub verified: usize,
    /// Accounts flagged and quarantined.
    pub flagged: usize,
}

pub struct ReconciliationListener {
    engine: Arc<SubmissionEngine>,
    store: Arc<dyn BridgeStore>,
    network: Arc<dyn NetworkClient>,
    config: Arc<ConfigurationStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl ReconciliationListener {
    pub fn new(
        engine: Arc<SubmissionEngine>,
        store: Arc<dyn BridgeStore>,
        network: Arc<dyn NetworkClient>,
        config: Arc<ConfigurationStore>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            engine,
            store,
            network,
            config,
            publisher,
        }
    }

    /// Poll until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Reconciliation listener started");
        loop {
            let interval = match self.config.get() {
                Ok(snapshot) => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "Reconciliation tick failed");
                    }
                    snapshot.poll_interval()
                }
                Err(_) => IDLE_INTERVAL,
            };

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => {
                    tracing::info!("Reconciliation listener stopped");
                    return;
                }
            }
        }
    }

    /// One reconciliation pass.
    pub async fn tick(&self) -> BridgeResult<TickReport> {
        let snapshot = self.config.get()?;
        let poll_ms = snapshot.poll_interval_ms;
        let mut report = TickReport::default();

        let now = unix_millis();
        for tx in self.store.transactions_with_status(TxStatus::Submitted)? {
            let waited = now.saturating_sub(tx.last_attempt_at.unwrap_or(0));
            if waited < poll_ms {
                continue;
            }
            report.verified += 1;
            let event_id = tx.internal_event_id.clone();
            match self.engine.verify_submitted(tx).await {
                Ok(tx) => {
                    tracing::debug!(event_id = %event_id, status = tx.status.as_str(), "Verified submitted transaction")
                }
                Err(e) => tracing::warn!(event_id = %event_id, error = %e, "Verification failed"),
            }
        }

        for link in self.store.links()? {
            if link.quarantined || link.has_pending() {
                continue;
            }
            if self.check_account(link).await? {
                report.flagged += 1;
            }
        }

        let pending = self
            .store
            .transactions()?
            .iter()
            .filter(|tx| !tx.is_terminal())
            .count();
        metrics::set_pending(pending);

        if report.verified > 0 || report.flagged > 0 {
            tracing::info!(
                verified = report.verified,
                flagged = report.flagged,
                pending = pending,
                "Reconciliation tick"
            );
        }
        Ok(report)
    }

    /// Compare one idle account with the network. Returns whether a flag was raised.
    async fn check_account(&self, link: AccountLink) -> BridgeResult<bool> {
        let observed = match self.network.get_account_sequence(&link.external_account_id).await {
            Ok(sequence) => sequence,
            Err(e) => {
                tracing::debug!(account = %link.external_account_id, error = %e, "Sequence check skipped");
                return Ok(false);
            }
        };
        if observed <= link.last_known_sequence {
            return Ok(false);
        }

        let _guard = self.engine.locks().lock(&link.external_account_id).await;
        let Some(current) = self.store.get_link(&link.internal_account_id)? else {
            return Ok(false);
        };
        if current.quarantined || current.has_pending() || observed <= current.last_known_sequence {
            return Ok(false);
        }

        let flag = ReconciliationFlag::sequence_ahead(&current.external_account_id, observed, current.last_known_sequence);
        self.store.put_flag(&flag)?;
        self.engine
            .linker()
            .quarantine(&current.internal_account_id, &flag.detail)?;
        self.engine.invalidate_cursor(&current.external_account_id);

        tracing::warn!(
            account = %current.external_account_id,
            observed = observed,
            recorded = current.last_known_sequence,
            "Reconciliation required"
        );
        metrics::record_flag();
        self.publisher
            .publish(LifecycleEvent::reconciliation_required(&current.external_account_id));
        Ok(true)
    }
}

impl std::fmt::Debug for ReconciliationListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationListener").finish_non_exhaustive()
    }
}
