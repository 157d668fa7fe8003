//! Event dispatcher and per-account workers.
//!
//! # Responsibilities
//! - Route each ledger event to the worker of its internal account
//! - Apply the error scopes: halt the service, park an account, drop an
//!   event, or retry with backoff
//! - Resume a halted service when the configuration version changes
//!
//! # Design Decisions
//! - One worker task per internal account processes its events in order;
//!   different accounts run in parallel
//! - A worker idle for the configured timeout removes its own queue and
//!   exits; the next event for that account starts a fresh one
//! - Held and parked events stay in memory; a restart relies on the ledger
//!   redelivering them
//! - A halt records the configuration version it happened under, so an
//!   update that raced with the failing event does not leave the service
//!   halted

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::ConfigurationStore;
use crate::engine::SubmissionEngine;
use crate::error::{BridgeError, BridgeResult, ErrorScope};
use crate::events::LedgerEvent;
use crate::lifecycle::Shutdown;
use crate::linker::AccountLink;
use crate::observability::metrics;
use crate::resilience::backoff::policy_backoff;
use crate::resilience::retries::has_budget;

#[derive(Debug, Default)]
struct HaltState {
    /// Configuration version the service halted under.
    halted_at: Option<u64>,
    held: Vec<LedgerEvent>,
}

pub struct BridgeService {
    engine: Arc<SubmissionEngine>,
    config: Arc<ConfigurationStore>,
    shutdown: Shutdown,
    queue_capacity: usize,
    idle_timeout: Duration,
    workers: DashMap<String, mpsc::Sender<LedgerEvent>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    halt: Mutex<HaltState>,
    /// Events of quarantined accounts, by internal account id.
    parked: Mutex<HashMap<String, Vec<LedgerEvent>>>,
}

impl BridgeService {
    pub fn new(
        engine: Arc<SubmissionEngine>,
        config: Arc<ConfigurationStore>,
        shutdown: Shutdown,
        queue_capacity: usize,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            config,
            shutdown,
            queue_capacity: queue_capacity.max(1),
            idle_timeout,
            workers: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
            halt: Mutex::new(HaltState::default()),
            parked: Mutex::new(HashMap::new()),
        }
    }

    /// Take events until the channel closes or shutdown is triggered.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<LedgerEvent>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut versions = self.config.subscribe();
        let mut watching = true;
        tracing::info!("Bridge service accepting events");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                changed = versions.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let version = *versions.borrow_and_update();
                    self.resume_if_changed(version).await;
                }
                event = events.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => {
                        tracing::info!("Ledger event feed closed");
                        break;
                    }
                },
            }
        }

        // Closing the worker queues lets every worker stop after its
        // current event.
        self.workers.clear();
        tracing::info!("Bridge service stopped taking events");
    }

    /// Route one event to its account worker.
    pub async fn dispatch(self: &Arc<Self>, event: LedgerEvent) {
        if self.hold_if_halted(&event) || self.park_if_quarantined(&event) {
            return;
        }

        let account = event.internal_account_id.clone();
        let mut event = event;
        // A second try covers a worker that retired between lookup and send.
        for _ in 0..2 {
            let sender = self
                .workers
                .entry(account.clone())
                .or_insert_with(|| self.spawn_worker(&account))
                .clone();

            match sender.send(event).await {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    self.workers.remove_if(&account, |_, s| s.same_channel(&sender));
                    event = returned;
                }
            }
        }
        tracing::warn!(internal_account = %account, event_id = %event.event_id, "Worker gone, event not dispatched");
    }

    fn spawn_worker(self: &Arc<Self>, account: &str) -> mpsc::Sender<LedgerEvent> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let service = Arc::clone(self);
        let shutdown = self.shutdown.subscribe();
        let account = account.to_string();
        tracing::debug!(internal_account = %account, "Starting account worker");
        let task = tokio::spawn(service.worker(account, tx.downgrade(), rx, shutdown));
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
        tx
    }

    async fn worker(
        self: Arc<Self>,
        account: String,
        own: mpsc::WeakSender<LedgerEvent>,
        mut events: mpsc::Receiver<LedgerEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                event = tokio::time::timeout(self.idle_timeout, events.recv()) => match event {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(_) => {
                        self.retire(&account, &own);
                        // Refuse new sends, then finish what is already queued.
                        events.close();
                        while let Some(event) = events.recv().await {
                            if !self.handle(event, &mut shutdown).await {
                                break;
                            }
                        }
                        tracing::debug!(internal_account = %account, "Account worker idle, exiting");
                        break;
                    }
                },
            };
            if !self.handle(event, &mut shutdown).await {
                break;
            }
        }
        tracing::debug!(internal_account = %account, "Account worker stopped");
    }

    /// Drop this worker's queue from the routing table, unless a newer
    /// worker already replaced it.
    fn retire(&self, account: &str, own: &mpsc::WeakSender<LedgerEvent>) {
        if let Some(sender) = own.upgrade() {
            self.workers.remove_if(account, |_, s| s.same_channel(&sender));
        }
    }

    /// Process one event to a final outcome. Returns false when shutdown
    /// interrupted a retry wait.
    async fn handle(&self, event: LedgerEvent, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let mut attempts = 0u32;
        loop {
            if self.hold_if_halted(&event) || self.park_if_quarantined(&event) {
                return true;
            }

            let version = self.config.get().map(|s| s.version).unwrap_or(0);
            let error = match self.engine.process_event(event.clone()).await {
                Ok(tx) => {
                    tracing::debug!(event_id = %event.event_id, status = tx.status.as_str(), "Event processed");
                    return true;
                }
                Err(e) => e,
            };

            match error.scope() {
                ErrorScope::Halt => {
                    if self.halt(version, &error) {
                        self.hold(event);
                        return true;
                    }
                }
                ErrorScope::Account => {
                    self.quarantine(event, &error);
                    return true;
                }
                ErrorScope::Event => {
                    tracing::error!(event_id = %event.event_id, error = %error, "Event not settled");
                    return true;
                }
                ErrorScope::Retry => {
                    attempts += 1;
                    let policy = self
                        .config
                        .get()
                        .map(|s| s.retry_policy.clone())
                        .unwrap_or_default();
                    if !has_budget(&policy, attempts) {
                        tracing::error!(
                            event_id = %event.event_id,
                            attempts = attempts,
                            error = %error,
                            "Giving up on event"
                        );
                        metrics::record_event("error");
                        if let Err(e) = self.engine.give_up(&event, error.to_string()).await {
                            tracing::error!(event_id = %event.event_id, error = %e, "Failed to record abandoned event");
                        }
                        return true;
                    }
                    let delay = policy_backoff(&policy, attempts);
                    tracing::warn!(
                        event_id = %event.event_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying event"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.recv() => return false,
                    }
                }
            }
        }
    }

    /// Halt under `version` unless the configuration already moved on.
    /// Returns whether the service is now halted.
    fn halt(&self, version: u64, error: &BridgeError) -> bool {
        let current = self.config.get().map(|s| s.version).unwrap_or(0);
        if current != version {
            tracing::info!(version = current, "Configuration changed while processing, retrying");
            return false;
        }
        let mut state = self.halt.lock().unwrap_or_else(|e| e.into_inner());
        if state.halted_at.is_none() {
            tracing::error!(version = version, error = %error, "Service halted until the configuration changes");
        }
        state.halted_at = Some(version);
        true
    }

    fn hold(&self, event: LedgerEvent) {
        let mut state = self.halt.lock().unwrap_or_else(|e| e.into_inner());
        state.held.push(event);
    }

    fn hold_if_halted(&self, event: &LedgerEvent) -> bool {
        let mut state = self.halt.lock().unwrap_or_else(|e| e.into_inner());
        if state.halted_at.is_some() {
            tracing::debug!(event_id = %event.event_id, "Holding event while halted");
            state.held.push(event.clone());
            true
        } else {
            false
        }
    }

    async fn resume_if_changed(self: &Arc<Self>, version: u64) {
        let held = {
            let mut state = self.halt.lock().unwrap_or_else(|e| e.into_inner());
            match state.halted_at {
                Some(halted_at) if halted_at != version => {
                    state.halted_at = None;
                    std::mem::take(&mut state.held)
                }
                _ => return,
            }
        };
        tracing::info!(version = version, held = held.len(), "Configuration changed, resuming");
        for event in held {
            self.dispatch(event).await;
        }
    }

    fn quarantine(&self, event: LedgerEvent, error: &BridgeError) {
        let account = event.internal_account_id.clone();
        let reason = error.to_string();
        match self.engine.linker().get_link(&account) {
            Ok(Some(link)) if !link.quarantined => {
                if let Err(e) = self.engine.linker().quarantine(&account, &reason) {
                    tracing::error!(internal_account = %account, error = %e, "Failed to persist quarantine");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::error!(internal_account = %account, error = %e, "Failed to load link"),
        }
        tracing::warn!(
            internal_account = %account,
            event_id = %event.event_id,
            reason = %reason,
            "Account queue parked"
        );
        let mut parked = self.parked.lock().unwrap_or_else(|e| e.into_inner());
        parked.entry(account).or_default().push(event);
    }

    fn park_if_quarantined(&self, event: &LedgerEvent) -> bool {
        let mut parked = self.parked.lock().unwrap_or_else(|e| e.into_inner());
        match parked.get_mut(&event.internal_account_id) {
            Some(queue) => {
                queue.push(event.clone());
                true
            }
            None => false,
        }
    }

    /// Lift the quarantine of an account after manual review and replay its
    /// parked events.
    pub async fn release_account(self: &Arc<Self>, internal_account_id: &str) -> BridgeResult<Option<AccountLink>> {
        let link = match self.engine.linker().get_link(internal_account_id)? {
            Some(_) => Some(self.engine.linker().release(internal_account_id).await?),
            None => None,
        };

        let events = self
            .parked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(internal_account_id)
            .unwrap_or_default();
        tracing::info!(internal_account = %internal_account_id, replayed = events.len(), "Account released");
        for event in events {
            self.dispatch(event).await;
        }
        Ok(link)
    }

    pub fn is_halted(&self) -> bool {
        self.halt.lock().unwrap_or_else(|e| e.into_inner()).halted_at.is_some()
    }

    /// Events held while halted.
    pub fn held_count(&self) -> usize {
        self.halt.lock().unwrap_or_else(|e| e.into_inner()).held.len()
    }

    /// Events parked for a quarantined account.
    pub fn parked_count(&self, internal_account_id: &str) -> usize {
        self.parked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(internal_account_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Account workers currently routed to.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Worker tasks still running or not yet collected, for draining on shutdown.
    pub fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl std::fmt::Debug for BridgeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeService")
            .field("workers", &self.workers.len())
            .field("halted", &self.is_halted())
            .finish_non_exhaustive()
    }
}
