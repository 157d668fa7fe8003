//! Outbound lifecycle event publishers.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::events::types::{LifecycleEvent, LifecycleKind};

/// Sink for bridge lifecycle events.
///
/// Publishing never fails the caller; a publisher that cannot deliver logs
/// and drops the event.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: LifecycleEvent);
}

/// Fans events out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: LifecycleEvent) {
        tracing::info!(kind = %event.kind, subject = %event.subject, "Lifecycle event");
        if self.tx.send(event).is_err() {
            tracing::debug!("No lifecycle subscribers");
        }
    }
}

/// Keeps every published event; lets callers wait for one to appear.
#[derive(Debug)]
pub struct EventRecorder {
    events: Mutex<Vec<LifecycleEvent>>,
    published: watch::Sender<usize>,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        let (published, _) = watch::channel(0);
        Self {
            events: Mutex::new(Vec::new()),
            published,
        }
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Events of `kind`, optionally restricted to one subject.
    pub fn count(&self, kind: LifecycleKind, subject: Option<&str>) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.kind == kind && subject.map_or(true, |s| e.subject == s))
            .count()
    }

    /// Wait until at least one matching event was published.
    pub async fn wait_for(&self, kind: LifecycleKind, subject: Option<&str>, timeout: Duration) -> bool {
        let mut rx = self.published.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(kind, subject) > 0 {
                return true;
            }
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                _ => return false,
            }
        }
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl EventPublisher for EventRecorder {
    fn publish(&self, event: LifecycleEvent) {
        tracing::debug!(kind = %event.kind, subject = %event.subject, "Recorded lifecycle event");
        let total = {
            let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            events.push(event);
            events.len()
        };
        self.published.send_replace(total);
    }
}
