//! Shutdown coordination for the bridge.

use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for `tasks` to finish, up to `deadline`. Returns false when the
/// deadline passed first; unfinished tasks are aborted.
pub async fn drain(tasks: Vec<JoinHandle<()>>, deadline: Duration) -> bool {
    let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
    match tokio::time::timeout(deadline, join_all(tasks)).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    if e.is_panic() {
                        tracing::error!(error = %e, "Task panicked during shutdown");
                    }
                }
            }
            true
        }
        Err(_) => {
            tracing::warn!(deadline_ms = deadline.as_millis() as u64, "Drain deadline passed, aborting tasks");
            for abort in aborts {
                abort.abort();
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tasks_stop_on_trigger() {
        let shutdown = Shutdown::new();
        let mut rx = shutdown.subscribe();
        let task = tokio::spawn(async move {
            let _ = rx.recv().await;
        });
        assert_eq!(shutdown.receiver_count(), 1);

        shutdown.trigger();
        assert!(drain(vec![task], Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_drain_deadline() {
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        assert!(!drain(vec![task], Duration::from_millis(20)).await);
    }
}
