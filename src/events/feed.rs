//! Newline-delimited JSON ledger event feed.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::{broadcast, mpsc};

use crate::events::types::LedgerEvent;

/// Counters for one feed run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedStats {
    pub forwarded: usize,
    pub malformed: usize,
}

/// Reads one `LedgerEvent` per line and forwards it to the bridge.
pub struct NdjsonFeed<R> {
    reader: R,
}

impl<R: AsyncBufRead + Unpin> NdjsonFeed<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Forward events until end of input, shutdown or a closed channel.
    pub async fn run(self, events: mpsc::Sender<LedgerEvent>, mut shutdown: broadcast::Receiver<()>) -> FeedStats {
        let mut stats = FeedStats::default();
        let mut lines = self.reader.lines();

        loop {
            let line = tokio::select! {
                _ = shutdown.recv() => break,
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    tracing::info!(forwarded = stats.forwarded, "Ledger event feed reached end of input");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Ledger event feed read failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<LedgerEvent>(&line) {
                Ok(event) => {
                    if events.send(event).await.is_err() {
                        tracing::warn!("Bridge stopped accepting events; closing feed");
                        break;
                    }
                    stats.forwarded += 1;
                }
                Err(e) => {
                    stats.malformed += 1;
                    tracing::warn!(error = %e, "Skipping malformed ledger event");
                }
            }
        }
        stats
    }
}
