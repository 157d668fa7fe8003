//! Per-account sequence cursors.
//!
//! A cursor holds the next sequence number the bridge will hand out for an
//! account. Reservation happens under the account lock, so two transactions
//! of one account never receive the same number.
//!
//! ```text
//! reserve   → next (then next += 1); reseeded from the link when stale or behind
//! release   → unconsumed top reservation rolls back, anything else marks stale
//! reset     → reseed from the network
//! catch_up  → skip numbers the network already consumed
//! ```

use dashmap::DashMap;

#[derive(Debug, Clone, Copy)]
struct Cursor {
    next: u64,
    stale: bool,
}

#[derive(Debug, Default)]
pub struct SequenceCursors {
    cursors: DashMap<String, Cursor>,
}

impl SequenceCursors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next sequence for `account`. `confirmed` is the link's last
    /// confirmed sequence.
    pub fn reserve(&self, account: &str, confirmed: u64) -> u64 {
        let mut entry = self.cursors.entry(account.to_string()).or_insert(Cursor {
            next: confirmed + 1,
            stale: false,
        });
        if entry.stale || entry.next <= confirmed {
            entry.next = confirmed + 1;
            entry.stale = false;
        }
        let reserved = entry.next;
        entry.next += 1;
        reserved
    }

    /// Give back a reservation. Rolls back when `sequence` was the last one
    /// handed out and the network did not consume it; otherwise the cursor
    /// is reseeded on the next reservation.
    pub fn release(&self, account: &str, sequence: u64, consumed: bool) {
        if let Some(mut entry) = self.cursors.get_mut(account) {
            if !consumed && entry.next == sequence + 1 {
                entry.next = sequence;
            } else {
                entry.stale = true;
            }
        }
    }

    /// Reseed from the network's current sequence.
    pub fn reset(&self, account: &str, network_sequence: u64) {
        self.cursors.insert(
            account.to_string(),
            Cursor {
                next: network_sequence + 1,
                stale: false,
            },
        );
    }

    /// Move the cursor past `floor` without handing out numbers below any
    /// live reservation.
    pub fn catch_up(&self, account: &str, floor: u64) {
        let mut entry = self.cursors.entry(account.to_string()).or_insert(Cursor {
            next: floor + 1,
            stale: false,
        });
        if entry.stale || entry.next <= floor {
            entry.next = floor + 1;
        }
        entry.stale = false;
    }

    /// Forget everything about `account`; the next reservation uses the link.
    pub fn invalidate(&self, account: &str) {
        if let Some(mut entry) = self.cursors.get_mut(account) {
            entry.stale = true;
        }
    }

    /// Next sequence that would be handed out, if a cursor exists.
    pub fn peek(&self, account: &str) -> Option<u64> {
        self.cursors.get(account).filter(|c| !c.stale).map(|c| c.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservations_are_unique() {
        let cursors = SequenceCursors::new();
        assert_eq!(cursors.reserve("GA", 10), 11);
        assert_eq!(cursors.reserve("GA", 10), 12);
        assert_eq!(cursors.reserve("GB", 3), 4);
    }

    #[test]
    fn test_rollback_only_top_reservation() {
        let cursors = SequenceCursors::new();
        let a = cursors.reserve("GA", 10);
        let b = cursors.reserve("GA", 10);

        cursors.release("GA", b, false);
        assert_eq!(cursors.peek("GA"), Some(b));

        cursors.release("GA", a, false);
        assert_eq!(cursors.peek("GA"), None);
        assert_eq!(cursors.reserve("GA", 10), 11);
    }

    #[test]
    fn test_catches_up_with_link() {
        let cursors = SequenceCursors::new();
        cursors.reserve("GA", 10);
        assert_eq!(cursors.reserve("GA", 20), 21);
    }

    #[test]
    fn test_reset_and_invalidate() {
        let cursors = SequenceCursors::new();
        cursors.reserve("GA", 10);
        cursors.reset("GA", 15);
        assert_eq!(cursors.reserve("GA", 10), 16);

        cursors.invalidate("GA");
        assert_eq!(cursors.reserve("GA", 10), 11);
    }

    #[test]
    fn test_catch_up_keeps_live_reservations() {
        let cursors = SequenceCursors::new();
        cursors.reserve("GA", 10);
        cursors.reserve("GA", 10);
        cursors.catch_up("GA", 10);
        assert_eq!(cursors.peek("GA"), Some(13));

        cursors.catch_up("GA", 20);
        assert_eq!(cursors.reserve("GA", 10), 21);
    }
}
