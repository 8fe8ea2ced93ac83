// ── Request correlation ──
//
// Every correlated request gets an id from the connection's correlator;
// the hub echoes it in the matching `result`. A correlator lives exactly
// as long as its connection, so ids from a previous connection can never
// resolve against a new one.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// What a pending request was for. Decides where its result goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// `subscribe_events` acknowledgement.
    Subscribe,
    /// `get_states` full entity dump.
    Snapshot,
    CalendarEvents,
    Playlists,
    Queue,
    TodoList { list_id: String },
    /// Fire-and-forget service call; only failures are interesting.
    ServiceCall,
    /// Keepalive round-trip.
    Ping,
    /// Caller-defined request; the raw payload is republished under `key`.
    Custom(String),
}

#[derive(Debug)]
struct Pending {
    intent: Intent,
    issued_at: Instant,
}

/// Monotonic id source plus the `id -> intent` table for one connection.
#[derive(Debug)]
pub struct RequestCorrelator {
    next_id: u64,
    pending: HashMap<u64, Pending>,
}

impl Default for RequestCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
        }
    }

    /// Allocate the next id and remember what it was issued for.
    pub fn issue(&mut self, intent: Intent) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            Pending {
                intent,
                issued_at: Instant::now(),
            },
        );
        id
    }

    /// Remove and return the intent for `id`. Unknown ids yield `None`.
    pub fn resolve(&mut self, id: u64) -> Option<Intent> {
        let resolved = self.pending.remove(&id).map(|p| p.intent);
        if resolved.is_none() {
            tracing::debug!(id, "result for unknown request id");
        }
        resolved
    }

    /// Drop entries older than `max_age`, returning how many were removed.
    pub fn prune(&mut self, max_age: Duration) -> usize {
        let before = self.pending.len();
        self.pending.retain(|id, p| {
            let keep = p.issued_at.elapsed() < max_age;
            if !keep {
                tracing::debug!(id, intent = ?p.intent, "dropping unanswered request");
            }
            keep
        });
        before - self.pending.len()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_from_one() {
        let mut c = RequestCorrelator::new();
        assert_eq!(c.issue(Intent::Subscribe), 1);
        assert_eq!(c.issue(Intent::Snapshot), 2);
        assert_eq!(c.issue(Intent::ServiceCall), 3);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn resolve_removes_entry() {
        let mut c = RequestCorrelator::new();
        let id = c.issue(Intent::TodoList {
            list_id: "shopping".into(),
        });
        assert_eq!(
            c.resolve(id),
            Some(Intent::TodoList {
                list_id: "shopping".into()
            })
        );
        assert_eq!(c.resolve(id), None);
        assert!(c.is_empty());
    }

    #[test]
    fn unknown_id_is_noop() {
        let mut c = RequestCorrelator::new();
        c.issue(Intent::Snapshot);
        assert_eq!(c.resolve(42), None);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn prune_drops_only_old_entries() {
        let mut c = RequestCorrelator::new();
        c.issue(Intent::Snapshot);
        assert_eq!(c.prune(Duration::from_secs(60)), 0);
        assert_eq!(c.prune(Duration::ZERO), 1);
        assert!(c.is_empty());
        // ids keep counting after a prune
        assert_eq!(c.issue(Intent::Ping), 2);
    }
}
