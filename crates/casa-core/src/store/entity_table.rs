// ── Entity state table ──
//
// Lock-free concurrent storage keyed by entity id, with push-based
// change notification via a `watch` channel of sorted snapshots.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::EntityState;

/// Rows sorted by entity id.
pub type Snapshot = Arc<Vec<Arc<EntityState>>>;

/// Entity id -> last-known state.
///
/// Written only by the connection's inbound handling; read by everyone.
/// Rows are never removed except by [`clear`](Self::clear).
pub struct EntityTable {
    by_id: DashMap<String, Arc<EntityState>>,
    snapshot: watch::Sender<Snapshot>,
}

impl Default for EntityTable {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityTable {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_id: DashMap::new(),
            snapshot,
        }
    }

    // ── Writers ──────────────────────────────────────────────────────

    /// Upsert every entity in a full dump. Entities missing from the
    /// dump are kept.
    pub(crate) fn apply_snapshot(&self, entities: Vec<EntityState>) -> usize {
        let count = entities.len();
        for entity in entities {
            self.by_id.insert(entity.entity_id.clone(), Arc::new(entity));
        }
        self.rebuild_snapshot();
        count
    }

    /// Overwrite one row unconditionally.
    ///
    /// The sorted snapshot is patched in place; the vector is only copied
    /// when a reader still holds the previous snapshot.
    pub(crate) fn apply_change(&self, entity: EntityState) {
        let row = Arc::new(entity);
        self.by_id.insert(row.entity_id.clone(), Arc::clone(&row));
        self.snapshot.send_modify(|snap| {
            let rows = Arc::make_mut(snap);
            let found = rows.binary_search_by(|e| e.entity_id.as_str().cmp(&row.entity_id));
            match found {
                Ok(pos) => rows[pos] = row,
                Err(pos) => rows.insert(pos, row),
            }
        });
    }

    /// Drop every row. Only called on logout.
    pub(crate) fn clear(&self) {
        self.by_id.clear();
        self.rebuild_snapshot();
    }

    // ── Readers ──────────────────────────────────────────────────────

    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityState>> {
        self.by_id.get(entity_id).map(|r| Arc::clone(r.value()))
    }

    /// Current rows sorted by entity id (cheap `Arc` clone).
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that sees a new snapshot after every write.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    /// Rows whose entity id starts with `{domain}.`, sorted.
    pub fn by_domain(&self, domain: &str) -> Vec<Arc<EntityState>> {
        self.snapshot()
            .iter()
            .filter(|e| e.domain() == domain)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn rebuild_snapshot(&self) {
        let mut values: Vec<Arc<EntityState>> =
            self.by_id.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}
