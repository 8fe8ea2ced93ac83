// ── Reactive entity state ──

mod entity_table;

pub use entity_table::{EntityTable, Snapshot};
