// ── Domain model ──
//
// Types consumers read: entity rows from the state table and the
// media/calendar/todo payloads published as session events.

mod entity;
mod media;

pub use entity::{EntityCategory, EntityState};
pub(crate) use entity::domain_of;
pub use media::{CalendarEvent, Playlist, QueueTrack, TodoItem};
