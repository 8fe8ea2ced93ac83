use serde::{Deserialize, Serialize};

/// One event from `calendar.get_events`, tagged with its calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub summary: String,
    /// RFC 3339 datetime, or a bare date for all-day events.
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Entity id of the calendar the event came from.
    pub calendar: String,
}

impl CalendarEvent {
    /// All-day events carry a date without a time component.
    pub fn is_all_day(&self) -> bool {
        !self.start.contains('T')
    }
}

/// A saved playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub name: String,
    pub uri: String,
    pub image_url: Option<String>,
    pub track_count: u64,
}

/// One entry of the player queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTrack {
    pub name: String,
    pub artist: String,
    pub uri: String,
    pub image_url: Option<String>,
    pub duration_ms: u64,
}

/// One item of a todo list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub summary: String,
    pub status: String,
    #[serde(default)]
    pub uid: Option<String>,
}

impl TodoItem {
    pub fn done(&self) -> bool {
        self.status == "completed"
    }
}
