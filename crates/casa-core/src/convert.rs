// ── Wire-to-domain conversions ──
//
// Bridges `casa_api` protocol types and raw `result` payloads into
// `casa_core::model` types. Parsers return `None` when the payload does
// not have the expected shape; callers log and keep prior state.

use chrono::{DateTime, Utc};
use serde_json::Value;

use casa_api::HubEntityState;

use crate::model::{CalendarEvent, EntityState, Playlist, QueueTrack, TodoItem};

// ── Helpers ────────────────────────────────────────────────────────

fn parse_datetime(raw: Option<&String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

/// Calendar times arrive as a plain string or as `{dateTime}` / `{date}`.
fn calendar_time(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(obj @ Value::Object(_)) => str_field(obj, "dateTime")
            .or_else(|| str_field(obj, "date"))
            .unwrap_or_default(),
        _ => String::new(),
    }
}

/// `result.response` of a `return_response` service call.
fn service_response(payload: &Value) -> Option<&Value> {
    payload.get("response").filter(|v| !v.is_null())
}

// ── Entity state ───────────────────────────────────────────────────

impl From<HubEntityState> for EntityState {
    fn from(raw: HubEntityState) -> Self {
        Self {
            last_changed: parse_datetime(raw.last_changed.as_ref()),
            last_updated: parse_datetime(raw.last_updated.as_ref()),
            entity_id: raw.entity_id,
            state: raw.state,
            attributes: raw.attributes,
        }
    }
}

/// `get_states` result: an array of entity states.
/// Individual rows that fail to decode are skipped.
pub(crate) fn parse_snapshot(payload: Value) -> Option<Vec<EntityState>> {
    let Value::Array(rows) = payload else {
        return None;
    };
    let entities = rows
        .into_iter()
        .filter_map(|row| match serde_json::from_value::<HubEntityState>(row) {
            Ok(raw) => Some(EntityState::from(raw)),
            Err(e) => {
                tracing::debug!(error = %e, "skipping undecodable entity row");
                None
            }
        })
        .collect();
    Some(entities)
}

// ── Service responses ──────────────────────────────────────────────

/// `calendar.get_events`: `response` maps calendar id to `{events: [...]}`.
/// Events from all calendars are flattened and sorted by start.
pub(crate) fn parse_calendar_events(payload: &Value) -> Option<Vec<CalendarEvent>> {
    let calendars = service_response(payload)?.as_object()?;

    let mut events: Vec<CalendarEvent> = calendars
        .iter()
        .filter_map(|(calendar, body)| Some((calendar, body.get("events")?.as_array()?)))
        .flat_map(|(calendar, list)| {
            list.iter().map(move |event| CalendarEvent {
                summary: str_field(event, "summary").unwrap_or_default(),
                start: calendar_time(event.get("start")),
                end: calendar_time(event.get("end")),
                description: str_field(event, "description"),
                location: str_field(event, "location"),
                calendar: calendar.clone(),
            })
        })
        .collect();

    events.sort_by(|a, b| a.start.cmp(&b.start));
    Some(events)
}

/// `spotifyplus.get_playlist_favorites`: `response.result.{items,total}`.
pub(crate) fn parse_playlists(payload: &Value) -> Option<(u64, Vec<Playlist>)> {
    let result = service_response(payload)?.get("result")?;
    let items = result.get("items")?.as_array()?;

    let playlists: Vec<Playlist> = items
        .iter()
        .filter_map(|item| {
            Some(Playlist {
                name: str_field(item, "name")?,
                uri: str_field(item, "uri")?,
                image_url: str_field(item, "image_url"),
                track_count: item
                    .get("tracks")
                    .and_then(|t| t.get("total"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            })
        })
        .collect();

    let total = result
        .get("total")
        .and_then(Value::as_u64)
        .filter(|&t| t > 0)
        .unwrap_or_else(|| u64::try_from(playlists.len()).unwrap_or(u64::MAX));
    Some((total, playlists))
}

/// `spotifyplus.get_player_queue_info`: `response.result.queue`.
pub(crate) fn parse_queue(payload: &Value) -> Option<Vec<QueueTrack>> {
    let response = service_response(payload)?;
    let Some(queue) = response
        .get("result")
        .and_then(|r| r.get("queue"))
        .and_then(Value::as_array)
    else {
        return Some(Vec::new());
    };

    Some(
        queue
            .iter()
            .map(|track| QueueTrack {
                name: str_field(track, "name").unwrap_or_else(|| "Unknown".into()),
                artist: track
                    .get("artists")
                    .and_then(|a| a.get(0))
                    .and_then(|a| str_field(a, "name"))
                    .unwrap_or_else(|| "Unknown Artist".into()),
                uri: str_field(track, "uri").unwrap_or_default(),
                image_url: str_field(track, "image_url"),
                duration_ms: track
                    .get("duration_ms")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            })
            .collect(),
    )
}

/// `todo/item/list`: `{items: [...]}`. Items without a summary fall
/// back to `name`.
pub(crate) fn parse_todo_items(payload: &Value) -> Option<Vec<TodoItem>> {
    let items = payload.get("items")?.as_array()?;
    Some(
        items
            .iter()
            .map(|item| TodoItem {
                summary: str_field(item, "summary")
                    .or_else(|| str_field(item, "name"))
                    .unwrap_or_default(),
                status: str_field(item, "status").unwrap_or_else(|| "needs_action".into()),
                uid: str_field(item, "uid"),
            })
            .collect(),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn snapshot_skips_bad_rows() {
        let entities = parse_snapshot(json!([
            { "entity_id": "light.x", "state": "on",
              "last_changed": "2026-10-17T08:00:00+00:00" },
            { "state": "missing id" },
            { "entity_id": "sensor.t", "state": "21.5", "attributes": { "unit_of_measurement": "°C" } }
        ]))
        .unwrap();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].entity_id, "light.x");
        assert!(entities[0].last_changed.is_some());
        assert_eq!(entities[1].attributes["unit_of_measurement"], "°C");
    }

    #[test]
    fn snapshot_rejects_non_array() {
        assert!(parse_snapshot(json!({ "oops": true })).is_none());
        assert!(parse_snapshot(Value::Null).is_none());
    }

    #[test]
    fn calendar_events_flatten_and_sort() {
        let events = parse_calendar_events(&json!({
            "response": {
                "calendar.work": { "events": [
                    { "summary": "Standup", "start": "2026-10-18T09:00:00-07:00",
                      "end": "2026-10-18T09:15:00-07:00" }
                ]},
                "calendar.family": { "events": [
                    { "summary": "Pumpkin patch", "start": { "date": "2026-10-17" },
                      "end": { "date": "2026-10-18" }, "location": "Farm" }
                ]}
            }
        }))
        .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].summary, "Pumpkin patch");
        assert_eq!(events[0].calendar, "calendar.family");
        assert!(events[0].is_all_day());
        assert_eq!(events[0].location.as_deref(), Some("Farm"));
        assert_eq!(events[1].calendar, "calendar.work");
        assert!(!events[1].is_all_day());
    }

    #[test]
    fn calendar_without_response_is_malformed() {
        assert!(parse_calendar_events(&json!({ "response": null })).is_none());
        assert!(parse_calendar_events(&json!({})).is_none());
    }

    #[test]
    fn playlists_with_total() {
        let (total, playlists) = parse_playlists(&json!({
            "response": { "result": {
                "total": 120,
                "items": [
                    { "name": "Focus", "uri": "spotify:playlist:1", "image_url": "https://i/1.jpg",
                      "tracks": { "total": 42 } },
                    { "name": "No uri" }
                ]
            }}
        }))
        .unwrap();
        assert_eq!(total, 120);
        assert_eq!(playlists.len(), 1);
        assert_eq!(playlists[0].track_count, 42);
    }

    #[test]
    fn playlists_total_defaults_to_len() {
        let (total, _) = parse_playlists(&json!({
            "response": { "result": { "items": [ { "name": "A", "uri": "u" } ] } }
        }))
        .unwrap();
        assert_eq!(total, 1);
    }

    #[test]
    fn queue_defaults() {
        let queue = parse_queue(&json!({
            "response": { "result": { "queue": [
                { "uri": "spotify:track:1", "duration_ms": 180000 },
                { "name": "Song", "artists": [ { "name": "Band" } ], "uri": "spotify:track:2" }
            ]}}
        }))
        .unwrap();
        assert_eq!(queue[0].name, "Unknown");
        assert_eq!(queue[0].artist, "Unknown Artist");
        assert_eq!(queue[0].duration_ms, 180_000);
        assert_eq!(queue[1].artist, "Band");
    }

    #[test]
    fn empty_queue_when_response_has_none() {
        assert_eq!(parse_queue(&json!({ "response": {} })).unwrap(), Vec::new());
    }

    #[test]
    fn todo_items() {
        let items = parse_todo_items(&json!({
            "items": [
                { "summary": "Milk", "status": "needs_action", "uid": "1" },
                { "summary": "Eggs", "status": "completed", "uid": "2" }
            ]
        }))
        .unwrap();
        assert!(!items[0].done());
        assert!(items[1].done());
        assert!(parse_todo_items(&json!([])).is_none());
    }
}
