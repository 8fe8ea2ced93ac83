// ── Command API ──
//
// User actions flow through the `Command` enum. Each command is planned
// against the current entity table into one or more `call_service`
// steps; the session sends them through the live connection.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use casa_api::ServiceCall;

use crate::error::CoreError;
use crate::model::{EntityCategory, EntityState};
use crate::token_store::{Speaker, SpeakerKind};

/// Delay between switching the speaker source and starting playback.
pub const PLAY_AFTER_SELECT_DELAY: Duration = Duration::from_millis(500);

/// Days of calendar events fetched by default.
pub const DEFAULT_CALENDAR_DAYS: i64 = 90;

/// Playlists fetched per request by default.
pub const DEFAULT_PLAYLIST_LIMIT: u32 = 50;

/// Cover tilt used to open blinds that are (nearly) closed either way.
const TILT_OPEN: u8 = 70;
const TILT_CLOSED: u8 = 100;

/// A user-initiated write against the hub.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `{domain}.{service}` with `entity_id` merged into `data`.
    CallService {
        domain: String,
        service: String,
        entity_id: String,
        data: Map<String, Value>,
    },
    /// Domain-aware on/off.
    Toggle { entity_id: String },
    /// Route playback to the selected speaker, then start a playlist.
    PlayPlaylist { player: String, uri: String },
    /// Move playback to another speaker.
    TransferToSpeaker { player: String, speaker: Speaker },
}

/// One outbound service call, sent after `delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub delay: Duration,
    pub call: ServiceCall,
}

impl Step {
    fn now(call: ServiceCall) -> Self {
        Self {
            delay: Duration::ZERO,
            call,
        }
    }
}

impl Command {
    /// Turn the command into concrete steps.
    ///
    /// `lookup` reads the current state of an entity; `speaker` is the
    /// user's selected playback target. An empty plan means nothing to send.
    pub fn plan(
        self,
        lookup: impl Fn(&str) -> Option<std::sync::Arc<EntityState>>,
        speaker: Option<&Speaker>,
    ) -> Vec<Step> {
        match self {
            Self::CallService {
                domain,
                service,
                entity_id,
                data,
            } => vec![Step::now(entity_call(&domain, &service, &entity_id, data))],
            Self::Toggle { entity_id } => {
                let current = lookup(&entity_id);
                vec![Step::now(toggle_call(&entity_id, current.as_deref()))]
            }
            Self::PlayPlaylist { player, uri } => {
                let mut steps = Vec::with_capacity(2);
                let mut delay = Duration::ZERO;
                if let Some(speaker) = speaker.filter(|s| !s.name.is_empty()) {
                    steps.push(Step::now(select_source_call(&player, &speaker.name)));
                    delay = PLAY_AFTER_SELECT_DELAY;
                }
                steps.push(Step {
                    delay,
                    call: play_media_call(&player, "playlist", &uri),
                });
                steps
            }
            Self::TransferToSpeaker { player, speaker } => match speaker.kind {
                SpeakerKind::Spotify => vec![Step::now(select_source_call(&player, &speaker.name))],
                SpeakerKind::Local => {
                    tracing::info!(
                        speaker = %speaker.entity,
                        "local speaker selected; playback stays where it is"
                    );
                    Vec::new()
                }
            },
        }
    }
}

/// Split `"light.turn_on"` into `("light", "turn_on")`.
pub fn split_service(service: &str) -> Result<(&str, &str), CoreError> {
    match service.split_once('.') {
        Some((domain, name)) if !domain.is_empty() && !name.is_empty() && !name.contains('.') => {
            Ok((domain, name))
        }
        _ => Err(CoreError::InvalidService {
            service: service.to_owned(),
        }),
    }
}

// ── Request builders ────────────────────────────────────────────────

/// `call_service` with `service_data = {entity_id, ...data}`.
pub fn entity_call(
    domain: &str,
    service: &str,
    entity_id: &str,
    data: Map<String, Value>,
) -> ServiceCall {
    let mut call = ServiceCall::new(domain, service).with_data("entity_id", entity_id);
    call.service_data.extend(data);
    call
}

/// Target tilt for a cover toggle: 70 when the slats are near either
/// end of travel, 100 otherwise.
pub fn cover_tilt_target(current_tilt: f64) -> u8 {
    if current_tilt <= 5.0 || current_tilt >= 95.0 {
        TILT_OPEN
    } else {
        TILT_CLOSED
    }
}

/// Domain-aware toggle for `entity_id`.
pub fn toggle_call(entity_id: &str, current: Option<&EntityState>) -> ServiceCall {
    let none = Map::new;
    match EntityCategory::from_entity_id(entity_id) {
        EntityCategory::Script => entity_call("script", "turn_on", entity_id, none()),
        EntityCategory::InputBoolean => entity_call("input_boolean", "toggle", entity_id, none()),
        EntityCategory::Cover => {
            let tilt = current
                .and_then(|e| e.attribute_f64("current_tilt_position"))
                .unwrap_or(0.0);
            entity_call("cover", "set_cover_tilt_position", entity_id, none())
                .with_data("tilt_position", cover_tilt_target(tilt))
        }
        EntityCategory::Other => {
            let domain = crate::model::domain_of(entity_id);
            entity_call(domain, "toggle", entity_id, none())
        }
    }
}

pub fn select_source_call(player: &str, source: &str) -> ServiceCall {
    entity_call("media_player", "select_source", player, Map::new()).with_data("source", source)
}

pub fn play_media_call(player: &str, content_type: &str, content_id: &str) -> ServiceCall {
    entity_call("media_player", "play_media", player, Map::new())
        .with_data("media_content_type", content_type)
        .with_data("media_content_id", content_id)
}

/// `calendar.get_events` over `[now, now + days]` for the given calendars.
pub fn calendar_events_call(calendars: Vec<String>, now: DateTime<Utc>, days: i64) -> ServiceCall {
    let end = now + chrono::Duration::days(days);
    ServiceCall::new("calendar", "get_events")
        .with_target(calendars)
        .with_data("start_date_time", now.to_rfc3339())
        .with_data("end_date_time", end.to_rfc3339())
        .returning_response()
}

pub fn playlist_favorites_call(entity_id: &str, limit: u32) -> ServiceCall {
    ServiceCall::new("spotifyplus", "get_playlist_favorites")
        .with_data("entity_id", entity_id)
        .with_data("limit", limit)
        .returning_response()
}

pub fn queue_info_call(entity_id: &str) -> ServiceCall {
    ServiceCall::new("spotifyplus", "get_player_queue_info")
        .with_data("entity_id", entity_id)
        .returning_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn cover(tilt: Option<i64>) -> EntityState {
        let mut attributes = Map::new();
        if let Some(t) = tilt {
            attributes.insert("current_tilt_position".into(), json!(t));
        }
        EntityState {
            entity_id: "cover.blinds".into(),
            state: "open".into(),
            attributes,
            last_changed: None,
            last_updated: None,
        }
    }

    fn tilt_of(call: &ServiceCall) -> Value {
        call.service_data["tilt_position"].clone()
    }

    #[test]
    fn cover_tilt_policy() {
        assert_eq!(tilt_of(&toggle_call("cover.blinds", Some(&cover(Some(3))))), json!(70));
        assert_eq!(tilt_of(&toggle_call("cover.blinds", Some(&cover(Some(50))))), json!(100));
        assert_eq!(tilt_of(&toggle_call("cover.blinds", Some(&cover(Some(97))))), json!(70));
        assert_eq!(tilt_of(&toggle_call("cover.blinds", Some(&cover(None)))), json!(70));
        assert_eq!(tilt_of(&toggle_call("cover.blinds", None)), json!(70));
    }

    #[test]
    fn cover_tilt_boundaries() {
        assert_eq!(cover_tilt_target(5.0), 70);
        assert_eq!(cover_tilt_target(6.0), 100);
        assert_eq!(cover_tilt_target(94.0), 100);
        assert_eq!(cover_tilt_target(95.0), 70);
    }

    #[test]
    fn toggle_by_domain() {
        let script = toggle_call("script.goodnight", None);
        assert_eq!((script.domain.as_str(), script.service.as_str()), ("script", "turn_on"));

        let boolean = toggle_call("input_boolean.guest", None);
        assert_eq!(boolean.service, "toggle");
        assert_eq!(boolean.domain, "input_boolean");

        let light = toggle_call("light.kitchen", None);
        assert_eq!((light.domain.as_str(), light.service.as_str()), ("light", "toggle"));
        assert_eq!(light.service_data["entity_id"], "light.kitchen");
    }

    #[test]
    fn call_merges_entity_and_data() {
        let mut data = Map::new();
        data.insert("brightness".into(), json!(128));
        let steps = Command::CallService {
            domain: "light".into(),
            service: "turn_on".into(),
            entity_id: "light.x".into(),
            data,
        }
        .plan(|_| None, None);
        assert_eq!(steps.len(), 1);
        assert_eq!(
            serde_json::to_value(&steps[0].call.service_data).unwrap(),
            json!({ "entity_id": "light.x", "brightness": 128 })
        );
    }

    #[test]
    fn split_service_validation() {
        assert_eq!(split_service("light.turn_on").unwrap(), ("light", "turn_on"));
        for bad in ["light", ".on", "light.", "a.b.c", ""] {
            assert!(matches!(split_service(bad), Err(CoreError::InvalidService { .. })), "{bad}");
        }
    }

    #[test]
    fn toggle_reads_current_state() {
        let row = Arc::new(cover(Some(50)));
        let steps = Command::Toggle {
            entity_id: "cover.blinds".into(),
        }
        .plan(|id| (id == "cover.blinds").then(|| row.clone()), None);
        assert_eq!(tilt_of(&steps[0].call), json!(100));
    }

    #[test]
    fn play_playlist_selects_source_first() {
        let speaker = Speaker {
            entity: "media_player.den".into(),
            name: "Den".into(),
            kind: SpeakerKind::Spotify,
        };
        let steps = Command::PlayPlaylist {
            player: "media_player.spotify".into(),
            uri: "spotify:playlist:1".into(),
        }
        .plan(|_| None, Some(&speaker));

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].call.service, "select_source");
        assert_eq!(steps[0].call.service_data["source"], "Den");
        assert_eq!(steps[0].delay, Duration::ZERO);
        assert_eq!(steps[1].call.service, "play_media");
        assert_eq!(steps[1].call.service_data["media_content_type"], "playlist");
        assert_eq!(steps[1].delay, PLAY_AFTER_SELECT_DELAY);
    }

    #[test]
    fn play_playlist_without_speaker_plays_immediately() {
        let steps = Command::PlayPlaylist {
            player: "media_player.spotify".into(),
            uri: "spotify:playlist:1".into(),
        }
        .plan(|_| None, None);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].delay, Duration::ZERO);
    }

    #[test]
    fn transfer_to_local_speaker_is_noop() {
        let steps = Command::TransferToSpeaker {
            player: "media_player.spotify".into(),
            speaker: Speaker {
                entity: "media_player.vlc".into(),
                name: "Game Day".into(),
                kind: SpeakerKind::Local,
            },
        }
        .plan(|_| None, None);
        assert!(steps.is_empty());
    }

    #[test]
    fn calendar_window() {
        let now = DateTime::parse_from_rfc3339("2026-10-17T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let call = calendar_events_call(vec!["calendar.family".into()], now, 90);
        assert!(call.return_response);
        assert_eq!(call.service_data["start_date_time"], "2026-10-17T12:00:00+00:00");
        assert_eq!(call.service_data["end_date_time"], "2027-01-15T12:00:00+00:00");
        assert_eq!(call.target.unwrap().entity_id, ["calendar.family"]);
    }
}
