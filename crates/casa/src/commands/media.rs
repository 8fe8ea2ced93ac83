//! Calendar, playlists, queue, playback and speaker selection.

use tabled::Tabled;

use casa_core::{
    CalendarEvent, CoreError, Playlist, QueueTrack, SessionEvent, Speaker, SpeakerKind,
};

use crate::cli::{
    CalendarArgs, GlobalOpts, OutputFormat, PlayArgs, PlayerArgs, PlaylistsArgs, SpeakerArgs,
    SpeakerKindArg,
};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

const PLAYER_HINT: &str = "Pass --player or set `media_player` in the profile.";

fn media_player(resolved: &Resolved, args: PlayerArgs) -> Result<String, CliError> {
    util::pick_entity(
        args.player,
        resolved.profile.media_player.as_deref(),
        "media player",
        PLAYER_HINT,
    )
}

fn spotifyplus_player(resolved: &Resolved, args: PlayerArgs) -> Result<String, CliError> {
    util::pick_entity(
        args.player,
        resolved.profile.spotifyplus(),
        "SpotifyPlus player",
        "Pass --player or set `spotifyplus_entity` in the profile.",
    )
}

// ── Calendar ─────────────────────────────────────────────────────────

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "End")]
    end: String,
    #[tabled(rename = "Summary")]
    summary: String,
    #[tabled(rename = "Calendar")]
    calendar: String,
    #[tabled(rename = "Location")]
    location: String,
}

fn event_row(event: &CalendarEvent) -> EventRow {
    let when = |raw: &str| {
        chrono::DateTime::parse_from_rfc3339(raw)
            .map_or_else(|_| raw.to_owned(), |t| t.format("%a %b %-d %H:%M").to_string())
    };
    EventRow {
        start: if event.is_all_day() {
            format!("{} (all day)", event.start)
        } else {
            when(&event.start)
        },
        end: if event.is_all_day() {
            event.end.clone()
        } else {
            when(&event.end)
        },
        summary: event.summary.clone(),
        calendar: event.calendar.clone(),
        location: event.location.clone().unwrap_or_default(),
    }
}

pub async fn calendar(resolved: &Resolved, args: CalendarArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let calendars = if args.calendars.is_empty() {
        resolved.profile.calendars.clone()
    } else {
        args.calendars
    };
    if calendars.is_empty() {
        return Err(CliError::Missing {
            what: "calendar".into(),
            hint: "Pass calendar entities or set `calendars` in the profile.".into(),
        });
    }

    let mut live = util::connect(resolved).await?;
    let result = async {
        live.session
            .fetch_calendar_events(calendars, args.days)
            .await
            .ok_or(CoreError::NotConnected)?;
        live.wait_for(|event| match event {
            SessionEvent::CalendarEvents(events) => Some(events),
            _ => None,
        })
        .await
    }
    .await;
    live.close().await;

    let events = result?;
    let out = output::render_list(global.output, events.as_slice(), event_row, |e| e.summary.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Playlists & queue ────────────────────────────────────────────────

#[derive(Tabled)]
struct PlaylistRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Tracks")]
    tracks: u64,
    #[tabled(rename = "URI")]
    uri: String,
}

fn playlist_row(p: &Playlist) -> PlaylistRow {
    PlaylistRow {
        name: p.name.clone(),
        tracks: p.track_count,
        uri: p.uri.clone(),
    }
}

pub async fn playlists(resolved: &Resolved, args: PlaylistsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let player = spotifyplus_player(resolved, args.player)?;

    let mut live = util::connect(resolved).await?;
    let result = async {
        live.session
            .fetch_playlists(&player, args.limit)
            .await
            .ok_or(CoreError::NotConnected)?;
        live.wait_for(|event| match event {
            SessionEvent::Playlists { total, items } => Some((total, items)),
            _ => None,
        })
        .await
    }
    .await;
    live.close().await;

    let (total, items) = result?;
    let out = output::render_list(global.output, items.as_slice(), playlist_row, |p| p.uri.clone())?;
    output::print_output(&out, global.quiet);
    if global.output == OutputFormat::Table && !global.quiet {
        eprintln!("{} of {total} playlists", items.len());
    }
    Ok(())
}

#[derive(Tabled)]
struct TrackRow {
    #[tabled(rename = "Track")]
    name: String,
    #[tabled(rename = "Artist")]
    artist: String,
    #[tabled(rename = "Length")]
    length: String,
}

fn track_row(t: &QueueTrack) -> TrackRow {
    TrackRow {
        name: t.name.clone(),
        artist: t.artist.clone(),
        length: track_length(t.duration_ms),
    }
}

fn track_length(duration_ms: u64) -> String {
    let secs = duration_ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

pub async fn queue(resolved: &Resolved, args: PlayerArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let player = spotifyplus_player(resolved, args)?;

    let mut live = util::connect(resolved).await?;
    let result = async {
        live.session
            .fetch_queue(&player)
            .await
            .ok_or(CoreError::NotConnected)?;
        live.wait_for(|event| match event {
            SessionEvent::Queue(tracks) => Some(tracks),
            _ => None,
        })
        .await
    }
    .await;
    live.close().await;

    let tracks = result?;
    let out = output::render_list(global.output, tracks.as_slice(), track_row, |t| t.uri.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Playback ─────────────────────────────────────────────────────────

pub async fn play(resolved: &Resolved, args: PlayArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let player = media_player(resolved, args.player)?;

    let mut live = util::connect(resolved).await?;
    let result = async {
        let ids = live.session.play_playlist(&player, &args.uri).await?;
        live.flush().await?;
        Ok::<_, CliError>(ids.len())
    }
    .await;
    live.close().await;

    let sent = result?;
    tracing::debug!(sent, "playlist requests sent");
    output::print_output(&format!("Playing {} on {player}", args.uri), global.quiet);
    Ok(())
}

impl From<SpeakerKindArg> for SpeakerKind {
    fn from(arg: SpeakerKindArg) -> Self {
        match arg {
            SpeakerKindArg::Spotify => Self::Spotify,
            SpeakerKindArg::Local => Self::Local,
        }
    }
}

/// With no name, show the stored speaker. Otherwise store it, and with
/// `--transfer` move playback there.
pub async fn speaker(resolved: &Resolved, args: SpeakerArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let session = resolved.open_session()?;

    let Some(name) = args.name else {
        let line = session.selected_speaker().map_or_else(
            || "No speaker selected".to_owned(),
            |s| format!("{} ({}, {})", s.name, s.entity, s.kind),
        );
        output::print_output(&line, global.quiet);
        return Ok(());
    };

    let speaker = Speaker {
        entity: args.entity.unwrap_or_default(),
        name,
        kind: args.kind.into(),
    };
    session.select_speaker(speaker.clone());

    if args.transfer {
        let player = media_player(resolved, args.player)?;
        let mut live = util::connect(resolved).await?;
        let result = async {
            live.session.transfer_to_speaker(&player, speaker.clone()).await?;
            live.flush().await
        }
        .await;
        live.close().await;
        result?;
    }

    output::print_output(&format!("Speaker set to {}", speaker.name), global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lengths() {
        assert_eq!(track_length(0), "0:00");
        assert_eq!(track_length(185_000), "3:05");
    }

    #[test]
    fn all_day_rows_keep_dates() {
        let row = event_row(&CalendarEvent {
            summary: "Pumpkin patch".into(),
            start: "2026-10-17".into(),
            end: "2026-10-18".into(),
            description: None,
            location: None,
            calendar: "calendar.family".into(),
        });
        assert_eq!(row.start, "2026-10-17 (all day)");
        assert_eq!(row.end, "2026-10-18");
    }

    #[test]
    fn timed_rows_are_formatted() {
        let row = event_row(&CalendarEvent {
            summary: "Standup".into(),
            start: "2026-10-19T09:00:00-07:00".into(),
            end: "2026-10-19T09:15:00-07:00".into(),
            description: None,
            location: Some("Office".into()),
            calendar: "calendar.work".into(),
        });
        assert_eq!(row.start, "Mon Oct 19 09:00");
        assert_eq!(row.location, "Office");
    }
}
