//! Shared helpers for command handlers: a connected session plus
//! waiting on the events it publishes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use casa_core::{CoreError, Request, Session, SessionEvent};

use crate::config::Resolved;
use crate::error::CliError;

const FLUSH_KEY: &str = "casa/flush";

/// A session that reached `Ready`, with an event receiver that was
/// subscribed before the connection started.
pub struct Live {
    pub session: Session,
    events: broadcast::Receiver<SessionEvent>,
    wait: Duration,
    profile: String,
}

/// Connect and wait until the hub accepted our token.
pub async fn connect(resolved: &Resolved) -> Result<Live, CliError> {
    let session = resolved.open_session()?;
    let events = session.events();

    match session.connect().await {
        Err(CoreError::LoggedOut) => return Err(resolved.not_signed_in()),
        other => other?,
    }

    let wait = resolved.session.timeout;
    if let Err(e) = session.wait_until_ready(wait).await {
        session.disconnect().await;
        return Err(match e {
            CoreError::LoggedOut => resolved.not_signed_in(),
            e => e.into(),
        });
    }

    Ok(Live {
        session,
        events,
        wait,
        profile: resolved.name.clone(),
    })
}

impl Live {
    /// Wait for the first event `pick` maps to a value.
    ///
    /// Fails on sign-out, on a closed channel, or after the profile timeout.
    pub async fn wait_for<T>(
        &mut self,
        mut pick: impl FnMut(SessionEvent) -> Option<T>,
    ) -> Result<T, CliError> {
        let limit = self.wait;
        let profile = &self.profile;
        let events = &mut self.events;

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::LoggedOut { reason }) => {
                        tracing::debug!(?reason, "signed out while waiting");
                        return Err(CliError::NotSignedIn {
                            profile: profile.clone(),
                        });
                    }
                    Ok(event) => {
                        if let Some(value) = pick(event) {
                            return Ok(value);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event receiver lagged");
                    }
                    Err(RecvError::Closed) => return Err(CoreError::NotConnected.into()),
                }
            }
        };

        tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| CliError::Timeout {
                seconds: limit.as_secs(),
            })?
    }

    /// Wait for the first `get_states` dump to land in the table.
    pub async fn snapshot(&mut self) -> Result<usize, CliError> {
        self.wait_for(|event| match event {
            SessionEvent::SnapshotApplied { count } => Some(count),
            _ => None,
        })
        .await
    }

    /// Round-trip a ping so everything queued before it has been written.
    pub async fn flush(&mut self) -> Result<(), CliError> {
        self.session
            .request(FLUSH_KEY, Request::Ping)
            .await
            .ok_or(CoreError::NotConnected)?;
        let answer = self
            .wait_for(|event| match event {
                SessionEvent::Response { key, .. } if key == FLUSH_KEY => Some(Ok(())),
                SessionEvent::RequestFailed { key, error } if key == FLUSH_KEY => Some(Err(error)),
                _ => None,
            })
            .await?;
        Ok(answer?)
    }

    /// Wait for the hub's answer to the `call_service` sent as `id`.
    ///
    /// `None` means the session had no socket to send on.
    pub async fn call_result(&mut self, id: Option<u64>) -> Result<Arc<Value>, CliError> {
        let id = id.ok_or(CoreError::NotConnected)?;
        let answer = self
            .wait_for(|event| match event {
                SessionEvent::ServiceCalled { id: got, result } if got == id => Some(result),
                _ => None,
            })
            .await?;
        Ok(answer?)
    }

    pub async fn close(self) {
        self.session.disconnect().await;
    }
}

/// Take `explicit`, else the profile's value, else fail with a hint.
pub fn pick_entity(
    explicit: Option<String>,
    fallback: Option<&str>,
    what: &str,
    hint: &str,
) -> Result<String, CliError> {
    explicit
        .or_else(|| fallback.map(str::to_owned))
        .ok_or_else(|| CliError::Missing {
            what: what.into(),
            hint: hint.into(),
        })
}

/// Parse `--data` into a JSON object.
pub fn parse_data(raw: Option<&str>) -> Result<serde_json::Map<String, Value>, CliError> {
    let Some(raw) = raw else {
        return Ok(serde_json::Map::new());
    };
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(CliError::Validation {
            field: "data".into(),
            reason: format!("expected a JSON object, got {other}"),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn data_must_be_an_object() {
        assert!(parse_data(None).unwrap().is_empty());
        assert_eq!(parse_data(Some(r#"{"brightness": 80}"#)).unwrap()["brightness"], 80);
        assert!(matches!(
            parse_data(Some("[1]")),
            Err(CliError::Validation { .. })
        ));
        assert!(matches!(parse_data(Some("{")), Err(CliError::Json(_))));
    }

    #[test]
    fn explicit_entity_wins() {
        let picked = pick_entity(Some("a".into()), Some("b"), "player", "").unwrap();
        assert_eq!(picked, "a");
        assert_eq!(pick_entity(None, Some("b"), "player", "").unwrap(), "b");
        assert!(matches!(
            pick_entity(None, None, "player", "set media_player"),
            Err(CliError::Missing { .. })
        ));
    }
}
