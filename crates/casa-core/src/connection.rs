// ── Event-stream connection ──
//
// One `Connection` per socket. It owns the handshake phase, the
// outbound queue into the socket pump, and the request correlator, so
// everything issued on a connection dies with it. Inbound frames are
// handled one at a time by the session's dispatch loop.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, trace, warn};

use casa_api::{InboundMessage, OutboundMessage, Request, ResultMessage, STATE_CHANGED};

use crate::convert;
use crate::correlator::{Intent, RequestCorrelator};
use crate::model::EntityState;
use crate::session::{ConnectionState, RequestError, SessionEvent};
use crate::store::EntityTable;

/// Handshake progress of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Socket open, waiting for `auth_required`.
    Connecting,
    /// `auth` sent, waiting for the verdict.
    AwaitingAuth,
    /// Authenticated; correlated requests may flow.
    Ready,
}

impl From<ConnectionPhase> for ConnectionState {
    fn from(phase: ConnectionPhase) -> Self {
        match phase {
            ConnectionPhase::Connecting => Self::Connecting,
            ConnectionPhase::AwaitingAuth => Self::AwaitingAuth,
            ConnectionPhase::Ready => Self::Ready,
        }
    }
}

/// What the dispatch loop should do after a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Continue,
    /// The hub rejected the access token. Do not reconnect.
    AuthRejected,
}

/// Shared sinks the inbound handler writes to.
pub(crate) struct Sinks<'a> {
    pub table: &'a EntityTable,
    pub events: &'a broadcast::Sender<SessionEvent>,
    pub state: &'a watch::Sender<ConnectionState>,
}

impl Sinks<'_> {
    fn publish(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}

/// A single logical connection to the hub.
pub struct Connection {
    generation: u64,
    phase: ConnectionPhase,
    access_token: SecretString,
    correlator: RequestCorrelator,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("generation", &self.generation)
            .field("phase", &self.phase)
            .field("pending", &self.correlator.len())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new(
        generation: u64,
        access_token: SecretString,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        Self {
            generation,
            phase: ConnectionPhase::Connecting,
            access_token,
            correlator: RequestCorrelator::new(),
            outbound,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn pending(&self) -> usize {
        self.correlator.len()
    }

    // ── Outbound ─────────────────────────────────────────────────────

    /// Issue an id for `intent` and queue the request.
    /// Dropped (returns `None`) unless the connection is ready.
    pub(crate) fn send_request(&mut self, intent: Intent, request: Request) -> Option<u64> {
        if self.phase != ConnectionPhase::Ready {
            trace!(generation = self.generation, ?intent, "not ready, dropping request");
            return None;
        }
        let id = self.correlator.issue(intent);
        if self
            .outbound
            .send(OutboundMessage::request(id, request))
            .is_err()
        {
            debug!(generation = self.generation, id, "socket gone, dropping request");
            self.correlator.resolve(id);
            return None;
        }
        Some(id)
    }

    fn send_auth(&mut self) {
        let msg = OutboundMessage::auth(self.access_token.expose_secret());
        if self.outbound.send(msg).is_err() {
            debug!(generation = self.generation, "socket gone before auth");
        }
    }

    /// Drop requests nobody answered within `max_age`, then send a
    /// keepalive ping.
    pub(crate) fn tick(&mut self, max_age: Duration) {
        let pruned = self.correlator.prune(max_age);
        if pruned > 0 {
            debug!(generation = self.generation, pruned, "pruned stale requests");
        }
        self.send_request(Intent::Ping, Request::Ping);
    }

    // ── Inbound ──────────────────────────────────────────────────────

    pub(crate) fn handle(&mut self, msg: InboundMessage, sinks: &Sinks<'_>) -> Disposition {
        match msg {
            InboundMessage::AuthRequired { ha_version } => {
                if self.phase == ConnectionPhase::Ready {
                    warn!(generation = self.generation, "unexpected auth_required after auth_ok");
                    return Disposition::Continue;
                }
                debug!(generation = self.generation, ?ha_version, "hub requested auth");
                self.send_auth();
                self.set_phase(ConnectionPhase::AwaitingAuth, sinks);
            }
            InboundMessage::AuthOk { ha_version } => {
                info!(generation = self.generation, ?ha_version, "authenticated with hub");
                self.set_phase(ConnectionPhase::Ready, sinks);
                sinks.publish(SessionEvent::ConnectionRestored);
                self.send_request(
                    Intent::Subscribe,
                    Request::SubscribeEvents {
                        event_type: Some(STATE_CHANGED.to_owned()),
                    },
                );
                self.send_request(Intent::Snapshot, Request::GetStates);
            }
            InboundMessage::AuthInvalid { message } => {
                warn!(generation = self.generation, ?message, "hub rejected access token");
                return Disposition::AuthRejected;
            }
            InboundMessage::Result(result) => {
                let id = result.id;
                match self.correlator.resolve(id) {
                    Some(intent) => route_result(intent, result, sinks),
                    None => trace!(generation = self.generation, id, "ignoring uncorrelated result"),
                }
            }
            InboundMessage::Pong { id } => match self.correlator.resolve(id) {
                Some(Intent::Custom(key)) => sinks.publish(SessionEvent::Response {
                    key,
                    payload: Arc::new(Value::Null),
                }),
                Some(_) => trace!(generation = self.generation, id, "pong"),
                None => {}
            },
            InboundMessage::Event(event) => {
                if event.event.event_type != STATE_CHANGED {
                    trace!(event_type = %event.event.event_type, "ignoring event");
                    return Disposition::Continue;
                }
                let Some(new_state) = event.event.state_changed().and_then(|d| d.new_state) else {
                    return Disposition::Continue;
                };
                let entity = EntityState::from(new_state);
                let entity_id = entity.entity_id.clone();
                sinks.table.apply_change(entity);
                sinks.publish(SessionEvent::EntityChanged(entity_id));
            }
            InboundMessage::Unknown => {
                trace!(generation = self.generation, "ignoring unknown message type");
            }
        }
        Disposition::Continue
    }

    fn set_phase(&mut self, phase: ConnectionPhase, sinks: &Sinks<'_>) {
        self.phase = phase;
        sinks.state.send_replace(phase.into());
    }
}

// ── Result routing ──────────────────────────────────────────────────

fn route_result(intent: Intent, result: ResultMessage, sinks: &Sinks<'_>) {
    let id = result.id;
    if !result.success {
        let error = result
            .error
            .map_or_else(RequestError::default, |e| RequestError {
                code: e.code,
                message: e.message,
            });
        warn!(id, ?intent, code = %error.code, message = %error.message, "request failed");
        // Only keyed requests and service calls have someone waiting.
        match intent {
            Intent::ServiceCall => sinks.publish(SessionEvent::ServiceCalled {
                id,
                result: Err(error),
            }),
            Intent::Custom(key) => sinks.publish(SessionEvent::RequestFailed { key, error }),
            _ => {}
        }
        return;
    }

    let payload = result.result.unwrap_or(Value::Null);
    match intent {
        Intent::Subscribe => debug!(id, "subscribed to state changes"),
        Intent::Snapshot => match convert::parse_snapshot(payload) {
            Some(entities) => {
                let count = sinks.table.apply_snapshot(entities);
                info!(count, "entity snapshot applied");
                sinks.publish(SessionEvent::SnapshotApplied { count });
            }
            None => warn!("malformed get_states result"),
        },
        Intent::CalendarEvents => match convert::parse_calendar_events(&payload) {
            Some(events) => sinks.publish(SessionEvent::CalendarEvents(Arc::new(events))),
            None => warn!("malformed calendar response"),
        },
        Intent::Playlists => match convert::parse_playlists(&payload) {
            Some((total, items)) => sinks.publish(SessionEvent::Playlists {
                total,
                items: Arc::new(items),
            }),
            None => warn!("malformed playlist response"),
        },
        Intent::Queue => match convert::parse_queue(&payload) {
            Some(tracks) => sinks.publish(SessionEvent::Queue(Arc::new(tracks))),
            None => warn!("malformed queue response"),
        },
        Intent::TodoList { list_id } => match convert::parse_todo_items(&payload) {
            Some(items) => sinks.publish(SessionEvent::TodoItems {
                list_id,
                items: Arc::new(items),
            }),
            None => warn!(%list_id, "malformed todo list"),
        },
        Intent::ServiceCall => {
            trace!(id, "service call acknowledged");
            sinks.publish(SessionEvent::ServiceCalled {
                id,
                result: Ok(Arc::new(payload)),
            });
        }
        Intent::Ping => trace!(id, "ping acknowledged"),
        Intent::Custom(key) => sinks.publish(SessionEvent::Response {
            key,
            payload: Arc::new(payload),
        }),
    }
}
