// ── Session lifecycle ──
//
// A `Session` ties the OAuth flow, the entity table and the live
// connection together. `connect()` spawns a background loop that opens
// the socket, runs one dispatch loop per connection, and reconnects on
// a fixed interval until told to stop or the hub rejects the token.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use strum::Display;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use casa_api::{Request, ServiceCall};

use crate::command::{self, Command};
use crate::config::SessionConfig;
use crate::connection::{Connection, Disposition, Sinks};
use crate::correlator::Intent;
use crate::error::CoreError;
use crate::model::{CalendarEvent, EntityState, Playlist, QueueTrack, TodoItem};
use crate::oauth::{AuthPhase, OAuthFlow, StatusLevel};
use crate::store::EntityTable;
use crate::token_store::{NonceStore, Speaker, TokenStore};

const EVENT_CHANNEL_SIZE: usize = 256;
const INBOUND_QUEUE_SIZE: usize = 256;

/// How often pending requests are pruned and a keepalive ping is sent.
const TICK_INTERVAL: Duration = Duration::from_secs(30);

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingAuth,
    Ready,
}

// ── SessionEvent ─────────────────────────────────────────────────

/// Why the session signed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum LogoutReason {
    /// Refreshing an expired token failed.
    SessionExpired,
    /// The hub answered `auth_invalid`.
    TokenRejected,
    /// [`Session::logout`] was called.
    UserRequested,
}

/// Error the hub reported for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestError {
    pub code: String,
    pub message: String,
}

/// Notifications broadcast to every subscriber.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// One table row was overwritten by a `state_changed` event.
    EntityChanged(String),
    /// A `get_states` dump was merged into the table.
    SnapshotApplied { count: usize },
    /// The socket closed; a reconnect is scheduled.
    ConnectionLost,
    /// Authentication succeeded on a (re)opened socket.
    ConnectionRestored,
    LoggedOut { reason: LogoutReason },
    CalendarEvents(Arc<Vec<CalendarEvent>>),
    Playlists { total: u64, items: Arc<Vec<Playlist>> },
    Queue(Arc<Vec<QueueTrack>>),
    TodoItems { list_id: String, items: Arc<Vec<TodoItem>> },
    /// Result of a [`Session::request`] call.
    Response { key: String, payload: Arc<Value> },
    /// The hub answered a [`Session::request`] call with an error.
    RequestFailed { key: String, error: RequestError },
    /// The hub answered a `call_service` sent by [`Session::dispatch_command`],
    /// [`Session::toggle`], [`Session::call_service`] or [`Session::execute`].
    ServiceCalled {
        id: u64,
        result: Result<Arc<Value>, RequestError>,
    },
}

// ── Session ──────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<SessionInner>`. Several sessions can
/// coexist in one process; nothing is global.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    oauth: OAuthFlow,
    table: EntityTable,
    connection_state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,
    /// The live connection, if any. Dropping it voids its pending requests.
    connection: Mutex<Option<Connection>>,
    /// Child token for the running loop; replaced on every `connect()`.
    cancel_child: Mutex<CancellationToken>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// How one connection ended.
enum Outcome {
    Closed,
    AuthRejected,
    Stopped,
}

impl Session {
    /// Create a session. Does NOT connect; call [`connect()`](Self::connect).
    pub fn new(
        config: SessionConfig,
        tokens: Arc<dyn TokenStore>,
        nonces: Arc<dyn NonceStore>,
    ) -> Result<Self, CoreError> {
        let oauth = OAuthFlow::new(&config, tokens, nonces)?;
        Ok(Self::with_oauth(config, oauth))
    }

    /// Create a session around an existing OAuth flow.
    pub fn with_oauth(config: SessionConfig, oauth: OAuthFlow) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            inner: Arc::new(SessionInner {
                config,
                oauth,
                table: EntityTable::new(),
                connection_state,
                events,
                connection: Mutex::new(None),
                cancel_child: Mutex::new(CancellationToken::new()),
                task: Mutex::new(None),
            }),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn oauth(&self) -> &OAuthFlow {
        &self.inner.oauth
    }

    pub fn entities(&self) -> &EntityTable {
        &self.inner.table
    }

    pub fn entity(&self, entity_id: &str) -> Option<Arc<EntityState>> {
        self.inner.table.get(entity_id)
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.inner.connection_state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.current_state() == ConnectionState::Ready
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the connection loop in the background.
    ///
    /// Fails with [`CoreError::LoggedOut`] when there are no credentials.
    /// Calling it while a loop is already running is a no-op.
    pub async fn connect(&self) -> Result<(), CoreError> {
        casa_api::websocket_url(&self.inner.config.hub_url)?;
        if self.inner.oauth.access_token().await.is_none() {
            return Err(CoreError::LoggedOut);
        }

        let mut task = self.inner.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("session loop already running");
            return Ok(());
        }

        let child = CancellationToken::new();
        *self.inner.cancel_child.lock().await = child.clone();

        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(run_session(inner, child)));
        Ok(())
    }

    /// Stop the connection loop. No reconnect happens afterwards.
    pub async fn disconnect(&self) {
        self.inner.cancel_child.lock().await.cancel();
        let handle = self.inner.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "session task ended abnormally");
            }
        }
        *self.inner.connection.lock().await = None;
        self.inner
            .connection_state
            .send_replace(ConnectionState::Disconnected);
    }

    /// Disconnect, forget credentials, and clear the entity table.
    pub async fn logout(&self) {
        self.disconnect().await;
        self.inner.oauth.logout().await;
        self.inner.table.clear();
        let _ = self.inner.events.send(SessionEvent::LoggedOut {
            reason: LogoutReason::UserRequested,
        });
    }

    /// Wait until the connection is ready, the session signs out, or
    /// `timeout` elapses.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut state = self.connection_state();
        let mut phase = self.inner.oauth.subscribe_phase();

        let wait = async {
            loop {
                if *state.borrow_and_update() == ConnectionState::Ready {
                    return Ok(());
                }
                if *phase.borrow_and_update() == AuthPhase::LoggedOut {
                    return Err(CoreError::LoggedOut);
                }
                tokio::select! {
                    changed = state.changed() => changed.map_err(|_| CoreError::NotConnected)?,
                    changed = phase.changed() => changed.map_err(|_| CoreError::NotConnected)?,
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| CoreError::Timeout {
                timeout_secs: timeout.as_secs(),
            })?
    }

    // ── Outbound requests ────────────────────────────────────────────

    /// Send a correlated request on the live connection.
    /// `None` when not connected.
    async fn send(&self, intent: Intent, request: Request) -> Option<u64> {
        let mut guard = self.inner.connection.lock().await;
        let Some(conn) = guard.as_mut() else {
            debug!(?intent, "no connection, dropping request");
            return None;
        };
        conn.send_request(intent, request)
    }

    /// `call_service` with an arbitrary body.
    pub async fn call_service(&self, call: ServiceCall) -> Option<u64> {
        debug!(domain = %call.domain, service = %call.service, "calling service");
        self.send(Intent::ServiceCall, Request::CallService(call))
            .await
    }

    /// `{domain}.{service}` on one entity, with extra `data` merged in.
    /// `None` when not connected.
    pub async fn dispatch_command(
        &self,
        domain: &str,
        service: &str,
        entity_id: &str,
        data: Map<String, Value>,
    ) -> Option<u64> {
        self.send_single(Command::CallService {
            domain: domain.to_owned(),
            service: service.to_owned(),
            entity_id: entity_id.to_owned(),
            data,
        })
        .await
    }

    /// Domain-aware toggle of one entity, planned against its current row.
    pub async fn toggle(&self, entity_id: &str) -> Option<u64> {
        self.send_single(Command::Toggle {
            entity_id: entity_id.to_owned(),
        })
        .await
    }

    /// Send a command that plans to one immediate call.
    async fn send_single(&self, cmd: Command) -> Option<u64> {
        let table = &self.inner.table;
        let step = cmd.plan(|id| table.get(id), None).into_iter().next()?;
        self.call_service(step.call).await
    }

    /// Plan and send a [`Command`], honouring step delays.
    /// Returns the ids of the requests sent.
    pub async fn execute(&self, cmd: Command) -> Result<Vec<u64>, CoreError> {
        if !self.is_ready() {
            return Err(CoreError::NotConnected);
        }
        let speaker = self.selected_speaker();
        let table = &self.inner.table;
        let steps = cmd.plan(|id| table.get(id), speaker.as_ref());

        let mut ids = Vec::with_capacity(steps.len());
        for step in steps {
            if !step.delay.is_zero() {
                tokio::time::sleep(step.delay).await;
            }
            let id = self
                .call_service(step.call)
                .await
                .ok_or(CoreError::NotConnected)?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Route playback to the selected speaker, then start `uri` on `player`.
    pub async fn play_playlist(&self, player: &str, uri: &str) -> Result<Vec<u64>, CoreError> {
        self.execute(Command::PlayPlaylist {
            player: player.to_owned(),
            uri: uri.to_owned(),
        })
        .await
    }

    pub async fn transfer_to_speaker(
        &self,
        player: &str,
        speaker: Speaker,
    ) -> Result<Vec<u64>, CoreError> {
        self.execute(Command::TransferToSpeaker {
            player: player.to_owned(),
            speaker,
        })
        .await
    }

    /// Generic correlated request. The raw result is published as
    /// [`SessionEvent::Response`] under `key`.
    pub async fn request(&self, key: impl Into<String>, request: Request) -> Option<u64> {
        self.send(Intent::Custom(key.into()), request).await
    }

    pub async fn ping(&self) -> Option<u64> {
        self.send(Intent::Ping, Request::Ping).await
    }

    // ── Fetches published as events ──────────────────────────────────

    pub async fn fetch_calendar_events(&self, calendars: Vec<String>, days: i64) -> Option<u64> {
        let call = command::calendar_events_call(calendars, Utc::now(), days);
        self.send(Intent::CalendarEvents, Request::CallService(call))
            .await
    }

    pub async fn fetch_playlists(&self, entity_id: &str, limit: u32) -> Option<u64> {
        let call = command::playlist_favorites_call(entity_id, limit);
        self.send(Intent::Playlists, Request::CallService(call))
            .await
    }

    pub async fn fetch_queue(&self, entity_id: &str) -> Option<u64> {
        let call = command::queue_info_call(entity_id);
        self.send(Intent::Queue, Request::CallService(call)).await
    }

    pub async fn fetch_todo_items(&self, entity_id: &str, list_id: &str) -> Option<u64> {
        self.send(
            Intent::TodoList {
                list_id: list_id.to_owned(),
            },
            Request::TodoItemList {
                entity_id: entity_id.to_owned(),
            },
        )
        .await
    }

    // ── Preferences ──────────────────────────────────────────────────

    pub fn selected_speaker(&self) -> Option<Speaker> {
        self.inner.oauth.preferences().selected_speaker
    }

    pub fn select_speaker(&self, speaker: Speaker) {
        info!(speaker = %speaker.name, kind = %speaker.kind, "speaker selected");
        self.inner
            .oauth
            .update_preferences(|doc| doc.selected_speaker = Some(speaker));
    }

    pub fn selected_device(&self) -> Option<String> {
        self.inner.oauth.preferences().selected_device
    }

    pub fn select_device(&self, device: Option<String>) {
        self.inner
            .oauth
            .update_preferences(|doc| doc.selected_device = device);
    }
}

// ── Background loop ──────────────────────────────────────────────

async fn run_session(inner: Arc<SessionInner>, cancel: CancellationToken) {
    let mut generation: u64 = 0;

    loop {
        if inner.oauth.is_expired().await && inner.oauth.has_refresh_token().await {
            info!("access token expired, refreshing before connect");
            if !inner.oauth.refresh().await {
                inner
                    .oauth
                    .set_status("Session expired. Please sign in again.", StatusLevel::Error);
                publish(&inner, SessionEvent::LoggedOut {
                    reason: LogoutReason::SessionExpired,
                });
                break;
            }
        }

        generation += 1;
        match run_connection(&inner, generation, &cancel).await {
            Outcome::Stopped => break,
            Outcome::AuthRejected => {
                inner.oauth.invalidate().await;
                inner
                    .oauth
                    .set_status("Session expired. Please sign in again.", StatusLevel::Error);
                publish(&inner, SessionEvent::LoggedOut {
                    reason: LogoutReason::TokenRejected,
                });
                break;
            }
            Outcome::Closed => {
                inner
                    .connection_state
                    .send_replace(ConnectionState::Disconnected);
                publish(&inner, SessionEvent::ConnectionLost);

                let interval = inner.config.reconnect_interval;
                info!(
                    generation,
                    delay_ms = interval.as_millis(),
                    "connection lost, reconnecting"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(interval) => {}
                }
            }
        }
    }

    inner
        .connection_state
        .send_replace(ConnectionState::Disconnected);
    debug!("session loop stopped");
}

/// Run one connection: spawn the socket pump, then handle inbound
/// messages one at a time until the socket ends.
async fn run_connection(
    inner: &Arc<SessionInner>,
    generation: u64,
    cancel: &CancellationToken,
) -> Outcome {
    let Some(token) = inner.oauth.access_token().await else {
        info!("signed out, not reconnecting");
        return Outcome::Stopped;
    };
    let url = match casa_api::websocket_url(&inner.config.hub_url) {
        Ok(url) => url,
        Err(e) => {
            warn!(error = %e, "cannot derive WebSocket URL");
            return Outcome::Stopped;
        }
    };

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, mut in_rx) = mpsc::channel(INBOUND_QUEUE_SIZE);
    *inner.connection.lock().await = Some(Connection::new(generation, token, out_tx));
    inner
        .connection_state
        .send_replace(ConnectionState::Connecting);

    let socket_cancel = cancel.child_token();
    let pump = tokio::spawn(casa_api::websocket::run_socket(
        url,
        out_rx,
        in_tx,
        socket_cancel.clone(),
    ));

    let sinks = Sinks {
        table: &inner.table,
        events: &inner.events,
        state: &inner.connection_state,
    };
    let mut tick = tokio::time::interval_at(
        tokio::time::Instant::now() + TICK_INTERVAL,
        TICK_INTERVAL,
    );

    let outcome = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break Outcome::Stopped,
            msg = in_rx.recv() => {
                let Some(msg) = msg else { break Outcome::Closed };
                let disposition = match inner.connection.lock().await.as_mut() {
                    Some(conn) => conn.handle(msg, &sinks),
                    None => Disposition::Continue,
                };
                if disposition == Disposition::AuthRejected {
                    break Outcome::AuthRejected;
                }
            }
            _ = tick.tick() => {
                if let Some(conn) = inner.connection.lock().await.as_mut() {
                    conn.tick(inner.config.request_timeout);
                }
            }
        }
    };

    // Dropping the connection closes the outbound queue and voids every
    // request still pending on it.
    *inner.connection.lock().await = None;
    socket_cancel.cancel();
    match pump.await {
        Ok(Ok(())) => debug!(generation, "socket closed"),
        Ok(Err(e)) if e.is_transient() => info!(generation, error = %e, "socket dropped"),
        Ok(Err(e)) => warn!(generation, error = %e, "socket failed"),
        Err(e) => warn!(generation, error = %e, "socket task panicked"),
    }
    outcome
}

fn publish(inner: &SessionInner, event: SessionEvent) {
    let _ = inner.events.send(event);
}
