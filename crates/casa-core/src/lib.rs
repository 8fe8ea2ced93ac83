//! Session core between `casa-api` and dashboard consumers (CLI, UIs).
//!
//! - **[`Session`]** — Central facade: [`connect()`](Session::connect)
//!   spawns a background loop that authenticates over the event stream,
//!   subscribes to state changes, loads a snapshot, and reconnects on a
//!   fixed interval when the socket drops.
//!
//! - **[`OAuthFlow`]** — Authorization-code login with nonce validation,
//!   refresh-token exchange, and persistence through a [`TokenStore`].
//!
//! - **[`EntityTable`]** — Lock-free entity id -> state map (`DashMap` +
//!   `tokio::sync::watch` of sorted snapshots), written only by the
//!   connection's inbound handling.
//!
//! - **[`Command`]** — Domain-aware writes (toggle policy, playlist
//!   playback, speaker transfer) planned into correlated `call_service`
//!   requests.
//!
//! - **[`RequestCorrelator`]** — Per-connection `id -> Intent` table;
//!   results are routed by intent and published as [`SessionEvent`]s.

pub mod command;
pub mod config;
pub mod connection;
pub mod convert;
pub mod correlator;
pub mod error;
pub mod model;
pub mod oauth;
pub mod session;
pub mod store;
pub mod token_store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::Command;
pub use config::{SessionConfig, TlsVerification};
pub use connection::{Connection, ConnectionPhase};
pub use correlator::{Intent, RequestCorrelator};
pub use error::CoreError;
pub use oauth::{AuthPhase, LoginStatus, OAuthFlow, StatusLevel};
pub use session::{ConnectionState, LogoutReason, RequestError, Session, SessionEvent};
pub use store::{EntityTable, Snapshot};
pub use token_store::{
    Credentials, FileNonceStore, FileTokenStore, MemoryNonceStore, MemoryTokenStore, NonceStore,
    PersistedState, Speaker, SpeakerKind, TokenStore,
};

pub use model::{CalendarEvent, EntityCategory, EntityState, Playlist, QueueTrack, TodoItem};

// Wire types consumers need to build custom requests.
pub use casa_api::{Request, ServiceCall};
