// casa-api: Async Rust client for the Home Assistant OAuth and WebSocket APIs

pub mod auth;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use auth::{OAuthClient, TokenResponse, websocket_url};
pub use error::Error;
pub use protocol::{
    HubEntityState, HubEvent, InboundMessage, OutboundMessage, Request, ResultMessage,
    STATE_CHANGED, ServiceCall, ServiceTarget, StateChangedData,
};
pub use transport::{TlsMode, TransportConfig};
