//! Typed messages for the hub's WebSocket API.
//!
//! Every frame carries a `type` discriminator. Inbound frames decode into
//! [`InboundMessage`]; outbound frames are built from [`OutboundMessage`].
//! All outbound messages except `auth` carry a caller-assigned `id` that
//! the hub echoes back in the matching `result`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event type the dashboard subscribes to after authenticating.
pub const STATE_CHANGED: &str = "state_changed";

// ── Inbound ──────────────────────────────────────────────────────────

/// A frame received from the hub.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// The hub is waiting for an `auth` frame.
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    /// The access token was accepted.
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    /// The access token was rejected.
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    /// Reply to a correlated request.
    Result(ResultMessage),
    /// Broadcast event for a subscription.
    Event(EventMessage),
    /// Reply to a `ping` request.
    Pong { id: u64 },
    /// Anything this client does not understand.
    #[serde(other)]
    Unknown,
}

/// Payload of a `result` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultMessage {
    pub id: u64,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ResultError>,
}

fn default_success() -> bool {
    true
}

/// Error detail attached to an unsuccessful `result`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Payload of an `event` frame.
#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    /// Id of the `subscribe_events` request this event belongs to.
    #[serde(default)]
    pub id: Option<u64>,
    pub event: HubEvent,
}

/// A bus event as the hub serializes it.
#[derive(Debug, Clone, Deserialize)]
pub struct HubEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub time_fired: Option<String>,
}

impl HubEvent {
    /// Decode the `data` of a `state_changed` event.
    ///
    /// Returns `None` for other event types or a payload that does not
    /// have the `state_changed` shape.
    pub fn state_changed(&self) -> Option<StateChangedData> {
        if self.event_type != STATE_CHANGED {
            return None;
        }
        match serde_json::from_value(self.data.clone()) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::debug!(error = %e, "malformed state_changed payload");
                None
            }
        }
    }
}

/// `data` of a `state_changed` event. `new_state` is `None` when the
/// entity was removed from the hub.
#[derive(Debug, Clone, Deserialize)]
pub struct StateChangedData {
    pub entity_id: String,
    #[serde(default)]
    pub old_state: Option<HubEntityState>,
    #[serde(default)]
    pub new_state: Option<HubEntityState>,
}

/// Entity state object as returned by `get_states` and carried in
/// `state_changed` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEntityState {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub last_changed: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

// ── Outbound ─────────────────────────────────────────────────────────

/// A frame sent to the hub.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Auth(AuthMessage),
    Request(RequestEnvelope),
}

impl OutboundMessage {
    /// Build the `auth` frame answering `auth_required`.
    pub fn auth(access_token: impl Into<String>) -> Self {
        Self::Auth(AuthMessage {
            kind: "auth",
            access_token: access_token.into(),
        })
    }

    /// Wrap a request with its correlation id.
    pub fn request(id: u64, request: Request) -> Self {
        Self::Request(RequestEnvelope { id, request })
    }

    /// The correlation id, if this frame carries one.
    pub fn id(&self) -> Option<u64> {
        match self {
            Self::Auth(_) => None,
            Self::Request(envelope) => Some(envelope.id),
        }
    }
}

/// `{"type": "auth", "access_token": ...}`. The only frame without an id.
#[derive(Clone, Serialize)]
pub struct AuthMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    access_token: String,
}

impl std::fmt::Debug for AuthMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMessage")
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// `{"id": N, "type": ..., ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

/// Correlated request bodies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    SubscribeEvents {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_type: Option<String>,
    },
    GetStates,
    CallService(ServiceCall),
    #[serde(rename = "todo/item/list")]
    TodoItemList {
        entity_id: String,
    },
    Ping,
}

/// Body of a `call_service` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub service_data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<ServiceTarget>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub return_response: bool,
}

impl ServiceCall {
    pub fn new(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data: Map::new(),
            target: None,
            return_response: false,
        }
    }

    /// Add a `service_data` field.
    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.service_data.insert(key.to_owned(), value.into());
        self
    }

    /// Target the given entities via the `target` block.
    pub fn with_target(mut self, entity_ids: Vec<String>) -> Self {
        self.target = Some(ServiceTarget {
            entity_id: entity_ids,
        });
        self
    }

    /// Ask the hub to include the service response in the `result`.
    pub fn returning_response(mut self) -> Self {
        self.return_response = true;
        self
    }
}

/// `target` block of a `call_service` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceTarget {
    pub entity_id: Vec<String>,
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Parse a text frame. Hubs with message coalescing enabled send a JSON
/// array of messages in one frame; both shapes are accepted.
/// Frames that fail to parse are logged and yield nothing.
pub fn parse_frame(text: &str) -> Vec<InboundMessage> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse WebSocket frame");
            return Vec::new();
        }
    };

    let items = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<InboundMessage>(item) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::debug!(error = %e, "dropping undecodable message");
                None
            }
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn auth_frame_has_no_id() {
        let msg = OutboundMessage::auth("token-abc");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "type": "auth", "access_token": "token-abc" })
        );
        assert_eq!(msg.id(), None);
    }

    #[test]
    fn auth_debug_is_redacted() {
        let msg = OutboundMessage::auth("token-abc");
        assert!(!format!("{msg:?}").contains("token-abc"));
    }

    #[test]
    fn subscribe_and_get_states_carry_ids() {
        let sub = OutboundMessage::request(
            1,
            Request::SubscribeEvents {
                event_type: Some(STATE_CHANGED.into()),
            },
        );
        assert_eq!(
            serde_json::to_value(&sub).unwrap(),
            json!({ "id": 1, "type": "subscribe_events", "event_type": "state_changed" })
        );

        let get = OutboundMessage::request(2, Request::GetStates);
        assert_eq!(
            serde_json::to_value(&get).unwrap(),
            json!({ "id": 2, "type": "get_states" })
        );
    }

    #[test]
    fn call_service_with_target_and_response() {
        let call = ServiceCall::new("calendar", "get_events")
            .with_target(vec!["calendar.family".into()])
            .with_data("start_date_time", "2026-01-01T00:00:00Z")
            .returning_response();
        let msg = OutboundMessage::request(7, Request::CallService(call));

        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "id": 7,
                "type": "call_service",
                "domain": "calendar",
                "service": "get_events",
                "service_data": { "start_date_time": "2026-01-01T00:00:00Z" },
                "target": { "entity_id": ["calendar.family"] },
                "return_response": true
            })
        );
    }

    #[test]
    fn plain_call_service_omits_optional_fields() {
        let call = ServiceCall::new("light", "toggle").with_data("entity_id", "light.x");
        let value = serde_json::to_value(OutboundMessage::request(3, Request::CallService(call)))
            .unwrap();
        assert!(value.get("target").is_none());
        assert!(value.get("return_response").is_none());
    }

    #[test]
    fn todo_list_uses_slash_type() {
        let msg = OutboundMessage::request(
            4,
            Request::TodoItemList {
                entity_id: "todo.house_tasks".into(),
            },
        );
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "id": 4, "type": "todo/item/list", "entity_id": "todo.house_tasks" })
        );
    }

    #[test]
    fn parse_handshake_frames() {
        let msgs = parse_frame(r#"{"type":"auth_required","ha_version":"2026.10.1"}"#);
        assert!(matches!(
            msgs.as_slice(),
            [InboundMessage::AuthRequired { ha_version: Some(v) }] if v == "2026.10.1"
        ));

        let msgs = parse_frame(r#"{"type":"auth_invalid","message":"Invalid access token"}"#);
        assert!(matches!(msgs.as_slice(), [InboundMessage::AuthInvalid { .. }]));
    }

    #[test]
    fn parse_result_without_success_field() {
        let msgs = parse_frame(r#"{"type":"result","id":2,"result":[]}"#);
        match msgs.as_slice() {
            [InboundMessage::Result(r)] => {
                assert_eq!(r.id, 2);
                assert!(r.success);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_coalesced_array() {
        let msgs = parse_frame(
            r#"[{"type":"result","id":1,"success":true,"result":null},
                {"type":"result","id":2,"success":false,"error":{"code":"not_found","message":"nope"}}]"#,
        );
        assert_eq!(msgs.len(), 2);
        match &msgs[1] {
            InboundMessage::Result(r) => {
                assert!(!r.success);
                assert_eq!(r.error.as_ref().unwrap().code, "not_found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_unknown_type_and_garbage() {
        let msgs = parse_frame(r#"{"type":"supported_features","id":9}"#);
        assert!(matches!(msgs.as_slice(), [InboundMessage::Unknown]));
        assert!(parse_frame("not json").is_empty());
    }

    #[test]
    fn ping_and_pong() {
        let ping = OutboundMessage::request(11, Request::Ping);
        assert_eq!(
            serde_json::to_value(&ping).unwrap(),
            json!({ "id": 11, "type": "ping" })
        );
        let msgs = parse_frame(r#"{"type":"pong","id":11}"#);
        assert!(matches!(msgs.as_slice(), [InboundMessage::Pong { id: 11 }]));
    }

    #[test]
    fn state_changed_event_decodes() {
        let msgs = parse_frame(
            &json!({
                "type": "event",
                "id": 1,
                "event": {
                    "event_type": "state_changed",
                    "data": {
                        "entity_id": "light.kitchen",
                        "old_state": null,
                        "new_state": {
                            "entity_id": "light.kitchen",
                            "state": "on",
                            "attributes": { "brightness": 200 }
                        }
                    }
                }
            })
            .to_string(),
        );
        let InboundMessage::Event(evt) = &msgs[0] else {
            panic!("expected event");
        };
        let data = evt.event.state_changed().unwrap();
        assert_eq!(data.entity_id, "light.kitchen");
        let new_state = data.new_state.unwrap();
        assert_eq!(new_state.state, "on");
        assert_eq!(new_state.attributes["brightness"], 200);
    }

    #[test]
    fn other_event_types_are_not_state_changes() {
        let evt = HubEvent {
            event_type: "call_service".into(),
            data: json!({}),
            origin: None,
            time_fired: None,
        };
        assert!(evt.state_changed().is_none());
    }
}
