// ── Core error types ──
//
// Session-level errors from casa-core. Consumers never see HTTP status
// codes or JSON parse failures directly; the `From<casa_api::Error>`
// impl translates transport-layer errors into these variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to hub at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Not connected to the hub")]
    NotConnected,

    #[error("Signed out -- sign in again to continue")]
    LoggedOut,

    #[error("Timed out after {timeout_secs}s waiting for the hub")]
    Timeout { timeout_secs: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Invalid service '{service}': expected <domain>.<service>")]
    InvalidService { service: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<casa_api::Error> for CoreError {
    fn from(err: casa_api::Error) -> Self {
        if err.is_auth_expired() {
            return CoreError::AuthenticationFailed {
                message: err.to_string(),
            };
        }
        match err {
            casa_api::Error::TokenExchange { status, body } => CoreError::Api {
                message: format!("token endpoint error: {body}"),
                status: Some(status),
            },
            casa_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            casa_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            casa_api::Error::UnsupportedScheme(scheme) => CoreError::Config {
                message: format!("Unsupported hub URL scheme '{scheme}'"),
            },
            casa_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            casa_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket connection failed: {reason}"),
            },
            casa_api::Error::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("WebSocket closed (code {code}): {reason}"),
            },
            casa_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_grant_maps_to_auth_failure() {
        let err = CoreError::from(casa_api::Error::TokenExchange {
            status: 400,
            body: "invalid_grant".into(),
        });
        assert!(matches!(err, CoreError::AuthenticationFailed { ref message } if message.contains("HTTP 400")));
    }

    #[test]
    fn server_error_maps_to_api() {
        let err = CoreError::from(casa_api::Error::TokenExchange {
            status: 502,
            body: "bad gateway".into(),
        });
        assert!(matches!(err, CoreError::Api { status: Some(502), .. }));
    }

    #[test]
    fn socket_close_maps_to_connection_failure() {
        let err = CoreError::from(casa_api::Error::WebSocketClosed {
            code: 1001,
            reason: "going away".into(),
        });
        assert!(err.to_string().contains("code 1001"));
    }
}
