use thiserror::Error;

/// Top-level error type for the `casa-api` crate.
///
/// Covers every failure mode of the two hub surfaces this crate speaks:
/// the OAuth token endpoint and the WebSocket event stream.
/// `casa-core` maps these into session-level diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The token endpoint answered with a non-success status.
    #[error("Token exchange failed (HTTP {status}): {body}")]
    TokenExchange { status: u16, body: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The hub URL uses a scheme that has no WebSocket counterpart.
    #[error("Unsupported URL scheme '{0}' (expected http or https)")]
    UnsupportedScheme(String),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The hub closed the socket with a non-normal close code.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error means the stored tokens are no
    /// longer accepted and a fresh login is required.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::TokenExchange { status: 400 | 401 | 403, .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } => true,
            Self::TokenExchange { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_refresh_is_auth_expired() {
        let err = Error::TokenExchange {
            status: 400,
            body: "invalid_grant".into(),
        };
        assert!(err.is_auth_expired());
        assert!(!err.is_transient());
    }

    #[test]
    fn server_error_is_transient() {
        let err = Error::TokenExchange {
            status: 503,
            body: String::new(),
        };
        assert!(err.is_transient());
        assert!(!err.is_auth_expired());
    }

    #[test]
    fn socket_close_is_transient() {
        let err = Error::WebSocketClosed {
            code: 1006,
            reason: "abnormal".into(),
        };
        assert!(err.is_transient());
    }
}
