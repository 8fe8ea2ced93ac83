// ── Runtime session configuration ──
//
// These types describe *how* to reach a hub and identify this client
// to it. They never touch disk: the CLI (via casa-config) builds a
// `SessionConfig` and hands it in.

use std::time::Duration;

use url::Url;

use crate::error::CoreError;

/// Default delay between a lost connection and the next attempt.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Default age after which an unanswered correlated request is dropped.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict). Default: hubs are usually reached
    /// through a proxy with a public certificate.
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed certs). Applies to the token
    /// endpoint only; the event stream always verifies.
    DangerAcceptInvalid,
}

/// Configuration for one hub session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hub base URL (e.g., `https://ha.example.com`).
    pub hub_url: Url,
    /// OAuth client id. The hub expects a URL, usually the origin of
    /// `redirect_uri` with a trailing slash.
    pub client_id: String,
    /// Where the hub sends the browser after authorization.
    pub redirect_uri: Url,
    /// TLS verification strategy for HTTP calls.
    pub tls: TlsVerification,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Fixed delay before reconnecting after a close or error.
    pub reconnect_interval: Duration,
    /// Pending requests older than this are garbage-collected.
    pub request_timeout: Duration,
}

impl SessionConfig {
    /// Build a config with defaults derived from the hub URL:
    /// the redirect URI and client id both default to `{origin}/`.
    pub fn for_hub(hub_url: Url) -> Result<Self, CoreError> {
        let origin = hub_url.origin();
        if !origin.is_tuple() {
            return Err(CoreError::Config {
                message: format!("hub URL has no origin: {hub_url}"),
            });
        }
        let client_id = format!("{}/", origin.ascii_serialization());
        let redirect_uri = Url::parse(&client_id).map_err(|e| CoreError::Config {
            message: format!("invalid redirect URI {client_id}: {e}"),
        })?;

        Ok(Self {
            hub_url,
            client_id,
            redirect_uri,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn for_hub_derives_client_identity() {
        let config = SessionConfig::for_hub(Url::parse("https://ha.example.com/").unwrap()).unwrap();
        assert_eq!(config.client_id, "https://ha.example.com/");
        assert_eq!(config.redirect_uri.as_str(), "https://ha.example.com/");
        assert_eq!(config.reconnect_interval, Duration::from_secs(5));
        assert_eq!(config.tls, TlsVerification::SystemDefaults);
    }

    #[test]
    fn for_hub_keeps_port() {
        let config = SessionConfig::for_hub(Url::parse("http://10.0.0.5:8123").unwrap()).unwrap();
        assert_eq!(config.client_id, "http://10.0.0.5:8123/");
    }

    #[test]
    fn for_hub_rejects_opaque_origin() {
        let err = SessionConfig::for_hub(Url::parse("data:text/plain,hi").unwrap());
        assert!(matches!(err, Err(CoreError::Config { .. })));
    }
}
