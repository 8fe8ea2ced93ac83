// OAuth2 authorization-code client for the hub's `/auth` endpoints.
//
// Builds the authorize redirect URL and performs the two token grants
// (`authorization_code`, `refresh_token`). Nonce handling and token
// persistence live in `casa-core`; this module only speaks HTTP.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

const AUTHORIZE_PATH: &str = "/auth/authorize";
const TOKEN_PATH: &str = "/auth/token";
const WEBSOCKET_PATH: &str = "/api/websocket";

/// Tokens issued by the hub's token endpoint.
///
/// `refresh_token` is only present on the `authorization_code` grant
/// (and on refresh responses from hubs that rotate refresh tokens).
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Lifetime of the access token in seconds, relative to issuance.
    pub expires_in: u64,
    pub token_type: Option<String>,
}

#[derive(Deserialize)]
struct RawTokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    token_type: Option<String>,
}

impl From<RawTokenResponse> for TokenResponse {
    fn from(raw: RawTokenResponse) -> Self {
        Self {
            access_token: SecretString::from(raw.access_token),
            refresh_token: raw
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            expires_in: raw.expires_in,
            token_type: raw.token_type,
        }
    }
}

/// HTTP client for the hub's OAuth2 endpoints.
///
/// The hub identifies OAuth clients by URL: `client_id` is usually the
/// origin of the redirect URI, with a trailing slash.
pub struct OAuthClient {
    http: reqwest::Client,
    hub_url: Url,
    client_id: String,
    redirect_uri: Url,
}

impl OAuthClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(
        hub_url: Url,
        client_id: String,
        redirect_uri: Url,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, hub_url, client_id, redirect_uri))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        hub_url: Url,
        client_id: String,
        redirect_uri: Url,
    ) -> Self {
        Self {
            http,
            hub_url,
            client_id,
            redirect_uri,
        }
    }

    pub fn hub_url(&self) -> &Url {
        &self.hub_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_uri
    }

    /// Build the authorization redirect URL carrying `state` as the
    /// anti-forgery nonce.
    pub fn authorize_url(&self, state: &str) -> Url {
        let mut url = hub_endpoint(&self.hub_url, AUTHORIZE_PATH);
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", self.redirect_uri.as_str())
            .append_pair("state", state)
            .append_pair("response_type", "code");
        url
    }

    /// Exchange an authorization code for tokens (`grant_type=authorization_code`).
    pub async fn exchange_code(&self, code: &str) -> Result<TokenResponse, Error> {
        debug!("exchanging authorization code");
        self.post_token(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", &self.client_id),
            ("redirect_uri", self.redirect_uri.as_str()),
        ])
        .await
    }

    /// Trade a refresh token for a new access token (`grant_type=refresh_token`).
    pub async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenResponse, Error> {
        debug!("refreshing access token");
        self.post_token(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", &self.client_id),
        ])
        .await
    }

    async fn post_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, Error> {
        let url = hub_endpoint(&self.hub_url, TOKEN_PATH);

        let resp = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(Error::Transport)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            return Err(Error::TokenExchange {
                status: status.as_u16(),
                body,
            });
        }

        let raw: RawTokenResponse =
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body,
            })?;

        debug!(expires_in = raw.expires_in, "token endpoint returned tokens");
        Ok(raw.into())
    }
}

/// Derive the event-stream URL from the hub base URL:
/// `http → ws`, `https → wss`, path `/api/websocket`.
pub fn websocket_url(hub_url: &Url) -> Result<Url, Error> {
    let scheme = match hub_url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(Error::UnsupportedScheme(other.to_owned())),
    };

    let mut url = hub_endpoint(hub_url, WEBSOCKET_PATH);
    url.set_scheme(scheme)
        .map_err(|()| Error::UnsupportedScheme(hub_url.scheme().to_owned()))?;
    Ok(url)
}

/// Append an absolute API path to the hub URL, preserving any path
/// prefix the hub is mounted under (reverse proxies).
fn hub_endpoint(hub_url: &Url, path: &str) -> Url {
    let mut url = hub_url.clone();
    let prefix = hub_url.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}{path}"));
    url.set_query(None);
    url.set_fragment(None);
    url
}
