//! OAuth2 authorization-code flow and token lifecycle.
//!
//! [`OAuthFlow`] owns the in-memory [`Credentials`], the anti-forgery
//! nonce, and the persisted copy in a [`TokenStore`]. Progress is
//! observable through two `watch` channels: the coarse [`AuthPhase`]
//! and a human-readable [`LoginStatus`] line for the sign-in screen.

use std::sync::Arc;

use casa_api::{OAuthClient, TlsMode, TransportConfig};
use rand::Rng;
use rand::distr::Alphanumeric;
use secrecy::SecretString;
use serde::Serialize;
use strum::Display;
use tokio::sync::{Mutex, watch};
use url::Url;

use crate::config::{SessionConfig, TlsVerification};
use crate::error::CoreError;
use crate::token_store::{Credentials, NonceStore, PersistedState, TokenStore};

/// Treat tokens as expired this long before their real expiry.
const EXPIRY_MARGIN_MS: i64 = 300_000;

const NONCE_LEN: usize = 32;

// ── Observable state ────────────────────────────────────────────────

/// Where the flow currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum AuthPhase {
    Idle,
    AwaitingRedirect,
    ExchangingCode,
    Authenticated,
    RefreshingToken,
    LoggedOut,
}

/// Severity of a [`LoginStatus`] line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Success,
    Error,
}

/// Message shown next to the sign-in button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginStatus {
    pub message: String,
    pub level: StatusLevel,
}

impl LoginStatus {
    fn new(message: impl Into<String>, level: StatusLevel) -> Self {
        Self {
            message: message.into(),
            level,
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// True when `expires_at_ms` is set and within the safety margin of `now_ms`.
pub fn is_expired_at(expires_at_ms: i64, now_ms: i64) -> bool {
    expires_at_ms > 0 && now_ms > expires_at_ms - EXPIRY_MARGIN_MS
}

// ── OAuthFlow ───────────────────────────────────────────────────────

/// Token acquisition and refresh against the hub's `/auth` endpoints.
pub struct OAuthFlow {
    client: OAuthClient,
    tokens: Arc<dyn TokenStore>,
    nonces: Arc<dyn NonceStore>,
    credentials: Mutex<Option<Credentials>>,
    phase: watch::Sender<AuthPhase>,
    status: watch::Sender<Option<LoginStatus>>,
}

impl std::fmt::Debug for OAuthFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthFlow")
            .field("hub_url", &self.client.hub_url().as_str())
            .field("phase", &*self.phase.borrow())
            .finish_non_exhaustive()
    }
}

impl OAuthFlow {
    /// Build the flow for a session config, seeding credentials from the store.
    pub fn new(
        config: &SessionConfig,
        tokens: Arc<dyn TokenStore>,
        nonces: Arc<dyn NonceStore>,
    ) -> Result<Self, CoreError> {
        let transport = TransportConfig {
            tls: match &config.tls {
                TlsVerification::SystemDefaults => TlsMode::System,
                TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
                TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
            },
            timeout: config.timeout,
        };
        let client = OAuthClient::new(
            config.hub_url.clone(),
            config.client_id.clone(),
            config.redirect_uri.clone(),
            &transport,
        )?;
        Ok(Self::with_client(client, tokens, nonces))
    }

    /// Build the flow around an existing client (used by tests).
    pub fn with_client(
        client: OAuthClient,
        tokens: Arc<dyn TokenStore>,
        nonces: Arc<dyn NonceStore>,
    ) -> Self {
        let credentials = tokens.load().and_then(|s| s.credentials());
        let initial = if credentials.is_some() {
            AuthPhase::Authenticated
        } else {
            AuthPhase::Idle
        };
        let (phase, _) = watch::channel(initial);
        let (status, _) = watch::channel(None);
        Self {
            client,
            tokens,
            nonces,
            credentials: Mutex::new(credentials),
            phase,
            status,
        }
    }

    // ── Observers ────────────────────────────────────────────────────

    pub fn phase(&self) -> AuthPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<AuthPhase> {
        self.phase.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<Option<LoginStatus>> {
        self.status.subscribe()
    }

    pub fn hub_url(&self) -> &Url {
        self.client.hub_url()
    }

    pub async fn credentials(&self) -> Option<Credentials> {
        self.credentials.lock().await.clone()
    }

    pub async fn access_token(&self) -> Option<SecretString> {
        self.credentials
            .lock()
            .await
            .as_ref()
            .map(|c| c.access_token.clone())
    }

    pub async fn has_refresh_token(&self) -> bool {
        self.credentials
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.refresh_token.is_some())
    }

    /// True when the access token expires within five minutes.
    /// Tokens with unknown expiry never count as expired.
    pub async fn is_expired(&self) -> bool {
        self.credentials
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| is_expired_at(c.expires_at_ms, now_ms()))
    }

    // ── Authorization code grant ─────────────────────────────────────

    /// Generate a fresh nonce and return the authorization URL the
    /// user agent should be sent to.
    pub fn start_login(&self) -> Url {
        let nonce: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        self.nonces.put(&nonce);

        self.set_status("Redirecting to Home Assistant...", StatusLevel::Info);
        self.phase.send_replace(AuthPhase::AwaitingRedirect);
        tracing::debug!("authorization redirect prepared");
        self.client.authorize_url(&nonce)
    }

    /// Complete a login from the URL the hub redirected back to.
    ///
    /// The OAuth parameters are removed from `location` before anything
    /// else happens. Returns `true` only when new credentials were stored.
    pub async fn handle_redirect_callback(&self, location: &mut Url) -> bool {
        let Some(params) = strip_callback_params(location) else {
            return false;
        };

        if let Some(error) = params.error {
            tracing::warn!(error = %error, "authorization denied by hub");
            self.set_status(format!("Login failed: {error}"), StatusLevel::Error);
            self.phase.send_replace(AuthPhase::Idle);
            return false;
        }

        let Some(code) = params.code else {
            return false;
        };

        let expected = self.nonces.take();
        let state_ok = matches!(
            (&expected, &params.state),
            (Some(expected), Some(got)) if expected == got
        );
        if !state_ok {
            tracing::warn!(
                had_nonce = expected.is_some(),
                "rejecting callback with mismatched state"
            );
            self.set_status("Security error: State mismatch", StatusLevel::Error);
            self.phase.send_replace(AuthPhase::Idle);
            return false;
        }

        self.phase.send_replace(AuthPhase::ExchangingCode);
        match self.client.exchange_code(&code).await {
            Ok(resp) => {
                let creds = Credentials::issued(
                    resp.access_token,
                    resp.refresh_token,
                    resp.expires_in,
                    now_ms(),
                );
                self.store_credentials(creds).await;
                self.set_status("Signed in successfully!", StatusLevel::Success);
                self.phase.send_replace(AuthPhase::Authenticated);
                tracing::info!("signed in");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "authorization code exchange failed");
                self.set_status("Sign in failed. Please try again.", StatusLevel::Error);
                self.phase.send_replace(AuthPhase::Idle);
                false
            }
        }
    }

    // ── Refresh token grant ──────────────────────────────────────────

    /// Exchange the refresh token for a new access token.
    ///
    /// On failure every stored credential is cleared and the phase
    /// becomes [`AuthPhase::LoggedOut`].
    pub async fn refresh(&self) -> bool {
        let Some(refresh_token) = self
            .credentials
            .lock()
            .await
            .as_ref()
            .and_then(|c| c.refresh_token.clone())
        else {
            return false;
        };

        self.phase.send_replace(AuthPhase::RefreshingToken);
        match self.client.refresh(&refresh_token).await {
            Ok(resp) => {
                let creds = Credentials::issued(
                    resp.access_token,
                    resp.refresh_token.or(Some(refresh_token)),
                    resp.expires_in,
                    now_ms(),
                );
                self.store_credentials(creds).await;
                self.phase.send_replace(AuthPhase::Authenticated);
                tracing::info!("access token refreshed");
                true
            }
            Err(e) => {
                if e.is_auth_expired() {
                    tracing::info!(error = %e, "refresh token no longer accepted, clearing credentials");
                } else {
                    tracing::warn!(error = %e, "token refresh failed, clearing credentials");
                }
                self.clear_credentials().await;
                self.phase.send_replace(AuthPhase::LoggedOut);
                false
            }
        }
    }

    // ── Manual token / logout ────────────────────────────────────────

    /// Store a long-lived access token pasted by the user.
    /// It has no refresh token and never expires.
    pub async fn set_long_lived_token(&self, token: SecretString) {
        self.store_credentials(Credentials {
            access_token: token,
            refresh_token: None,
            expires_at_ms: 0,
        })
        .await;
        self.phase.send_replace(AuthPhase::Authenticated);
    }

    /// Forget credentials and any pending login.
    pub async fn logout(&self) {
        self.nonces.take();
        self.clear_credentials().await;
        self.set_status("Signed out", StatusLevel::Info);
        self.phase.send_replace(AuthPhase::LoggedOut);
        tracing::info!("signed out");
    }

    /// Credentials were rejected by the hub; drop them without a status line.
    pub(crate) async fn invalidate(&self) {
        self.clear_credentials().await;
        self.phase.send_replace(AuthPhase::LoggedOut);
    }

    pub(crate) fn set_status(&self, message: impl Into<String>, level: StatusLevel) {
        self.status
            .send_replace(Some(LoginStatus::new(message, level)));
    }

    // ── Persistence ──────────────────────────────────────────────────

    async fn store_credentials(&self, creds: Credentials) {
        let mut guard = self.credentials.lock().await;
        let mut doc = self.tokens.load().unwrap_or_default();
        doc.ha_url = Some(self.client.hub_url().to_string());
        doc.set_credentials(&creds);
        self.tokens.save(&doc);
        *guard = Some(creds);
    }

    async fn clear_credentials(&self) {
        let mut guard = self.credentials.lock().await;
        self.tokens.clear();
        *guard = None;
    }

    /// Read-modify-write the persisted preferences.
    pub(crate) fn update_preferences(&self, update: impl FnOnce(&mut PersistedState)) {
        let mut doc = self.tokens.load().unwrap_or_default();
        update(&mut doc);
        self.tokens.save(&doc);
    }

    pub(crate) fn preferences(&self) -> PersistedState {
        self.tokens.load().unwrap_or_default()
    }
}

// ── Callback parsing ────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Remove `code`, `state` and `error` from the query, keeping any other
/// parameters. Returns `None` (and leaves the URL alone) when none of
/// them is present.
fn strip_callback_params(location: &mut Url) -> Option<CallbackParams> {
    let mut params = CallbackParams::default();
    let mut kept = Vec::new();
    for (key, value) in location.query_pairs() {
        match key.as_ref() {
            "code" => params.code = Some(value.into_owned()),
            "state" => params.state = Some(value.into_owned()),
            "error" => params.error = Some(value.into_owned()),
            _ => kept.push((key.into_owned(), value.into_owned())),
        }
    }

    if params.code.is_none() && params.state.is_none() && params.error.is_none() {
        return None;
    }

    if kept.is_empty() {
        location.set_query(None);
    } else {
        location.query_pairs_mut().clear().extend_pairs(kept);
    }
    Some(params)
}
