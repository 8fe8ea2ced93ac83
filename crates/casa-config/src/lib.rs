//! Configuration for casa: TOML profiles, on-disk locations, and the
//! translation from a profile into a [`casa_core::SessionConfig`].
//!
//! Layering (lowest to highest): built-in defaults, the TOML file at
//! [`config_path()`], then `CASA_*` environment variables with `__` as
//! the nesting separator (`CASA_DEFAULTS__TIMEOUT=10`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use url::Url;

use casa_core::{SessionConfig, TlsVerification};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for '{field}': {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' is not defined")]
    UnknownProfile { name: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("failed to load config: {0}")]
    Figment(Box<figment::Error>),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Types ───────────────────────────────────────────────────────────

pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_profile: Option<String>,
    pub defaults: Defaults,
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some(DEFAULT_PROFILE.into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub output: String,
    pub color: String,
    pub insecure: bool,
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: "table".into(),
            color: "auto".into(),
            insecure: false,
            timeout: 30,
        }
    }
}

/// One hub connection plus the dashboard entities it drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub hub_url: String,

    /// OAuth client id; the hub origin when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    // ── Dashboard entities ──
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calendars: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_player: Option<String>,
    /// SpotifyPlus entity for playlist and queue queries; falls back
    /// to `media_player`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotifyplus_entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo_list: Option<String>,
}

fn default_reconnect_interval() -> u64 {
    casa_core::config::DEFAULT_RECONNECT_INTERVAL.as_secs()
}

fn default_request_timeout() -> u64 {
    casa_core::config::DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl Profile {
    pub fn new(hub_url: impl Into<String>) -> Self {
        Self {
            hub_url: hub_url.into(),
            client_id: None,
            redirect_uri: None,
            insecure: None,
            ca_cert: None,
            timeout: None,
            reconnect_interval_secs: default_reconnect_interval(),
            request_timeout_secs: default_request_timeout(),
            calendars: Vec::new(),
            media_player: None,
            spotifyplus_entity: None,
            todo_list: None,
        }
    }

    pub fn spotifyplus(&self) -> Option<&str> {
        self.spotifyplus_entity
            .as_deref()
            .or(self.media_player.as_deref())
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "casa", "casa")
}

/// Platform config file path (`~/.config/casa/config.toml` on Linux).
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from(".casa").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Per-profile directory for persisted session state.
pub fn data_dir(profile: &str) -> PathBuf {
    let base = project_dirs().map_or_else(
        || PathBuf::from(".casa").join("data"),
        |dirs| dirs.data_dir().to_path_buf(),
    );
    base.join("profiles").join(profile)
}

/// Token + preference document for a profile.
pub fn state_path(profile: &str) -> PathBuf {
    data_dir(profile).join("state.json")
}

/// Pending OAuth nonce for a profile.
pub fn nonce_path(profile: &str) -> PathBuf {
    data_dir(profile).join("oauth_state")
}

// ── Load / save ─────────────────────────────────────────────────────

/// Load from the default location, layered with `CASA_*` env vars.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CASA_").split("__"))
        .extract()?;
    Ok(config)
}

/// Like [`load_config`], but an unreadable file yields the defaults.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "config unreadable, using defaults");
        Config::default()
    })
}

pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    save_config_to(config, &config_path())
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml = toml::to_string_pretty(config)?;
    std::fs::write(path, toml)?;
    Ok(())
}

// ── Resolution ──────────────────────────────────────────────────────

impl Config {
    /// Explicit name, then `default_profile`, then `"default"`.
    pub fn active_profile_name(&self, explicit: Option<&str>) -> String {
        explicit
            .or(self.default_profile.as_deref())
            .unwrap_or(DEFAULT_PROFILE)
            .to_owned()
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }
}

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: e.to_string(),
    })
}

/// Build the session configuration a profile describes.
///
/// `insecure` wins over `ca_cert`; both fall back to `defaults`.
pub fn profile_to_session_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<SessionConfig, ConfigError> {
    let hub_url = parse_url("hub_url", &profile.hub_url)?;
    let mut config = SessionConfig::for_hub(hub_url).map_err(|e| ConfigError::Validation {
        field: "hub_url".into(),
        reason: e.to_string(),
    })?;

    if let Some(ref client_id) = profile.client_id {
        config.client_id.clone_from(client_id);
    }
    if let Some(ref redirect) = profile.redirect_uri {
        config.redirect_uri = parse_url("redirect_uri", redirect)?;
    }

    config.tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca) = profile.ca_cert {
        TlsVerification::CustomCa(ca.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    if profile.reconnect_interval_secs == 0 {
        return Err(ConfigError::Validation {
            field: "reconnect_interval_secs".into(),
            reason: "must be at least 1".into(),
        });
    }

    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.reconnect_interval = Duration::from_secs(profile.reconnect_interval_secs);
    config.request_timeout = Duration::from_secs(profile.request_timeout_secs);
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert_eq!(config.defaults.timeout, 30);
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn profile_fields_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
            default_profile = "home"

            [profiles.home]
            hub_url = "https://hub.local:8123"
            calendars = ["calendar.family", "calendar.work"]
            media_player = "media_player.spotify"
            "#,
        );
        let config = load_config_from(&path).unwrap();
        assert_eq!(config.active_profile_name(None), "home");
        assert_eq!(config.active_profile_name(Some("other")), "other");

        let home = config.profile("home").unwrap();
        assert_eq!(home.reconnect_interval_secs, 5);
        assert_eq!(home.request_timeout_secs, 60);
        assert_eq!(home.calendars.len(), 2);
        assert_eq!(home.spotifyplus(), Some("media_player.spotify"));

        assert!(matches!(
            config.profile("missing"),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "profiles = 3");
        assert!(matches!(
            load_config_from(&path),
            Err(ConfigError::Figment(_))
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        let mut profile = Profile::new("http://hub:8123");
        profile.todo_list = Some("todo.shopping".into());
        config.profiles.insert("default".into(), profile);
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let profile = loaded.profile("default").unwrap();
        assert_eq!(profile.hub_url, "http://hub:8123");
        assert_eq!(profile.todo_list.as_deref(), Some("todo.shopping"));
    }

    #[test]
    fn session_config_from_profile() {
        let mut profile = Profile::new("https://hub.local:8123/");
        profile.timeout = Some(5);
        profile.reconnect_interval_secs = 2;

        let config = profile_to_session_config(&profile, &Defaults::default()).unwrap();
        assert_eq!(config.client_id, "https://hub.local:8123/");
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.reconnect_interval, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert!(matches!(config.tls, TlsVerification::SystemDefaults));
    }

    #[test]
    fn tls_selection() {
        let mut profile = Profile::new("https://hub.local");
        profile.ca_cert = Some(PathBuf::from("/etc/casa/ca.pem"));
        let config = profile_to_session_config(&profile, &Defaults::default()).unwrap();
        assert!(matches!(config.tls, TlsVerification::CustomCa(_)));

        let defaults = Defaults {
            insecure: true,
            ..Defaults::default()
        };
        let config = profile_to_session_config(&profile, &defaults).unwrap();
        assert!(matches!(config.tls, TlsVerification::DangerAcceptInvalid));

        profile.insecure = Some(false);
        let config = profile_to_session_config(&profile, &defaults).unwrap();
        assert!(matches!(config.tls, TlsVerification::CustomCa(_)));
    }

    #[test]
    fn invalid_urls_are_rejected() {
        let profile = Profile::new("not a url");
        let err = profile_to_session_config(&profile, &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "hub_url"));

        let mut profile = Profile::new("http://hub");
        profile.redirect_uri = Some("::".into());
        assert!(profile_to_session_config(&profile, &Defaults::default()).is_err());
    }

    #[test]
    fn zero_reconnect_interval_is_rejected() {
        let mut profile = Profile::new("http://hub");
        profile.reconnect_interval_secs = 0;
        assert!(profile_to_session_config(&profile, &Defaults::default()).is_err());
    }

    #[test]
    fn state_paths_are_per_profile() {
        assert_ne!(state_path("a"), state_path("b"));
        assert!(nonce_path("a").ends_with("profiles/a/oauth_state"));
    }
}
