// ── Token and preference persistence ──
//
// Credentials and dashboard preferences live together in one JSON
// document. Stores fail soft: a missing or corrupt file reads as "no
// state" and write failures are logged, never propagated.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use strum::{Display, EnumString};

// ── Credentials ─────────────────────────────────────────────────────

/// Access + refresh token pair with absolute expiry.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Unix epoch milliseconds, or 0 when unknown (long-lived tokens).
    pub expires_at_ms: i64,
}

impl Credentials {
    /// Build credentials from a token endpoint response issued at `now_ms`.
    pub fn issued(
        access_token: SecretString,
        refresh_token: Option<SecretString>,
        expires_in_secs: u64,
        now_ms: i64,
    ) -> Self {
        let lifetime_ms = i64::try_from(expires_in_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        Self {
            access_token,
            refresh_token,
            expires_at_ms: now_ms.saturating_add(lifetime_ms),
        }
    }
}

// ── Preferences ─────────────────────────────────────────────────────

/// How music reaches a speaker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SpeakerKind {
    /// Spotify Connect target; playback is moved with `select_source`.
    #[default]
    Spotify,
    /// Speaker driven directly by the hub.
    #[serde(alias = "vlc")]
    Local,
}

/// The speaker the user last picked for playback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Speaker {
    pub entity: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: SpeakerKind,
}

// ── Persisted document ──────────────────────────────────────────────

/// Everything the dashboard keeps between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ha_url: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "expose_opt"
    )]
    pub ha_token: Option<SecretString>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "expose_opt"
    )]
    pub refresh_token: Option<SecretString>,
    #[serde(default)]
    pub token_expiry: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_speaker: Option<Speaker>,
}

#[allow(clippy::ref_option)]
fn expose_opt<S: Serializer>(secret: &Option<SecretString>, ser: S) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => ser.serialize_some(s.expose_secret()),
        None => ser.serialize_none(),
    }
}

impl PersistedState {
    /// The stored credentials, if an access token is present.
    pub fn credentials(&self) -> Option<Credentials> {
        self.ha_token.as_ref().map(|token| Credentials {
            access_token: token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at_ms: self.token_expiry,
        })
    }

    pub fn set_credentials(&mut self, creds: &Credentials) {
        self.ha_token = Some(creds.access_token.clone());
        self.refresh_token.clone_from(&creds.refresh_token);
        self.token_expiry = creds.expires_at_ms;
    }
}

// ── Store traits ────────────────────────────────────────────────────

/// Load/save/clear for the persisted document.
pub trait TokenStore: Send + Sync {
    /// Read the stored state. Errors are logged and read as `None`.
    fn load(&self) -> Option<PersistedState>;
    fn save(&self, state: &PersistedState);
    fn clear(&self);
}

/// Holds the anti-forgery nonce between authorization redirect and callback.
pub trait NonceStore: Send + Sync {
    fn put(&self, nonce: &str);
    /// Remove and return the stored nonce.
    fn take(&self) -> Option<String>;
}

// ── In-memory stores ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<PersistedState> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn save(&self, state: &PersistedState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
    }

    fn clear(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[derive(Debug, Default)]
pub struct MemoryNonceStore {
    nonce: Mutex<Option<String>>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NonceStore for MemoryNonceStore {
    fn put(&self, nonce: &str) {
        *self.nonce.lock().unwrap_or_else(PoisonError::into_inner) = Some(nonce.to_owned());
    }

    fn take(&self) -> Option<String> {
        self.nonce
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

// ── File-backed stores ──────────────────────────────────────────────

/// JSON document on disk. Parent directories are created on save.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<PersistedState> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read state file");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring corrupt state file");
                None
            }
        }
    }

    fn save(&self, state: &PersistedState) {
        if let Err(e) = write_file(&self.path, state) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write state file");
        }
    }

    fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "state file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove state file");
            }
        }
    }
}

fn write_file(path: &Path, state: &PersistedState) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(state).map_err(std::io::Error::other)?;
    write_private(path, json.as_bytes())
}

/// Write `contents` so that only the owner can read it (`0o600` on unix).
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    // `mode` only applies when the file is created.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents)
}

/// Nonce kept in a small file so `login` and `callback` can run as
/// separate processes.
#[derive(Debug, Clone)]
pub struct FileNonceStore {
    path: PathBuf,
}

impl FileNonceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NonceStore for FileNonceStore {
    fn put(&self, nonce: &str) {
        if let Err(e) = write_private(&self.path, nonce.as_bytes()) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to store login nonce");
        }
    }

    fn take(&self) -> Option<String> {
        let nonce = std::fs::read_to_string(&self.path).ok()?;
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to delete login nonce");
        }
        let nonce = nonce.trim();
        (!nonce.is_empty()).then(|| nonce.to_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn signed_in() -> PersistedState {
        let mut state = PersistedState {
            ha_url: Some("https://ha.example.com".into()),
            ..PersistedState::default()
        };
        state.set_credentials(&Credentials {
            access_token: SecretString::from("access".to_string()),
            refresh_token: Some(SecretString::from("refresh".to_string())),
            expires_at_ms: 1_700_000_000_000,
        });
        state
    }

    #[test]
    fn serializes_with_storage_key_names() {
        let mut state = signed_in();
        state.selected_device = Some("media_player.kitchen".into());
        state.selected_speaker = Some(Speaker {
            entity: "media_player.den".into(),
            name: "Den".into(),
            kind: SpeakerKind::Local,
        });

        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({
                "haUrl": "https://ha.example.com",
                "haToken": "access",
                "refreshToken": "refresh",
                "tokenExpiry": 1_700_000_000_000_i64,
                "selectedDevice": "media_player.kitchen",
                "selectedSpeaker": { "entity": "media_player.den", "name": "Den", "type": "local" }
            })
        );
    }

    #[test]
    fn issued_computes_absolute_expiry() {
        let creds = Credentials::issued(SecretString::from("a".to_string()), None, 1800, 1_000);
        assert_eq!(creds.expires_at_ms, 1_801_000);
    }

    #[test]
    fn file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("nested").join("state.json"));
        assert!(store.load().is_none());

        store.save(&signed_in());
        let loaded = store.load().unwrap();
        let creds = loaded.credentials().unwrap();
        assert_eq!(creds.access_token.expose_secret(), "access");
        assert_eq!(creds.expires_at_ms, 1_700_000_000_000);

        store.clear();
        store.clear();
        assert!(store.load().is_none());
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(FileTokenStore::new(path).load().is_none());
    }

    #[cfg(unix)]
    fn mode_of(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[cfg(unix)]
    #[test]
    fn secrets_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("profile").join("state.json");
        FileTokenStore::new(&state_path).save(&signed_in());
        assert_eq!(mode_of(&state_path), 0o600);

        let nonce_path = dir.path().join("profile").join("oauth_state");
        FileNonceStore::new(&nonce_path).put("abc123");
        assert_eq!(mode_of(&nonce_path), 0o600);

        // A file left readable by an older version is tightened on save.
        std::fs::set_permissions(&state_path, std::fs::Permissions::from_mode(0o644)).unwrap();
        FileTokenStore::new(&state_path).save(&signed_in());
        assert_eq!(mode_of(&state_path), 0o600);
    }

    #[test]
    fn nonce_is_taken_once() {
        let dir = tempfile::tempdir().unwrap();
        let stores: [Box<dyn NonceStore>; 2] = [
            Box::new(MemoryNonceStore::new()),
            Box::new(FileNonceStore::new(dir.path().join("oauth_state"))),
        ];
        for store in &stores {
            assert!(store.take().is_none());
            store.put("abc123");
            assert_eq!(store.take().as_deref(), Some("abc123"));
            assert!(store.take().is_none());
        }
    }
}
