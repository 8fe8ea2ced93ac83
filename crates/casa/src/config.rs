//! Profile resolution: config file + global flags into a ready `Session`.
//!
//! Core never sees these types; it receives a pre-built `SessionConfig`
//! plus file-backed stores under the profile's data directory.

use std::sync::Arc;

use casa_config::{Config, Profile};
use casa_core::{FileNonceStore, FileTokenStore, Session, SessionConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// A profile after flags and env overrides were applied.
#[derive(Debug)]
pub struct Resolved {
    pub name: String,
    pub profile: Profile,
    pub session: SessionConfig,
}

impl Resolved {
    /// Build a session whose tokens and nonce live on disk for this profile.
    pub fn open_session(&self) -> Result<Session, CliError> {
        let tokens = Arc::new(FileTokenStore::new(casa_config::state_path(&self.name)));
        let nonces = Arc::new(FileNonceStore::new(casa_config::nonce_path(&self.name)));
        Ok(Session::new(self.session.clone(), tokens, nonces)?)
    }

    pub fn not_signed_in(&self) -> CliError {
        CliError::NotSignedIn {
            profile: self.name.clone(),
        }
    }
}

fn available_profiles(config: &Config) -> String {
    let mut names: Vec<&str> = config.profiles.keys().map(String::as_str).collect();
    if names.is_empty() {
        return "(none)".into();
    }
    names.sort_unstable();
    names.join(", ")
}

/// Resolve the active profile.
///
/// `--hub` works without any config file; it overrides the profile's
/// URL when both are present.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let config = casa_config::load_config()?;
    resolve_with(&config, global)
}

pub fn resolve_with(config: &Config, global: &GlobalOpts) -> Result<Resolved, CliError> {
    let name = config.active_profile_name(global.profile.as_deref());

    let mut profile = match (config.profiles.get(&name), global.hub.as_deref()) {
        (Some(profile), hub) => {
            let mut profile = profile.clone();
            if let Some(hub) = hub {
                hub.clone_into(&mut profile.hub_url);
            }
            profile
        }
        (None, Some(hub)) => Profile::new(hub),
        (None, None) if global.profile.is_some() => {
            return Err(CliError::ProfileNotFound {
                name,
                available: available_profiles(config),
            });
        }
        (None, None) => {
            return Err(CliError::NoConfig {
                path: casa_config::config_path().display().to_string(),
            });
        }
    };

    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(timeout) = global.timeout {
        profile.timeout = Some(timeout);
    }

    let session = casa_config::profile_to_session_config(&profile, &config.defaults)?;
    tracing::debug!(profile = %name, hub = %session.hub_url, "profile resolved");

    Ok(Resolved {
        name,
        profile,
        session,
    })
}
