//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use casa_config::ConfigError;
use casa_core::{CoreError, RequestError};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to hub at {url}")]
    #[diagnostic(
        code(casa::connection_failed),
        help(
            "Check that the hub is running and reachable.\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Not signed in to profile '{profile}'")]
    #[diagnostic(
        code(casa::not_signed_in),
        help(
            "Sign in with: casa login\n\
             Or use a long-lived token: casa token <TOKEN>"
        )
    )]
    NotSignedIn { profile: String },

    #[error("Sign-in failed: {message}")]
    #[diagnostic(code(casa::auth_failed), help("Run: casa login"))]
    AuthFailed { message: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("Entity '{entity_id}' not found")]
    #[diagnostic(
        code(casa::not_found),
        help("Run: casa states to see available entities")
    )]
    EntityNotFound { entity_id: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("Hub error: {message}")]
    #[diagnostic(code(casa::api_error))]
    Api { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(casa::validation))]
    Validation { field: String, reason: String },

    #[error("No {what} given")]
    #[diagnostic(code(casa::missing_value), help("{hint}"))]
    Missing { what: String, hint: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(casa::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: casa config init --hub-url <URL>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No hub configured")]
    #[diagnostic(
        code(casa::no_config),
        help(
            "Create a profile with: casa config init --hub-url <URL>\n\
             Or pass --hub <URL>. Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(casa::config))]
    Config(#[from] ConfigError),

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s waiting for the hub")]
    #[diagnostic(
        code(casa::timeout),
        help("Increase the wait with --timeout or check that the hub is responsive.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(casa::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::NotSignedIn { .. } | Self::AuthFailed { .. } => exit_code::AUTH,
            Self::EntityNotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Missing { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::NotConnected => Self::ConnectionFailed {
                url: "(disconnected)".into(),
                reason: "the hub connection was lost".into(),
            },
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },
            CoreError::LoggedOut => Self::NotSignedIn {
                profile: "current".into(),
            },
            CoreError::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::InvalidService { service } => Self::Validation {
                field: "service".into(),
                reason: format!("expected `domain.service`, got '{service}'"),
            },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Api { message, .. } | CoreError::Internal(message) => Self::Api { message },
        }
    }
}

// ── RequestError → CliError mapping ──────────────────────────────────

impl From<RequestError> for CliError {
    fn from(err: RequestError) -> Self {
        let message = match (err.message.is_empty(), err.code.is_empty()) {
            (true, true) => "request failed".to_owned(),
            (true, false) => err.code,
            (false, true) => err.message,
            (false, false) => format!("{} ({})", err.message, err.code),
        };
        Self::Api { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let cases = [
            (CoreError::LoggedOut, exit_code::AUTH),
            (
                CoreError::Timeout { timeout_secs: 3 },
                exit_code::TIMEOUT,
            ),
            (CoreError::NotConnected, exit_code::CONNECTION),
            (
                CoreError::InvalidService {
                    service: "light".into(),
                },
                exit_code::USAGE,
            ),
            (CoreError::Internal("boom".into()), exit_code::GENERAL),
        ];
        for (core, code) in cases {
            assert_eq!(CliError::from(core).exit_code(), code);
        }
    }

    #[test]
    fn rejected_request_is_a_hub_error() {
        let err = CliError::from(RequestError {
            code: "not_found".into(),
            message: "Service light.explode not found".into(),
        });
        assert!(matches!(
            err,
            CliError::Api { ref message } if message == "Service light.explode not found (not_found)"
        ));
        assert_eq!(err.exit_code(), exit_code::GENERAL);
        assert!(matches!(
            CliError::from(RequestError::default()),
            CliError::Api { ref message } if message == "request failed"
        ));
    }
}
