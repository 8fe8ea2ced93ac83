//! Sign-in, sign-out, and status.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use url::Url;

use crate::cli::GlobalOpts;
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

/// Print the authorization URL. The browser lands on the redirect URI
/// afterwards; that full URL goes to `casa callback`.
pub fn login(resolved: &Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let session = resolved.open_session()?;
    let authorize = session.oauth().start_login();

    if !global.quiet {
        eprintln!("Open this URL in a browser and approve access:\n");
    }
    println!("{authorize}");
    if !global.quiet {
        eprintln!(
            "\nThen copy the address the browser ends up on and run:\n  casa callback '<URL>'"
        );
    }
    Ok(())
}

pub async fn callback(resolved: &Resolved, raw: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let mut location = Url::parse(raw).map_err(|e| CliError::Validation {
        field: "url".into(),
        reason: e.to_string(),
    })?;

    let session = resolved.open_session()?;
    let oauth = session.oauth();
    if !oauth.handle_redirect_callback(&mut location).await {
        let message = oauth
            .subscribe_status()
            .borrow()
            .as_ref()
            .map_or_else(|| "no sign-in in progress".to_owned(), |s| s.message.clone());
        return Err(CliError::AuthFailed { message });
    }

    output::print_output(
        &format!("Signed in to {} ({})", oauth.hub_url(), resolved.name),
        global.quiet,
    );
    Ok(())
}

/// The token argument, or the first line of stdin when it is absent or `-`.
fn token_input(arg: Option<String>) -> Result<String, CliError> {
    let raw = match arg {
        Some(token) if token != "-" => token,
        _ => {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            line
        }
    };
    let token = raw.trim();
    if token.is_empty() {
        return Err(CliError::Missing {
            what: "token".into(),
            hint: "Create a long-lived access token on your hub profile page, then pass it \
                   as an argument, via CASA_TOKEN, or on stdin."
                .into(),
        });
    }
    Ok(token.to_owned())
}

pub async fn token(
    resolved: &Resolved,
    token: Option<String>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let token = token_input(token)?;
    let session = resolved.open_session()?;
    session
        .oauth()
        .set_long_lived_token(SecretString::from(token))
        .await;

    // Verify the hub accepts it before reporting success.
    let live = super::util::connect(resolved).await?;
    live.close().await;

    output::print_output(
        &format!("Token stored for {}", resolved.name),
        global.quiet,
    );
    Ok(())
}

pub async fn logout(resolved: &Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let session = resolved.open_session()?;
    session.logout().await;
    output::print_output("Signed out", global.quiet);
    Ok(())
}

// ── Status ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AuthStatus {
    profile: String,
    hub: String,
    signed_in: bool,
    expired: bool,
    refreshable: bool,
    expires_at: Option<DateTime<Utc>>,
    selected_device: Option<String>,
    selected_speaker: Option<String>,
}

fn status_detail(s: &AuthStatus) -> String {
    let expires = s
        .expires_at
        .map_or_else(|| "never".to_owned(), |t| t.to_rfc3339());
    let state = match (s.signed_in, s.expired) {
        (false, _) => "signed out",
        (true, true) if s.refreshable => "expired (will refresh)",
        (true, true) => "expired",
        (true, false) => "signed in",
    };
    [
        format!("Profile:   {}", s.profile),
        format!("Hub:       {}", s.hub),
        format!("State:     {state}"),
        format!("Expires:   {expires}"),
        format!("Device:    {}", s.selected_device.as_deref().unwrap_or("-")),
        format!("Speaker:   {}", s.selected_speaker.as_deref().unwrap_or("-")),
    ]
    .join("\n")
}

pub async fn status(resolved: &Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let session = resolved.open_session()?;
    let oauth = session.oauth();
    let creds = oauth.credentials().await;

    let status = AuthStatus {
        profile: resolved.name.clone(),
        hub: oauth.hub_url().to_string(),
        signed_in: creds.is_some(),
        expired: oauth.is_expired().await,
        refreshable: oauth.has_refresh_token().await,
        expires_at: creds
            .as_ref()
            .filter(|c| c.expires_at_ms > 0)
            .and_then(|c| DateTime::from_timestamp_millis(c.expires_at_ms)),
        selected_device: session.selected_device(),
        selected_speaker: session.selected_speaker().map(|s| s.name),
    };

    let out = output::render_single(global.output, &status, status_detail, |s| {
        s.signed_in.to_string()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
