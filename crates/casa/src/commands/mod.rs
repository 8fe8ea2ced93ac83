//! Command dispatch: bridges CLI args -> session calls -> output formatting.

pub mod auth;
pub mod call;
pub mod config_cmd;
pub mod media;
pub mod states;
pub mod todo;
pub mod util;

use crate::cli::{Command, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;

/// Dispatch a hub-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    resolved: &Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Login => auth::login(resolved, global),
        Command::Callback { url } => auth::callback(resolved, &url, global).await,
        Command::Token { token } => auth::token(resolved, token, global).await,
        Command::Logout => auth::logout(resolved, global).await,
        Command::Status => auth::status(resolved, global).await,
        Command::States(args) => states::list(resolved, args, global).await,
        Command::Watch(args) => states::watch(resolved, args, global).await,
        Command::Call(args) => call::call(resolved, args, global).await,
        Command::Toggle { entity } => call::toggle(resolved, &entity, global).await,
        Command::Calendar(args) => media::calendar(resolved, args, global).await,
        Command::Playlists(args) => media::playlists(resolved, args, global).await,
        Command::Queue(args) => media::queue(resolved, args, global).await,
        Command::Play(args) => media::play(resolved, args, global).await,
        Command::Speaker(args) => media::speaker(resolved, args, global).await,
        Command::Todo(args) => todo::list(resolved, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    }
}
