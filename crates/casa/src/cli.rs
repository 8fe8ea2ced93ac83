//! Clap derive structures for the `casa` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// casa -- Home Assistant dashboard from the command line
#[derive(Debug, Parser)]
#[command(
    name = "casa",
    version,
    about = "Control a Home Assistant hub from the command line",
    long_about = "Signs in with the hub's OAuth flow, keeps a live event-stream\n\
        session, and exposes dashboard actions: entity states, service calls,\n\
        calendars, playlists, and todo lists.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Hub profile to use
    #[arg(long, short = 'p', env = "CASA_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Hub URL (overrides profile)
    #[arg(long, env = "CASA_HUB", global = true)]
    pub hub: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "CASA_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates on the token endpoint
    #[arg(long, short = 'k', env = "CASA_INSECURE", global = true)]
    pub insecure: bool,

    /// Timeout in seconds for HTTP calls and for waiting on the hub
    #[arg(long, env = "CASA_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the OAuth sign-in and print the authorization URL
    Login,

    /// Finish sign-in with the URL the hub redirected the browser to
    Callback {
        /// Full redirect URL, including `code` and `state`
        url: String,
    },

    /// Sign in with a long-lived access token instead of OAuth
    Token {
        /// Access token; falls back to CASA_TOKEN, then one line of stdin.
        /// Pass `-` to force stdin.
        #[arg(env = "CASA_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Forget stored credentials for the profile
    Logout,

    /// Show sign-in state for the profile
    Status,

    /// List entity states
    #[command(alias = "ls")]
    States(StatesArgs),

    /// Stream state changes as they happen
    Watch(WatchArgs),

    /// Call a hub service
    Call(CallArgs),

    /// Toggle an entity (scripts run, covers tilt, booleans flip)
    Toggle {
        /// Entity id, e.g. `light.kitchen`
        entity: String,
    },

    /// Upcoming calendar events
    #[command(alias = "cal")]
    Calendar(CalendarArgs),

    /// Favorite playlists from SpotifyPlus
    Playlists(PlaylistsArgs),

    /// Current playback queue from SpotifyPlus
    Queue(PlayerArgs),

    /// Start a playlist on the media player
    Play(PlayArgs),

    /// Show or choose the playback speaker
    Speaker(SpeakerArgs),

    /// Items on a todo list
    Todo(TodoArgs),

    /// Manage CLI configuration and profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Entity commands ──────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StatesArgs {
    /// Only show entities in this domain (e.g. `light`)
    #[arg(long, short = 'd')]
    pub domain: Option<String>,

    /// Show a single entity
    pub entity: Option<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only report entities in this domain
    #[arg(long, short = 'd')]
    pub domain: Option<String>,

    /// Stop after this many changes
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct CallArgs {
    /// Service in `domain.service` form, e.g. `light.turn_on`
    pub service: String,

    /// Target entity id
    pub entity: Option<String>,

    /// Extra service data as a JSON object
    #[arg(long)]
    pub data: Option<String>,

    /// Ask the hub to return the service response
    #[arg(long)]
    pub return_response: bool,
}

// ── Dashboard commands ───────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CalendarArgs {
    /// Calendar entities (defaults to the profile's `calendars`)
    pub calendars: Vec<String>,

    /// How many days ahead to look
    #[arg(long, default_value_t = 90)]
    pub days: i64,
}

#[derive(Debug, Args)]
pub struct PlayerArgs {
    /// Media player entity (defaults to the profile)
    #[arg(long)]
    pub player: Option<String>,
}

#[derive(Debug, Args)]
pub struct PlaylistsArgs {
    #[command(flatten)]
    pub player: PlayerArgs,

    /// Maximum number of playlists
    #[arg(long, short = 'l', default_value_t = 50)]
    pub limit: u32,
}

#[derive(Debug, Args)]
pub struct PlayArgs {
    /// Playlist URI, e.g. `spotify:playlist:...`
    pub uri: String,

    #[command(flatten)]
    pub player: PlayerArgs,
}

#[derive(Debug, Args)]
pub struct SpeakerArgs {
    /// Speaker name as the player lists it in its sources
    pub name: Option<String>,

    /// Speaker entity id
    #[arg(long)]
    pub entity: Option<String>,

    /// How playback reaches the speaker
    #[arg(long, value_enum, default_value = "spotify")]
    pub kind: SpeakerKindArg,

    /// Move current playback to the speaker right away
    #[arg(long)]
    pub transfer: bool,

    #[command(flatten)]
    pub player: PlayerArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SpeakerKindArg {
    /// Spotify Connect target
    Spotify,
    /// Speaker driven by the hub directly
    Local,
}

#[derive(Debug, Args)]
pub struct TodoArgs {
    /// Todo entity (defaults to the profile's `todo_list`)
    pub entity: Option<String>,

    /// Include completed items
    #[arg(long, short = 'a')]
    pub all: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or update a profile
    Init {
        /// Hub base URL
        #[arg(long)]
        hub_url: String,

        /// Make this profile the default
        #[arg(long)]
        default: bool,
    },

    /// Display current resolved configuration
    Show,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to make default
        name: String,
    },

    /// Print the config file path
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
