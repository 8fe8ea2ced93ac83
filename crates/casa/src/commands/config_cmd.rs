//! Config subcommand handlers.

use casa_config::{self as config, Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

fn available(cfg: &Config) -> String {
    let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    names.sort_unstable();
    if names.is_empty() {
        "(none)".into()
    } else {
        names.join(", ")
    }
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        // ── Init: create or update a profile ────────────────────────
        ConfigCommand::Init { hub_url, default } => {
            let mut cfg = config::load_config()?;
            let name = global
                .profile
                .clone()
                .unwrap_or_else(|| config::DEFAULT_PROFILE.into());

            let mut profile = cfg
                .profiles
                .get(&name)
                .cloned()
                .unwrap_or_else(|| Profile::new(hub_url.clone()));
            profile.hub_url = hub_url;
            if global.insecure {
                profile.insecure = Some(true);
            }

            // Reject values the session could not use.
            config::profile_to_session_config(&profile, &cfg.defaults)?;

            cfg.profiles.insert(name.clone(), profile);
            if default || cfg.profiles.len() == 1 {
                cfg.default_profile = Some(name.clone());
            }
            config::save_config(&cfg)?;

            tracing::info!(profile = %name, "profile saved");
            output::print_output(
                &format!(
                    "Profile '{name}' saved to {}\nNext: casa --profile {name} login",
                    config::config_path().display()
                ),
                global.quiet,
            );
            Ok(())
        }

        // ── Show ────────────────────────────────────────────────────
        ConfigCommand::Show => {
            let cfg = config::load_config_or_default();
            let out = output::render_single(
                global.output,
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_else(|e| format!("# unrenderable: {e}")),
                |c| c.default_profile.clone().unwrap_or_default(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        // ── Profiles ────────────────────────────────────────────────
        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg
                .default_profile
                .as_deref()
                .unwrap_or(config::DEFAULT_PROFILE);
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: casa config init --hub-url <URL>");
                return Ok(());
            }
            let mut names: Vec<&String> = cfg.profiles.keys().collect();
            names.sort();
            for name in names {
                let marker = if name == default { " *" } else { "" };
                match global.output {
                    OutputFormat::Plain => println!("{name}"),
                    _ => println!("{name}{marker}  {}", cfg.profiles[name].hub_url),
                }
            }
            Ok(())
        }

        // ── Use <name> ──────────────────────────────────────────────
        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config()?;
            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: available(&cfg),
                    name,
                });
            }
            cfg.default_profile = Some(name.clone());
            config::save_config(&cfg)?;
            output::print_output(&format!("Default profile: {name}"), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
            Ok(())
        }
    }
}
