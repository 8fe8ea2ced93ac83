//! Entity listing and live change stream.

use std::sync::Arc;

use tabled::Tabled;
use tokio::sync::broadcast::error::RecvError;

use casa_core::{EntityState, SessionEvent};

use crate::cli::{GlobalOpts, OutputFormat, StatesArgs, WatchArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct EntityRow {
    #[tabled(rename = "Entity")]
    entity_id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Changed")]
    changed: String,
}

fn entity_row(entity: &EntityState, color: bool) -> EntityRow {
    let unit = entity
        .attributes
        .get("unit_of_measurement")
        .and_then(serde_json::Value::as_str);
    let state = match unit {
        Some(unit) => format!("{} {unit}", entity.state),
        None => entity.state.clone(),
    };
    EntityRow {
        entity_id: entity.entity_id.clone(),
        name: entity.friendly_name().to_owned(),
        state: output::paint_state(&state, color),
        changed: entity
            .last_changed
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default(),
    }
}

fn entity_detail(entity: &EntityState) -> String {
    let mut lines = vec![
        format!("Entity:    {}", entity.entity_id),
        format!("Name:      {}", entity.friendly_name()),
        format!("State:     {}", entity.state),
        format!("Domain:    {}", entity.domain()),
    ];
    if let Some(changed) = entity.last_changed {
        lines.push(format!("Changed:   {}", changed.to_rfc3339()));
    }
    if !entity.attributes.is_empty() {
        lines.push("Attributes:".into());
        let mut keys: Vec<&String> = entity.attributes.keys().collect();
        keys.sort();
        for key in keys {
            lines.push(format!("  {key}: {}", entity.attributes[key]));
        }
    }
    lines.join("\n")
}

pub async fn list(resolved: &Resolved, args: StatesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut live = util::connect(resolved).await?;
    let result = live.snapshot().await;
    let table = live.session.entities();

    let out = match result {
        Err(e) => Err(e),
        Ok(_) => match args.entity {
            Some(ref id) => match table.get(id) {
                Some(entity) => output::render_single(
                    global.output,
                    entity.as_ref(),
                    entity_detail,
                    |e| e.state.clone(),
                ),
                None => Err(CliError::EntityNotFound {
                    entity_id: id.clone(),
                }),
            },
            None => {
                let entities: Vec<Arc<EntityState>> = match args.domain {
                    Some(ref domain) => table.by_domain(domain),
                    None => table.snapshot().as_ref().clone(),
                };
                let color = output::should_color(global.color);
                output::render_list(
                    global.output,
                    &entities,
                    |e| entity_row(e, color),
                    |e| e.entity_id.clone(),
                )
            }
        },
    };
    live.close().await;

    output::print_output(&out?, global.quiet);
    Ok(())
}

fn watch_line(entity: &EntityState, format: OutputFormat, color: bool) -> Result<String, CliError> {
    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(entity, true),
        OutputFormat::Plain => Ok(format!("{} {}", entity.entity_id, entity.state)),
        OutputFormat::Table => {
            let at = entity
                .last_updated
                .map(|t| t.format("%H:%M:%S").to_string())
                .unwrap_or_default();
            Ok(format!(
                "{at} {}  {}",
                output::paint_heading(&entity.entity_id, color),
                output::paint_state(&entity.state, color)
            ))
        }
    }
}

/// Print changes until interrupted or `--count` is reached.
pub async fn watch(resolved: &Resolved, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let live = util::connect(resolved).await?;
    let mut events = live.session.events();
    let color = output::should_color(global.color);
    let mut seen = 0usize;

    if !global.quiet {
        eprintln!("Watching {} (Ctrl-C to stop)", resolved.session.hub_url);
    }

    let result = loop {
        if args.count.is_some_and(|n| seen >= n) {
            break Ok(());
        }
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = events.recv() => event,
        };
        match event {
            Ok(SessionEvent::EntityChanged(id)) => {
                let Some(entity) = live.session.entity(&id) else {
                    continue;
                };
                if args.domain.as_deref().is_some_and(|d| d != entity.domain()) {
                    continue;
                }
                match watch_line(&entity, global.output, color) {
                    Ok(line) => output::print_output(&line, false),
                    Err(e) => break Err(e),
                }
                seen += 1;
            }
            Ok(SessionEvent::ConnectionLost) => {
                tracing::warn!("connection lost, reconnecting");
            }
            Ok(SessionEvent::ConnectionRestored) => {
                tracing::info!("connection restored");
            }
            Ok(SessionEvent::LoggedOut { .. }) => break Err(resolved.not_signed_in()),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "dropped change events"),
            Err(RecvError::Closed) => break Ok(()),
        }
    };

    live.close().await;
    result
}
