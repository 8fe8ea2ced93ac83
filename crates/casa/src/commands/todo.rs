//! Todo list items.

use tabled::Tabled;

use casa_core::{CoreError, SessionEvent, TodoItem};

use crate::cli::{GlobalOpts, TodoArgs};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Tabled)]
struct TodoRow {
    #[tabled(rename = " ")]
    mark: &'static str,
    #[tabled(rename = "Item")]
    summary: String,
}

fn todo_row(item: &TodoItem) -> TodoRow {
    TodoRow {
        mark: if item.done() { "✓" } else { "○" },
        summary: item.summary.clone(),
    }
}

pub async fn list(resolved: &Resolved, args: TodoArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let entity = util::pick_entity(
        args.entity,
        resolved.profile.todo_list.as_deref(),
        "todo list",
        "Pass a todo entity or set `todo_list` in the profile.",
    )?;

    let mut live = util::connect(resolved).await?;
    let result = async {
        live.session
            .fetch_todo_items(&entity, &entity)
            .await
            .ok_or(CoreError::NotConnected)?;
        live.wait_for(|event| match event {
            SessionEvent::TodoItems { list_id, items } if list_id == entity => Some(items),
            _ => None,
        })
        .await
    }
    .await;
    live.close().await;

    let items: Vec<TodoItem> = result?
        .iter()
        .filter(|item| args.all || !item.done())
        .cloned()
        .collect();
    let out = output::render_list(global.output, &items, todo_row, |i| i.summary.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}
