//! The `stepcode progress` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use stepcode_backends::{load_config_from, JsonAttemptStore};
use stepcode_core::progress::AttemptState;

pub async fn execute(user: String, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let store = JsonAttemptStore::new(&config.progress_dir);

    let attempts = store.list(&user).await?;
    if attempts.is_empty() {
        println!("No stored progress for {user}.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Assignment",
        "State",
        "Active module",
        "Completed",
        "Last accessed",
    ]);
    for attempt in &attempts {
        let summary = attempt.summary();
        table.add_row(vec![
            Cell::new(&attempt.assignment_id),
            Cell::new(state_label(attempt.state())),
            Cell::new(attempt.active_module_id()),
            Cell::new(format!("{}/{}", summary.completed, summary.total)),
            Cell::new(attempt.last_accessed.format("%Y-%m-%d %H:%M UTC")),
        ]);
    }

    println!("{table}");
    Ok(())
}

fn state_label(state: AttemptState) -> &'static str {
    match state {
        AttemptState::NotStarted => "not started",
        AttemptState::InProgress => "in progress",
        AttemptState::Completed => "completed",
    }
}
