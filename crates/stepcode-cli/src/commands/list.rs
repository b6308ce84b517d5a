//! The `stepcode list` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use stepcode_core::catalog::Catalog;
use stepcode_core::model::Difficulty;
use stepcode_core::traits::AssignmentFilter;

pub fn execute(
    assignments_dir: PathBuf,
    course: Option<String>,
    difficulty: Option<String>,
    search: Option<String>,
) -> Result<()> {
    let difficulty = difficulty
        .map(|d| d.parse::<Difficulty>())
        .transpose()
        .map_err(|e| anyhow::anyhow!(e))?;
    let filter = AssignmentFilter {
        course,
        difficulty,
        search,
    };

    let catalog = Catalog::from_directory(&assignments_dir)?;
    let summaries = catalog.list(&filter);
    if summaries.is_empty() {
        println!("No assignments found.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "ID",
        "Title",
        "Course",
        "Difficulty",
        "Language",
        "Modules",
        "Time",
    ]);
    for s in &summaries {
        table.add_row(vec![
            Cell::new(&s.id),
            Cell::new(&s.title),
            Cell::new(&s.course),
            Cell::new(s.difficulty),
            Cell::new(s.language),
            Cell::new(s.module_count),
            Cell::new(&s.estimated_time),
        ]);
    }

    println!("{table}");
    println!("{} assignment(s)", summaries.len());
    Ok(())
}
