//! The `stepcode validate` command.

use std::path::PathBuf;

use anyhow::Result;

use stepcode_core::parser::{self, ValidationWarning};

pub fn execute(assignments_path: PathBuf) -> Result<()> {
    // Prerequisites can only be resolved against a whole directory.
    let (assignments, warnings) = if assignments_path.is_dir() {
        let assignments = parser::load_assignment_directory(&assignments_path)?;
        let warnings = parser::validate_catalog(&assignments);
        (assignments, warnings)
    } else {
        let assignment = parser::parse_assignment(&assignments_path)?;
        let warnings = parser::validate_assignment(&assignment);
        (vec![assignment], warnings)
    };

    for assignment in &assignments {
        println!(
            "Assignment: {} ({} modules)",
            assignment.title,
            assignment.modules.len()
        );
    }

    for w in &warnings {
        print_warning(w);
    }

    if warnings.is_empty() {
        println!("All assignments valid.");
    } else {
        println!("\n{} warning(s) found.", warnings.len());
    }

    Ok(())
}

fn print_warning(w: &ValidationWarning) {
    let prefix = match &w.module_id {
        Some(module) => format!("  [{}/{module}]", w.assignment_id),
        None => format!("  [{}]", w.assignment_id),
    };
    println!("{prefix} WARNING: {}", w.message);
}
