//! The `stepcode run` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use stepcode_backends::{create_sandbox, load_config_from, ConfigIdentityProvider, JsonAttemptStore};
use stepcode_core::catalog::Catalog;
use stepcode_core::ids::AttemptId;
use stepcode_core::navigator::{AssignmentNavigator, NavigatorEvent, NavigatorListener, Step};
use stepcode_core::parser;
use stepcode_core::progress::AssignmentAttempt;
use stepcode_core::session::SandboxSessionCoordinator;

/// Arguments of `stepcode run`.
pub struct RunArgs {
    pub assignment: String,
    pub solutions: PathBuf,
    pub user: String,
    pub assignments: Option<PathBuf>,
    pub preview: bool,
    pub json: bool,
    pub config: Option<PathBuf>,
}

/// Console navigation listener.
///
/// Human-readable lines go to stderr; with `json` each event is also written
/// to stdout as one JSON object per line.
struct ConsoleListener {
    json: bool,
}

impl ConsoleListener {
    fn emit(&self, event: NavigatorEvent) {
        if !self.json {
            return;
        }
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!("failed to encode event: {e}"),
        }
    }
}

impl NavigatorListener for ConsoleListener {
    fn on_module_changed(&self, attempt: AttemptId, module_id: &str) {
        eprintln!("  Module: {module_id}");
        self.emit(NavigatorEvent::ModuleChanged {
            attempt,
            module_id: module_id.to_string(),
        });
    }

    fn on_verification_result(&self, attempt: AttemptId, module_id: &str, matches: bool) {
        let verdict = if matches { "PASS" } else { "FAIL" };
        eprintln!("  Verified: {module_id} [{verdict}]");
        self.emit(NavigatorEvent::VerificationResult {
            attempt,
            module_id: module_id.to_string(),
            matches,
        });
    }

    fn on_attempt_finished(&self, attempt: AttemptId) {
        eprintln!("  Finished attempt {attempt}");
        self.emit(NavigatorEvent::AttemptFinished { attempt });
    }
}

/// What happened to one module during the run.
enum ModuleStatus {
    Passed,
    Failed,
    Ungraded,
    Skipped,
    Errored(String),
}

impl ModuleStatus {
    fn label(&self) -> String {
        match self {
            ModuleStatus::Passed => "passed".to_string(),
            ModuleStatus::Failed => "failed".to_string(),
            ModuleStatus::Ungraded => "ran (not graded)".to_string(),
            ModuleStatus::Skipped => "no solution".to_string(),
            ModuleStatus::Errored(e) => format!("error: {e}"),
        }
    }
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let config = load_config_from(args.config.as_deref())?;
    anyhow::ensure!(
        args.solutions.is_dir(),
        "solutions directory not found: {}",
        args.solutions.display()
    );

    let assignments_path = args
        .assignments
        .clone()
        .unwrap_or_else(|| config.assignments_dir.clone());
    let catalog = load_catalog(&assignments_path)?;

    let principal = ConfigIdentityProvider::from_config(&config).principal_for_user(&args.user)?;
    let sandbox = create_sandbox(&config.sandbox)?;
    let coordinator = Arc::new(SandboxSessionCoordinator::new(
        sandbox,
        config.coordinator_config(),
    ));
    let navigator = AssignmentNavigator::new(Arc::new(catalog), Arc::clone(&coordinator))
        .with_store(Arc::new(JsonAttemptStore::new(&config.progress_dir)))
        .with_listener(Arc::new(ConsoleListener { json: args.json }));

    let path = if args.preview {
        format!("/teacher/assignments/{}/preview", args.assignment)
    } else {
        format!("/assignment/{}", args.assignment)
    };

    eprintln!(
        "stepcode: {} as {} ({})",
        args.assignment, args.user, principal.role
    );
    eprintln!("  Sandbox: {}", coordinator.provider_name());
    eprintln!();

    let attempt_id = navigator.enter(&principal, &path, &args.assignment).await?;
    let outcome = walk(&navigator, attempt_id, &args.solutions).await;
    if outcome.is_err() {
        if let Err(e) = navigator.abandon(attempt_id).await {
            tracing::warn!("failed to abandon attempt: {e}");
        }
    }
    coordinator.shutdown().await;

    let (statuses, attempt) = outcome?;
    print_summary(&statuses, &attempt);
    Ok(())
}

fn load_catalog(path: &Path) -> Result<Catalog> {
    if path.is_dir() {
        Catalog::from_directory(path)
    } else {
        Ok(Catalog::new(vec![parser::parse_assignment(path)?]))
    }
}

/// Run every module that has a solution file, then finish the attempt.
async fn walk(
    navigator: &AssignmentNavigator,
    attempt_id: AttemptId,
    solutions: &Path,
) -> Result<(Vec<(String, String, ModuleStatus)>, AssignmentAttempt)> {
    let assignment = navigator.assignment(attempt_id).await?;
    // A resumed attempt may sit on a later module; walk from the start.
    if let Some(first) = assignment.modules.first() {
        navigator.select_module(attempt_id, &first.id).await?;
    }

    let mut statuses = Vec::with_capacity(assignment.modules.len());
    loop {
        let module = navigator.current_module(attempt_id).await?;
        let solution = solutions.join(format!("{}.{}", module.id, assignment.language.extension()));
        let status = if solution.is_file() {
            let code = std::fs::read_to_string(&solution)
                .with_context(|| format!("failed to read solution: {}", solution.display()))?;
            match navigator.run_current_module(attempt_id, &code).await {
                Ok(run) => match run.verification {
                    Some(v) if v.matches => ModuleStatus::Passed,
                    Some(_) => {
                        eprintln!("  Output:\n{}", indent(&run.output()));
                        ModuleStatus::Failed
                    }
                    None => ModuleStatus::Ungraded,
                },
                Err(e) if e.is_transient() => {
                    eprintln!("  ERROR: {}: {e}", module.id);
                    ModuleStatus::Errored(e.to_string())
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            ModuleStatus::Skipped
        };
        statuses.push((module.id.clone(), module.title.clone(), status));

        match navigator.next(attempt_id).await? {
            Step::Moved(_) => continue,
            Step::Finished(attempt) => return Ok((statuses, *attempt)),
        }
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn print_summary(statuses: &[(String, String, ModuleStatus)], attempt: &AssignmentAttempt) {
    let mut table = Table::new();
    table.set_header(vec!["Module", "Title", "Result", "Completed"]);

    for (id, title, status) in statuses {
        let completed = if attempt.is_completed(id) { "yes" } else { "no" };
        table.add_row(vec![
            Cell::new(id),
            Cell::new(title),
            Cell::new(status.label()),
            Cell::new(completed),
        ]);
    }

    let summary = attempt.summary();
    eprintln!("\n{table}");
    eprintln!(
        "\nCompleted {}/{} modules ({} remaining)",
        summary.completed, summary.total, summary.remaining
    );
}
