//! stepcode CLI — the user-facing command-line interface.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "stepcode", version, about = "Step-by-step coding assignments with sandboxed output checks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work through an assignment with solutions from a directory
    Run {
        /// Assignment id
        #[arg(long)]
        assignment: String,

        /// Directory with one `<module-id>.<ext>` file per solved module
        #[arg(long)]
        solutions: PathBuf,

        /// Configured user to act as
        #[arg(long)]
        user: String,

        /// Assignment file or directory (default: from config)
        #[arg(long)]
        assignments: Option<PathBuf>,

        /// Open the assignment through the teacher preview route
        #[arg(long)]
        preview: bool,

        /// Print navigation events as JSON lines on stdout
        #[arg(long)]
        json: bool,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate assignment TOML files
    Validate {
        /// Path to assignment file or directory
        #[arg(long)]
        assignments: PathBuf,
    },

    /// List assignments in a directory
    List {
        /// Assignment directory
        #[arg(long)]
        assignments: PathBuf,

        /// Only assignments of this course
        #[arg(long)]
        course: Option<String>,

        /// Only assignments of this difficulty
        #[arg(long)]
        difficulty: Option<String>,

        /// Case-insensitive text to look for in title or description
        #[arg(long)]
        search: Option<String>,
    },

    /// Show stored progress for a user
    Progress {
        /// User whose attempts to show
        #[arg(long)]
        user: String,

        /// Config file path
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Compare program output with the expected output
    Check {
        /// File holding the program's output
        #[arg(long)]
        actual: PathBuf,

        /// File holding the expected output
        #[arg(long)]
        expected: PathBuf,
    },

    /// Create starter config and example assignment
    Init,
}

#[tokio::main]
async fn main() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "stepcode=info".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            assignment,
            solutions,
            user,
            assignments,
            preview,
            json,
            config,
        } => {
            commands::run::execute(commands::run::RunArgs {
                assignment,
                solutions,
                user,
                assignments,
                preview,
                json,
                config,
            })
            .await
        }
        Commands::Validate { assignments } => commands::validate::execute(assignments),
        Commands::List {
            assignments,
            course,
            difficulty,
            search,
        } => commands::list::execute(assignments, course, difficulty, search),
        Commands::Progress { user, config } => commands::progress::execute(user, config).await,
        Commands::Check { actual, expected } => commands::check::execute(actual, expected),
        Commands::Init => commands::init::execute(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
