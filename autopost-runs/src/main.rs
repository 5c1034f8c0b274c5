//! autopost-runs - Inspect automation runs
//!
//! Read-only view of persisted run records: their status, progress,
//! publish results, and per-item errors.

use clap::{Parser, Subcommand};
use libautopost::error::StoreError;
use libautopost::logging::LoggingConfig;
use libautopost::{AutopostError, Config, Result, Run, RunStatus, StateStore};

#[derive(Parser, Debug)]
#[command(name = "autopost-runs")]
#[command(version)]
#[command(about = "Inspect automation runs")]
#[command(long_about = "\
autopost-runs - Inspect automation runs

DESCRIPTION:
    autopost-runs reads run records from the Autopost state store. Runs are
    created and driven by a host application; this tool only reports what
    the store holds, the same view a host gets by polling a run.

COMMANDS:
    list    List a user's runs, newest first
    show    Show one run with its results and errors

USAGE EXAMPLES:
    # List runs for a user
    autopost-runs list --user user-1

    # Only runs that are still going
    autopost-runs list --user user-1 --status running

    # Full record as JSON
    autopost-runs show 3f2b9c1e-... --format json

    # Failed items of a run
    autopost-runs show 3f2b9c1e-... --format json | jq '.errors[] | .step'

CONFIGURATION:
    Configuration file: ~/.config/autopost/config.toml

    Override with environment variables:
        AUTOPOST_CONFIG       - Path to config file
        AUTOPOST_LOG_FORMAT   - Log format: text, json, or pretty
        AUTOPOST_LOG_LEVEL    - Log level or filter directive

EXIT CODES:
    0 - Success (including empty results)
    1 - Store or configuration error
    2 - Run not found
    3 - Invalid input (bad status filter, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List runs for a user
    List {
        /// Owner of the runs
        #[arg(short, long)]
        user: String,

        /// Only show runs with this status
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        #[arg(value_parser = ["text", "json"])]
        format: String,
    },

    /// Show a single run
    Show {
        /// Run ID
        run_id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        #[arg(value_parser = ["text", "json"])]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Quiet by default; library info logs are meant for hosts
    let mut logging = LoggingConfig::from_env();
    if cli.verbose {
        logging = logging.verbose();
    } else if std::env::var("AUTOPOST_LOG_LEVEL").is_err() {
        logging.directive = "error".to_string();
    }
    logging.init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let store = StateStore::from_config(&config).await?;
    tracing::debug!(command = ?cli.command, "autopost-runs started");

    match cli.command {
        Commands::List {
            user,
            status,
            limit,
            format,
        } => {
            let status = status
                .map(|s| s.parse::<RunStatus>().map_err(AutopostError::InvalidInput))
                .transpose()?;

            let runs: Vec<Run> = store
                .list_runs_for_user(&user)
                .await?
                .into_iter()
                .filter(|run| status.map_or(true, |s| run.status == s))
                .take(limit)
                .collect();

            if format == "json" {
                print_json(&runs)?;
            } else {
                for run in &runs {
                    println!("{}", summary_line(run));
                }
            }
        }
        Commands::Show { run_id, format } => {
            let run = store.require_run(&run_id).await?;
            if format == "json" {
                print_json(&run)?;
            } else {
                print_run(&run);
            }
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(StoreError::Serialization)?;
    println!("{}", json);
    Ok(())
}

fn summary_line(run: &Run) -> String {
    format!(
        "{} | {} | {:<9} | {}/{} done, {} failed | {}",
        run.created_at.format("%Y-%m-%d %H:%M:%S"),
        run.id,
        run.status.as_str(),
        run.progress.completed,
        run.progress.total,
        run.progress.failed,
        run.content_type
    )
}

fn print_run(run: &Run) {
    println!("Run:      {}", run.id);
    println!("User:     {}", run.user_id);
    println!("Type:     {}", run.content_type);
    println!("Status:   {}", run.status);
    println!(
        "Progress: {}/{} done, {} failed",
        run.progress.completed, run.progress.total, run.progress.failed
    );
    if !run.progress.current_item_label.is_empty() {
        println!("Current:  {}", run.progress.current_item_label);
    }
    if !run.progress.message.is_empty() {
        println!("Message:  {}", run.progress.message);
    }
    println!("Profiles: {}", run.profile_ids.join(", "));
    println!("Created:  {}", run.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Updated:  {}", run.updated_at.format("%Y-%m-%d %H:%M:%S"));

    if !run.results.is_empty() {
        println!();
        for result in &run.results {
            let mut line = format!(
                "  ✓ {} -> {}: {}",
                result.item_title, result.profile_id, result.url
            );
            if let Some(author) = &result.author {
                line.push_str(&format!(" (by {})", author));
            }
            if let Some(at) = result.scheduled_for {
                line.push_str(&format!(" [scheduled {}]", at.format("%Y-%m-%d %H:%M")));
            }
            println!("{}", line);
        }
    }

    if !run.errors.is_empty() {
        println!();
        for error in &run.errors {
            let label = if error.item_title.is_empty() {
                "run"
            } else {
                error.item_title.as_str()
            };
            println!("  ✗ {} [{}]: {}", label, error.step, error.message);
        }
    }
}
