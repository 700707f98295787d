//! Refinery CLI - command-line front end for the job orchestration engine.
//!
//! Provides the `refine` command for importing datasets, creating and running
//! model-customization jobs, and inspecting their evaluations.

mod commands;
mod config;

use clap::{CommandFactory, Parser, Subcommand};
use refinery_core::Engine;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::types::{DatasetsCommand, EvaluationsCommand, JobsCommand};
use commands::{datasets, evaluations, jobs, serve, settings};

/// Refinery CLI - customize local models with adapters and knowledge collections
#[derive(Parser, Debug)]
#[command(
    name = "refine",
    author,
    version,
    about = "Refinery - local model customization jobs",
    long_about = "Refinery (refine) runs adapter fine-tuning and knowledge augmentation jobs against a local model backend,\nthen compares the customized model against its base."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Configuration file to load instead of the discovered refinery.toml layers
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace directory (overrides workspace_root from configuration)
    #[arg(short = 'w', long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create, run and manage customization jobs
    #[command(subcommand)]
    Jobs(JobsCommand),

    /// Import and inspect training datasets
    #[command(subcommand)]
    Datasets(DatasetsCommand),

    /// Inspect before/after evaluations
    #[command(subcommand)]
    Evaluations(EvaluationsCommand),

    /// Run the engine in the foreground
    ///
    /// Starts pending jobs as capacity allows and periodically fails jobs that
    /// stopped making progress. Runs until interrupted with Ctrl-C.
    Serve {
        /// Seconds between checks for pending jobs
        #[arg(long, default_value_t = 5)]
        poll_secs: u64,
    },

    /// Show the effective configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_level(level: &str) -> Level {
    match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // If no command provided, show help
    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    let refinery_config = config::load_config(args.config.as_deref(), args.workspace)?;

    // Logs go to stderr so `--json` output stays parseable
    let level = parse_level(
        &args
            .log_level
            .as_deref()
            .or(refinery_config.log_level.as_deref())
            .unwrap_or("info")
            .to_ascii_lowercase(),
    );
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Command::Config { json } = command {
        return settings::show(&refinery_config, json);
    }

    let engine = Engine::bootstrap(refinery_config)?;

    let result = match command {
        Command::Jobs(cmd) => jobs::execute(&engine, cmd).await,
        Command::Datasets(cmd) => datasets::execute(&engine, cmd).await,
        Command::Evaluations(cmd) => evaluations::execute(&engine, cmd).await,
        Command::Serve { poll_secs } => serve::execute(&engine, poll_secs).await,
        Command::Config { json } => settings::show(&engine.config, json),
    };

    // Evaluations chained by a finished job run on this runtime.
    tokio::select! {
        () = engine.shutdown() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(pending = engine.pending_evaluations(), "Abandoned running evaluations");
        }
    }
    result
}
