//! posetrain - command-line front end for pose-regression training runs
//!
//! Provides the `posetrain` command: start or resume a training run and
//! inspect the checkpoints a run has written.

mod commands;
mod progress;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{checkpoints, train};

/// posetrain - train pose-regression models with periodic checkpoints
#[derive(Parser, Debug)]
#[command(
    name = "posetrain",
    author,
    version,
    about = "Train pose-regression models with periodic checkpoints and exact resume"
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        default_value = "info",
        global = true,
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a training run, or resume one from a checkpoint
    ///
    /// Flags override values from `--config`, which override built-in
    /// defaults.
    Train(train::TrainArgs),

    /// List the checkpoints a run has written
    Checkpoints(checkpoints::CheckpointsArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Diagnostics go to stderr; stdout carries the run log and summaries.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Train(args) => train::execute(args).await?,
        Command::Checkpoints(args) => checkpoints::execute(args).await?,
    }
    Ok(())
}
