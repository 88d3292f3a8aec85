//! Lists the checkpoints written under a run's output directory.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use pose_training::config::DEFAULT_OUT;
use pose_training::{Backend, CheckpointEntry, CheckpointManager, CpuBackend, RunLayout};
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct CheckpointsArgs {
    /// Output root directory of the run
    #[arg(long, default_value = DEFAULT_OUT)]
    out: PathBuf,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

pub async fn execute(args: CheckpointsArgs) -> Result<()> {
    let run_dir = RunLayout::new(args.out).run_dir(CpuBackend.id());
    let manager = CheckpointManager::new(run_dir.clone());
    let entries = manager
        .list()
        .with_context(|| format!("Failed to read checkpoints in {}", run_dir.display()))?;

    if args.json {
        let out: Vec<_> = entries
            .iter()
            .map(|entry| {
                serde_json::json!({
                    "epoch": entry.epoch,
                    "complete": entry.is_complete(),
                    "metadata": entry.metadata,
                    "model": entry.model,
                    "optimizer": entry.optimizer,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    print_table(&run_dir, &entries);
    Ok(())
}

fn print_table(run_dir: &Path, entries: &[CheckpointEntry]) {
    println!();
    println!("{}", format!("Checkpoints ({})", entries.len()).bold().cyan());
    println!("  {}", run_dir.display().to_string().dimmed());
    println!();

    if entries.is_empty() {
        println!("  {}", "No checkpoints found.".dimmed());
        return;
    }

    println!("{:<8} {:<10} {}", "Epoch", "Status", "Resume with");
    println!("{}", "─".repeat(90));
    for entry in entries {
        match entry.to_resume() {
            Some(resume) => println!(
                "{:<8} {:<10} {}",
                entry.epoch.to_string().cyan(),
                "complete".green(),
                format!(
                    "--resume {} --resume-model {} --resume-opt {}",
                    resume.metadata.display(),
                    resume.model.display(),
                    resume.optimizer.display()
                )
                .dimmed()
            ),
            None => println!("{:<8} {:<10}", entry.epoch.to_string().cyan(), "partial".yellow()),
        }
    }
    println!();
}
