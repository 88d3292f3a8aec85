//! Training command implementation.

use crate::progress::TerminalProgress;
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use pose_training::{CpuBackend, PoseTrainer, ResumeConfig, RunConfig, RunConfigFile, RunSummary};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// TOML file with run settings; flags take precedence over it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of joints to regress
    #[arg(long)]
    joints: Option<usize>,

    /// Weight the loss by per-joint visibility
    #[arg(long, overrides_with = "no_use_visibility")]
    use_visibility: bool,

    /// Use the unweighted loss even if the config file enables visibility
    #[arg(long, overrides_with = "use_visibility")]
    no_use_visibility: bool,

    /// Total number of training epochs
    #[arg(long)]
    epochs: Option<u32>,

    /// Optimization method (MomentumSGD, Adam)
    #[arg(long = "opt")]
    optimizer: Option<String>,

    /// Run on the GPU
    #[arg(long, overrides_with = "no_gpu")]
    gpu: bool,

    /// Run on the CPU even if the config file requests the GPU
    #[arg(long, overrides_with = "gpu")]
    no_gpu: bool,

    /// Training image-pose list file
    #[arg(long)]
    train: Option<PathBuf>,

    /// Validation image-pose list file
    #[arg(long)]
    val: Option<PathBuf>,

    /// Mini-batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Output root directory
    #[arg(long)]
    out: Option<PathBuf>,

    /// Seed for weight initialization and shuffling
    #[arg(long)]
    seed: Option<u64>,

    /// Validate every this many epochs
    #[arg(long)]
    validation_interval: Option<u32>,

    /// Record the training loss every this many batches
    #[arg(long)]
    log_interval: Option<usize>,

    /// Run metadata to resume from (epoch-N.iter)
    #[arg(long, requires_all = ["resume_model", "resume_opt"])]
    resume: Option<PathBuf>,

    /// Model weights to resume from (epoch-N.model)
    #[arg(long, requires_all = ["resume", "resume_opt"])]
    resume_model: Option<PathBuf>,

    /// Optimizer state to resume from (epoch-N.state)
    #[arg(long, requires_all = ["resume", "resume_model"])]
    resume_opt: Option<PathBuf>,

    /// Print the run summary as JSON instead of the live log
    #[arg(long)]
    json: bool,
}

impl TrainArgs {
    /// Layers flags over the optional config file and fills in defaults.
    fn into_config(self) -> Result<RunConfig> {
        let mut file = match &self.config {
            Some(path) => RunConfigFile::load_from_file(path)
                .with_context(|| format!("Failed to load run configuration from {}", path.display()))?,
            None => RunConfigFile::default(),
        };

        let resume = match (self.resume, self.resume_model, self.resume_opt) {
            (Some(metadata), Some(model), Some(optimizer)) => Some(ResumeConfig { metadata, model, optimizer }),
            _ => None,
        };

        file.merge(RunConfigFile {
            joints: self.joints,
            use_visibility: switch(self.use_visibility, self.no_use_visibility),
            epochs: self.epochs,
            optimizer: self.optimizer,
            gpu: switch(self.gpu, self.no_gpu),
            train: self.train,
            val: self.val,
            batch_size: self.batch_size,
            out: self.out,
            seed: self.seed,
            validation_interval: self.validation_interval,
            log_interval: self.log_interval,
            resume,
        });
        Ok(file.resolve()?)
    }
}

/// A `--flag` / `--no-flag` pair; neither given leaves the file value alone.
fn switch(on: bool, off: bool) -> Option<bool> {
    if on {
        Some(true)
    } else if off {
        Some(false)
    } else {
        None
    }
}

pub async fn execute(args: TrainArgs) -> Result<()> {
    let json_output = args.json;
    let config = args.into_config()?;
    let out = config.out.clone();

    let progress = Arc::new(TerminalProgress::new(json_output));
    let trainer = PoseTrainer::new(CpuBackend, progress);
    let run_dir = trainer.run_dir(&out);

    let summary = tokio::task::spawn_blocking(move || trainer.run(config))
        .await
        .context("Training task panicked")??;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    print_summary(&summary, &run_dir);
    Ok(())
}

fn print_summary(summary: &RunSummary, run_dir: &std::path::Path) {
    println!();
    println!("{}", "Training run complete".bold().green());
    println!("  Epochs:      {}..={} ({} run)", summary.start_epoch, summary.final_epoch, summary.epochs_run);
    if let Some(loss) = summary.last_train_loss {
        println!("  Train loss:  {}", loss.to_string().cyan());
    }
    if let Some(loss) = summary.last_validation_loss {
        println!("  Val loss:    {}", loss.to_string().cyan());
    }
    match summary.checkpointed.last() {
        Some(epoch) => println!("  Checkpoint:  {}", format!("epoch {epoch}").cyan()),
        None => println!("  Checkpoint:  {}", "none written".dimmed()),
    }
    println!("  Output:      {}", run_dir.display().to_string().dimmed());
    println!();
}
