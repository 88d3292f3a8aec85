//! The training-run controller.
//!
//! A run is prepared once ([`PoseTrainer::prepare`]) into a [`RunContext`]
//! that owns the model, optimizer, data, logger and checkpoint manager, then
//! driven epoch by epoch by [`execute`]. Each epoch trains, validates on the
//! validation interval and checkpoints on the checkpoint interval, strictly in
//! that order. Any error aborts the run; recovery is a new run resumed from
//! the last checkpoint.

use crate::backend::{Backend, RunData};
use crate::checkpoint::{CheckpointManager, CheckpointPaths};
use crate::config::{validate, RunConfig};
use crate::error::{TrainingError, TrainingResult};
use crate::layout::RunLayout;
use crate::logger::RunLogger;
use crate::loss::LossFunction;
use crate::model::{Device, Mode, PoseModel};
use crate::optimizer::{select_optimizer, Optimizer};
use crate::progress::{ProgressEvent, ProgressSink};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// When the periodic phases fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub final_epoch: u32,
    pub validation_interval: u32,
    pub checkpoint_interval: u32,
    pub log_interval: usize,
}

impl Schedule {
    #[must_use]
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            final_epoch: config.epochs,
            validation_interval: config.validation_interval.max(1),
            checkpoint_interval: config.checkpoint_interval(),
            log_interval: config.log_interval.max(1),
        }
    }

    #[must_use]
    pub fn should_validate(&self, epoch: u32) -> bool {
        epoch % self.validation_interval == 0
    }

    #[must_use]
    pub fn should_checkpoint(&self, epoch: u32) -> bool {
        epoch % self.checkpoint_interval == 0
    }

    /// Batch indices are zero-based, so the first batch of every epoch logs.
    #[must_use]
    pub fn should_log(&self, batch_index: usize) -> bool {
        batch_index % self.log_interval == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub start_epoch: u32,
    pub final_epoch: u32,
    pub epochs_run: u32,
    pub validated: Vec<u32>,
    pub checkpointed: Vec<u32>,
    pub last_train_loss: Option<f32>,
    pub last_validation_loss: Option<f32>,
}

/// Everything a run owns. Built by [`PoseTrainer::prepare`] and handed to each
/// phase in turn.
pub struct RunContext {
    config: RunConfig,
    schedule: Schedule,
    start_epoch: u32,
    model: Box<dyn PoseModel>,
    optimizer: Box<dyn Optimizer>,
    loss: Box<dyn LossFunction>,
    data: RunData,
    logger: RunLogger,
    checkpoints: CheckpointManager,
    progress: Arc<dyn ProgressSink>,
}

impl RunContext {
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    #[must_use]
    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    #[must_use]
    pub fn start_epoch(&self) -> u32 {
        self.start_epoch
    }

    #[must_use]
    pub fn logger(&self) -> &RunLogger {
        &self.logger
    }

    #[must_use]
    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    #[must_use]
    pub fn run_dir(&self) -> &Path {
        self.checkpoints.dir()
    }

    #[must_use]
    pub fn model(&self) -> &dyn PoseModel {
        self.model.as_ref()
    }

    #[must_use]
    pub fn optimizer(&self) -> &dyn Optimizer {
        self.optimizer.as_ref()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("config", &self.config)
            .field("schedule", &self.schedule)
            .field("start_epoch", &self.start_epoch)
            .field("logger", &self.logger)
            .finish_non_exhaustive()
    }
}

pub struct PoseTrainer<B> {
    backend: B,
    progress: Arc<dyn ProgressSink>,
}

impl<B: Backend> PoseTrainer<B> {
    #[must_use]
    pub fn new(backend: B, progress: Arc<dyn ProgressSink>) -> Self {
        Self { backend, progress }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Directory a run with output root `out` writes into.
    #[must_use]
    pub fn run_dir(&self, out: &Path) -> PathBuf {
        RunLayout::new(out.to_path_buf()).run_dir(self.backend.id())
    }

    /// Validates `config`, builds the collaborators and restores resume state.
    /// Nothing is written to disk before validation passes.
    pub fn prepare(&self, config: RunConfig) -> TrainingResult<RunContext> {
        let method = validate(&config, self.backend.gpu_available())?;
        tracing::info!(backend = self.backend.id(), optimizer = %method, epochs = config.epochs, "preparing run");

        let data = self.backend.open_data(&config)?;
        let mut model = self.backend.build_model(&config, data.input_dim)?;
        if config.gpu {
            model.to_device(Device::Gpu)?;
        }
        let mut optimizer = select_optimizer(method, model.parameters());
        let loss = self.backend.loss();

        let run_dir = self.run_dir(&config.out);
        let checkpoints = CheckpointManager::new(run_dir.clone());

        // Load before the logger truncates the log file so a bad checkpoint
        // leaves the previous record intact.
        let resumed = match &config.resume {
            Some(resume) => Some(checkpoints.load(resume, model.as_mut(), optimizer.as_mut())?),
            None => None,
        };

        let mut logger = RunLogger::create(&run_dir, Arc::clone(&self.progress))?;
        let start_epoch = match resumed {
            Some(point) => {
                logger.restore(point.log_history)?;
                tracing::info!(start_epoch = point.start_epoch, "resuming run");
                point.start_epoch
            }
            None => 1,
        };

        Ok(RunContext {
            schedule: Schedule::from_config(&config),
            config,
            start_epoch,
            model,
            optimizer,
            loss,
            data,
            logger,
            checkpoints,
            progress: Arc::clone(&self.progress),
        })
    }

    /// Prepares and executes a whole run.
    pub fn run(&self, config: RunConfig) -> TrainingResult<RunSummary> {
        let mut ctx = self.prepare(config)?;
        execute(&mut ctx)
    }
}

/// Runs every remaining epoch of a prepared run.
pub fn execute(ctx: &mut RunContext) -> TrainingResult<RunSummary> {
    let start_epoch = ctx.start_epoch;
    let final_epoch = ctx.schedule.final_epoch;
    if start_epoch > final_epoch {
        tracing::warn!(start_epoch, final_epoch, "resume point is past the final epoch; nothing to run");
    }

    let mut summary = RunSummary { start_epoch, final_epoch, ..RunSummary::default() };
    ctx.progress.on_event(ProgressEvent::RunStarted { start_epoch, final_epoch });

    for epoch in start_epoch..=final_epoch {
        if let Some(loss) = train_epoch(ctx, epoch)? {
            summary.last_train_loss = Some(loss);
        }
        summary.epochs_run += 1;

        if ctx.schedule.should_validate(epoch) {
            summary.last_validation_loss = Some(validate_epoch(ctx, epoch)?);
            summary.validated.push(epoch);
        }
        if ctx.schedule.should_checkpoint(epoch) {
            checkpoint_epoch(ctx, epoch)?;
            summary.checkpointed.push(epoch);
        }
        ctx.progress.on_event(ProgressEvent::EpochFinished { epoch });
    }

    ctx.progress.on_event(ProgressEvent::RunFinished);
    tracing::info!(epochs_run = summary.epochs_run, "run finished");
    Ok(summary)
}

/// One pass over the training batches. Returns the last batch loss, or
/// `None` when the training source produced no batches.
pub fn train_epoch(ctx: &mut RunContext, epoch: u32) -> TrainingResult<Option<f32>> {
    let RunContext { config, schedule, model, optimizer, loss, data, logger, progress, .. } = ctx;

    model.set_mode(Mode::Train);
    data.train.set_epoch(epoch);
    progress.on_event(ProgressEvent::EpochStarted { epoch, batches: data.train.len() });

    let mut last = None;
    for (iteration, batch) in data.train.batches().enumerate() {
        let batch = batch?;
        optimizer.zero_grad(model.parameters());
        let output = model.forward(&batch)?;
        let step = loss.compute(&output, batch.targets(), batch.mask(), config.use_visibility)?;
        model.backward(&step.grad)?;
        optimizer.step(model.parameters())?;

        if schedule.should_log(iteration) {
            logger.record(format!("Loss: {}", step.value))?;
        }
        tracing::debug!(epoch, iteration, loss = step.value, "train step");
        progress.on_event(ProgressEvent::BatchFinished { epoch, batch: iteration + 1 });
        last = Some(step.value);
    }
    Ok(last)
}

/// Mean loss over the full validation set, without gradient work.
pub fn validate_epoch(ctx: &mut RunContext, epoch: u32) -> TrainingResult<f32> {
    let RunContext { config, model, loss, data, logger, .. } = ctx;

    model.set_mode(Mode::Eval);
    let mut total = 0.0_f32;
    let mut batches = 0_usize;
    for batch in data.val.batches() {
        let batch = batch?;
        let output = model.forward(&batch)?;
        total += loss.compute(&output, batch.targets(), batch.mask(), config.use_visibility)?.value;
        batches += 1;
    }
    model.set_mode(Mode::Train);

    if batches == 0 {
        return Err(TrainingError::Dataset("validation set produced no batches".to_string()));
    }
    let mean = total / batches as f32;
    logger.record(format!("Validation/Loss: {mean}"))?;
    tracing::info!(epoch, loss = mean, "validation finished");
    Ok(mean)
}

pub fn checkpoint_epoch(ctx: &mut RunContext, epoch: u32) -> TrainingResult<CheckpointPaths> {
    ctx.checkpoints.save(epoch, ctx.model.as_ref(), ctx.optimizer.as_ref(), &ctx.logger)
}
