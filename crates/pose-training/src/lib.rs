//! Pose Training
//!
//! Supervised training orchestration for pose-regression models:
//! - Validating a run configuration before any work starts (`config`)
//! - Driving epochs, validation and checkpoint cadence (`trainer`)
//! - Writing and resuming epoch checkpoints (`checkpoint`)
//! - Keeping a replayable run log (`logger`)
//! - Capability traits for models, optimizers, losses and batch sources,
//!   with a plain CPU backend behind them (`backend`)

pub mod artifacts;
pub mod backend;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod layout;
pub mod logger;
pub mod loss;
pub mod model;
pub mod optimizer;
pub mod progress;
pub mod trainer;

pub use artifacts::ArtifactKind;
pub use backend::{Backend, CpuBackend, RunData};
pub use checkpoint::{CheckpointEntry, CheckpointManager, CheckpointPaths, ResumePoint, RunMetadata};
pub use config::{validate, ResumeConfig, RunConfig, RunConfigFile};
pub use data::{Batch, BatchSource, DataLoader, PoseDataset, PoseSample};
pub use error::{TrainingError, TrainingResult};
pub use layout::RunLayout;
pub use logger::{LogEntry, LogHistory, RunLogger};
pub use loss::{LossFunction, LossOutput, MeanSquaredError};
pub use model::{Device, LinearPoseRegressor, Mode, ModelState, ParameterStore, PoseModel};
pub use optimizer::{select_optimizer, Adam, MomentumSgd, Optimizer, OptimizerMethod, OptimizerState};
pub use progress::{ProgressEvent, ProgressSink, StdoutProgressSink};
pub use trainer::{execute, PoseTrainer, RunContext, RunSummary, Schedule};
