//! Run configuration and its validation.
//!
//! A [`RunConfig`] is assembled once from caller input (CLI flags layered over
//! an optional TOML file) and never mutated afterwards. [`validate`] is the
//! gate every run passes before anything touches the filesystem.

use crate::artifacts::ArtifactKind;
use crate::error::{TrainingError, TrainingResult};
use crate::optimizer::OptimizerMethod;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_JOINTS: usize = 14;
pub const DEFAULT_EPOCHS: u32 = 100;
pub const DEFAULT_OPTIMIZER: &str = "MomentumSGD";
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_OUT: &str = "result";
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_VALIDATION_INTERVAL: u32 = 10;
pub const DEFAULT_LOG_INTERVAL: usize = 10;

/// The three artifacts a run resumes from. Either all of them are given or
/// the run starts fresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeConfig {
    /// Run metadata, `epoch-E.iter`.
    pub metadata: PathBuf,
    /// Model weights, `epoch-E.model`.
    pub model: PathBuf,
    /// Optimizer state, `epoch-E.state`.
    pub optimizer: PathBuf,
}

impl ResumeConfig {
    pub fn paths(&self) -> [(ArtifactKind, &Path); 3] {
        [
            (ArtifactKind::RunMetadata, self.metadata.as_path()),
            (ArtifactKind::ModelWeights, self.model.as_path()),
            (ArtifactKind::OptimizerState, self.optimizer.as_path()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of joints the model regresses (two coordinates each).
    pub joints: usize,
    /// Weight the loss by per-joint visibility.
    pub use_visibility: bool,
    /// Total number of epochs; the last epoch to run.
    pub epochs: u32,
    /// Optimization method name, `MomentumSGD` or `Adam`.
    pub optimizer: String,
    pub gpu: bool,
    /// Training image-pose list file.
    pub train: PathBuf,
    /// Validation image-pose list file.
    pub val: PathBuf,
    pub batch_size: usize,
    pub out: PathBuf,
    pub seed: u64,
    pub validation_interval: u32,
    /// Record the training loss every this many batches.
    pub log_interval: usize,
    pub resume: Option<ResumeConfig>,
}

impl RunConfig {
    #[must_use]
    pub fn new(train: impl Into<PathBuf>, val: impl Into<PathBuf>, out: impl Into<PathBuf>) -> Self {
        Self {
            joints: DEFAULT_JOINTS,
            use_visibility: false,
            epochs: DEFAULT_EPOCHS,
            optimizer: DEFAULT_OPTIMIZER.to_string(),
            gpu: false,
            train: train.into(),
            val: val.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            out: out.into(),
            seed: DEFAULT_SEED,
            validation_interval: DEFAULT_VALIDATION_INTERVAL,
            log_interval: DEFAULT_LOG_INTERVAL,
            resume: None,
        }
    }

    /// Epochs between checkpoints: a tenth of the run, at least one.
    #[must_use]
    pub fn checkpoint_interval(&self) -> u32 {
        (self.epochs / 10).max(1)
    }

    fn validate_shape(&self) -> TrainingResult<()> {
        if self.joints == 0 {
            return Err(TrainingError::InvalidSpec("joints must be >= 1".to_string()));
        }
        if self.epochs == 0 {
            return Err(TrainingError::InvalidSpec("epochs must be >= 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch_size must be >= 1".to_string()));
        }
        if self.validation_interval == 0 {
            return Err(TrainingError::InvalidSpec("validation_interval must be >= 1".to_string()));
        }
        if self.log_interval == 0 {
            return Err(TrainingError::InvalidSpec("log_interval must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Checks a configuration before any resource is allocated and returns the
/// parsed optimizer method.
///
/// Failures are reported in a fixed order: GPU, datasets, optimizer name,
/// resume artifacts, then the numeric fields.
pub fn validate(config: &RunConfig, gpu_available: bool) -> TrainingResult<OptimizerMethod> {
    if config.gpu && !gpu_available {
        return Err(TrainingError::DeviceUnavailable);
    }
    for path in [&config.train, &config.val] {
        if !path.is_file() {
            return Err(TrainingError::DatasetNotFound(path.clone()));
        }
    }
    let method = config.optimizer.parse::<OptimizerMethod>()?;
    if let Some(resume) = &config.resume {
        for (artifact, path) in resume.paths() {
            if !path.is_file() {
                return Err(TrainingError::ResumeArtifactNotFound { artifact, path: path.to_path_buf() });
            }
        }
    }
    config.validate_shape()?;
    Ok(method)
}

/// File form of a run configuration. Every field is optional so a file can
/// hold shared defaults while flags supply the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfigFile {
    #[serde(default)]
    pub joints: Option<usize>,
    #[serde(default)]
    pub use_visibility: Option<bool>,
    #[serde(default)]
    pub epochs: Option<u32>,
    #[serde(default)]
    pub optimizer: Option<String>,
    #[serde(default)]
    pub gpu: Option<bool>,
    #[serde(default)]
    pub train: Option<PathBuf>,
    #[serde(default)]
    pub val: Option<PathBuf>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub out: Option<PathBuf>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub validation_interval: Option<u32>,
    #[serde(default)]
    pub log_interval: Option<usize>,
    #[serde(default)]
    pub resume: Option<ResumeConfig>,
}

impl RunConfigFile {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> TrainingResult<Self> {
        if !path.is_file() {
            return Err(TrainingError::InvalidSpec(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: Self) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            joints,
            use_visibility,
            epochs,
            optimizer,
            gpu,
            train,
            val,
            batch_size,
            out,
            seed,
            validation_interval,
            log_interval,
            resume
        );
    }

    /// Fill unset fields with defaults. Dataset paths have no default.
    pub fn resolve(self) -> TrainingResult<RunConfig> {
        let train = self
            .train
            .ok_or_else(|| TrainingError::InvalidSpec("training dataset path is required".to_string()))?;
        let val = self
            .val
            .ok_or_else(|| TrainingError::InvalidSpec("validation dataset path is required".to_string()))?;

        Ok(RunConfig {
            joints: self.joints.unwrap_or(DEFAULT_JOINTS),
            use_visibility: self.use_visibility.unwrap_or(false),
            epochs: self.epochs.unwrap_or(DEFAULT_EPOCHS),
            optimizer: self.optimizer.unwrap_or_else(|| DEFAULT_OPTIMIZER.to_string()),
            gpu: self.gpu.unwrap_or(false),
            train,
            val,
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            out: self.out.unwrap_or_else(|| PathBuf::from(DEFAULT_OUT)),
            seed: self.seed.unwrap_or(DEFAULT_SEED),
            validation_interval: self.validation_interval.unwrap_or(DEFAULT_VALIDATION_INTERVAL),
            log_interval: self.log_interval.unwrap_or(DEFAULT_LOG_INTERVAL),
            resume: self.resume,
        })
    }
}
