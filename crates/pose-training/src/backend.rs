//! Execution backends.
//!
//! The controller only sees the capability traits; a backend decides which
//! concrete model, loss and data pipeline sit behind them.

use crate::config::RunConfig;
use crate::data::{BatchSource, DataLoader, PoseDataset};
use crate::error::{TrainingError, TrainingResult};
use crate::loss::{LossFunction, MeanSquaredError};
use crate::model::{LinearPoseRegressor, PoseModel};

/// Training and validation batch streams for one run.
pub struct RunData {
    pub train: Box<dyn BatchSource>,
    pub val: Box<dyn BatchSource>,
    pub input_dim: usize,
}

pub trait Backend: Send + Sync {
    /// Short identifier, also the run subdirectory name under the output
    /// directory.
    fn id(&self) -> &'static str;

    fn gpu_available(&self) -> bool;

    /// Opens both datasets; training batches shuffled, validation in order.
    fn open_data(&self, config: &RunConfig) -> TrainingResult<RunData>;

    fn build_model(&self, config: &RunConfig, input_dim: usize) -> TrainingResult<Box<dyn PoseModel>>;

    fn loss(&self) -> Box<dyn LossFunction>;
}

/// Plain-Rust backend: a linear regressor trained on the CPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuBackend;

impl Backend for CpuBackend {
    fn id(&self) -> &'static str {
        "cpu"
    }

    fn gpu_available(&self) -> bool {
        false
    }

    fn open_data(&self, config: &RunConfig) -> TrainingResult<RunData> {
        let train = PoseDataset::load(&config.train, config.joints)?;
        let val = PoseDataset::load(&config.val, config.joints)?;
        if train.input_dim() != val.input_dim() {
            return Err(TrainingError::Dataset(format!(
                "training inputs have {} values but validation inputs have {}",
                train.input_dim(),
                val.input_dim()
            )));
        }
        let input_dim = train.input_dim();
        tracing::debug!(train = train.len(), val = val.len(), input_dim, "datasets loaded");

        Ok(RunData {
            train: Box::new(DataLoader::shuffled(train, config.batch_size, config.seed)),
            val: Box::new(DataLoader::sequential(val, config.batch_size)),
            input_dim,
        })
    }

    fn build_model(&self, config: &RunConfig, input_dim: usize) -> TrainingResult<Box<dyn PoseModel>> {
        Ok(Box::new(LinearPoseRegressor::new(input_dim, config.joints, config.seed)))
    }

    fn loss(&self) -> Box<dyn LossFunction> {
        Box::new(MeanSquaredError)
    }
}
