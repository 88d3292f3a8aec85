//! Model capability and the reference CPU regressor.

use crate::data::Batch;
use crate::error::{TrainingError, TrainingResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Cpu,
    Gpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Flat learnable parameters with their accumulated gradients.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterStore {
    values: Vec<f32>,
    grads: Vec<f32>,
}

impl ParameterStore {
    #[must_use]
    pub fn new(values: Vec<f32>) -> Self {
        let grads = vec![0.0; values.len()];
        Self { values, grads }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    #[must_use]
    pub fn grads(&self) -> &[f32] {
        &self.grads
    }

    pub fn grads_mut(&mut self) -> &mut [f32] {
        &mut self.grads
    }

    /// Parameters to update alongside the gradients driving the update.
    pub fn split_mut(&mut self) -> (&mut [f32], &[f32]) {
        (&mut self.values, &self.grads)
    }

    pub fn zero_grad(&mut self) {
        self.grads.iter_mut().for_each(|g| *g = 0.0);
    }
}

/// Opaque parameter snapshot, named tensors flattened to `f32`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelState(pub BTreeMap<String, Vec<f32>>);

/// What the controller needs from a pose model.
pub trait PoseModel: Send {
    /// Predicted joint coordinates, row-major `batch.len() x 2·joints`.
    fn forward(&mut self, batch: &Batch) -> TrainingResult<Vec<f32>>;

    /// Accumulates parameter gradients for the last training-mode forward
    /// pass, given the loss gradient with respect to its output.
    fn backward(&mut self, grad_output: &[f32]) -> TrainingResult<()>;

    fn parameters(&mut self) -> &mut ParameterStore;

    fn set_mode(&mut self, mode: Mode);

    fn to_device(&mut self, device: Device) -> TrainingResult<()>;

    fn state_dict(&self) -> ModelState;

    fn load_state_dict(&mut self, state: ModelState) -> TrainingResult<()>;
}

const WEIGHT: &str = "fc.weight";
const BIAS: &str = "fc.bias";

/// Single affine layer from the flattened input to `2·joints` coordinates.
///
/// Parameters are stored as the weight matrix (row-major, `outputs x inputs`)
/// followed by the bias.
#[derive(Debug, Clone)]
pub struct LinearPoseRegressor {
    inputs: usize,
    outputs: usize,
    params: ParameterStore,
    mode: Mode,
    cached_input: Option<Vec<f32>>,
}

impl LinearPoseRegressor {
    #[must_use]
    pub fn new(inputs: usize, joints: usize, seed: u64) -> Self {
        let outputs = joints * 2;
        let bound = 1.0 / (inputs.max(1) as f32).sqrt();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut values: Vec<f32> = (0..outputs * inputs).map(|_| rng.gen_range(-bound..=bound)).collect();
        values.extend(std::iter::repeat(0.0).take(outputs));

        Self { inputs, outputs, params: ParameterStore::new(values), mode: Mode::Train, cached_input: None }
    }

    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.inputs
    }

    #[must_use]
    pub fn output_dim(&self) -> usize {
        self.outputs
    }

    fn weight_len(&self) -> usize {
        self.inputs * self.outputs
    }
}

impl PoseModel for LinearPoseRegressor {
    fn forward(&mut self, batch: &Batch) -> TrainingResult<Vec<f32>> {
        if batch.input_dim() != self.inputs {
            return Err(TrainingError::Model(format!(
                "expected inputs of width {}, got {}",
                self.inputs,
                batch.input_dim()
            )));
        }

        let (weight, bias) = self.params.values().split_at(self.weight_len());
        let mut output = Vec::with_capacity(batch.len() * self.outputs);
        for row in batch.inputs().chunks_exact(self.inputs) {
            for (o, w) in weight.chunks_exact(self.inputs).enumerate() {
                let dot: f32 = w.iter().zip(row).map(|(a, b)| a * b).sum();
                output.push(dot + bias[o]);
            }
        }

        self.cached_input = match self.mode {
            Mode::Train => Some(batch.inputs().to_vec()),
            Mode::Eval => None,
        };
        Ok(output)
    }

    fn backward(&mut self, grad_output: &[f32]) -> TrainingResult<()> {
        let input = self
            .cached_input
            .take()
            .ok_or_else(|| TrainingError::Model("backward called without a training forward pass".to_string()))?;
        let rows = input.len() / self.inputs.max(1);
        if grad_output.len() != rows * self.outputs {
            return Err(TrainingError::Model(format!(
                "gradient has {} values, expected {}",
                grad_output.len(),
                rows * self.outputs
            )));
        }

        let weight_len = self.weight_len();
        let (inputs, outputs) = (self.inputs, self.outputs);
        let (weight_grad, bias_grad) = self.params.grads_mut().split_at_mut(weight_len);
        for (x, g) in input.chunks_exact(inputs).zip(grad_output.chunks_exact(outputs)) {
            for (o, &go) in g.iter().enumerate() {
                bias_grad[o] += go;
                for (wg, &xi) in weight_grad[o * inputs..(o + 1) * inputs].iter_mut().zip(x) {
                    *wg += go * xi;
                }
            }
        }
        Ok(())
    }

    fn parameters(&mut self) -> &mut ParameterStore {
        &mut self.params
    }

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        if mode == Mode::Eval {
            self.cached_input = None;
        }
    }

    fn to_device(&mut self, device: Device) -> TrainingResult<()> {
        match device {
            Device::Cpu => Ok(()),
            Device::Gpu => Err(TrainingError::DeviceUnavailable),
        }
    }

    fn state_dict(&self) -> ModelState {
        let (weight, bias) = self.params.values().split_at(self.weight_len());
        let mut tensors = BTreeMap::new();
        tensors.insert(WEIGHT.to_string(), weight.to_vec());
        tensors.insert(BIAS.to_string(), bias.to_vec());
        ModelState(tensors)
    }

    fn load_state_dict(&mut self, mut state: ModelState) -> TrainingResult<()> {
        let mut take = |name: &str, len: usize| -> TrainingResult<Vec<f32>> {
            let tensor = state
                .0
                .remove(name)
                .ok_or_else(|| TrainingError::Model(format!("state is missing parameter {name}")))?;
            if tensor.len() != len {
                return Err(TrainingError::Model(format!(
                    "parameter {name} has {} values, expected {len}",
                    tensor.len()
                )));
            }
            Ok(tensor)
        };
        let mut values = take(WEIGHT, self.weight_len())?;
        values.extend(take(BIAS, self.outputs)?);

        if let Some(extra) = state.0.keys().next() {
            return Err(TrainingError::Model(format!("state contains unused parameter {extra}")));
        }
        self.params = ParameterStore::new(values);
        self.cached_input = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PoseSample;

    fn batch() -> Batch {
        Batch::from_samples(&[
            PoseSample { input: vec![1.0, 2.0], pose: vec![0.5, 0.5], visibility: vec![1.0] },
            PoseSample { input: vec![-1.0, 0.0], pose: vec![0.0, 1.0], visibility: vec![0.0] },
        ])
        .unwrap()
    }

    #[test]
    fn test_forward_shape_and_backward_accumulates() {
        let mut model = LinearPoseRegressor::new(2, 1, 7);
        let out = model.forward(&batch()).unwrap();
        assert_eq!(out.len(), 4);

        model.backward(&[1.0, 0.0, 1.0, 0.0]).unwrap();
        let grads = model.parameters().grads().to_vec();
        // d/dW row 0 = x1 + x2, bias row 0 = 2.
        assert_eq!(&grads[0..2], &[0.0, 2.0]);
        assert_eq!(&grads[4..6], &[2.0, 0.0]);
    }

    #[test]
    fn test_backward_requires_training_forward() {
        let mut model = LinearPoseRegressor::new(2, 1, 7);
        model.set_mode(Mode::Eval);
        model.forward(&batch()).unwrap();
        assert!(model.backward(&[0.0; 4]).is_err());
    }

    #[test]
    fn test_state_dict_round_trip_and_shape_check() {
        let source = LinearPoseRegressor::new(2, 1, 1);
        let mut target = LinearPoseRegressor::new(2, 1, 2);
        target.load_state_dict(source.state_dict()).unwrap();
        assert_eq!(target.state_dict(), source.state_dict());

        let mut wrong = LinearPoseRegressor::new(3, 1, 2);
        assert!(wrong.load_state_dict(source.state_dict()).is_err());
    }

    #[test]
    fn test_gpu_is_refused() {
        let mut model = LinearPoseRegressor::new(2, 1, 1);
        assert!(model.to_device(Device::Cpu).is_ok());
        assert!(matches!(model.to_device(Device::Gpu), Err(TrainingError::DeviceUnavailable)));
    }
}
