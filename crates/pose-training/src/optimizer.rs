//! Optimization methods and their selection by name.

use crate::error::{TrainingError, TrainingResult};
use crate::model::ParameterStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerMethod {
    #[serde(rename = "MomentumSGD")]
    MomentumSgd,
    #[serde(rename = "Adam")]
    Adam,
}

impl OptimizerMethod {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::MomentumSgd => "MomentumSGD",
            Self::Adam => "Adam",
        }
    }
}

impl std::fmt::Display for OptimizerMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptimizerMethod {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MomentumSGD" => Ok(Self::MomentumSgd),
            "Adam" => Ok(Self::Adam),
            other => Err(TrainingError::UnsupportedOptimizer(other.to_string())),
        }
    }
}

/// Opaque optimizer snapshot: the step counter and named per-parameter
/// buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub method: OptimizerMethod,
    pub step: u64,
    pub buffers: BTreeMap<String, Vec<f32>>,
}

pub trait Optimizer: Send {
    fn method(&self) -> OptimizerMethod;

    /// Applies one update from the gradients currently in `params`.
    fn step(&mut self, params: &mut ParameterStore) -> TrainingResult<()>;

    fn zero_grad(&mut self, params: &mut ParameterStore) {
        params.zero_grad();
    }

    fn state_dict(&self) -> OptimizerState;

    fn load_state_dict(&mut self, state: OptimizerState) -> TrainingResult<()>;
}

/// Builds the optimizer for a validated method, sized for `params`.
#[must_use]
pub fn select_optimizer(method: OptimizerMethod, params: &ParameterStore) -> Box<dyn Optimizer> {
    match method {
        OptimizerMethod::MomentumSgd => Box::new(MomentumSgd::new(params.len(), 0.01, 0.9)),
        OptimizerMethod::Adam => Box::new(Adam::new(params.len())),
    }
}

fn check_len(params: &ParameterStore, expected: usize) -> TrainingResult<()> {
    if params.len() != expected {
        return Err(TrainingError::Optimizer(format!(
            "optimizer was built for {expected} parameters, got {}",
            params.len()
        )));
    }
    Ok(())
}

fn take_buffer(state: &mut OptimizerState, name: &str, len: usize) -> TrainingResult<Vec<f32>> {
    let buffer = state
        .buffers
        .remove(name)
        .ok_or_else(|| TrainingError::Optimizer(format!("state is missing buffer {name}")))?;
    if buffer.len() != len {
        return Err(TrainingError::Optimizer(format!(
            "buffer {name} has {} values, expected {len}",
            buffer.len()
        )));
    }
    Ok(buffer)
}

fn check_method(expected: OptimizerMethod, state: &OptimizerState) -> TrainingResult<()> {
    if state.method != expected {
        return Err(TrainingError::Optimizer(format!(
            "state was saved by {}, this run uses {expected}",
            state.method
        )));
    }
    Ok(())
}

/// Gradient descent with heavy-ball momentum: `v = μ·v + g`, `p -= lr·v`.
#[derive(Debug, Clone)]
pub struct MomentumSgd {
    lr: f32,
    momentum: f32,
    velocity: Vec<f32>,
    steps: u64,
}

impl MomentumSgd {
    #[must_use]
    pub fn new(len: usize, lr: f32, momentum: f32) -> Self {
        Self { lr, momentum, velocity: vec![0.0; len], steps: 0 }
    }
}

impl Optimizer for MomentumSgd {
    fn method(&self) -> OptimizerMethod {
        OptimizerMethod::MomentumSgd
    }

    fn step(&mut self, params: &mut ParameterStore) -> TrainingResult<()> {
        check_len(params, self.velocity.len())?;
        let (values, grads) = params.split_mut();
        for ((p, &g), v) in values.iter_mut().zip(grads).zip(self.velocity.iter_mut()) {
            *v = self.momentum * *v + g;
            *p -= self.lr * *v;
        }
        self.steps += 1;
        Ok(())
    }

    fn state_dict(&self) -> OptimizerState {
        let mut buffers = BTreeMap::new();
        buffers.insert("momentum_buffer".to_string(), self.velocity.clone());
        OptimizerState { method: self.method(), step: self.steps, buffers }
    }

    fn load_state_dict(&mut self, mut state: OptimizerState) -> TrainingResult<()> {
        check_method(self.method(), &state)?;
        self.velocity = take_buffer(&mut state, "momentum_buffer", self.velocity.len())?;
        self.steps = state.step;
        Ok(())
    }
}

/// Adam with the usual defaults and bias correction.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    exp_avg: Vec<f32>,
    exp_avg_sq: Vec<f32>,
    steps: u64,
}

impl Adam {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            exp_avg: vec![0.0; len],
            exp_avg_sq: vec![0.0; len],
            steps: 0,
        }
    }
}

impl Optimizer for Adam {
    fn method(&self) -> OptimizerMethod {
        OptimizerMethod::Adam
    }

    fn step(&mut self, params: &mut ParameterStore) -> TrainingResult<()> {
        check_len(params, self.exp_avg.len())?;
        self.steps += 1;
        let t = i32::try_from(self.steps).unwrap_or(i32::MAX);
        let bias1 = 1.0 - self.beta1.powi(t);
        let bias2 = 1.0 - self.beta2.powi(t);

        let (values, grads) = params.split_mut();
        for (i, (p, &g)) in values.iter_mut().zip(grads).enumerate() {
            let m = &mut self.exp_avg[i];
            let v = &mut self.exp_avg_sq[i];
            *m = self.beta1 * *m + (1.0 - self.beta1) * g;
            *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *p -= self.lr * m_hat / (v_hat.sqrt() + self.eps);
        }
        Ok(())
    }

    fn state_dict(&self) -> OptimizerState {
        let mut buffers = BTreeMap::new();
        buffers.insert("exp_avg".to_string(), self.exp_avg.clone());
        buffers.insert("exp_avg_sq".to_string(), self.exp_avg_sq.clone());
        OptimizerState { method: self.method(), step: self.steps, buffers }
    }

    fn load_state_dict(&mut self, mut state: OptimizerState) -> TrainingResult<()> {
        check_method(self.method(), &state)?;
        let len = self.exp_avg.len();
        self.exp_avg = take_buffer(&mut state, "exp_avg", len)?;
        self.exp_avg_sq = take_buffer(&mut state, "exp_avg_sq", len)?;
        self.steps = state.step;
        Ok(())
    }
}
