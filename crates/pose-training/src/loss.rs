use crate::error::{TrainingError, TrainingResult};

/// Scalar loss and its gradient with respect to the prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct LossOutput {
    pub value: f32,
    pub grad: Vec<f32>,
}

pub trait LossFunction: Send + Sync {
    fn compute(&self, prediction: &[f32], target: &[f32], mask: &[f32], use_visibility: bool) -> TrainingResult<LossOutput>;
}

/// Mean squared error over every target coordinate. When visibility-weighted,
/// each difference is multiplied by its mask value first, so invisible joints
/// contribute nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeanSquaredError;

impl LossFunction for MeanSquaredError {
    fn compute(&self, prediction: &[f32], target: &[f32], mask: &[f32], use_visibility: bool) -> TrainingResult<LossOutput> {
        if prediction.len() != target.len() || target.len() != mask.len() {
            return Err(TrainingError::Model(format!(
                "loss inputs differ in length: prediction {}, target {}, mask {}",
                prediction.len(),
                target.len(),
                mask.len()
            )));
        }
        if prediction.is_empty() {
            return Err(TrainingError::Model("loss over an empty prediction".to_string()));
        }

        let n = prediction.len() as f32;
        let mut value = 0.0;
        let mut grad = Vec::with_capacity(prediction.len());
        for ((&p, &t), &m) in prediction.iter().zip(target).zip(mask) {
            let weight = if use_visibility { m } else { 1.0 };
            let diff = (p - t) * weight;
            value += diff * diff;
            grad.push(2.0 * diff * weight / n);
        }
        Ok(LossOutput { value: value / n, grad })
    }
}
