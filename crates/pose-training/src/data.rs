use crate::error::{TrainingError, TrainingResult};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One example: a flattened input, its `2·joints` target coordinates and a
/// per-joint visibility flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseSample {
    pub input: Vec<f32>,
    pub pose: Vec<f32>,
    pub visibility: Vec<f32>,
}

/// A group of samples consumed by one training or validation step, stored
/// row-major. The mask has one entry per target coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    len: usize,
    input_dim: usize,
    target_dim: usize,
    inputs: Vec<f32>,
    targets: Vec<f32>,
    mask: Vec<f32>,
}

impl Batch {
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a PoseSample>) -> TrainingResult<Self> {
        let mut batch: Option<Self> = None;
        for sample in samples {
            let b = batch.get_or_insert_with(|| Self {
                len: 0,
                input_dim: sample.input.len(),
                target_dim: sample.pose.len(),
                inputs: Vec::new(),
                targets: Vec::new(),
                mask: Vec::new(),
            });
            if sample.input.len() != b.input_dim || sample.pose.len() != b.target_dim {
                return Err(TrainingError::Dataset("samples in a batch differ in shape".to_string()));
            }
            if sample.visibility.len() * 2 != sample.pose.len() {
                return Err(TrainingError::Dataset(format!(
                    "visibility has {} joints but pose has {} coordinates",
                    sample.visibility.len(),
                    sample.pose.len()
                )));
            }
            b.inputs.extend_from_slice(&sample.input);
            b.targets.extend_from_slice(&sample.pose);
            b.mask.extend(sample.visibility.iter().flat_map(|&v| [v, v]));
            b.len += 1;
        }
        batch.ok_or_else(|| TrainingError::Dataset("batch must not be empty".to_string()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    #[must_use]
    pub fn target_dim(&self) -> usize {
        self.target_dim
    }

    #[must_use]
    pub fn inputs(&self) -> &[f32] {
        &self.inputs
    }

    #[must_use]
    pub fn targets(&self) -> &[f32] {
        &self.targets
    }

    #[must_use]
    pub fn mask(&self) -> &[f32] {
        &self.mask
    }
}

/// A finite, restartable stream of batches. Each call to `batches` is one
/// full pass.
pub trait BatchSource: Send {
    /// Batches per pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tells the source which epoch the next pass belongs to. Sources that
    /// shuffle derive their order from it so a resumed run sees the same
    /// batches as an uninterrupted one.
    fn set_epoch(&mut self, _epoch: u32) {}

    fn batches(&mut self) -> Box<dyn Iterator<Item = TrainingResult<Batch>> + '_>;
}

/// Pose examples read from a JSON-lines list file.
#[derive(Debug, Clone)]
pub struct PoseDataset {
    samples: Vec<PoseSample>,
    input_dim: usize,
}

impl PoseDataset {
    pub fn load(path: &Path, joints: usize) -> TrainingResult<Self> {
        if !path.is_file() {
            return Err(TrainingError::DatasetNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let mut samples = Vec::new();

        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let sample: PoseSample = serde_json::from_str(line).map_err(|e| {
                TrainingError::Dataset(format!("{}: failed to parse line {}: {}", path.display(), idx + 1, e))
            })?;
            samples.push(sample);
        }

        Self::from_samples(samples, joints)
            .map_err(|e| TrainingError::Dataset(format!("{}: {e}", path.display())))
    }

    pub fn from_samples(samples: Vec<PoseSample>, joints: usize) -> TrainingResult<Self> {
        validate_samples(&samples, joints)?;
        let input_dim = samples[0].input.len();
        Ok(Self { samples, input_dim })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    #[must_use]
    pub fn samples(&self) -> &[PoseSample] {
        &self.samples
    }
}

pub fn validate_samples(samples: &[PoseSample], joints: usize) -> TrainingResult<()> {
    let Some(first) = samples.first() else {
        return Err(TrainingError::Dataset("dataset must not be empty".to_string()));
    };
    if first.input.is_empty() {
        return Err(TrainingError::Dataset("sample[0] input is empty".to_string()));
    }
    for (idx, s) in samples.iter().enumerate() {
        if s.input.len() != first.input.len() {
            return Err(TrainingError::Dataset(format!(
                "sample[{idx}] input has {} values, expected {}",
                s.input.len(),
                first.input.len()
            )));
        }
        if s.pose.len() != joints * 2 {
            return Err(TrainingError::Dataset(format!(
                "sample[{idx}] pose has {} values, expected {} for {joints} joints",
                s.pose.len(),
                joints * 2
            )));
        }
        if s.visibility.len() != joints {
            return Err(TrainingError::Dataset(format!(
                "sample[{idx}] visibility has {} values, expected {joints}",
                s.visibility.len()
            )));
        }
    }
    Ok(())
}

/// Batches a dataset with a fixed batch size. The final batch of a pass may
/// be short. With shuffling enabled the order of a pass is drawn from a
/// generator seeded with the run seed and the current epoch.
#[derive(Debug)]
pub struct DataLoader {
    dataset: PoseDataset,
    batch_size: usize,
    shuffle_seed: Option<u64>,
    epoch: u32,
}

impl DataLoader {
    #[must_use]
    pub fn sequential(dataset: PoseDataset, batch_size: usize) -> Self {
        Self { dataset, batch_size: batch_size.max(1), shuffle_seed: None, epoch: 0 }
    }

    #[must_use]
    pub fn shuffled(dataset: PoseDataset, batch_size: usize, seed: u64) -> Self {
        Self { dataset, batch_size: batch_size.max(1), shuffle_seed: Some(seed), epoch: 0 }
    }

    #[must_use]
    pub fn dataset(&self) -> &PoseDataset {
        &self.dataset
    }
}

impl BatchSource for DataLoader {
    fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    fn set_epoch(&mut self, epoch: u32) {
        self.epoch = epoch;
    }

    fn batches(&mut self) -> Box<dyn Iterator<Item = TrainingResult<Batch>> + '_> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(u64::from(self.epoch)));
            order.shuffle(&mut rng);
        }
        let samples = self.dataset.samples();
        let batch_size = self.batch_size;
        let chunks: Vec<Vec<usize>> = order.chunks(batch_size).map(<[usize]>::to_vec).collect();
        Box::new(chunks.into_iter().map(move |idx| Batch::from_samples(idx.iter().map(|&i| &samples[i]))))
    }
}
