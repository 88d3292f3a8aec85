//! Epoch checkpoints.
//!
//! A checkpoint taken after epoch `E` is three files in the run directory:
//! `epoch-E.iter` (run metadata), `epoch-E.model` (model weights) and
//! `epoch-E.state` (optimizer state). Metadata is written last and records
//! digests of the other two so a resume can tell whether the files it was
//! handed belong together.

use crate::artifacts::{read_json, sha256_file, write_json, ArtifactKind};
use crate::config::ResumeConfig;
use crate::error::{TrainingError, TrainingResult};
use crate::logger::{LogHistory, RunLogger};
use crate::model::{ModelState, PoseModel};
use crate::optimizer::{Optimizer, OptimizerState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// First epoch a resumed run executes.
    pub next_epoch: u32,
    pub log_history: LogHistory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimizer_sha256: Option<String>,
}

/// Where a resumed run picks up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    pub start_epoch: u32,
    pub log_history: LogHistory,
}

/// File names for one checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub metadata: PathBuf,
    pub model: PathBuf,
    pub optimizer: PathBuf,
}

impl CheckpointPaths {
    #[must_use]
    pub fn for_epoch(dir: &Path, epoch: u32) -> Self {
        let stem = format!("epoch-{epoch}");
        let path = |kind: ArtifactKind| dir.join(format!("{stem}.{}", kind.extension()));
        Self {
            metadata: path(ArtifactKind::RunMetadata),
            model: path(ArtifactKind::ModelWeights),
            optimizer: path(ArtifactKind::OptimizerState),
        }
    }

    #[must_use]
    pub fn to_resume(&self) -> ResumeConfig {
        ResumeConfig {
            metadata: self.metadata.clone(),
            model: self.model.clone(),
            optimizer: self.optimizer.clone(),
        }
    }
}

/// A checkpoint found on disk. Missing parts mean the save was interrupted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointEntry {
    pub epoch: u32,
    pub metadata: Option<PathBuf>,
    pub model: Option<PathBuf>,
    pub optimizer: Option<PathBuf>,
}

impl CheckpointEntry {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.metadata.is_some() && self.model.is_some() && self.optimizer.is_some()
    }

    #[must_use]
    pub fn to_resume(&self) -> Option<ResumeConfig> {
        Some(ResumeConfig {
            metadata: self.metadata.clone()?,
            model: self.model.clone()?,
            optimizer: self.optimizer.clone()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn paths(&self, epoch: u32) -> CheckpointPaths {
        CheckpointPaths::for_epoch(&self.dir, epoch)
    }

    /// Writes the checkpoint for the end of `epoch`. A failure part-way leaves
    /// whatever was already written in place.
    pub fn save(
        &self,
        epoch: u32,
        model: &dyn PoseModel,
        optimizer: &dyn Optimizer,
        logger: &RunLogger,
    ) -> TrainingResult<CheckpointPaths> {
        std::fs::create_dir_all(&self.dir)?;
        let paths = self.paths(epoch);

        write_json(&paths.model, &model.state_dict())?;
        write_json(&paths.optimizer, &optimizer.state_dict())?;

        let metadata = RunMetadata {
            next_epoch: epoch + 1,
            log_history: logger.snapshot(),
            epoch: Some(epoch),
            model_sha256: Some(sha256_file(&paths.model)?),
            optimizer_sha256: Some(sha256_file(&paths.optimizer)?),
        };
        write_json(&paths.metadata, &metadata)?;

        tracing::info!(epoch, path = %paths.metadata.display(), "checkpoint saved");
        Ok(paths)
    }

    /// Reads run metadata and applies the saved weights and optimizer state
    /// to `model` and `optimizer` in place.
    pub fn load(
        &self,
        resume: &ResumeConfig,
        model: &mut dyn PoseModel,
        optimizer: &mut dyn Optimizer,
    ) -> TrainingResult<ResumePoint> {
        for (artifact, path) in resume.paths() {
            if !path.is_file() {
                return Err(TrainingError::ResumeArtifactNotFound { artifact, path: path.to_path_buf() });
            }
        }

        let metadata: RunMetadata = read_json(&resume.metadata)?
            .map_err(|e| TrainingError::corrupt(ArtifactKind::RunMetadata, &resume.metadata, e))?;
        if metadata.next_epoch == 0 {
            return Err(TrainingError::corrupt(
                ArtifactKind::RunMetadata,
                &resume.metadata,
                "next_epoch must be >= 1",
            ));
        }
        if let Some(epoch) = metadata.epoch {
            if epoch.checked_add(1) != Some(metadata.next_epoch) {
                return Err(TrainingError::corrupt(
                    ArtifactKind::RunMetadata,
                    &resume.metadata,
                    format!("epoch {epoch} does not precede next_epoch {}", metadata.next_epoch),
                ));
            }
        }
        verify_digest(ArtifactKind::ModelWeights, &resume.model, metadata.model_sha256.as_deref())?;
        verify_digest(ArtifactKind::OptimizerState, &resume.optimizer, metadata.optimizer_sha256.as_deref())?;

        let model_state: ModelState = read_json(&resume.model)?
            .map_err(|e| TrainingError::corrupt(ArtifactKind::ModelWeights, &resume.model, e))?;
        model
            .load_state_dict(model_state)
            .map_err(|e| TrainingError::corrupt(ArtifactKind::ModelWeights, &resume.model, e))?;

        let optimizer_state: OptimizerState = read_json(&resume.optimizer)?
            .map_err(|e| TrainingError::corrupt(ArtifactKind::OptimizerState, &resume.optimizer, e))?;
        optimizer
            .load_state_dict(optimizer_state)
            .map_err(|e| TrainingError::corrupt(ArtifactKind::OptimizerState, &resume.optimizer, e))?;

        tracing::info!(
            next_epoch = metadata.next_epoch,
            entries = metadata.log_history.len(),
            path = %resume.metadata.display(),
            "checkpoint loaded"
        );
        Ok(ResumePoint { start_epoch: metadata.next_epoch, log_history: metadata.log_history })
    }

    /// Checkpoints present in the run directory, oldest first.
    pub fn list(&self) -> TrainingResult<Vec<CheckpointEntry>> {
        let dir = match std::fs::read_dir(&self.dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found: BTreeMap<u32, CheckpointEntry> = BTreeMap::new();
        for entry in dir {
            let path = entry?.path();
            let Some((epoch, kind)) = parse_artifact_name(&path) else {
                continue;
            };
            let slot = found.entry(epoch).or_insert_with(|| CheckpointEntry {
                epoch,
                metadata: None,
                model: None,
                optimizer: None,
            });
            match kind {
                ArtifactKind::RunMetadata => slot.metadata = Some(path),
                ArtifactKind::ModelWeights => slot.model = Some(path),
                ArtifactKind::OptimizerState => slot.optimizer = Some(path),
            }
        }
        Ok(found.into_values().collect())
    }
}

fn parse_artifact_name(path: &Path) -> Option<(u32, ArtifactKind)> {
    let name = path.file_name()?.to_str()?;
    let (stem, ext) = name.rsplit_once('.')?;
    let epoch = stem.strip_prefix("epoch-")?.parse().ok()?;
    Some((epoch, ArtifactKind::from_extension(ext)?))
}

fn verify_digest(artifact: ArtifactKind, path: &Path, expected: Option<&str>) -> TrainingResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    if sha256_file(path)? != expected {
        return Err(TrainingError::corrupt(
            artifact,
            path,
            "file does not match the digest recorded in the run metadata",
        ));
    }
    Ok(())
}
