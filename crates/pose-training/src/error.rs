use crate::artifacts::ArtifactKind;
use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid run configuration: {0}")]
    InvalidSpec(String),

    #[error("GPU execution was requested but no GPU is available")]
    DeviceUnavailable,

    #[error("{} is not found", .0.display())]
    DatasetNotFound(PathBuf),

    #[error("{artifact} {} is not found", .path.display())]
    ResumeArtifactNotFound { artifact: ArtifactKind, path: PathBuf },

    #[error("{0} is unknown optimization method")]
    UnsupportedOptimizer(String),

    #[error("corrupt {artifact} {}: {reason}", .path.display())]
    CheckpointCorrupt { artifact: ArtifactKind, path: PathBuf, reason: String },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("optimizer error: {0}")]
    Optimizer(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    /// True for every "required path is missing" error, whether it names a
    /// dataset or a resume artifact.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DatasetNotFound(_) | Self::ResumeArtifactNotFound { .. })
    }

    pub(crate) fn corrupt(artifact: ArtifactKind, path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::CheckpointCorrupt { artifact, path: path.into(), reason: reason.to_string() }
    }
}
