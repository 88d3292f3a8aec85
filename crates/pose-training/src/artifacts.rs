use crate::error::TrainingResult;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// The three files that make up one checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    RunMetadata,
    ModelWeights,
    OptimizerState,
}

impl ArtifactKind {
    pub const ALL: [Self; 3] = [Self::RunMetadata, Self::ModelWeights, Self::OptimizerState];

    /// File extension used for this artifact (`epoch-E.<ext>`).
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::RunMetadata => "iter",
            Self::ModelWeights => "model",
            Self::OptimizerState => "state",
        }
    }

    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.extension() == ext)
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::RunMetadata => "run metadata",
            Self::ModelWeights => "model weights",
            Self::OptimizerState => "optimizer state",
        };
        f.write_str(name)
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> TrainingResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Reads and deserializes a JSON artifact. The outer `Result` carries I/O
/// failures, the inner one the parse failure so callers can classify it.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> TrainingResult<Result<T, serde_json::Error>> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes))
}
