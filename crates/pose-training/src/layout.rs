use crate::logger::LOG_FILENAME;
use std::path::{Path, PathBuf};

/// Filesystem layout of a run's output directory.
///
/// Each backend writes under its own subdirectory, `<out>/<backend>/`, which
/// holds the `log` file and every `epoch-E.*` checkpoint artifact.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn run_dir(&self, backend_id: &str) -> PathBuf {
        self.root.join(backend_id)
    }

    #[must_use]
    pub fn log_path(&self, backend_id: &str) -> PathBuf {
        self.run_dir(backend_id).join(LOG_FILENAME)
    }
}
