use std::path::{Path, PathBuf};

use batchgen_core::RunSummary;

use crate::StoreError;

pub const RESULTS_FILE: &str = "batch-results.json";
pub const SUMMARY_FILE: &str = "batch-summary.md";

/// Writes the per-run result files into a results directory.
#[derive(Clone, Debug)]
pub struct RunArtifacts {
    pub dir: PathBuf,
}

impl RunArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn results_path(&self) -> PathBuf {
        self.dir.join(RESULTS_FILE)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.dir.join(SUMMARY_FILE)
    }

    /// Writes `batch-results.json` and `batch-summary.md`, replacing the
    /// previous run's files.
    pub fn write_summary(&self, summary: &RunSummary) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut json = serde_json::to_vec_pretty(summary).map_err(StoreError::Encode)?;
        json.push(b'\n');
        write(&self.results_path(), &json)?;
        write(&self.summary_path(), summary.to_markdown().as_bytes())
    }

    pub fn read_summary(&self) -> Result<Option<RunSummary>, StoreError> {
        let path = self.results_path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        let summary = serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse { path, source })?;
        Ok(Some(summary))
    }
}

fn write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    std::fs::write(path, bytes).map_err(|e| StoreError::io(path, e))
}
