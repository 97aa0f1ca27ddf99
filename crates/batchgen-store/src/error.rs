use std::path::PathBuf;

use batchgen_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed queue file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("encode queue file: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("unsupported queue schema version {found} (supported: {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("invalid queue contents: {0}")]
    Invalid(#[from] CoreError),

    /// The file changed between load and save; nothing was written.
    #[error("queue file {path} changed since it was loaded (expected {expected}, found {found})")]
    Conflict { path: PathBuf, expected: String, found: String },

    #[error("invalid failure log partition {0:?}")]
    InvalidPartition(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io { path: path.into(), source }
    }

    pub(crate) fn conflict(path: impl Into<PathBuf>, expected: Option<&str>, found: Option<&str>) -> Self {
        StoreError::Conflict {
            path: path.into(),
            expected: expected.unwrap_or("<absent>").to_string(),
            found: found.unwrap_or("<absent>").to_string(),
        }
    }
}
