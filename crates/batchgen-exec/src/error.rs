use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn executor {program:?}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("executor {program:?} i/o: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The executor exited without printing a structured report.
    #[error("executor {program:?} produced no structured report (exit code {exit_code:?})")]
    MalformedReport { program: String, exit_code: Option<i32> },

    #[error("read platform results {path}: {source}")]
    ReadResults {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse platform results {path}: {source}")]
    ParseResults {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
