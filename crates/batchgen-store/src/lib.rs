//! Persistence for the batch scheduler: the queue file (with breaker state),
//! the append-only failure log, and per-run result files.

pub mod artifacts;
pub mod error;
pub mod failures;
pub mod file;
pub mod memory;
pub mod queue_file;
pub mod traits;

pub use artifacts::RunArtifacts;
pub use error::StoreError;
pub use failures::{FailureLog, FailureLogScan};
pub use file::FileQueueStore;
pub use memory::MemoryQueueStore;
pub use queue_file::{fingerprint, Loaded, QueueFile, QUEUE_SCHEMA_VERSION};
pub use traits::QueueStore;
