use std::path::Path;

use batchgen_core::Queue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::StoreError;

pub const QUEUE_SCHEMA_VERSION: u32 = 1;

/// On-disk form of the priority queue: entries and breaker state saved
/// together so they can never disagree.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueFile {
    pub schema_version: u32,
    #[serde(rename = "updated_at")]
    pub updated_at_unix: i64,
    #[serde(flatten)]
    pub queue: Queue,
}

impl QueueFile {
    pub fn new(queue: Queue) -> Self {
        Self { schema_version: QUEUE_SCHEMA_VERSION, updated_at_unix: 0, queue }
    }
}

impl Default for QueueFile {
    fn default() -> Self {
        Self::new(Queue::default())
    }
}

/// A queue file plus the fingerprint of the bytes it was decoded from.
/// `fingerprint` is `None` when no file existed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Loaded {
    pub file: QueueFile,
    pub fingerprint: Option<String>,
}

/// Hex SHA-256 of the raw bytes.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Deserialize)]
struct Header {
    schema_version: u32,
}

pub(crate) fn check_schema(found: u32) -> Result<(), StoreError> {
    if found != QUEUE_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema { found, supported: QUEUE_SCHEMA_VERSION });
    }
    Ok(())
}

/// Decodes and validates queue file bytes. The schema version is checked
/// before the rest of the document is interpreted.
pub(crate) fn decode(path: &Path, bytes: &[u8]) -> Result<QueueFile, StoreError> {
    let parse = |source| StoreError::Parse { path: path.to_path_buf(), source };
    let header: Header = serde_json::from_slice(bytes).map_err(parse)?;
    check_schema(header.schema_version)?;
    let file: QueueFile = serde_json::from_slice(bytes).map_err(parse)?;
    file.queue.validate()?;
    Ok(file)
}

pub(crate) fn encode(file: &QueueFile) -> Result<Vec<u8>, StoreError> {
    check_schema(file.schema_version)?;
    file.queue.validate()?;
    let mut bytes = serde_json::to_vec_pretty(file).map_err(StoreError::Encode)?;
    bytes.push(b'\n');
    Ok(bytes)
}
