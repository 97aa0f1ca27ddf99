use std::path::Path;
use std::sync::Mutex;

use batchgen_core::Queue;

use crate::queue_file::{decode, encode};
use crate::{fingerprint, Loaded, QueueFile, QueueStore, StoreError};

const MEMORY_PATH: &str = "<memory>";

/// In-memory queue store for tests. Holds encoded bytes so fingerprints and
/// conflicts behave exactly like the file store.
#[derive(Default)]
pub struct MemoryQueueStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queue(queue: Queue) -> Result<Self, StoreError> {
        let bytes = encode(&QueueFile::new(queue))?;
        Ok(Self { bytes: Mutex::new(Some(bytes)) })
    }

    /// Rewrites the stored queue without a fingerprint check, as a second
    /// writer would.
    pub fn tamper(&self, f: impl FnOnce(&mut Queue)) -> Result<(), StoreError> {
        let mut slot = self.bytes.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = match slot.as_deref() {
            Some(b) => decode(Path::new(MEMORY_PATH), b)?,
            None => QueueFile::default(),
        };
        f(&mut file.queue);
        file.updated_at_unix += 1;
        *slot = Some(encode(&file)?);
        Ok(())
    }

    /// Current stored queue, if anything was saved.
    pub fn snapshot(&self) -> Result<Option<QueueFile>, StoreError> {
        let slot = self.bytes.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_deref().map(|b| decode(Path::new(MEMORY_PATH), b)).transpose()
    }
}

impl QueueStore for MemoryQueueStore {
    fn load(&self) -> Result<Loaded, StoreError> {
        let slot = self.bytes.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_deref() {
            Some(b) => Ok(Loaded { file: decode(Path::new(MEMORY_PATH), b)?, fingerprint: Some(fingerprint(b)) }),
            None => Ok(Loaded { file: QueueFile::default(), fingerprint: None }),
        }
    }

    fn save(&self, expected: Option<&str>, file: &mut QueueFile, now_unix: i64) -> Result<String, StoreError> {
        let mut slot = self.bytes.lock().unwrap_or_else(|e| e.into_inner());
        let found = slot.as_deref().map(fingerprint);
        if found.as_deref() != expected {
            return Err(StoreError::conflict(MEMORY_PATH, expected, found.as_deref()));
        }
        file.updated_at_unix = now_unix;
        let bytes = encode(file)?;
        let fp = fingerprint(&bytes);
        *slot = Some(bytes);
        Ok(fp)
    }
}
