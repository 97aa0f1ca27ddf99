use crate::{Loaded, QueueFile, StoreError};

/// Whole-file queue persistence with a guarded read-modify-write save.
pub trait QueueStore: Send + Sync {
    /// Reads the queue. A missing file yields an empty queue with no
    /// fingerprint.
    fn load(&self) -> Result<Loaded, StoreError>;

    /// Writes `file` only if the stored bytes still match `expected` (the
    /// fingerprint returned by [`QueueStore::load`]); otherwise fails with
    /// [`StoreError::Conflict`] and writes nothing. Stamps `updated_at` and
    /// returns the new fingerprint.
    fn save(&self, expected: Option<&str>, file: &mut QueueFile, now_unix: i64) -> Result<String, StoreError>;
}
