use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::queue_file::{decode, encode};
use crate::{fingerprint, Loaded, QueueFile, QueueStore, StoreError};

/// Queue store backed by a single JSON file.
#[derive(Clone, Debug)]
pub struct FileQueueStore {
    pub path: PathBuf,
}

impl FileQueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_current(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl QueueStore for FileQueueStore {
    fn load(&self) -> Result<Loaded, StoreError> {
        match self.read_current()? {
            Some(bytes) => {
                let file = decode(&self.path, &bytes)?;
                debug!(path = %self.path.display(), entries = file.queue.entries.len(), "loaded queue");
                Ok(Loaded { file, fingerprint: Some(fingerprint(&bytes)) })
            }
            None => {
                debug!(path = %self.path.display(), "queue file absent; starting empty");
                Ok(Loaded { file: QueueFile::default(), fingerprint: None })
            }
        }
    }

    fn save(&self, expected: Option<&str>, file: &mut QueueFile, now_unix: i64) -> Result<String, StoreError> {
        let found = self.read_current()?.map(|b| fingerprint(&b));
        if found.as_deref() != expected {
            warn!(path = %self.path.display(), "queue file changed since load; refusing to overwrite");
            return Err(StoreError::conflict(&self.path, expected, found.as_deref()));
        }

        file.updated_at_unix = now_unix;
        let bytes = encode(file)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let tmp = self.temp_path();
        write_then_rename(&tmp, &self.path, &bytes)?;
        debug!(path = %self.path.display(), entries = file.queue.entries.len(), "saved queue");
        Ok(fingerprint(&bytes))
    }
}

fn write_then_rename(tmp: &Path, dest: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    std::fs::write(tmp, bytes).map_err(|e| StoreError::io(tmp, e))?;
    std::fs::rename(tmp, dest).map_err(|e| {
        let _ = std::fs::remove_file(tmp);
        StoreError::io(dest, e)
    })
}
