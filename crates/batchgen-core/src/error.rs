use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid entry id {id:?}: {reason}")]
    InvalidEntryId { id: String, reason: &'static str },

    #[error("invalid queue entry {id}: {reason}")]
    InvalidEntry { id: String, reason: String },

    #[error("duplicate queue entry {0}")]
    DuplicateEntry(String),

    #[error("invalid platform id {id:?}: {reason}")]
    InvalidPlatform { id: String, reason: &'static str },
}
