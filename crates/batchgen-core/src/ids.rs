use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CoreError;

/// Separates the ecosystem prefix from the package name in an [`EntryId`].
pub const ID_SEPARATOR: char = ':';

/// Queue entry identifier in `{ecosystem}:{name}` form, e.g. `cargo:ripgrep`.
///
/// Only the first separator counts, so `github:sharkdp/bat` has ecosystem
/// `github` and name `sharkdp/bat`. The ecosystem is never stored on its own;
/// it is always derived from the id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryId(String);

impl EntryId {
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        let reason = match s.split_once(ID_SEPARATOR) {
            None => Some("missing ecosystem separator"),
            Some((eco, _)) if eco.trim().is_empty() => Some("empty ecosystem"),
            Some((_, name)) if name.trim().is_empty() => Some("empty name"),
            // the ecosystem ends up in failure log file names
            Some((eco, _)) if eco.contains('/') || eco.contains('\\') || eco.contains("..") => {
                Some("ecosystem contains path traversal characters")
            }
            Some(_) => None,
        };
        match reason {
            Some(reason) => Err(CoreError::InvalidEntryId { id: s, reason }),
            None => Ok(Self(s)),
        }
    }

    pub fn from_parts(ecosystem: &str, name: &str) -> Result<Self, CoreError> {
        Self::parse(format!("{ecosystem}{ID_SEPARATOR}{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn ecosystem(&self) -> &str {
        self.0.split_once(ID_SEPARATOR).map(|(eco, _)| eco).unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.0.split_once(ID_SEPARATOR).map(|(_, name)| name).unwrap_or_default()
    }
}

impl TryFrom<String> for EntryId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<EntryId> for String {
    fn from(id: EntryId) -> Self {
        id.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
    pub fn from_str(s: impl Into<String>) -> Self {
        Self(s.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_first_separator() {
        let id = EntryId::parse("github:sharkdp/bat").unwrap();
        assert_eq!(id.ecosystem(), "github");
        assert_eq!(id.name(), "sharkdp/bat");
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(EntryId::parse("ripgrep").is_err());
        assert!(EntryId::parse(":ripgrep").is_err());
        assert!(EntryId::parse("cargo:").is_err());
        assert!(EntryId::parse("../etc:passwd").is_err());
    }

    #[test]
    fn deserializes_through_validation() {
        let ok: EntryId = serde_json::from_str("\"npm:prettier\"").unwrap();
        assert_eq!(ok.as_str(), "npm:prettier");
        assert!(serde_json::from_str::<EntryId>("\"prettier\"").is_err());
    }
}
