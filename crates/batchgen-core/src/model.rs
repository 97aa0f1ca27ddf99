use std::collections::{BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{BreakerBook, CoreError, EntryId};

/// Priority class: 1 = curated critical, 2 = popular, 3 = standard.
pub type Tier = u8;

pub const MIN_TIER: Tier = 1;
pub const MAX_TIER: Tier = 3;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Blocked,
    Skipped,
}

impl EntryStatus {
    pub const ALL: [EntryStatus; 6] = [
        EntryStatus::Pending,
        EntryStatus::InProgress,
        EntryStatus::Success,
        EntryStatus::Failed,
        EntryStatus::Blocked,
        EntryStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::InProgress => "in_progress",
            EntryStatus::Success => "success",
            EntryStatus::Failed => "failed",
            EntryStatus::Blocked => "blocked",
            EntryStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of failure categories reported by the recipe executor.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    NotFound,
    MissingDependency,
    NetworkRetryable,
    ValidationFailed,
    DeterministicInsufficient,
    Internal,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::NotFound => "not_found",
            FailureCategory::MissingDependency => "missing_dependency",
            FailureCategory::NetworkRetryable => "network_retryable",
            FailureCategory::ValidationFailed => "validation_failed",
            FailureCategory::DeterministicInsufficient => "deterministic_insufficient",
            FailureCategory::Internal => "internal",
        }
    }

    /// Only transient network trouble is retried by time alone.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureCategory::NetworkRetryable)
    }

    /// Category for failure records written before the executor reported one.
    /// Keyed on the executor's exit code, never on its output text.
    pub fn from_legacy_exit_code(code: i32) -> Self {
        match code {
            3 => FailureCategory::NotFound,
            5 => FailureCategory::NetworkRetryable,
            8 => FailureCategory::MissingDependency,
            9 => FailureCategory::DeterministicInsufficient,
            _ => FailureCategory::ValidationFailed,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work in the priority queue.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: EntryId,
    pub tier: Tier,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub blocked_by: BTreeSet<String>,
    #[serde(default, rename = "next_retry_at", skip_serializing_if = "Option::is_none")]
    pub next_retry_at_unix: Option<i64>,
    #[serde(rename = "added_at")]
    pub added_at_unix: i64,
    /// Consecutive failed attempts; drives the retry backoff.
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_category: Option<FailureCategory>,
    /// Blocked entries this one would unblock, as scored by the last reorder
    /// pass. Ranks pending entries of the same tier ahead of older ones.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub impact: u32,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl QueueEntry {
    pub fn new(id: EntryId, tier: Tier, added_at_unix: i64) -> Self {
        Self {
            id,
            tier,
            status: EntryStatus::Pending,
            blocked_by: BTreeSet::new(),
            next_retry_at_unix: None,
            added_at_unix,
            failure_count: 0,
            last_category: None,
            impact: 0,
        }
    }

    pub fn ecosystem(&self) -> &str {
        self.id.ecosystem()
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// Whether the backoff window (if any) has elapsed at `now_unix`.
    pub fn retry_window_open(&self, now_unix: i64) -> bool {
        self.next_retry_at_unix.map_or(true, |at| at <= now_unix)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |reason: String| CoreError::InvalidEntry { id: self.id.to_string(), reason };
        if !(MIN_TIER..=MAX_TIER).contains(&self.tier) {
            return Err(invalid(format!("tier must be {MIN_TIER}..={MAX_TIER}, got {}", self.tier)));
        }
        let blocked = self.status == EntryStatus::Blocked;
        if blocked && self.blocked_by.is_empty() {
            return Err(invalid("blocked entry has no blocked_by names".into()));
        }
        if !blocked && !self.blocked_by.is_empty() {
            return Err(invalid(format!("blocked_by set on {} entry", self.status)));
        }
        Ok(())
    }
}

/// The priority queue plus the per-ecosystem breaker state persisted beside it.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Queue {
    pub entries: Vec<QueueEntry>,
    #[serde(default)]
    pub breakers: BreakerBook,
}

impl Queue {
    pub fn new(entries: Vec<QueueEntry>) -> Self {
        Self { entries, breakers: BreakerBook::default() }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        for e in &self.entries {
            e.validate()?;
            if !seen.insert(e.id.as_str()) {
                return Err(CoreError::DuplicateEntry(e.id.to_string()));
            }
        }
        Ok(())
    }

    pub fn position(&self, id: &EntryId) -> Option<usize> {
        self.entries.iter().position(|e| &e.id == id)
    }

    pub fn get(&self, id: &EntryId) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn get_mut(&mut self, id: &EntryId) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|e| &e.id == id)
    }

    /// Appends a new entry. Ids are unique and never change once added.
    pub fn push(&mut self, entry: QueueEntry) -> Result<(), CoreError> {
        entry.validate()?;
        if self.get(&entry.id).is_some() {
            return Err(CoreError::DuplicateEntry(entry.id.to_string()));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Names of entries whose recipe has been generated successfully.
    pub fn resolved_names(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|e| e.status == EntryStatus::Success)
            .map(|e| e.name().to_string())
            .collect()
    }

    pub fn count_by_status(&self, status: EntryStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn ecosystems(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.ecosystem()).collect()
    }
}
