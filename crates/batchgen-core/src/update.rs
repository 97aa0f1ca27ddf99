use std::collections::BTreeSet;

use crate::{EntryStatus, FailureCategory, QueueEntry};

/// A single mutation of a queue entry's mutable fields.
///
/// The classifier and the maintenance passes decide; [`QueueEntry::apply`] is
/// the only place that writes `status`, `blocked_by` and `next_retry_at`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryUpdate {
    Started,
    Succeeded,
    Blocked { blocked_by: BTreeSet<String> },
    RetryLater { category: FailureCategory, failure_count: u32, retry_at_unix: i64 },
    Terminal { category: FailureCategory, failure_count: u32 },
    /// Requeue engine: every blocker resolved.
    Unblocked,
    /// Operator-requested retry; forgets the failure history.
    Reset,
}

impl QueueEntry {
    pub fn apply(&mut self, update: EntryUpdate) {
        match update {
            EntryUpdate::Started => {
                self.status = EntryStatus::InProgress;
            }
            EntryUpdate::Succeeded => {
                self.status = EntryStatus::Success;
                self.blocked_by.clear();
                self.next_retry_at_unix = None;
                self.failure_count = 0;
                self.last_category = None;
            }
            EntryUpdate::Blocked { blocked_by } => {
                debug_assert!(!blocked_by.is_empty());
                self.status = EntryStatus::Blocked;
                self.blocked_by = blocked_by;
                self.next_retry_at_unix = None;
                self.last_category = Some(FailureCategory::MissingDependency);
            }
            EntryUpdate::RetryLater { category, failure_count, retry_at_unix } => {
                self.status = EntryStatus::Failed;
                self.blocked_by.clear();
                self.next_retry_at_unix = Some(retry_at_unix);
                self.failure_count = failure_count;
                self.last_category = Some(category);
            }
            EntryUpdate::Terminal { category, failure_count } => {
                self.status = EntryStatus::Failed;
                self.blocked_by.clear();
                self.next_retry_at_unix = None;
                self.failure_count = failure_count;
                self.last_category = Some(category);
            }
            EntryUpdate::Unblocked => {
                self.status = EntryStatus::Pending;
                self.blocked_by.clear();
                self.next_retry_at_unix = None;
            }
            EntryUpdate::Reset => {
                self.status = EntryStatus::Pending;
                self.blocked_by.clear();
                self.next_retry_at_unix = None;
                self.failure_count = 0;
                self.last_category = None;
            }
        }
    }
}
