use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{EntryId, EntryStatus, EntryUpdate, Queue};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RequeueReport {
    /// Entries flipped from blocked to pending.
    pub requeued: usize,
    /// Entries still blocked after the pass.
    pub remaining: usize,
    pub details: Vec<RequeueChange>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RequeueChange {
    pub id: EntryId,
    pub resolved_by: Vec<String>,
}

/// Optional blocker-name to recipe-name mapping, for dependencies recorded
/// under an upstream naming convention (e.g. `openssl@3` -> `openssl`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AliasIndex(BTreeMap<String, String>);

impl AliasIndex {
    pub fn new(aliases: BTreeMap<String, String>) -> Self {
        Self(aliases)
    }

    pub fn canonical(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Flips every blocked entry whose blockers all name successful entries back
/// to pending. Exact name matching only.
pub fn requeue_unblocked(queue: &mut Queue) -> RequeueReport {
    requeue_with_aliases(queue, &AliasIndex::default())
}

/// Like [`requeue_unblocked`], but a blocker that has no exact match may still
/// resolve through `aliases`.
pub fn requeue_with_aliases(queue: &mut Queue, aliases: &AliasIndex) -> RequeueReport {
    // flipping to pending never changes the resolved set, so one pass suffices
    let resolved = queue.resolved_names();
    let is_resolved =
        |dep: &str| resolved.contains(dep) || aliases.canonical(dep).is_some_and(|c| resolved.contains(c));

    let mut report = RequeueReport::default();
    for entry in queue.entries.iter_mut().filter(|e| e.status == EntryStatus::Blocked) {
        if entry.blocked_by.is_empty() || !entry.blocked_by.iter().all(|dep| is_resolved(dep)) {
            report.remaining += 1;
            continue;
        }
        let resolved_by = entry.blocked_by.iter().cloned().collect();
        entry.apply(EntryUpdate::Unblocked);
        report.requeued += 1;
        report.details.push(RequeueChange { id: entry.id.clone(), resolved_by });
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::QueueEntry;

    fn entry(id: &str, status: EntryStatus, blocked_by: &[&str]) -> QueueEntry {
        let mut e = QueueEntry::new(EntryId::parse(id).unwrap(), 2, 0);
        e.status = status;
        e.blocked_by = blocked_by.iter().map(|s| s.to_string()).collect();
        e
    }

    fn sample() -> Queue {
        Queue::new(vec![
            entry("homebrew:x264", EntryStatus::Success, &[]),
            entry("homebrew:lame", EntryStatus::Success, &[]),
            entry("homebrew:ffmpeg", EntryStatus::Blocked, &["x264", "lame"]),
            entry("homebrew:gst", EntryStatus::Blocked, &["x264", "glib"]),
            entry("homebrew:glib", EntryStatus::Pending, &[]),
        ])
    }

    #[test]
    fn flips_only_fully_resolved_entries() {
        let mut q = sample();
        let report = requeue_unblocked(&mut q);
        assert_eq!(report.requeued, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(report.details[0].id.as_str(), "homebrew:ffmpeg");
        assert_eq!(report.details[0].resolved_by, vec!["lame", "x264"]);

        assert_eq!(q.entries[2].status, EntryStatus::Pending);
        assert!(q.entries[2].blocked_by.is_empty());
        assert_eq!(q.entries[3].status, EntryStatus::Blocked);
        assert!(q.validate().is_ok());
    }

    #[test]
    fn second_pass_changes_nothing() {
        let mut q = sample();
        requeue_unblocked(&mut q);
        let after_first = q.clone();
        let report = requeue_unblocked(&mut q);
        assert_eq!(report.requeued, 0);
        assert_eq!(q, after_first);
    }

    #[test]
    fn naming_mismatch_stays_blocked_without_alias() {
        let mut q = Queue::new(vec![
            entry("homebrew:openssl", EntryStatus::Success, &[]),
            entry("homebrew:curl", EntryStatus::Blocked, &["openssl@3"]),
        ]);
        assert_eq!(requeue_unblocked(&mut q).requeued, 0);

        let aliases = AliasIndex::new(BTreeMap::from([("openssl@3".to_string(), "openssl".to_string())]));
        let report = requeue_with_aliases(&mut q, &aliases);
        assert_eq!(report.requeued, 1);
        assert_eq!(q.entries[1].status, EntryStatus::Pending);
    }
}
