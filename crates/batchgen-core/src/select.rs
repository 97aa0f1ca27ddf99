use std::collections::BTreeSet;

use crate::{BreakerState, EntryStatus, Queue, QueueEntry, Tier};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionCriteria {
    pub max_tier: Tier,
    pub batch_size: usize,
    /// Restrict the run to one ecosystem (manual debugging runs).
    pub ecosystem: Option<String>,
    pub now_unix: i64,
}

/// Picks the entries to process this run, as indices into `queue.entries`.
///
/// Admitted entries are ordered by tier, then by the impact score the last
/// reorder pass stored (highest first), then by `added_at`, with queue
/// position as the last tie-break, so an unchanged queue always yields the
/// same list. Entries never scored rank by `(tier, added_at)` alone.
/// A half-open ecosystem contributes at most one entry: its highest-ranked
/// eligible one, which acts as the probe.
pub fn select_candidates(queue: &Queue, criteria: &SelectionCriteria) -> Vec<usize> {
    let mut admitted: Vec<usize> = queue
        .entries
        .iter()
        .enumerate()
        .filter(|(_, e)| is_admissible(e, queue.breakers.state_of(e.ecosystem()), criteria))
        .map(|(i, _)| i)
        .collect();

    admitted.sort_by(|&a, &b| {
        let (ea, eb) = (&queue.entries[a], &queue.entries[b]);
        ea.tier
            .cmp(&eb.tier)
            .then(eb.impact.cmp(&ea.impact))
            .then(ea.added_at_unix.cmp(&eb.added_at_unix))
            .then(a.cmp(&b))
    });

    let mut probing: BTreeSet<&str> = BTreeSet::new();
    admitted.retain(|&i| {
        let eco = queue.entries[i].ecosystem();
        queue.breakers.state_of(eco) != BreakerState::HalfOpen || probing.insert(eco)
    });

    admitted.truncate(criteria.batch_size);
    admitted
}

fn is_admissible(entry: &QueueEntry, breaker: BreakerState, criteria: &SelectionCriteria) -> bool {
    let status_ok = match entry.status {
        EntryStatus::Pending => true,
        // terminal failures wait for an explicit re-queue
        EntryStatus::Failed => entry.last_category.map_or(true, |c| c.is_retryable()),
        _ => false,
    };
    status_ok
        && breaker != BreakerState::Open
        && entry.tier <= criteria.max_tier
        && entry.retry_window_open(criteria.now_unix)
        && criteria.ecosystem.as_deref().map_or(true, |eco| entry.ecosystem() == eco)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CircuitBreakerState, EntryId, FailureCategory};

    fn entry(id: &str, tier: Tier, added_at: i64) -> QueueEntry {
        QueueEntry::new(EntryId::parse(id).unwrap(), tier, added_at)
    }

    fn criteria(max_tier: Tier, batch_size: usize) -> SelectionCriteria {
        SelectionCriteria { max_tier, batch_size, ecosystem: None, now_unix: 1_000 }
    }

    fn ids(queue: &Queue, picked: &[usize]) -> Vec<String> {
        picked.iter().map(|&i| queue.entries[i].id.to_string()).collect()
    }

    fn breaker(state: BreakerState) -> CircuitBreakerState {
        CircuitBreakerState { state, consecutive_failures: 3, opened_at_unix: Some(0) }
    }

    #[test]
    fn orders_by_tier_then_age() {
        let q = Queue::new(vec![
            entry("npm:c", 2, 10),
            entry("cargo:a", 1, 50),
            entry("pypi:b", 2, 5),
            entry("go:d", 1, 20),
        ]);
        let picked = select_candidates(&q, &criteria(3, 10));
        assert_eq!(ids(&q, &picked), vec!["go:d", "cargo:a", "pypi:b", "npm:c"]);
    }

    #[test]
    fn impact_ranks_within_tier_but_never_across() {
        let mut opener = entry("homebrew:openssl", 2, 50);
        opener.impact = 3;
        let mut minor = entry("homebrew:pcre", 2, 40);
        minor.impact = 1;
        let q = Queue::new(vec![entry("homebrew:aaa", 2, 1), minor, opener, entry("homebrew:zzz", 1, 99)]);
        let picked = select_candidates(&q, &criteria(3, 10));
        assert_eq!(ids(&q, &picked), vec!["homebrew:zzz", "homebrew:openssl", "homebrew:pcre", "homebrew:aaa"]);
    }

    #[test]
    fn filters_status_tier_backoff_and_ecosystem() {
        let mut done = entry("cargo:done", 1, 0);
        done.status = EntryStatus::Success;
        let mut waiting = entry("cargo:waiting", 1, 0);
        waiting.status = EntryStatus::Failed;
        waiting.last_category = Some(FailureCategory::NetworkRetryable);
        waiting.next_retry_at_unix = Some(2_000);
        let mut due = entry("cargo:due", 1, 1);
        due.status = EntryStatus::Failed;
        due.last_category = Some(FailureCategory::NetworkRetryable);
        due.next_retry_at_unix = Some(900);
        let mut terminal = entry("cargo:terminal", 1, 2);
        terminal.status = EntryStatus::Failed;
        terminal.last_category = Some(FailureCategory::ValidationFailed);
        let low = entry("cargo:low", 3, 0);
        let other = entry("npm:other", 1, 0);

        let q = Queue::new(vec![done, waiting, due, terminal, low, other]);
        let mut c = criteria(2, 10);
        c.ecosystem = Some("cargo".into());
        assert_eq!(ids(&q, &select_candidates(&q, &c)), vec!["cargo:due"]);
    }

    #[test]
    fn truncates_to_batch_size() {
        let q = Queue::new((0..5).map(|i| entry(&format!("go:p{i}"), 1, i)).collect());
        assert_eq!(ids(&q, &select_candidates(&q, &criteria(3, 2))), vec!["go:p0", "go:p1"]);
    }

    #[test]
    fn open_breaker_blocks_ecosystem() {
        let mut q = Queue::new(vec![entry("cargo:x", 1, 0), entry("npm:y", 2, 0)]);
        q.breakers.set("cargo", breaker(BreakerState::Open));
        assert_eq!(ids(&q, &select_candidates(&q, &criteria(3, 10))), vec!["npm:y"]);
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let mut q = Queue::new(vec![
            entry("npm:a", 2, 30),
            entry("npm:b", 1, 40),
            entry("npm:c", 2, 10),
            entry("cargo:z", 3, 0),
        ]);
        q.breakers.set("npm", breaker(BreakerState::HalfOpen));
        let picked = select_candidates(&q, &criteria(3, 10));
        assert_eq!(ids(&q, &picked), vec!["npm:b", "cargo:z"]);
    }

    #[test]
    fn empty_queue_is_not_an_error() {
        assert!(select_candidates(&Queue::default(), &criteria(3, 10)).is_empty());
    }

    #[test]
    fn selection_is_deterministic() {
        let q = Queue::new((0..20).map(|i| entry(&format!("pypi:p{i}"), (i % 3 + 1) as Tier, 7)).collect());
        let c = criteria(3, 8);
        assert_eq!(select_candidates(&q, &c), select_candidates(&q, &c));
    }
}
