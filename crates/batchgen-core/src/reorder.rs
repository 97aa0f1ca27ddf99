use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::{EntryId, EntryStatus, Queue, Tier};

const TOP_SCORES: usize = 10;

/// Dependency name -> entries recorded as blocked on it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockerMap(BTreeMap<String, BTreeSet<EntryId>>);

impl BlockerMap {
    /// Inverts the `blocked_by` sets of every blocked entry.
    pub fn from_queue(queue: &Queue) -> Self {
        let mut map = Self::default();
        for entry in queue.entries.iter().filter(|e| e.status == EntryStatus::Blocked) {
            for dep in &entry.blocked_by {
                map.insert(dep.clone(), entry.id.clone());
            }
        }
        map
    }

    pub fn insert(&mut self, dependency: impl Into<String>, blocked: EntryId) {
        self.0.entry(dependency.into()).or_default().insert(blocked);
    }

    pub fn merge(&mut self, other: BlockerMap) {
        for (dep, blocked) in other.0 {
            self.0.entry(dep).or_default().extend(blocked);
        }
    }

    pub fn dependents(&self, dependency: &str) -> impl Iterator<Item = &EntryId> {
        self.0.get(dependency).into_iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Number of distinct currently-blocked entries reachable from `name` through
/// the blocker map, directly or via chains. Cycles are walked once.
pub fn blocking_impact(name: &str, blockers: &BlockerMap, blocked: &BTreeSet<&EntryId>) -> usize {
    let mut seen: BTreeSet<&EntryId> = BTreeSet::new();
    let mut frontier: VecDeque<&str> = VecDeque::from([name]);
    while let Some(dep) = frontier.pop_front() {
        for id in blockers.dependents(dep) {
            // stale failure data may name entries that are no longer blocked
            if blocked.contains(id) && seen.insert(id) {
                frontier.push_back(id.name());
            }
        }
    }
    seen.len()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Move {
    pub id: EntryId,
    /// Position among the tier's pending entries before the pass (0-based).
    pub from: usize,
    pub to: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScoredEntry {
    pub id: EntryId,
    pub score: usize,
    pub tier: Tier,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReorderReport {
    pub total_entries: usize,
    /// Entries whose position changed.
    pub reordered: usize,
    /// Entries whose stored impact score changed.
    pub rescored: usize,
    pub by_tier: BTreeMap<Tier, usize>,
    pub moves: BTreeMap<Tier, Vec<Move>>,
    pub top_scores: Vec<ScoredEntry>,
}

/// Reorders the pending entries of each tier by descending blocking impact,
/// ties kept in their original order, and stores each entry's score in
/// [`QueueEntry::impact`] for the selector. Entries that are not pending are
/// scored 0.
///
/// Pending entries only trade places among the queue slots pending entries of
/// the same tier already occupy; every other entry keeps its index.
///
/// [`QueueEntry::impact`]: crate::QueueEntry::impact
pub fn reorder_by_impact(queue: &mut Queue, blockers: &BlockerMap) -> ReorderReport {
    let mut report = ReorderReport { total_entries: queue.entries.len(), ..Default::default() };

    let blocked: BTreeSet<&EntryId> =
        queue.entries.iter().filter(|e| e.status == EntryStatus::Blocked).map(|e| &e.id).collect();

    let mut slots: BTreeMap<Tier, Vec<usize>> = BTreeMap::new();
    let mut scores: Vec<usize> = vec![0; queue.entries.len()];
    for (i, entry) in queue.entries.iter().enumerate() {
        *report.by_tier.entry(entry.tier).or_default() += 1;
        if entry.status == EntryStatus::Pending {
            slots.entry(entry.tier).or_default().push(i);
            scores[i] = blocking_impact(entry.name(), blockers, &blocked);
        }
    }

    let mut scored: Vec<ScoredEntry> = scores
        .iter()
        .enumerate()
        .filter(|&(_, &s)| s > 0)
        .map(|(i, &score)| ScoredEntry { id: queue.entries[i].id.clone(), score, tier: queue.entries[i].tier })
        .collect();
    scored.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    scored.truncate(TOP_SCORES);
    report.top_scores = scored;

    for (entry, &score) in queue.entries.iter_mut().zip(&scores) {
        let score = u32::try_from(score).unwrap_or(u32::MAX);
        if entry.impact != score {
            entry.impact = score;
            report.rescored += 1;
        }
    }

    let original = queue.entries.clone();
    for (tier, positions) in slots {
        let mut order: Vec<usize> = (0..positions.len()).collect();
        // stable sort keeps original order among equal scores
        order.sort_by(|&a, &b| scores[positions[b]].cmp(&scores[positions[a]]));

        for (to, &from) in order.iter().enumerate() {
            queue.entries[positions[to]] = original[positions[from]].clone();
            if to != from {
                report.reordered += 1;
                report.moves.entry(tier).or_default().push(Move {
                    id: original[positions[from]].id.clone(),
                    from,
                    to,
                });
            }
        }
    }
    report
}
