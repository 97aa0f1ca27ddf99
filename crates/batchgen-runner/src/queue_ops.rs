use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use tracing::info;

use batchgen_core::{BreakerState, EntryId, EntryStatus, EntryUpdate, QueueEntry, Tier};
use batchgen_store::QueueStore;

use crate::RunClock;

/// Adds a new pending entry at the end of the queue.
pub fn add_entry(store: &dyn QueueStore, clock: &dyn RunClock, id: &str, tier: Tier) -> Result<EntryId> {
    let id = EntryId::parse(id)?;
    let mut loaded = store.load().context("load queue")?;
    let now = clock.now_unix();
    loaded.file.queue.push(QueueEntry::new(id.clone(), tier, now))?;
    store.save(loaded.fingerprint.as_deref(), &mut loaded.file, now).context("save queue")?;
    info!(entry = %id, tier, "added entry");
    Ok(id)
}

/// Puts a failed or skipped entry back to pending and forgets its failure
/// history.
pub fn reset_entry(store: &dyn QueueStore, clock: &dyn RunClock, id: &str) -> Result<EntryStatus> {
    let id = EntryId::parse(id)?;
    let mut loaded = store.load().context("load queue")?;
    let entry = loaded.file.queue.get_mut(&id).ok_or_else(|| anyhow!("no queue entry {id}"))?;
    let previous = entry.status;
    if !matches!(previous, EntryStatus::Failed | EntryStatus::Skipped) {
        bail!("entry {id} is {previous}; only failed or skipped entries can be reset");
    }
    entry.apply(EntryUpdate::Reset);
    store.save(loaded.fingerprint.as_deref(), &mut loaded.file, clock.now_unix()).context("save queue")?;
    info!(entry = %id, from = %previous, "reset entry");
    Ok(previous)
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct EcosystemStatus {
    pub counts: BTreeMap<EntryStatus, usize>,
    pub breaker: BreakerState,
    pub consecutive_failures: u32,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct QueueStatus {
    pub total: usize,
    pub by_status: BTreeMap<EntryStatus, usize>,
    pub by_tier: BTreeMap<Tier, usize>,
    pub ecosystems: BTreeMap<String, EcosystemStatus>,
    /// Failed entries whose backoff window is still closed.
    pub waiting_for_retry: usize,
}

pub fn queue_status(store: &dyn QueueStore, clock: &dyn RunClock) -> Result<QueueStatus> {
    let loaded = store.load().context("load queue")?;
    let queue = &loaded.file.queue;
    let now = clock.now_unix();

    let mut status = QueueStatus { total: queue.entries.len(), ..Default::default() };
    for entry in &queue.entries {
        *status.by_status.entry(entry.status).or_default() += 1;
        *status.by_tier.entry(entry.tier).or_default() += 1;
        *status
            .ecosystems
            .entry(entry.ecosystem().to_string())
            .or_default()
            .counts
            .entry(entry.status)
            .or_default() += 1;
        if entry.status == EntryStatus::Failed && !entry.retry_window_open(now) {
            status.waiting_for_retry += 1;
        }
    }
    for (eco, breaker) in queue.breakers.iter() {
        let s = status.ecosystems.entry(eco.clone()).or_default();
        s.breaker = breaker.state;
        s.consecutive_failures = breaker.consecutive_failures;
    }
    Ok(status)
}

impl QueueStatus {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "entries: {}", self.total);
        for (status, n) in &self.by_status {
            let _ = writeln!(out, "  {status}: {n}");
        }
        if self.waiting_for_retry > 0 {
            let _ = writeln!(out, "  ({} failed entries waiting for their retry window)", self.waiting_for_retry);
        }
        for (tier, n) in &self.by_tier {
            let _ = writeln!(out, "tier {tier}: {n}");
        }
        for (eco, s) in &self.ecosystems {
            let counts: Vec<String> = s.counts.iter().map(|(st, n)| format!("{st}={n}")).collect();
            let _ = writeln!(
                out,
                "{eco}: breaker {} (failures {}) {}",
                s.breaker,
                s.consecutive_failures,
                counts.join(" ")
            );
        }
        out
    }
}
