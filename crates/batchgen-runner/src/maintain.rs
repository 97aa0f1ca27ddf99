use std::fmt::Write as _;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use batchgen_core::{reorder_by_impact, requeue_with_aliases, BlockerMap, RequeueReport, ReorderReport};
use batchgen_store::{FailureLog, QueueStore};

use crate::{Config, RunClock};

#[derive(Clone, Copy, Debug, Default)]
pub struct MaintainOptions {
    /// Compute and report, but leave the queue file untouched.
    pub dry_run: bool,
    pub skip_requeue: bool,
    pub skip_reorder: bool,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MaintainReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requeue: Option<RequeueReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reorder: Option<ReorderReport>,
    pub saved: bool,
}

/// Post-run maintenance: requeue entries whose blockers have all resolved,
/// then move high-impact pending entries forward within their tier.
///
/// Requeue runs first so that freshly unblocked entries are pending by the
/// time reorder scores them.
pub fn run_maintenance(
    cfg: &Config,
    store: &dyn QueueStore,
    failures: &FailureLog,
    clock: &dyn RunClock,
    opts: MaintainOptions,
) -> Result<MaintainReport> {
    let mut loaded = store.load().context("load queue")?;
    let queue = &mut loaded.file.queue;
    let mut report = MaintainReport::default();

    if !opts.skip_requeue {
        let r = requeue_with_aliases(queue, &cfg.alias_index());
        info!(requeued = r.requeued, remaining = r.remaining, "requeue");
        report.requeue = Some(r);
    }

    if !opts.skip_reorder {
        let mut blockers = BlockerMap::from_queue(queue);
        let scan = failures.scan().context("scan failure log")?;
        blockers.merge(scan.blocker_map());
        let r = reorder_by_impact(queue, &blockers);
        info!(
            total = r.total_entries,
            reordered = r.reordered,
            rescored = r.rescored,
            skipped_records = scan.skipped,
            "reorder"
        );
        report.reorder = Some(r);
    }

    let changed = report.requeue.as_ref().is_some_and(|r| r.requeued > 0)
        || report.reorder.as_ref().is_some_and(|r| r.reordered > 0 || r.rescored > 0);
    if changed && !opts.dry_run {
        store
            .save(loaded.fingerprint.as_deref(), &mut loaded.file, clock.now_unix())
            .context("save queue after maintenance")?;
        report.saved = true;
    }
    Ok(report)
}

impl MaintainReport {
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        if let Some(r) = &self.requeue {
            let _ = writeln!(out, "requeue: {} requeued, {} still blocked", r.requeued, r.remaining);
            for change in &r.details {
                let _ = writeln!(out, "  {} (resolved: {})", change.id, change.resolved_by.join(", "));
            }
        }
        if let Some(r) = &self.reorder {
            let _ = writeln!(out, "reorder: {} of {} entries moved", r.reordered, r.total_entries);
            for (tier, n) in &r.by_tier {
                let moved = r.moves.get(tier).map_or(0, Vec::len);
                let _ = writeln!(out, "  tier {tier}: {moved} of {n} moved");
            }
            if !r.top_scores.is_empty() {
                let _ = writeln!(out, "  top blockers:");
                for s in &r.top_scores {
                    let _ = writeln!(out, "    {} (tier {}) unblocks {}", s.id, s.tier, s.score);
                }
            }
        }
        let _ = writeln!(out, "{}", if self.saved { "queue saved" } else { "queue unchanged" });
        out
    }
}
