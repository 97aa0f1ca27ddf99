use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use batchgen_core::{
    select_candidates, AttemptOutcome, BreakerTransition, EntryId, EntryUpdate, ExecutorReport, FailureCategory,
    RunId, RunSummary, SelectionCriteria, Tier,
};
use batchgen_exec::RecipeExecutor;
use batchgen_queue::{classify, ClassifyContext};
use batchgen_store::{FailureLog, QueueStore, RunArtifacts};

use crate::{Config, RunClock};

/// Subcategory for executor invocations that failed before producing a
/// report (spawn failure, unparseable output).
pub const SUBCATEGORY_EXECUTOR_ERROR: &str = "executor_error";

/// Per-run overrides of the configured selection knobs.
#[derive(Clone, Debug, Default)]
pub struct GenerateOptions {
    pub batch_size: Option<usize>,
    pub max_tier: Option<Tier>,
    pub ecosystem: Option<String>,
    /// Select and report, but invoke nothing and write nothing.
    pub dry_run: bool,
}

/// Everything one generation run touches.
pub struct GenerateContext<'a> {
    pub cfg: &'a Config,
    pub store: &'a dyn QueueStore,
    pub executor: &'a dyn RecipeExecutor,
    pub failures: &'a FailureLog,
    pub artifacts: &'a RunArtifacts,
    pub clock: &'a dyn RunClock,
    /// Checked before each candidate; once set, no further candidates start.
    pub cancel: &'a AtomicBool,
}

#[derive(Clone, Debug, Serialize)]
pub struct AttemptRecord {
    pub id: EntryId,
    pub outcome: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct GenerateReport {
    pub dry_run: bool,
    pub selected: Vec<EntryId>,
    pub attempts: Vec<AttemptRecord>,
    pub summary: RunSummary,
    pub failure_records: usize,
}

/// Sleeps the per-ecosystem minimum interval before every invocation but the
/// first of the run.
struct RateLimiter<'a> {
    cfg: &'a Config,
    clock: &'a dyn RunClock,
    started: bool,
}

impl RateLimiter<'_> {
    fn pace(&mut self, ecosystem: &str) {
        if !self.started {
            self.started = true;
            return;
        }
        let wait = self.cfg.interval_for(ecosystem);
        debug!(ecosystem = %ecosystem, wait_ms = wait.as_millis() as u64, "rate limit");
        self.clock.sleep(wait);
    }
}

fn outcome_label(outcome: AttemptOutcome) -> String {
    match outcome {
        AttemptOutcome::Succeeded => "success".to_string(),
        AttemptOutcome::Blocked => "blocked".to_string(),
        AttemptOutcome::Failed(category) => format!("failed:{category}"),
    }
}

fn log_transitions(transitions: &[BreakerTransition]) {
    for t in transitions {
        info!(ecosystem = %t.ecosystem, from = %t.from, to = %t.to, "circuit breaker transition");
    }
}

/// One batch run: select, invoke each candidate once, classify, evaluate
/// breakers, then commit the queue, the failure log and the run summary.
///
/// Queue changes are saved with a guarded write; if another writer touched the
/// queue since it was loaded the run aborts without committing anything.
pub fn run_generation(ctx: &GenerateContext<'_>, opts: &GenerateOptions) -> Result<GenerateReport> {
    let cfg = ctx.cfg;
    let policy = cfg.breaker_policy();
    let mut loaded = ctx.store.load().context("load queue")?;
    let started_at = ctx.clock.now_unix();
    let queue = &mut loaded.file.queue;

    let mut transitions = queue.breakers.advance(started_at, &policy);
    log_transitions(&transitions);

    let criteria = SelectionCriteria {
        max_tier: opts.max_tier.unwrap_or(cfg.batch.max_tier),
        batch_size: opts.batch_size.unwrap_or(cfg.batch.batch_size),
        ecosystem: opts.ecosystem.clone(),
        now_unix: started_at,
    };
    let selection = select_candidates(queue, &criteria);
    let selected: Vec<EntryId> = selection.iter().map(|&i| queue.entries[i].id.clone()).collect();
    info!(selected = selected.len(), max_tier = criteria.max_tier, batch_size = criteria.batch_size, "selected candidates");

    let mut summary = RunSummary::new(RunId::new(), started_at);
    if opts.dry_run {
        return Ok(GenerateReport { dry_run: true, selected, attempts: Vec::new(), summary, failure_records: 0 });
    }

    let timeout = cfg.executor_timeout();
    let mut limiter = RateLimiter { cfg, clock: ctx.clock, started: false };
    let mut records = Vec::new();
    let mut attempts = Vec::new();

    for (n, &idx) in selection.iter().enumerate() {
        if ctx.cancel.load(Ordering::SeqCst) {
            summary.cancelled = u32::try_from(selection.len() - n).unwrap_or(u32::MAX);
            warn!(remaining = summary.cancelled, "run cancelled; committing classified candidates");
            break;
        }
        let entry = &mut queue.entries[idx];
        limiter.pace(entry.ecosystem());
        entry.apply(EntryUpdate::Started);

        let report = invoke(ctx.executor, &entry.id, timeout);
        let classify_ctx = ClassifyContext {
            now_unix: ctx.clock.now_unix(),
            environment: &cfg.batch.environment,
            backoff: cfg.backoff_policy(),
        };
        let classification = classify(entry, &report, &classify_ctx);
        entry.apply(classification.update);
        info!(entry = %entry.id, status = %entry.status, outcome = %outcome_label(classification.outcome), "classified");

        summary.record(entry.ecosystem(), classification.outcome);
        attempts.push(AttemptRecord { id: entry.id.clone(), outcome: outcome_label(classification.outcome) });
        records.extend(classification.record);
    }

    let finished_at = ctx.clock.now_unix();
    let evaluated = queue.breakers.evaluate(&summary.per_ecosystem, finished_at, &policy);
    log_transitions(&evaluated);
    transitions.extend(evaluated);
    summary.breaker_transitions = transitions;
    summary.finished_at_unix = finished_at;

    ctx.store
        .save(loaded.fingerprint.as_deref(), &mut loaded.file, finished_at)
        .context("save queue (nothing from this run was committed)")?;
    let failure_records = ctx.failures.append(&records).context("append failure records")?;
    ctx.artifacts.write_summary(&summary).context("write run summary")?;

    info!(
        run_id = %summary.run_id.as_str(),
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        blocked = summary.blocked,
        "run complete"
    );
    Ok(GenerateReport { dry_run: false, selected, attempts, summary, failure_records })
}

fn invoke(executor: &dyn RecipeExecutor, id: &EntryId, timeout: Duration) -> ExecutorReport {
    match executor.execute(id, timeout) {
        Ok(report) => report,
        Err(e) => {
            warn!(entry = %id, error = %e, "executor invocation failed");
            ExecutorReport::failure(FailureCategory::Internal, e.to_string()).with_subcategory(SUBCATEGORY_EXECUTOR_ERROR)
        }
    }
}
