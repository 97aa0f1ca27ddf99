//! Result classifier: turns one executor report into a queue mutation, an
//! optional failure log record, and the outcome fed to the circuit breaker.
//!
//! Pure and testable; the runner applies the result to the queue and the
//! failure log.

use std::collections::BTreeSet;

use batchgen_core::{
    AttemptOutcome, BackoffPolicy, EntryUpdate, ExecutorReport, FailureCategory, FailureRecord, QueueEntry,
    FAILURE_RECORD_SCHEMA_VERSION,
};

/// Upper bound on dependency names kept from a single report.
pub const MAX_BLOCKED_BY: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again in a later run, not before this many seconds.
    RetryAfterSecs(u64),
    /// Wait for the named dependencies; only the requeue engine releases it.
    Block(BTreeSet<String>),
    /// No automatic retry; an operator may re-queue it.
    Terminal,
}

/// Fixed per-category retry policy.
/// - network_retryable: exponential backoff on the consecutive failure count
/// - missing_dependency: block on the sanitized names, terminal if none survive
/// - everything else: terminal
pub fn decide_retry(
    category: FailureCategory,
    blocked_by: &[String],
    failure_count: u32,
    backoff: &BackoffPolicy,
) -> RetryDecision {
    match category {
        FailureCategory::NetworkRetryable => RetryDecision::RetryAfterSecs(backoff.delay_seconds(failure_count)),
        FailureCategory::MissingDependency => {
            let names = sanitize_dependencies(blocked_by);
            if names.is_empty() {
                RetryDecision::Terminal
            } else {
                RetryDecision::Block(names)
            }
        }
        FailureCategory::NotFound
        | FailureCategory::ValidationFailed
        | FailureCategory::DeterministicInsufficient
        | FailureCategory::Internal => RetryDecision::Terminal,
    }
}

/// Trims and de-duplicates dependency names, dropping any that could escape a
/// path or inject markup, and keeps at most [`MAX_BLOCKED_BY`].
pub fn sanitize_dependencies(names: &[String]) -> BTreeSet<String> {
    names
        .iter()
        .map(|n| n.trim())
        .filter(|n| is_valid_dependency_name(n))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .take(MAX_BLOCKED_BY)
        .collect()
}

pub fn is_valid_dependency_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\', '<', '>']) && !name.contains("..")
}

/// Everything the classifier needs besides the entry and the report.
#[derive(Clone, Debug)]
pub struct ClassifyContext<'a> {
    pub now_unix: i64,
    /// Failure log partition name, e.g. `linux-x86_64`.
    pub environment: &'a str,
    pub backoff: BackoffPolicy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub update: EntryUpdate,
    pub record: Option<FailureRecord>,
    pub outcome: AttemptOutcome,
}

pub fn classify(entry: &QueueEntry, report: &ExecutorReport, ctx: &ClassifyContext<'_>) -> Classification {
    if report.is_success() {
        return Classification { update: EntryUpdate::Succeeded, record: None, outcome: AttemptOutcome::Succeeded };
    }

    // a failure without a category is an executor bug
    let category = report.category.unwrap_or(FailureCategory::Internal);
    let failure_count = entry.failure_count.saturating_add(1);
    let decision = decide_retry(category, &report.blocked_by, failure_count, &ctx.backoff);

    let mut record = FailureRecord {
        schema_version: FAILURE_RECORD_SCHEMA_VERSION,
        package_id: entry.id.clone(),
        environment: ctx.environment.to_string(),
        category,
        subcategory: report.subcategory.clone(),
        blocked_by: Vec::new(),
        message: report.message.clone(),
        timestamp_unix: ctx.now_unix,
    };

    let (update, outcome) = match decision {
        RetryDecision::Block(blocked_by) => {
            record.blocked_by = blocked_by.iter().cloned().collect();
            (EntryUpdate::Blocked { blocked_by }, AttemptOutcome::Blocked)
        }
        RetryDecision::RetryAfterSecs(secs) => {
            let retry_at_unix = ctx.now_unix.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX));
            (EntryUpdate::RetryLater { category, failure_count, retry_at_unix }, AttemptOutcome::Failed(category))
        }
        RetryDecision::Terminal => (EntryUpdate::Terminal { category, failure_count }, AttemptOutcome::Failed(category)),
    };
    Classification { update, record: Some(record), outcome }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchgen_core::{EntryId, EntryStatus, SUBCATEGORY_DEADLINE_EXCEEDED};

    const BACKOFF: BackoffPolicy = BackoffPolicy { base_secs: 100, max_secs: 1_000 };

    fn ctx() -> ClassifyContext<'static> {
        ClassifyContext { now_unix: 5_000, environment: "linux-x86_64", backoff: BACKOFF }
    }

    fn entry() -> QueueEntry {
        QueueEntry::new(EntryId::parse("homebrew:ffmpeg").unwrap(), 2, 0)
    }

    fn names(ns: &[&str]) -> Vec<String> {
        ns.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn network_failures_back_off_exponentially() {
        assert_eq!(
            decide_retry(FailureCategory::NetworkRetryable, &[], 1, &BACKOFF),
            RetryDecision::RetryAfterSecs(100)
        );
        assert_eq!(
            decide_retry(FailureCategory::NetworkRetryable, &[], 3, &BACKOFF),
            RetryDecision::RetryAfterSecs(400)
        );
        assert_eq!(
            decide_retry(FailureCategory::NetworkRetryable, &[], 9, &BACKOFF),
            RetryDecision::RetryAfterSecs(1_000)
        );
    }

    #[test]
    fn terminal_categories_never_retry_by_time() {
        for category in [
            FailureCategory::NotFound,
            FailureCategory::ValidationFailed,
            FailureCategory::DeterministicInsufficient,
            FailureCategory::Internal,
        ] {
            assert_eq!(decide_retry(category, &[], 1, &BACKOFF), RetryDecision::Terminal);
        }
    }

    #[test]
    fn sanitize_drops_unsafe_names_and_dedupes() {
        let got = sanitize_dependencies(&names(&[" x264 ", "lame", "x264", "../etc", "a/b", "<script>", ""]));
        assert_eq!(got, BTreeSet::from(["lame".to_string(), "x264".to_string()]));
    }

    #[test]
    fn sanitize_caps_list_length() {
        let many: Vec<String> = (0..150).map(|i| format!("dep{i:03}")).collect();
        assert_eq!(sanitize_dependencies(&many).len(), MAX_BLOCKED_BY);
    }

    #[test]
    fn success_clears_state() {
        let c = classify(&entry(), &ExecutorReport::success(), &ctx());
        assert_eq!(c.update, EntryUpdate::Succeeded);
        assert!(c.record.is_none());
        assert_eq!(c.outcome, AttemptOutcome::Succeeded);
    }

    #[test]
    fn missing_dependency_blocks_and_records_names() {
        let c = classify(&entry(), &ExecutorReport::missing_dependencies(names(&["x264", "lame"])), &ctx());
        assert_eq!(c.outcome, AttemptOutcome::Blocked);
        let record = c.record.unwrap();
        assert_eq!(record.category, FailureCategory::MissingDependency);
        assert_eq!(record.blocked_by, names(&["lame", "x264"]));

        let mut e = entry();
        e.apply(c.update);
        assert_eq!(e.status, EntryStatus::Blocked);
        assert!(e.validate().is_ok());
    }

    #[test]
    fn missing_dependency_without_usable_names_is_terminal() {
        let c = classify(&entry(), &ExecutorReport::missing_dependencies(names(&["../x"])), &ctx());
        assert_eq!(
            c.update,
            EntryUpdate::Terminal { category: FailureCategory::MissingDependency, failure_count: 1 }
        );
        assert_eq!(c.outcome, AttemptOutcome::Failed(FailureCategory::MissingDependency));
    }

    #[test]
    fn retryable_failure_schedules_next_attempt() {
        let mut e = entry();
        e.failure_count = 1;
        let c = classify(&e, &ExecutorReport::failure(FailureCategory::NetworkRetryable, "dns"), &ctx());
        assert_eq!(
            c.update,
            EntryUpdate::RetryLater {
                category: FailureCategory::NetworkRetryable,
                failure_count: 2,
                retry_at_unix: 5_200,
            }
        );
        assert_eq!(c.record.unwrap().environment, "linux-x86_64");
    }

    #[test]
    fn deadline_overrun_is_terminal_internal() {
        let c = classify(&entry(), &ExecutorReport::deadline_exceeded(600), &ctx());
        assert_eq!(c.outcome, AttemptOutcome::Failed(FailureCategory::Internal));
        assert!(matches!(c.update, EntryUpdate::Terminal { .. }));
        assert_eq!(c.record.unwrap().subcategory.as_deref(), Some(SUBCATEGORY_DEADLINE_EXCEEDED));
    }

    #[test]
    fn uncategorized_failure_is_internal() {
        let mut report = ExecutorReport::failure(FailureCategory::NotFound, "verify failed");
        report.category = None;
        let c = classify(&entry(), &report, &ctx());
        assert_eq!(c.outcome, AttemptOutcome::Failed(FailureCategory::Internal));
    }
}
