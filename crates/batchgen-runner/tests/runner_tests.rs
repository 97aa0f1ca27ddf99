use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use batchgen_core::{EntryId, EntryStatus, ExecutorReport, FailureCategory, Queue, QueueEntry, RunSummary};
use batchgen_exec::{ExecError, RecipeExecutor};
use batchgen_runner::{
    run_generation, run_maintenance, Config, GenerateContext, GenerateOptions, MaintainOptions, ManualClock,
};
use batchgen_store::{FailureLog, FileQueueStore, QueueFile, QueueStore, RunArtifacts, StoreError};
use tempfile::tempdir;

fn id(s: &str) -> EntryId {
    EntryId::parse(s).unwrap()
}

fn seed(store: &FileQueueStore, entries: Vec<QueueEntry>) {
    let mut file = QueueFile::new(Queue::new(entries));
    store.save(None, &mut file, 1).unwrap();
}

struct Fixed(fn(&EntryId) -> ExecutorReport);

impl RecipeExecutor for Fixed {
    fn execute(&self, package: &EntryId, _timeout: Duration) -> Result<ExecutorReport, ExecError> {
        Ok((self.0)(package))
    }
}

/// Rewrites the queue file while "executing", as a concurrent run would.
struct Interloper {
    queue_path: std::path::PathBuf,
}

impl RecipeExecutor for Interloper {
    fn execute(&self, _package: &EntryId, _timeout: Duration) -> Result<ExecutorReport, ExecError> {
        let store = FileQueueStore::new(&self.queue_path);
        let mut loaded = store.load().unwrap();
        loaded.file.queue.push(QueueEntry::new(id("cargo:intruder"), 3, 0)).unwrap();
        store.save(loaded.fingerprint.as_deref(), &mut loaded.file, 2).unwrap();
        Ok(ExecutorReport::failure(FailureCategory::ValidationFailed, "checksum mismatch"))
    }
}

struct Harness {
    cfg: Config,
    store: FileQueueStore,
    failures: FailureLog,
    artifacts: RunArtifacts,
    clock: ManualClock,
    cancel: AtomicBool,
}

impl Harness {
    fn new(root: &Path) -> Self {
        let cfg = Config::default_for_repo(root);
        Self {
            store: FileQueueStore::new(cfg.queue_path(root)),
            failures: FailureLog::new(cfg.failures_dir(root)),
            artifacts: RunArtifacts::new(cfg.results_dir(root)),
            cfg,
            clock: ManualClock::at(10_000),
            cancel: AtomicBool::new(false),
        }
    }

    fn ctx<'a>(&'a self, executor: &'a dyn RecipeExecutor) -> GenerateContext<'a> {
        GenerateContext {
            cfg: &self.cfg,
            store: &self.store,
            executor,
            failures: &self.failures,
            artifacts: &self.artifacts,
            clock: &self.clock,
            cancel: &self.cancel,
        }
    }
}

#[test]
fn full_run_commits_queue_failure_log_and_summary() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    seed(
        &h.store,
        vec![
            QueueEntry::new(id("homebrew:openssl"), 1, 1),
            QueueEntry::new(id("homebrew:curl"), 2, 2),
            QueueEntry::new(id("cargo:bat"), 2, 3),
        ],
    );
    let exec = Fixed(|p| match p.name() {
        "curl" => ExecutorReport::missing_dependencies(vec!["openssl".into()]),
        "bat" => ExecutorReport::failure(FailureCategory::NetworkRetryable, "timeout"),
        _ => ExecutorReport::success(),
    });

    let report = run_generation(&h.ctx(&exec), &GenerateOptions::default()).unwrap();
    assert_eq!(report.attempts.len(), 3);
    assert_eq!(report.failure_records, 2);

    let queue = h.store.load().unwrap().file.queue;
    assert_eq!(queue.get(&id("homebrew:curl")).unwrap().status, EntryStatus::Blocked);
    let bat = queue.get(&id("cargo:bat")).unwrap();
    assert_eq!(bat.status, EntryStatus::Failed);
    // first network failure waits one backoff base
    assert!(bat.next_retry_at_unix.unwrap() >= 10_000 + 86_400);

    let summary: RunSummary = h.artifacts.read_summary().unwrap().unwrap();
    assert_eq!(summary.run_id, report.summary.run_id);
    assert!(std::fs::read_to_string(h.artifacts.summary_path()).unwrap().contains("Blocked"));
    assert!(h.failures.partition_path("cargo", "linux-x86_64").unwrap().exists());

    // the next maintenance pass requeues curl (openssl succeeded) and keeps
    // nothing blocked
    let m = run_maintenance(&h.cfg, &h.store, &h.failures, &h.clock, MaintainOptions::default()).unwrap();
    assert_eq!(m.requeue.unwrap().requeued, 1);
    assert!(m.saved);
    let queue = h.store.load().unwrap().file.queue;
    assert_eq!(queue.get(&id("homebrew:curl")).unwrap().status, EntryStatus::Pending);
}

#[test]
fn concurrent_write_aborts_without_committing() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    seed(&h.store, vec![QueueEntry::new(id("npm:chalk"), 1, 1)]);
    let exec = Interloper { queue_path: h.store.path.clone() };

    let err = run_generation(&h.ctx(&exec), &GenerateOptions::default()).unwrap_err();
    assert!(
        err.chain().any(|e| matches!(e.downcast_ref::<StoreError>(), Some(StoreError::Conflict { .. }))),
        "{err:#}"
    );

    // the interloper's write stands; nothing from the aborted run landed
    let queue = h.store.load().unwrap().file.queue;
    assert_eq!(queue.entries.len(), 2);
    assert_eq!(queue.get(&id("npm:chalk")).unwrap().status, EntryStatus::Pending);
    assert!(h.failures.scan().unwrap().records.is_empty());
    assert!(h.artifacts.read_summary().unwrap().is_none());
}

#[test]
fn dry_run_selects_without_invoking_or_writing() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    seed(
        &h.store,
        vec![QueueEntry::new(id("pypi:ruff"), 2, 2), QueueEntry::new(id("pypi:black"), 1, 5)],
    );
    let before = std::fs::read(&h.store.path).unwrap();
    let exec = Fixed(|_| panic!("dry run must not invoke the executor"));

    let opts = GenerateOptions { dry_run: true, batch_size: Some(1), ..Default::default() };
    let report = run_generation(&h.ctx(&exec), &opts).unwrap();
    assert_eq!(report.selected, vec![id("pypi:black")]);
    assert_eq!(std::fs::read(&h.store.path).unwrap(), before);
    assert!(h.clock.sleeps().is_empty());
}

#[test]
fn ecosystem_filter_restricts_the_run() {
    let dir = tempdir().unwrap();
    let h = Harness::new(dir.path());
    seed(
        &h.store,
        vec![QueueEntry::new(id("go:hugo"), 2, 1), QueueEntry::new(id("cpan:moose"), 2, 2)],
    );
    let exec = Fixed(|_| ExecutorReport::success());
    let opts = GenerateOptions { ecosystem: Some("cpan".into()), ..Default::default() };
    let report = run_generation(&h.ctx(&exec), &opts).unwrap();
    assert_eq!(report.selected, vec![id("cpan:moose")]);
    let queue = h.store.load().unwrap().file.queue;
    assert_eq!(queue.get(&id("go:hugo")).unwrap().status, EntryStatus::Pending);
}
