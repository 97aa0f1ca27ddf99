use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};

use batchgen_core::{DerivedConstraint, EntryId, EntryStatus, Tier};
use batchgen_exec::{ResultFileValidator, SubprocessExecutor};
use batchgen_store::{FailureLog, FileQueueStore, RunArtifacts};

use crate::{
    add_entry, derive_from_validator, doctor::doctor, queue_status, reset_entry, run_generation, run_maintenance,
    Config, GenerateContext, GenerateOptions, GenerateReport, MaintainOptions, MaintainReport, QueueStatus,
    SystemClock,
};

/// The scheduler wired to a repository: file-backed queue, failure log and
/// result files under the configured paths, the subprocess executor and the
/// system clock.
pub struct Runner {
    pub repo_root: PathBuf,
    pub cfg: Config,
    pub store: FileQueueStore,
    pub failures: FailureLog,
    pub artifacts: RunArtifacts,
    pub clock: SystemClock,
}

impl Runner {
    pub fn open(repo_root: PathBuf) -> Result<Self> {
        let cfg = Config::load_or_default(&repo_root)?;
        let store = FileQueueStore::new(cfg.queue_path(&repo_root));
        let failures = FailureLog::new(cfg.failures_dir(&repo_root));
        let artifacts = RunArtifacts::new(cfg.results_dir(&repo_root));
        Ok(Self { repo_root, cfg, store, failures, artifacts, clock: SystemClock })
    }

    /// Writes the default config (if none exists) and creates the data
    /// directories. Returns the config path.
    pub fn init_repo(repo_root: &Path) -> Result<PathBuf> {
        let cfg_path = Config::config_path(repo_root);
        let cfg = if cfg_path.exists() {
            Config::load_from(&cfg_path)?
        } else {
            let cfg = Config::default_for_repo(repo_root);
            cfg.save_to(&cfg_path)?;
            cfg
        };
        for dir in [cfg.failures_dir(repo_root), cfg.results_dir(repo_root)] {
            std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        }
        if let Some(parent) = cfg.queue_path(repo_root).parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        Ok(cfg_path)
    }

    pub fn doctor(&self) -> Result<()> {
        doctor(&self.repo_root, &self.cfg)
    }

    pub fn executor(&self) -> SubprocessExecutor {
        SubprocessExecutor::new(self.cfg.executor.program.clone(), self.cfg.executor.args.clone())
    }

    pub fn generate(&self, opts: &GenerateOptions, cancel: &AtomicBool) -> Result<GenerateReport> {
        let executor = self.executor();
        let ctx = GenerateContext {
            cfg: &self.cfg,
            store: &self.store,
            executor: &executor,
            failures: &self.failures,
            artifacts: &self.artifacts,
            clock: &self.clock,
            cancel,
        };
        run_generation(&ctx, opts)
    }

    pub fn maintain(&self, opts: MaintainOptions) -> Result<MaintainReport> {
        run_maintenance(&self.cfg, &self.store, &self.failures, &self.clock, opts)
    }

    pub fn status(&self) -> Result<QueueStatus> {
        queue_status(&self.store, &self.clock)
    }

    pub fn add(&self, id: &str, tier: Tier) -> Result<EntryId> {
        add_entry(&self.store, &self.clock, id, tier)
    }

    pub fn reset(&self, id: &str) -> Result<EntryStatus> {
        reset_entry(&self.store, &self.clock, id)
    }

    pub fn derive_constraints(
        &self,
        results: &Path,
        recipes: &[String],
        environments: &[String],
    ) -> Result<BTreeMap<String, DerivedConstraint>> {
        derive_from_validator(&ResultFileValidator::new(results), recipes, environments)
    }
}
