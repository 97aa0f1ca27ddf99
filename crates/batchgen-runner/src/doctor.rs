use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use batchgen_store::{FileQueueStore, QueueStore};

use crate::Config;

/// Preflight checks before a run. Fails on the first problem found.
pub fn doctor(repo_root: &Path, cfg: &Config) -> Result<()> {
    cfg.validate().context("configuration")?;

    let queue_path = cfg.queue_path(repo_root);
    let loaded = FileQueueStore::new(&queue_path)
        .load()
        .with_context(|| format!("queue file {}", queue_path.display()))?;
    debug!(entries = loaded.file.queue.entries.len(), path = %queue_path.display(), "queue loads");

    let failures_dir = cfg.failures_dir(repo_root);
    std::fs::create_dir_all(&failures_dir).with_context(|| format!("create {}", failures_dir.display()))?;
    let probe = failures_dir.join(".batchgen-doctor-probe");
    std::fs::write(&probe, b"ok").with_context(|| format!("failures dir not writable: {}", failures_dir.display()))?;
    let _ = std::fs::remove_file(&probe);

    let program = &cfg.executor.program;
    let found = find_program(program)
        .ok_or_else(|| anyhow!("executor program {program:?} not found; set [executor].program in the config"))?;
    debug!(program = %found.display(), "executor resolves");
    Ok(())
}

/// Resolves `program` the way spawning would: as a path when it contains a
/// separator, otherwise by searching `PATH`.
fn find_program(program: &str) -> Option<PathBuf> {
    let expanded = PathBuf::from(shellexpand::tilde(program).to_string());
    if expanded.components().count() > 1 || expanded.is_absolute() {
        return expanded.is_file().then_some(expanded);
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).map(|dir| dir.join(&expanded)).find(|p| p.is_file())
}
