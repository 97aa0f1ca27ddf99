use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use batchgen_core::{AliasIndex, BackoffPolicy, BreakerPolicy, Tier, MAX_TIER, MIN_TIER};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub paths: PathsConfig,
    pub batch: BatchConfig,
    pub breaker: BreakerConfig,
    pub rate_limit: RateLimitConfig,
    pub backoff: BackoffConfig,
    pub executor: ExecutorConfig,
    /// Blocker name -> canonical recipe name, consulted by requeue when an
    /// exact match fails.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathsConfig {
    pub queue: String,
    pub failures_dir: String,
    pub results_dir: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub max_tier: Tier,
    /// Failure log partition for this runner, e.g. `linux-x86_64`.
    pub environment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_secs: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub default_interval_ms: u64,
    #[serde(default)]
    pub ecosystems: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base_secs: u64,
    pub max_secs: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl Config {
    pub fn default_for_repo(_repo_root: &Path) -> Self {
        let ecosystems = [
            ("homebrew", 1000),
            ("cargo", 1000),
            ("npm", 1000),
            ("pypi", 1000),
            ("go", 1000),
            ("cpan", 1000),
            ("cask", 1000),
            ("rubygems", 6000),
            ("github", 2000),
        ]
        .into_iter()
        .map(|(eco, ms)| (eco.to_string(), ms))
        .collect();

        Self {
            paths: PathsConfig {
                queue: "data/queues/priority-queue.json".to_string(),
                failures_dir: "data/failures".to_string(),
                results_dir: "data".to_string(),
            },
            batch: BatchConfig { batch_size: 25, max_tier: 2, environment: "linux-x86_64".to_string() },
            breaker: BreakerConfig { failure_threshold: 3, cooldown_secs: 60 * 60 },
            rate_limit: RateLimitConfig { default_interval_ms: 1000, ecosystems },
            backoff: BackoffConfig { base_secs: 24 * 60 * 60, max_secs: 7 * 24 * 60 * 60 },
            executor: ExecutorConfig {
                program: "batchgen-executor".to_string(),
                args: vec!["create".to_string(), "--from".to_string(), "{source}".to_string(), "--json".to_string()],
                timeout_secs: 600,
            },
            aliases: BTreeMap::new(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        cfg.validate().with_context(|| format!("invalid config {}", path.display()))?;
        Ok(cfg)
    }

    /// Loads the repo config, falling back to defaults when none was written.
    pub fn load_or_default(repo_root: &Path) -> Result<Self> {
        let path = Self::config_path(repo_root);
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default_for_repo(repo_root))
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.batch_size == 0 {
            return Err(anyhow!("batch.batch_size must be at least 1"));
        }
        if !(MIN_TIER..=MAX_TIER).contains(&self.batch.max_tier) {
            return Err(anyhow!("batch.max_tier must be {MIN_TIER}..={MAX_TIER}, got {}", self.batch.max_tier));
        }
        if self.batch.environment.is_empty() || self.batch.environment.contains(['/', '\\']) {
            return Err(anyhow!("batch.environment must be a plain name, got {:?}", self.batch.environment));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(anyhow!("breaker.failure_threshold must be at least 1"));
        }
        if self.breaker.cooldown_secs < 0 {
            return Err(anyhow!("breaker.cooldown_secs must not be negative"));
        }
        if self.rate_limit.default_interval_ms == 0 {
            return Err(anyhow!("rate_limit.default_interval_ms must be non-zero"));
        }
        if let Some((eco, _)) = self.rate_limit.ecosystems.iter().find(|(_, ms)| **ms == 0) {
            return Err(anyhow!("rate_limit.ecosystems.{eco} must be non-zero"));
        }
        if self.backoff.base_secs > self.backoff.max_secs {
            return Err(anyhow!("backoff.base_secs must not exceed backoff.max_secs"));
        }
        if self.executor.program.trim().is_empty() {
            return Err(anyhow!("executor.program must be set"));
        }
        Ok(())
    }

    pub fn config_path(repo_root: &Path) -> PathBuf {
        repo_root.join(".batchgen").join("batchgen.toml")
    }

    pub fn queue_path(&self, repo_root: &Path) -> PathBuf {
        resolve(repo_root, &self.paths.queue)
    }

    pub fn failures_dir(&self, repo_root: &Path) -> PathBuf {
        resolve(repo_root, &self.paths.failures_dir)
    }

    pub fn results_dir(&self, repo_root: &Path) -> PathBuf {
        resolve(repo_root, &self.paths.results_dir)
    }

    pub fn breaker_policy(&self) -> BreakerPolicy {
        BreakerPolicy { failure_threshold: self.breaker.failure_threshold, cooldown_secs: self.breaker.cooldown_secs }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy { base_secs: self.backoff.base_secs, max_secs: self.backoff.max_secs }
    }

    pub fn alias_index(&self) -> AliasIndex {
        AliasIndex::new(self.aliases.clone())
    }

    pub fn executor_timeout(&self) -> Duration {
        Duration::from_secs(self.executor.timeout_secs)
    }

    /// Minimum gap between two executor invocations for `ecosystem`.
    pub fn interval_for(&self, ecosystem: &str) -> Duration {
        let ms = self.rate_limit.ecosystems.get(ecosystem).copied().unwrap_or(self.rate_limit.default_interval_ms);
        Duration::from_millis(ms.max(1))
    }
}

/// `~` is expanded; relative paths are taken from the repo root.
fn resolve(repo_root: &Path, p: &str) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(p).to_string());
    if expanded.is_absolute() {
        expanded
    } else {
        repo_root.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_round_trips_through_toml() {
        let dir = tempdir().unwrap();
        let path = Config::config_path(dir.path());
        let cfg = Config::default_for_repo(dir.path());
        cfg.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn per_ecosystem_intervals_with_default_fallback() {
        let cfg = Config::default_for_repo(Path::new("."));
        assert_eq!(cfg.interval_for("rubygems"), Duration::from_secs(6));
        assert_eq!(cfg.interval_for("github"), Duration::from_secs(2));
        assert_eq!(cfg.interval_for("never-heard-of-it"), Duration::from_secs(1));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let base = Config::default_for_repo(Path::new("."));

        let mut c = base.clone();
        c.rate_limit.ecosystems.insert("npm".into(), 0);
        assert!(c.validate().is_err());

        let mut c = base.clone();
        c.batch.max_tier = 4;
        assert!(c.validate().is_err());

        let mut c = base.clone();
        c.backoff.base_secs = c.backoff.max_secs + 1;
        assert!(c.validate().is_err());

        let mut c = base;
        c.breaker.failure_threshold = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn relative_paths_resolve_against_repo_root() {
        let cfg = Config::default_for_repo(Path::new("/repo"));
        assert_eq!(cfg.queue_path(Path::new("/repo")), PathBuf::from("/repo/data/queues/priority-queue.json"));
    }

    #[test]
    fn aliases_section_is_optional() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("batchgen.toml");
        let mut cfg = Config::default_for_repo(dir.path());
        cfg.aliases.insert("openssl@3".into(), "openssl".into());
        cfg.save_to(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("[aliases]"));
        assert_eq!(Config::load_from(&path).unwrap().alias_index().canonical("openssl@3"), Some("openssl"));
    }
}
