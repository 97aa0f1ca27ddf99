use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use batchgen_core::{BreakerState, EntryId, EntryStatus, ExecutorReport, Queue, Tier};
use batchgen_exec::{ExecError, RecipeExecutor};
use batchgen_store::{FailureLog, MemoryQueueStore, QueueStore, RunArtifacts};

use crate::{run_generation, Config, GenerateContext, GenerateOptions, GenerateReport, ManualClock};

const SCRIPTED_PROGRAM: &str = "scripted";

/// `scenario.yaml`: a starting queue, scripted executor outcomes and the
/// knobs that differ from the default config.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    pub scenario_id: String,
    pub now: i64,
    #[serde(default)]
    pub config: ScenarioConfig,
    pub queue: Queue,
    #[serde(default)]
    pub executor: BTreeMap<EntryId, ScriptStep>,
    /// Raise the cancel flag after this many invocations.
    #[serde(default)]
    pub cancel_after: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScenarioConfig {
    pub batch_size: Option<usize>,
    pub max_tier: Option<Tier>,
    pub failure_threshold: Option<u32>,
    pub cooldown_secs: Option<i64>,
    #[serde(default)]
    pub rate_limit_ms: BTreeMap<String, u64>,
}

/// What the scripted executor does for one package.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    /// The invocation itself fails (no report).
    Error { error: String },
    Report(ExecutorReport),
}

#[derive(Debug, Deserialize)]
pub struct ScenarioExpected {
    pub scenario_id: String,
    pub invocations: Vec<EntryId>,
    pub summary: ExpectedSummary,
    #[serde(default)]
    pub statuses: BTreeMap<EntryId, EntryStatus>,
    #[serde(default)]
    pub breakers: BTreeMap<String, BreakerState>,
    #[serde(default)]
    pub sleeps_ms: Option<Vec<u64>>,
    pub failure_records: usize,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct ExpectedSummary {
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub blocked: u32,
    #[serde(default)]
    pub cancelled: u32,
}

#[derive(Debug)]
pub struct ScenarioResult {
    pub report: GenerateReport,
    pub queue: Queue,
    pub invocations: Vec<EntryId>,
    pub sleeps: Vec<Duration>,
    /// Records readable from the failure log after the run.
    pub failure_records: usize,
}

impl ScenarioResult {
    pub fn status_of(&self, id: &EntryId) -> Option<EntryStatus> {
        self.queue.get(id).map(|e| e.status)
    }
}

pub fn load_scenario(dir: &Path) -> Result<Scenario> {
    let p = dir.join("scenario.yaml");
    let s = std::fs::read_to_string(&p).with_context(|| format!("read scenario.yaml: {}", p.display()))?;
    serde_yaml::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

pub fn load_expected(dir: &Path) -> Result<ScenarioExpected> {
    let p = dir.join("expected.yaml");
    let s = std::fs::read_to_string(&p).with_context(|| format!("read expected.yaml: {}", p.display()))?;
    serde_yaml::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

/// Executor that replays fixed outcomes and records the order it was called
/// in. Unscripted packages fail with a malformed-report error.
pub struct ScriptedExecutor<'a> {
    script: BTreeMap<EntryId, ScriptStep>,
    calls: Mutex<Vec<EntryId>>,
    cancel: Option<(usize, &'a AtomicBool)>,
}

impl<'a> ScriptedExecutor<'a> {
    pub fn new(script: BTreeMap<EntryId, ScriptStep>) -> Self {
        Self { script, calls: Mutex::new(Vec::new()), cancel: None }
    }

    /// Sets `flag` once `after` invocations have happened.
    pub fn cancelling_after(mut self, after: usize, flag: &'a AtomicBool) -> Self {
        self.cancel = Some((after, flag));
        self
    }

    pub fn calls(&self) -> Vec<EntryId> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl RecipeExecutor for ScriptedExecutor<'_> {
    fn execute(&self, package: &EntryId, _timeout: Duration) -> Result<ExecutorReport, ExecError> {
        let n = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(package.clone());
            calls.len()
        };
        if let Some((after, flag)) = self.cancel {
            if n >= after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        match self.script.get(package) {
            Some(ScriptStep::Report(report)) => Ok(report.clone()),
            Some(ScriptStep::Error { error }) => Err(ExecError::Spawn {
                program: SCRIPTED_PROGRAM.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, error.clone()),
            }),
            None => Err(ExecError::MalformedReport { program: SCRIPTED_PROGRAM.to_string(), exit_code: None }),
        }
    }
}

fn scenario_config(work_dir: &Path, overrides: &ScenarioConfig) -> Config {
    let mut cfg = Config::default_for_repo(work_dir);
    if let Some(n) = overrides.batch_size {
        cfg.batch.batch_size = n;
    }
    if let Some(t) = overrides.max_tier {
        cfg.batch.max_tier = t;
    }
    if let Some(n) = overrides.failure_threshold {
        cfg.breaker.failure_threshold = n;
    }
    if let Some(s) = overrides.cooldown_secs {
        cfg.breaker.cooldown_secs = s;
    }
    cfg.rate_limit.ecosystems.extend(overrides.rate_limit_ms.iter().map(|(k, v)| (k.clone(), *v)));
    cfg
}

/// Runs the real generation loop once over the scenario's queue, with an
/// in-memory queue store, a manual clock and the scripted executor. The
/// failure log and run summary go under `work_dir`.
pub fn simulate(dir: &Path, work_dir: &Path) -> Result<ScenarioResult> {
    let scenario = load_scenario(dir)?;
    let cfg = scenario_config(work_dir, &scenario.config);
    cfg.validate().with_context(|| format!("scenario {} config", scenario.scenario_id))?;

    let store = MemoryQueueStore::with_queue(scenario.queue)?;
    let clock = ManualClock::at(scenario.now);
    let cancel = AtomicBool::new(false);
    let mut executor = ScriptedExecutor::new(scenario.executor);
    if let Some(after) = scenario.cancel_after {
        executor = executor.cancelling_after(after, &cancel);
    }
    let failures = FailureLog::new(cfg.failures_dir(work_dir));
    let artifacts = RunArtifacts::new(cfg.results_dir(work_dir));

    let ctx = GenerateContext {
        cfg: &cfg,
        store: &store,
        executor: &executor,
        failures: &failures,
        artifacts: &artifacts,
        clock: &clock,
        cancel: &cancel,
    };
    let report = run_generation(&ctx, &GenerateOptions::default())?;

    let queue = store.load()?.file.queue;
    let failure_records = failures.scan()?.records.len();
    Ok(ScenarioResult { report, queue, invocations: executor.calls(), sleeps: clock.sleeps(), failure_records })
}
