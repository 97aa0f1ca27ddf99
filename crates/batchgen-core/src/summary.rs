use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::{BreakerTransition, FailureCategory, RunId};

/// How a single candidate ended up after classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Blocked,
    Failed(FailureCategory),
}

/// Per-ecosystem counts for one run. Feeds both the run summary and the
/// breaker evaluation.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EcosystemTally {
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub blocked: u32,
}

impl EcosystemTally {
    pub fn record(&mut self, outcome: AttemptOutcome) {
        self.total += 1;
        match outcome {
            AttemptOutcome::Succeeded => self.succeeded += 1,
            AttemptOutcome::Blocked => self.blocked += 1,
            AttemptOutcome::Failed(_) => self.failed += 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: RunId,
    #[serde(rename = "started_at")]
    pub started_at_unix: i64,
    #[serde(rename = "finished_at")]
    pub finished_at_unix: i64,
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub blocked: u32,
    /// Selected candidates never started because the run was cancelled.
    pub cancelled: u32,
    pub per_ecosystem: BTreeMap<String, EcosystemTally>,
    #[serde(default)]
    pub breaker_transitions: Vec<BreakerTransition>,
    #[serde(default)]
    pub failure_categories: BTreeMap<FailureCategory, u32>,
}

impl RunSummary {
    pub fn new(run_id: RunId, started_at_unix: i64) -> Self {
        Self {
            run_id,
            started_at_unix,
            finished_at_unix: started_at_unix,
            total: 0,
            succeeded: 0,
            failed: 0,
            blocked: 0,
            cancelled: 0,
            per_ecosystem: BTreeMap::new(),
            breaker_transitions: Vec::new(),
            failure_categories: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, ecosystem: &str, outcome: AttemptOutcome) {
        self.total += 1;
        match outcome {
            AttemptOutcome::Succeeded => self.succeeded += 1,
            AttemptOutcome::Blocked => self.blocked += 1,
            AttemptOutcome::Failed(category) => {
                self.failed += 1;
                *self.failure_categories.entry(category).or_default() += 1;
            }
        }
        self.per_ecosystem.entry(ecosystem.to_string()).or_default().record(outcome);
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.cancelled == 0
    }

    /// Markdown report suitable for a pull request body.
    pub fn to_markdown(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "## Batch run {}\n", self.run_id.as_str());
        let _ = writeln!(
            s,
            "**Total:** {} | **Succeeded:** {} | **Failed:** {} | **Blocked:** {}",
            self.total, self.succeeded, self.failed, self.blocked
        );
        if self.cancelled > 0 {
            let _ = writeln!(s, "\nRun was cancelled; {} selected candidates were not started.", self.cancelled);
        }
        if !self.per_ecosystem.is_empty() {
            s.push_str("\n| Ecosystem | Total | Succeeded | Failed | Blocked |\n");
            s.push_str("|---|---|---|---|---|\n");
            for (eco, t) in &self.per_ecosystem {
                let _ = writeln!(s, "| {} | {} | {} | {} | {} |", eco, t.total, t.succeeded, t.failed, t.blocked);
            }
        }
        if !self.failure_categories.is_empty() {
            s.push_str("\n### Failures by category\n");
            for (category, n) in &self.failure_categories {
                let _ = writeln!(s, "- {}: {}", category, n);
            }
        }
        if !self.breaker_transitions.is_empty() {
            s.push_str("\n### Circuit breaker\n");
            for t in &self.breaker_transitions {
                let _ = writeln!(s, "- {}: {} -> {}", t.ecosystem, t.from, t.to);
            }
        }
        s
    }
}
