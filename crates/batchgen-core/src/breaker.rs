use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::EcosystemTally;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// Consecutive ecosystem-level failures that open a closed breaker.
    pub failure_threshold: u32,
    pub cooldown_secs: i64,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self { failure_threshold: 3, cooldown_secs: 60 * 60 }
    }
}

/// Admission-control state for one ecosystem.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub state: BreakerState,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, rename = "opened_at", skip_serializing_if = "Option::is_none")]
    pub opened_at_unix: Option<i64>,
}

impl CircuitBreakerState {
    /// Open breakers whose cool-down has elapsed move to half-open.
    pub fn advance(&mut self, now_unix: i64, policy: &BreakerPolicy) -> Option<(BreakerState, BreakerState)> {
        if self.state != BreakerState::Open {
            return None;
        }
        // an open breaker without a timestamp cools down from now on
        let opened_at = *self.opened_at_unix.get_or_insert(now_unix);
        if now_unix.saturating_sub(opened_at) < policy.cooldown_secs {
            return None;
        }
        self.state = BreakerState::HalfOpen;
        Some((BreakerState::Open, BreakerState::HalfOpen))
    }

    /// Judges one run's aggregate outcome for this ecosystem.
    pub fn evaluate(
        &mut self,
        tally: &EcosystemTally,
        now_unix: i64,
        policy: &BreakerPolicy,
    ) -> Option<(BreakerState, BreakerState)> {
        let from = self.state;
        if tally.succeeded > 0 {
            self.consecutive_failures = 0;
            self.state = BreakerState::Closed;
            self.opened_at_unix = None;
        } else if tally.failed > 0 {
            self.consecutive_failures = self.consecutive_failures.saturating_add(tally.failed);
            match self.state {
                BreakerState::Closed if self.consecutive_failures >= policy.failure_threshold => {
                    self.state = BreakerState::Open;
                    self.opened_at_unix = Some(now_unix);
                }
                BreakerState::HalfOpen => {
                    self.state = BreakerState::Open;
                    self.opened_at_unix = Some(now_unix);
                }
                _ => {}
            }
        }
        (from != self.state).then_some((from, self.state))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerTransition {
    pub ecosystem: String,
    pub from: BreakerState,
    pub to: BreakerState,
}

/// Breaker state per ecosystem. Ecosystems without an entry are closed.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct BreakerBook(BTreeMap<String, CircuitBreakerState>);

impl BreakerBook {
    pub fn state_of(&self, ecosystem: &str) -> BreakerState {
        self.0.get(ecosystem).map(|b| b.state).unwrap_or_default()
    }

    pub fn get(&self, ecosystem: &str) -> Option<&CircuitBreakerState> {
        self.0.get(ecosystem)
    }

    pub fn set(&mut self, ecosystem: impl Into<String>, breaker: CircuitBreakerState) {
        self.0.insert(ecosystem.into(), breaker);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CircuitBreakerState)> {
        self.0.iter()
    }

    pub fn advance(&mut self, now_unix: i64, policy: &BreakerPolicy) -> Vec<BreakerTransition> {
        self.0
            .iter_mut()
            .filter_map(|(eco, b)| {
                b.advance(now_unix, policy).map(|(from, to)| BreakerTransition { ecosystem: eco.clone(), from, to })
            })
            .collect()
    }

    /// Applies each ecosystem's run tally once, after all of its candidates
    /// have been classified.
    pub fn evaluate(
        &mut self,
        tallies: &BTreeMap<String, EcosystemTally>,
        now_unix: i64,
        policy: &BreakerPolicy,
    ) -> Vec<BreakerTransition> {
        let mut transitions = Vec::new();
        for (eco, tally) in tallies {
            let breaker = self.0.entry(eco.clone()).or_default();
            if let Some((from, to)) = breaker.evaluate(tally, now_unix, policy) {
                transitions.push(BreakerTransition { ecosystem: eco.clone(), from, to });
            }
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: BreakerPolicy = BreakerPolicy { failure_threshold: 3, cooldown_secs: 100 };

    fn failures(n: u32) -> EcosystemTally {
        EcosystemTally { total: n, failed: n, ..Default::default() }
    }

    #[test]
    fn opens_only_at_threshold() {
        let mut b = CircuitBreakerState::default();
        assert_eq!(b.evaluate(&failures(1), 0, &POLICY), None);
        assert_eq!(b.evaluate(&failures(1), 0, &POLICY), None);
        assert_eq!(b.state, BreakerState::Closed);
        assert_eq!(b.evaluate(&failures(1), 7, &POLICY), Some((BreakerState::Closed, BreakerState::Open)));
        assert_eq!(b.opened_at_unix, Some(7));
    }

    #[test]
    fn any_success_resets_counter() {
        let mut b = CircuitBreakerState::default();
        b.evaluate(&failures(2), 0, &POLICY);
        let mixed = EcosystemTally { total: 4, succeeded: 1, failed: 3, blocked: 0 };
        b.evaluate(&mixed, 0, &POLICY);
        assert_eq!(b.consecutive_failures, 0);
        assert_eq!(b.state, BreakerState::Closed);
    }

    #[test]
    fn blocked_only_tally_changes_nothing() {
        let mut b = CircuitBreakerState { consecutive_failures: 2, ..Default::default() };
        let tally = EcosystemTally { total: 2, blocked: 2, ..Default::default() };
        assert_eq!(b.evaluate(&tally, 0, &POLICY), None);
        assert_eq!(b.consecutive_failures, 2);
    }

    #[test]
    fn cooldown_then_probe() {
        let mut b = CircuitBreakerState { state: BreakerState::Open, consecutive_failures: 3, opened_at_unix: Some(0) };
        assert_eq!(b.advance(99, &POLICY), None);
        assert_eq!(b.advance(100, &POLICY), Some((BreakerState::Open, BreakerState::HalfOpen)));

        // failed probe re-opens and restarts the cool-down clock
        assert_eq!(b.evaluate(&failures(1), 150, &POLICY), Some((BreakerState::HalfOpen, BreakerState::Open)));
        assert_eq!(b.opened_at_unix, Some(150));
        assert_eq!(b.advance(200, &POLICY), None);
        b.advance(250, &POLICY);

        let ok = EcosystemTally { total: 1, succeeded: 1, ..Default::default() };
        assert_eq!(b.evaluate(&ok, 260, &POLICY), Some((BreakerState::HalfOpen, BreakerState::Closed)));
        assert_eq!(b.consecutive_failures, 0);
        assert_eq!(b.opened_at_unix, None);
    }

    #[test]
    fn book_defaults_to_closed_and_reports_transitions() {
        let mut book = BreakerBook::default();
        assert_eq!(book.state_of("cargo"), BreakerState::Closed);
        let tallies = BTreeMap::from([("cargo".to_string(), failures(3)), ("npm".to_string(), failures(1))]);
        let transitions = book.evaluate(&tallies, 10, &POLICY);
        assert_eq!(
            transitions,
            vec![BreakerTransition { ecosystem: "cargo".into(), from: BreakerState::Closed, to: BreakerState::Open }]
        );
        assert_eq!(book.state_of("cargo"), BreakerState::Open);
        assert_eq!(book.get("npm").map(|b| b.consecutive_failures), Some(1));
    }
}
