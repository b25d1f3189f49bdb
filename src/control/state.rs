//! Persistent state of the retry loop

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::plan::PlannedPhase;
use crate::config::LoopConfig;
use crate::tiers::push_bounded;

fn one() -> u32 {
    1
}

fn default_max_iterations() -> u32 {
    50
}

fn default_promise() -> String {
    "WORKFLOW COMPLETE".to_string()
}

/// One failed iteration and the action taken for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub iteration: u32,
    pub phase: i32,
    pub reason: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

/// What happened when a retry was requested for a phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Retry recorded; `attempt` is the new count for the phase
    Recorded { phase: i32, attempt: u32 },

    /// The phase already used all of its retries and is now blocked
    Blocked { phase: i32, attempts: u32 },
}

/// Loop controller state, stored inside the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopState {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "one")]
    pub iteration: u32,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_promise")]
    pub completion_promise: String,

    #[serde(default)]
    pub completion_detected: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub phase_retries: BTreeMap<i32, u32>,

    #[serde(default)]
    pub blocked_phases: BTreeSet<i32>,

    #[serde(default)]
    pub failure_log: Vec<FailureEntry>,

    /// Optional explicit plan; empty means text-detection mode
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<PlannedPhase>,
}

impl Default for LoopState {
    fn default() -> Self {
        Self {
            enabled: false,
            iteration: 1,
            max_iterations: default_max_iterations(),
            completion_promise: default_promise(),
            completion_detected: false,
            started_at: None,
            phase_retries: BTreeMap::new(),
            blocked_phases: BTreeSet::new(),
            failure_log: Vec::new(),
            phases: Vec::new(),
        }
    }
}

impl LoopState {
    /// Enabled state seeded from loop defaults
    pub fn enabled(config: &LoopConfig) -> Self {
        Self {
            enabled: true,
            max_iterations: config.max_iterations,
            completion_promise: config.completion_promise.clone(),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_phases(mut self, phases: Vec<PlannedPhase>) -> Self {
        self.phases = phases;
        self
    }

    pub fn retries_for(&self, phase: i32) -> u32 {
        self.phase_retries.get(&phase).copied().unwrap_or(0)
    }

    pub fn is_blocked(&self, phase: i32) -> bool {
        self.blocked_phases.contains(&phase)
    }

    /// Count a retry of `phase`, blocking it once `max_retries` have been used
    pub fn record_retry(&mut self, phase: i32, max_retries: u32) -> RetryOutcome {
        let count = self.phase_retries.entry(phase).or_insert(0);
        if *count >= max_retries {
            self.blocked_phases.insert(phase);
            return RetryOutcome::Blocked {
                phase,
                attempts: *count,
            };
        }
        *count += 1;
        RetryOutcome::Recorded {
            phase,
            attempt: *count,
        }
    }

    /// Append to the bounded failure log
    pub fn log_failure(&mut self, phase: i32, reason: impl Into<String>, action: impl Into<String>, cap: usize) {
        let entry = FailureEntry {
            iteration: self.iteration,
            phase,
            reason: reason.into(),
            action: action.into(),
            timestamp: Utc::now(),
        };
        push_bounded(&mut self.failure_log, entry, cap);
    }

    /// Turn the loop off, optionally recording that the promise was seen
    pub fn disable(&mut self, completed: bool) {
        self.enabled = false;
        if completed {
            self.completion_detected = true;
        }
    }
}
