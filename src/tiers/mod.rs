//! Record types for the three memory tiers
//!
//! - **Session**: one run, JSON, purged after consolidation
//! - **Project**: validated knowledge for one repository, structured text
//! - **Domain**: specialist knowledge, one structured-text file per domain

pub mod domain;
pub mod project;
pub mod session;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use domain::{DomainContext, DomainDecision, DomainKeywords, DomainMemory, DomainProblem};
pub use project::{
    ComplexityVelocity, PhaseVelocity, ProjectMemory, RunHistoryEntry, SolvedProblem, ToolStats,
    ValidatedDecision, Velocity,
};
pub use session::{
    ActiveProblem, ContextSnapshot, PendingDecision, PhaseStatus, PhaseTiming, SessionMemory,
    ToolEvent,
};

/// Append to a bounded collection, discarding the oldest entries first.
pub fn push_bounded<T>(items: &mut Vec<T>, item: T, cap: usize) {
    if cap == 0 {
        return;
    }
    if items.len() >= cap {
        let excess = items.len() + 1 - cap;
        items.drain(..excess);
    }
    items.push(item);
}

/// Clamp a confidence value into `[0.0, 1.0]`. NaN becomes 0.0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Short random identifier for stored records
pub fn short_id(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &id[..8])
}

/// Canonical name of a phase index
pub fn phase_name(phase: i32) -> String {
    match phase {
        -1 => "continuity".to_string(),
        0 => "pre_phase".to_string(),
        1 => "planning".to_string(),
        2 => "execution".to_string(),
        3 => "review".to_string(),
        4 => "qa".to_string(),
        5 => "validation".to_string(),
        n => format!("phase_{}", n),
    }
}

/// Severity of an active problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Final result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunResult {
    Success,
    Partial,
    Failed,
    Aborted,
}

impl RunResult {
    /// Result implied by a success rate
    pub fn from_success_rate(rate: f64) -> Self {
        if rate >= 0.8 {
            RunResult::Success
        } else if rate >= 0.5 {
            RunResult::Partial
        } else {
            RunResult::Failed
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Success)
    }
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunResult::Success => write!(f, "SUCCESS"),
            RunResult::Partial => write!(f, "PARTIAL"),
            RunResult::Failed => write!(f, "FAILED"),
            RunResult::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Complexity bucket used by velocity tracking
pub fn complexity_bucket(complexity: u8) -> &'static str {
    match complexity {
        0..=3 => "low",
        4..=6 => "medium",
        _ => "high",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_bounded_drops_oldest() {
        let mut items = vec![1, 2, 3];
        push_bounded(&mut items, 4, 3);
        assert_eq!(items, vec![2, 3, 4]);
    }

    #[test]
    fn push_bounded_shrinks_oversized_collections() {
        let mut items = vec![1, 2, 3, 4, 5];
        push_bounded(&mut items, 6, 3);
        assert_eq!(items, vec![4, 5, 6]);
    }

    #[test]
    fn clamp_handles_out_of_range() {
        assert_eq!(clamp_confidence(1.7), 1.0);
        assert_eq!(clamp_confidence(-0.2), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }

    #[test]
    fn complexity_buckets() {
        assert_eq!(complexity_bucket(3), "low");
        assert_eq!(complexity_bucket(4), "medium");
        assert_eq!(complexity_bucket(6), "medium");
        assert_eq!(complexity_bucket(7), "high");
    }

    #[test]
    fn phase_names() {
        assert_eq!(phase_name(-1), "continuity");
        assert_eq!(phase_name(2), "execution");
        assert_eq!(phase_name(9), "phase_9");
    }

    #[test]
    fn result_from_rate() {
        assert_eq!(RunResult::from_success_rate(1.0), RunResult::Success);
        assert_eq!(RunResult::from_success_rate(0.8), RunResult::Success);
        assert_eq!(RunResult::from_success_rate(0.5), RunResult::Partial);
        assert_eq!(RunResult::from_success_rate(0.49), RunResult::Failed);
    }
}
