//! Explicit phase plans with optional checkpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::checkpoint::Checkpoint;
use super::state::RetryOutcome;

fn default_max_retries() -> u32 {
    3
}

/// Status of a planned phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanStatus::Pending => write!(f, "PENDING"),
            PlanStatus::InProgress => write!(f, "IN_PROGRESS"),
            PlanStatus::Completed => write!(f, "COMPLETED"),
            PlanStatus::Failed => write!(f, "FAILED"),
            PlanStatus::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// One phase of an explicit plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedPhase {
    pub id: i32,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    #[serde(default)]
    pub status: PlanStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,

    #[serde(default)]
    pub retries: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl PlannedPhase {
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            agent: None,
            status: PlanStatus::Pending,
            checkpoint: None,
            retries: 0,
            max_retries: default_max_retries(),
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: Checkpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    pub fn mark_started(&mut self) {
        self.status = PlanStatus::InProgress;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.status = PlanStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.error_message = None;
    }

    /// Record a failure using the retry bookkeeping from the loop state
    pub fn apply_retry(&mut self, outcome: RetryOutcome, error: impl Into<String>) {
        self.error_message = Some(error.into());
        match outcome {
            RetryOutcome::Recorded { attempt, .. } => {
                self.retries = attempt;
                self.status = PlanStatus::Failed;
            }
            RetryOutcome::Blocked { attempts, .. } => {
                self.retries = attempts;
                self.status = PlanStatus::Blocked;
            }
        }
    }
}

/// Phase the plan is currently on: the one in progress, else the first unfinished one
pub fn current_phase(phases: &[PlannedPhase]) -> Option<&PlannedPhase> {
    phases
        .iter()
        .find(|p| p.status == PlanStatus::InProgress)
        .or_else(|| next_pending(phases))
}

/// First phase that still needs to run
pub fn next_pending(phases: &[PlannedPhase]) -> Option<&PlannedPhase> {
    phases
        .iter()
        .find(|p| matches!(p.status, PlanStatus::Pending | PlanStatus::Failed))
}

pub fn all_completed(phases: &[PlannedPhase]) -> bool {
    !phases.is_empty() && phases.iter().all(|p| p.status == PlanStatus::Completed)
}

pub fn any_blocked(phases: &[PlannedPhase]) -> bool {
    phases.iter().any(|p| p.status == PlanStatus::Blocked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Vec<PlannedPhase> {
        vec![
            PlannedPhase::new(1, "planning"),
            PlannedPhase::new(2, "execution").with_checkpoint(Checkpoint::new("cargo build")),
            PlannedPhase::new(3, "review"),
        ]
    }

    #[test]
    fn retry_outcome_drives_status() {
        let mut phase = PlannedPhase::new(2, "execution");
        phase.apply_retry(RetryOutcome::Recorded { phase: 2, attempt: 2 }, "boom");
        assert_eq!(phase.status, PlanStatus::Failed);
        assert_eq!(phase.retries, 2);

        phase.apply_retry(RetryOutcome::Blocked { phase: 2, attempts: 3 }, "boom");
        assert_eq!(phase.status, PlanStatus::Blocked);
        assert_eq!(phase.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn navigation() {
        let mut phases = plan();
        assert_eq!(current_phase(&phases).map(|p| p.id), Some(1));

        phases[0].mark_completed();
        phases[1].mark_started();
        assert_eq!(current_phase(&phases).map(|p| p.id), Some(2));
        assert_eq!(next_pending(&phases).map(|p| p.id), Some(3));

        phases[1].mark_completed();
        phases[2].mark_completed();
        assert!(all_completed(&phases));
        assert!(!any_blocked(&phases));
        assert!(!all_completed(&[]));
    }
}
