//! Session tier: everything observed during a single run

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{clamp_confidence, Severity};
use crate::control::LoopState;

/// Schema tag written into every session file
pub const SESSION_SCHEMA: &str = "2.0";

fn session_schema() -> String {
    SESSION_SCHEMA.to_string()
}

fn default_phase() -> i32 {
    -1
}

/// Status of the phase currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatus {
    #[default]
    Idle,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Idle => write!(f, "IDLE"),
            PhaseStatus::InProgress => write!(f, "IN_PROGRESS"),
            PhaseStatus::Completed => write!(f, "COMPLETED"),
            PhaseStatus::Failed => write!(f, "FAILED"),
            PhaseStatus::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// A single tool invocation observed during the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    pub timestamp: DateTime<Utc>,
    pub tool: String,
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// What fixed the failure, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl ToolEvent {
    pub fn new(tool: impl Into<String>, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            tool: tool.into(),
            success,
            file: None,
            error: None,
            correction: None,
            params: None,
        }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_correction(mut self, correction: impl Into<String>) -> Self {
        self.correction = Some(correction.into());
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }
}

fn default_source() -> String {
    "manual".to_string()
}

fn default_confidence() -> f64 {
    0.5
}

/// A decision proposed during the run, not yet validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDecision {
    pub context: String,
    pub decision: String,

    #[serde(default = "default_confidence")]
    pub confidence: f64,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default = "default_source")]
    pub source: String,

    #[serde(default)]
    pub validated_count: u32,
}

impl PendingDecision {
    pub fn new(context: impl Into<String>, decision: impl Into<String>, confidence: f64) -> Self {
        Self {
            context: context.into(),
            decision: decision.into(),
            confidence: clamp_confidence(confidence),
            tags: Vec::new(),
            source: default_source(),
            validated_count: 0,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Whether this decision meets the given promotion thresholds
    pub fn is_promotable(&self, min_confidence: f64, min_validations: u32) -> bool {
        self.confidence >= min_confidence && self.validated_count >= min_validations
    }
}

/// A problem hit during the run, possibly resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveProblem {
    pub symptom: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,

    #[serde(default)]
    pub severity: Severity,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<i32>,

    #[serde(default)]
    pub resolved: bool,
}

impl ActiveProblem {
    pub fn new(symptom: impl Into<String>) -> Self {
        Self {
            symptom: symptom.into(),
            solution: None,
            severity: Severity::Medium,
            tags: Vec::new(),
            phase: None,
            resolved: false,
        }
    }

    /// Attach a solution; a problem with a solution is resolved
    pub fn with_solution(mut self, solution: impl Into<String>) -> Self {
        self.solution = Some(solution.into());
        self.resolved = true;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn is_promotable(&self) -> bool {
        self.resolved && self.solution.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Files and patterns touched during the run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSnapshot {
    pub files_read: Vec<String>,
    pub files_modified: Vec<String>,
    pub patterns_found: BTreeMap<String, Vec<String>>,
}

/// Start and end of one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub start: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_min: Option<f64>,
}

/// Session tier record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMemory {
    #[serde(rename = "$schema", default = "session_schema")]
    pub schema: String,

    pub workflow_id: String,

    #[serde(default)]
    pub task_description: String,

    pub session_start: DateTime<Utc>,

    #[serde(default = "default_phase")]
    pub current_phase: i32,

    #[serde(default)]
    pub phase_status: PhaseStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_domain: Option<String>,

    #[serde(default)]
    pub complexity_score: u8,

    #[serde(default)]
    pub tool_events: Vec<ToolEvent>,

    #[serde(default)]
    pub decisions_pending: Vec<PendingDecision>,

    #[serde(default)]
    pub blockers_active: Vec<ActiveProblem>,

    #[serde(default)]
    pub context_snapshot: ContextSnapshot,

    #[serde(default)]
    pub phase_timings: BTreeMap<i32, PhaseTiming>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_state: Option<LoopState>,
}

impl SessionMemory {
    /// Create a fresh session; complexity is clamped to 0..=10
    pub fn new(
        workflow_id: impl Into<String>,
        task_description: impl Into<String>,
        complexity: u8,
        domain: Option<String>,
    ) -> Self {
        Self {
            schema: session_schema(),
            workflow_id: workflow_id.into(),
            task_description: task_description.into(),
            session_start: Utc::now(),
            current_phase: -1,
            phase_status: PhaseStatus::Idle,
            active_domain: domain,
            complexity_score: complexity.min(10),
            tool_events: Vec::new(),
            decisions_pending: Vec::new(),
            blockers_active: Vec::new(),
            context_snapshot: ContextSnapshot::default(),
            phase_timings: BTreeMap::new(),
            loop_state: None,
        }
    }

    /// Fraction of tool events that failed (0.0 with no events)
    pub fn tool_failure_rate(&self) -> f64 {
        if self.tool_events.is_empty() {
            return 0.0;
        }
        let failed = self.tool_events.iter().filter(|e| !e.success).count();
        failed as f64 / self.tool_events.len() as f64
    }

    /// Problems that are still open
    pub fn unresolved_problems(&self) -> impl Iterator<Item = &ActiveProblem> {
        self.blockers_active.iter().filter(|b| !b.resolved)
    }

    /// Sum of recorded phase durations in minutes
    pub fn total_duration_min(&self) -> f64 {
        self.phase_timings
            .values()
            .filter_map(|t| t.duration_min)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_clamps_complexity() {
        let session = SessionMemory::new("run", "task", 42, None);
        assert_eq!(session.complexity_score, 10);
        assert_eq!(session.current_phase, -1);
        assert_eq!(session.phase_status, PhaseStatus::Idle);
    }

    #[test]
    fn session_json_carries_schema_tag() {
        let session = SessionMemory::new("run", "task", 3, Some("api".into()));
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["$schema"], "2.0");
        assert_eq!(json["phase_status"], "IDLE");

        let back: SessionMemory = serde_json::from_value(json).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let json = serde_json::json!({
            "workflow_id": "w",
            "session_start": "2026-01-01T00:00:00Z",
            "unknown_field": true
        });
        let session: SessionMemory = serde_json::from_value(json).unwrap();
        assert_eq!(session.current_phase, -1);
        assert!(session.tool_events.is_empty());
        assert_eq!(session.schema, SESSION_SCHEMA);
    }

    #[test]
    fn problem_with_solution_is_resolved() {
        let problem = ActiveProblem::new("import error").with_solution("add __init__.py");
        assert!(problem.resolved);
        assert!(problem.is_promotable());
        assert!(!ActiveProblem::new("x").is_promotable());
    }

    #[test]
    fn pending_decision_clamps_confidence() {
        assert_eq!(PendingDecision::new("c", "d", 3.0).confidence, 1.0);
        assert_eq!(PendingDecision::new("c", "d", -1.0).confidence, 0.0);
    }

    #[test]
    fn failure_rate_counts_failed_events() {
        let mut session = SessionMemory::new("run", "task", 1, None);
        session.tool_events.push(ToolEvent::new("Bash", true));
        session.tool_events.push(ToolEvent::new("Bash", false));
        assert_eq!(session.tool_failure_rate(), 0.5);
    }
}
