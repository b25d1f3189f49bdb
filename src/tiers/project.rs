//! Project tier: validated knowledge that outlives a single run

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{clamp_confidence, short_id, RunResult};

/// Schema version written into project files
pub const PROJECT_VERSION: &str = "2.0";

fn project_version() -> String {
    PROJECT_VERSION.to_string()
}

fn one() -> u32 {
    1
}

/// A decision that has been validated enough to keep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedDecision {
    pub id: String,
    pub context: String,
    pub decision: String,

    #[serde(default)]
    pub confidence: f64,

    #[serde(default)]
    pub validated_count: u32,

    #[serde(default)]
    pub failed_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<NaiveDate>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl ValidatedDecision {
    pub fn new(context: impl Into<String>, decision: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: short_id("dec"),
            context: context.into(),
            decision: decision.into(),
            confidence: clamp_confidence(confidence),
            validated_count: 0,
            failed_count: 0,
            last_used: Some(Utc::now().date_naive()),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_validations(mut self, validated_count: u32) -> Self {
        self.validated_count = validated_count;
        self
    }
}

/// A problem that recurred and has a known solution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvedProblem {
    pub id: String,
    pub symptom: String,
    pub solution: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prevention: Option<String>,

    #[serde(default = "one")]
    pub occurrences: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<NaiveDate>,

    #[serde(default)]
    pub tags: Vec<String>,
}

impl SolvedProblem {
    pub fn new(symptom: impl Into<String>, solution: impl Into<String>) -> Self {
        Self {
            id: short_id("blk"),
            symptom: symptom.into(),
            solution: solution.into(),
            prevention: None,
            occurrences: 1,
            last_seen: Some(Utc::now().date_naive()),
            tags: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_prevention(mut self, prevention: impl Into<String>) -> Self {
        self.prevention = Some(prevention.into());
        self
    }
}

/// Rolling average duration of one phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseVelocity {
    pub avg_min: f64,
    pub samples: u32,
}

/// Rolling statistics for one complexity bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityVelocity {
    pub avg_min: f64,
    pub success_rate: f64,
    pub samples: u32,
}

impl Default for ComplexityVelocity {
    fn default() -> Self {
        Self {
            avg_min: 0.0,
            success_rate: 1.0,
            samples: 0,
        }
    }
}

/// Velocity statistics by phase and by complexity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Velocity {
    pub by_phase: BTreeMap<String, PhaseVelocity>,
    pub by_complexity: BTreeMap<String, ComplexityVelocity>,
}

/// Success and failure counts for one tool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolStats {
    pub success_count: u32,
    pub fail_count: u32,
}

impl ToolStats {
    /// Fraction of successful invocations (1.0 when never used)
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.fail_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }
}

/// One completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    pub id: String,
    pub result: RunResult,

    #[serde(default)]
    pub duration_min: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default)]
    pub complexity: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Project tier record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMemory {
    #[serde(default = "project_version")]
    pub version: String,

    #[serde(default)]
    pub project_id: String,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub workflows_completed: u32,

    #[serde(default)]
    pub decisions: Vec<ValidatedDecision>,

    #[serde(default)]
    pub blockers: Vec<SolvedProblem>,

    #[serde(default)]
    pub velocity: Velocity,

    #[serde(default)]
    pub tools: BTreeMap<String, ToolStats>,

    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

impl ProjectMemory {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            version: project_version(),
            project_id: project_id.into(),
            updated_at: Utc::now(),
            workflows_completed: 0,
            decisions: Vec::new(),
            blockers: Vec::new(),
            velocity: Velocity::default(),
            tools: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Mark the record as modified
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Index of the first decision whose context contains `needle` (case-insensitive)
    pub fn find_decision(&self, needle: &str) -> Option<usize> {
        let needle = needle.to_lowercase();
        self.decisions
            .iter()
            .position(|d| d.context.to_lowercase().contains(&needle))
    }

    /// Index of the first solved problem whose symptom contains `needle` (case-insensitive)
    pub fn find_problem(&self, needle: &str) -> Option<usize> {
        let needle = needle.to_lowercase();
        self.blockers
            .iter()
            .position(|b| b.symptom.to_lowercase().contains(&needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_success_rate() {
        let stats = ToolStats {
            success_count: 3,
            fail_count: 1,
        };
        assert_eq!(stats.success_rate(), 0.75);
        assert_eq!(ToolStats::default().success_rate(), 1.0);
    }

    #[test]
    fn find_is_case_insensitive() {
        let mut project = ProjectMemory::new("p");
        project
            .decisions
            .push(ValidatedDecision::new("Use Async SQLAlchemy sessions", "yes", 0.9));
        project
            .blockers
            .push(SolvedProblem::new("ModuleNotFoundError: foo", "pip install foo"));

        assert_eq!(project.find_decision("async sqlalchemy"), Some(0));
        assert_eq!(project.find_problem("modulenotfound"), Some(0));
        assert_eq!(project.find_decision("redis"), None);
    }

    #[test]
    fn decodes_sparse_record() {
        let project: ProjectMemory = serde_json::from_value(serde_json::json!({
            "project_id": "demo"
        }))
        .unwrap();
        assert_eq!(project.version, PROJECT_VERSION);
        assert!(project.decisions.is_empty());
    }
}
