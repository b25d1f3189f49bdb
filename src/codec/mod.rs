//! Structured-text codec for the project and domain tiers
//!
//! Two interchangeable backends: `serde_yaml` when the `yaml` feature is enabled, and
//! [`basic`], a small reader and writer with no extra dependencies. Both read what the
//! other writes for every tier model.

pub mod basic;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Which structured-text backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    /// Full YAML through serde_yaml (falls back to `Basic` when compiled without `yaml`)
    Yaml,

    /// Built-in subset reader and writer
    Basic,
}

impl CodecKind {
    /// The richest backend compiled into this build
    pub fn preferred() -> Self {
        if cfg!(feature = "yaml") {
            CodecKind::Yaml
        } else {
            CodecKind::Basic
        }
    }
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecKind::Yaml => write!(f, "yaml"),
            CodecKind::Basic => write!(f, "basic"),
        }
    }
}

/// Encoder and decoder for structured-text tier files
#[derive(Debug, Clone, Copy)]
pub struct StructuredText {
    kind: CodecKind,
}

impl StructuredText {
    pub fn new(kind: CodecKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    /// Encode a model as structured text
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<String> {
        match self.kind {
            #[cfg(feature = "yaml")]
            CodecKind::Yaml => Ok(serde_yaml::to_string(value)?),
            _ => basic::to_string(value),
        }
    }

    /// Decode a model from structured text
    pub fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T> {
        match self.kind {
            #[cfg(feature = "yaml")]
            CodecKind::Yaml => Ok(serde_yaml::from_str(text)?),
            _ => basic::from_str(text),
        }
    }
}

impl Default for StructuredText {
    fn default() -> Self {
        Self::new(CodecKind::preferred())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiers::{
        ActiveProblem, DomainDecision, DomainMemory, DomainProblem, ProjectMemory,
        RunHistoryEntry, SolvedProblem, ToolStats, ValidatedDecision,
    };
    use crate::tiers::{PhaseVelocity, RunResult};

    fn sample_project() -> ProjectMemory {
        let mut project = ProjectMemory::new("demo-project");
        project.workflows_completed = 3;
        project.decisions.push(
            ValidatedDecision::new("Use async sessions: always", "AsyncSession", 0.92)
                .with_tags(vec!["api".into(), "database".into()])
                .with_validations(4),
        );
        project.blockers.push(
            SolvedProblem::new("ImportError: no module named 'app'", "set PYTHONPATH")
                .with_prevention("Check for: ImportError"),
        );
        project.velocity.by_phase.insert(
            "execution".into(),
            PhaseVelocity {
                avg_min: 25.0,
                samples: 2,
            },
        );
        project.tools.insert(
            "Bash".into(),
            ToolStats {
                success_count: 10,
                fail_count: 2,
            },
        );
        project.history.push(RunHistoryEntry {
            id: "2026-10-16_issue-42".into(),
            result: RunResult::Partial,
            duration_min: 12.5,
            domain: Some("api".into()),
            complexity: 7,
            timestamp: Some(chrono::Utc::now()),
        });
        project
    }

    fn sample_domain() -> DomainMemory {
        let mut domain = DomainMemory::new("security");
        domain.keywords.primary = vec!["auth".into(), "jwt".into()];
        domain.keywords.file_patterns = vec!["**/auth/**".into(), "*.pem".into()];
        domain.context.key_concepts = vec!["Least privilege".into()];
        domain
            .decisions
            .push(DomainDecision::new("token storage", "httpOnly cookies", 0.9).with_rationale("xss"));
        domain
            .blockers
            .push(DomainProblem::new("CORS preflight fails", "allow OPTIONS"));
        domain
    }

    fn assert_round_trip(codec: StructuredText) {
        let project = sample_project();
        let text = codec.encode(&project).unwrap();
        let back: ProjectMemory = codec.decode(&text).unwrap();
        assert_eq!(back, project, "{} document:\n{}", codec.kind(), text);

        let domain = sample_domain();
        let text = codec.encode(&domain).unwrap();
        let back: DomainMemory = codec.decode(&text).unwrap();
        assert_eq!(back, domain);

        let empty = ProjectMemory::new("empty");
        let back: ProjectMemory = codec.decode(&codec.encode(&empty).unwrap()).unwrap();
        assert_eq!(back, empty);
    }

    #[test]
    fn basic_round_trips_tier_models() {
        assert_round_trip(StructuredText::new(CodecKind::Basic));
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn yaml_round_trips_tier_models() {
        assert_round_trip(StructuredText::new(CodecKind::Yaml));
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn backends_read_each_other() {
        let yaml = StructuredText::new(CodecKind::Yaml);
        let basic = StructuredText::new(CodecKind::Basic);
        let project = sample_project();

        let from_yaml: ProjectMemory = basic.decode(&yaml.encode(&project).unwrap()).unwrap();
        assert_eq!(from_yaml, project);

        let from_basic: ProjectMemory = yaml.decode(&basic.encode(&project).unwrap()).unwrap();
        assert_eq!(from_basic, project);
    }

    #[test]
    fn problem_records_survive_basic_codec() {
        let codec = StructuredText::new(CodecKind::Basic);
        let problem = ActiveProblem::new("multi\nline symptom").with_solution("fix: it");
        let back: ActiveProblem = codec.decode(&codec.encode(&problem).unwrap()).unwrap();
        assert_eq!(back, problem);
    }
}
