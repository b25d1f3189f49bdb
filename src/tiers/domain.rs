//! Domain tier: specialist knowledge shared across projects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{clamp_confidence, short_id};

/// Schema version written into domain files
pub const DOMAIN_VERSION: &str = "1.0";

fn domain_version() -> String {
    DOMAIN_VERSION.to_string()
}

fn default_rate() -> f64 {
    1.0
}

fn default_domain_confidence() -> f64 {
    0.8
}

/// Keyword sets that route work to this domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainKeywords {
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
    pub file_patterns: Vec<String>,
    pub exclude: Vec<String>,
}

/// Free-form knowledge about the domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainContext {
    pub key_concepts: Vec<String>,
    pub common_patterns: Vec<String>,
    pub anti_patterns: Vec<String>,
    pub preferred_tools: Vec<String>,
}

/// A decision promoted into a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainDecision {
    pub id: String,
    pub scenario: String,
    pub decision: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,

    #[serde(default = "default_domain_confidence")]
    pub confidence: f64,
}

impl DomainDecision {
    pub fn new(scenario: impl Into<String>, decision: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: short_id("adec"),
            scenario: scenario.into(),
            decision: decision.into(),
            rationale: None,
            confidence: clamp_confidence(confidence),
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// A solved problem promoted into a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainProblem {
    pub id: String,
    pub symptom: String,
    pub solution: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_context: Option<String>,
}

impl DomainProblem {
    pub fn new(symptom: impl Into<String>, solution: impl Into<String>) -> Self {
        Self {
            id: short_id("ablk"),
            symptom: symptom.into(),
            solution: solution.into(),
            domain_context: None,
        }
    }
}

/// Domain tier record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainMemory {
    pub domain_id: String,

    #[serde(default)]
    pub display_name: String,

    #[serde(default = "domain_version")]
    pub version: String,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default)]
    pub tasks_handled: u32,

    #[serde(default = "default_rate")]
    pub success_rate: f64,

    #[serde(default)]
    pub keywords: DomainKeywords,

    #[serde(default)]
    pub context: DomainContext,

    #[serde(default)]
    pub decisions: Vec<DomainDecision>,

    #[serde(default)]
    pub blockers: Vec<DomainProblem>,
}

impl DomainMemory {
    /// Empty domain record with a display name derived from the id
    pub fn new(domain_id: impl Into<String>) -> Self {
        let domain_id = domain_id.into();
        let display_name = format!("{} Expert", title_case(&domain_id));
        Self {
            domain_id,
            display_name,
            version: domain_version(),
            updated_at: Utc::now(),
            tasks_handled: 0,
            success_rate: 1.0,
            keywords: DomainKeywords::default(),
            context: DomainContext::default(),
            decisions: Vec::new(),
            blockers: Vec::new(),
        }
    }

    /// Record a handled task and recompute the running success rate
    pub fn update_stats(&mut self, success: bool) {
        let previous = self.tasks_handled as f64;
        self.tasks_handled += 1;
        let hit = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * previous + hit) / self.tasks_handled as f64;
        self.updated_at = Utc::now();
    }

    /// Whether a decision with this scenario text is already present
    pub fn has_decision(&self, scenario: &str) -> bool {
        self.decisions.iter().any(|d| d.scenario == scenario)
    }

    /// Whether a problem with this symptom is already present
    pub fn has_problem(&self, symptom: &str) -> bool {
        self.blockers.iter().any(|b| b.symptom == symptom)
    }
}

fn title_case(id: &str) -> String {
    id.split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_from_id() {
        assert_eq!(DomainMemory::new("api").display_name, "Api Expert");
        assert_eq!(DomainMemory::new("data_science").display_name, "Data Science Expert");
    }

    #[test]
    fn update_stats_tracks_running_rate() {
        let mut domain = DomainMemory::new("backend");
        domain.update_stats(true);
        domain.update_stats(false);
        assert_eq!(domain.tasks_handled, 2);
        assert!((domain.success_rate - 0.5).abs() < 1e-9);

        domain.update_stats(true);
        domain.update_stats(true);
        assert!((domain.success_rate - 0.75).abs() < 1e-9);
    }
}
