//! Learning engine
//!
//! Captures what happens during a run into the session tier and, at the end of the run,
//! promotes what proved itself into the project and domain tiers:
//!
//! - Decisions need confidence and repeated validation
//! - Problems need a solution; they are recorded on first sight and promoted on a repeat
//! - Tool outcomes always feed the per-tool counters
//! - Domain tiers receive records whose tags relate to the domain

pub mod velocity;

use std::collections::BTreeMap;

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PromotionThresholds;
use crate::error::Result;
use crate::memory::MemoryStore;
use crate::tiers::{
    clamp_confidence, phase_name, push_bounded, round2, ActiveProblem, ComplexityVelocity,
    DomainDecision, DomainProblem, PendingDecision, PhaseVelocity, ProjectMemory,
    RunHistoryEntry, RunResult, SessionMemory, Severity, SolvedProblem, ToolEvent,
    ValidatedDecision,
};

/// Words long enough to be worth matching on
static QUERY_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}_]{4,}").unwrap());

/// Counts from one promotion pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningResult {
    pub decisions_promoted: u32,
    pub decisions_skipped: u32,
    pub problems_promoted: u32,
    pub problems_skipped: u32,
    pub tool_patterns_updated: u32,
    pub errors: Vec<String>,
}

impl LearningResult {
    pub fn total_promoted(&self) -> u32 {
        self.decisions_promoted + self.problems_promoted
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Records added to a domain tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainPromotion {
    pub decisions: u32,
    pub problems: u32,
}

/// What the caller knows about a finished run. Missing fields are inferred.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    pub result: Option<RunResult>,
    pub duration_min: Option<f64>,
    pub success_rate: Option<f64>,
}

impl RunOutcome {
    pub fn with_result(result: RunResult) -> Self {
        Self {
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn with_success_rate(rate: f64) -> Self {
        Self {
            success_rate: Some(rate),
            ..Default::default()
        }
    }

    pub fn duration(mut self, minutes: f64) -> Self {
        self.duration_min = Some(minutes);
        self
    }
}

/// Summary of an end-of-run consolidation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationSummary {
    pub workflow_id: String,
    pub result: RunResult,
    pub duration_min: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    pub learning: LearningResult,
    pub domain_promotion: DomainPromotion,
    pub tool_events: usize,
}

/// Per-tool counters as reported by queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSummary {
    pub success_count: u32,
    pub fail_count: u32,
    pub total: u32,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityStats {
    pub by_phase: BTreeMap<String, PhaseVelocity>,
    pub by_complexity: BTreeMap<String, ComplexityVelocity>,
    pub workflows_completed: u32,
}

/// Result implied by the state of a session: an open critical problem fails the run,
/// heavy tool failure or any open problem makes it partial
pub fn infer_result(session: &SessionMemory) -> RunResult {
    if session
        .unresolved_problems()
        .any(|p| p.severity == Severity::Critical)
    {
        return RunResult::Failed;
    }
    if session.tool_failure_rate() > 0.3 || session.unresolved_problems().next().is_some() {
        return RunResult::Partial;
    }
    RunResult::Success
}

/// Captures run activity and promotes it across tiers
pub struct LearningEngine<'a> {
    store: &'a mut MemoryStore,
    thresholds: PromotionThresholds,
}

impl<'a> LearningEngine<'a> {
    pub fn new(store: &'a mut MemoryStore) -> Self {
        let thresholds = store.config().promotion;
        Self { store, thresholds }
    }

    pub fn with_thresholds(mut self, thresholds: PromotionThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn store(&self) -> &MemoryStore {
        &*self.store
    }

    // ------------------------------------------------------------------
    // Capture
    // ------------------------------------------------------------------

    pub fn capture_tool_event(&mut self, event: ToolEvent) -> Result<Option<ToolEvent>> {
        self.store.record_tool_event(event)
    }

    pub fn capture_decision(&mut self, mut decision: PendingDecision) -> Result<Option<PendingDecision>> {
        decision.confidence = clamp_confidence(decision.confidence);
        self.store.record_decision(decision)
    }

    pub fn capture_problem(&mut self, problem: ActiveProblem) -> Result<Option<ActiveProblem>> {
        self.store.record_problem(problem)
    }

    pub fn resolve_problem(&mut self, symptom: &str, solution: &str) -> Result<bool> {
        self.store.resolve_problem(symptom, solution)
    }

    /// Adjust the first pending decision whose context contains `context`
    pub fn validate_decision(&mut self, context: &str, success: bool) -> Result<bool> {
        let needle = context.to_lowercase();
        let Some(session) = self.store.session_mut() else {
            return Ok(false);
        };
        let Some(decision) = session
            .decisions_pending
            .iter_mut()
            .find(|d| d.context.to_lowercase().contains(&needle))
        else {
            return Ok(false);
        };

        if success {
            decision.validated_count += 1;
            decision.confidence = clamp_confidence(decision.confidence + 0.05);
        } else {
            decision.validated_count = decision.validated_count.saturating_sub(1);
            decision.confidence = clamp_confidence(decision.confidence - 0.1);
        }
        debug!(
            context = %decision.context,
            confidence = decision.confidence,
            validated = decision.validated_count,
            "Validated decision"
        );
        self.store.save_session()?;
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Promotion
    // ------------------------------------------------------------------

    /// Promote session learnings into the project tier and save it
    pub fn promote_learnings(&mut self) -> LearningResult {
        let mut result = self.promote_into_project();
        if self.store.session().is_none() {
            return result;
        }
        if let Err(e) = self.store.save_project() {
            result.errors.push(format!("Failed to save project memory: {}", e));
        }
        result
    }

    fn promote_into_project(&mut self) -> LearningResult {
        let mut result = LearningResult::default();
        let thresholds = self.thresholds;
        let caps = self.store.config().project_caps;

        let Some((session, project)) = self.store.session_and_project_mut() else {
            result.errors.push("No active session".to_string());
            return result;
        };

        for pending in &session.decisions_pending {
            if !pending.is_promotable(thresholds.min_confidence, thresholds.min_validations) {
                result.decisions_skipped += 1;
                continue;
            }
            match project.find_decision(&pending.context) {
                Some(i) => {
                    let existing = &mut project.decisions[i];
                    existing.validated_count += 1;
                    existing.last_used = Some(Utc::now().date_naive());
                }
                None => {
                    let decision = ValidatedDecision::new(
                        pending.context.clone(),
                        pending.decision.clone(),
                        pending.confidence,
                    )
                    .with_validations(pending.validated_count)
                    .with_tags(pending.tags.clone());
                    push_bounded(&mut project.decisions, decision, caps.decisions);
                }
            }
            result.decisions_promoted += 1;
        }

        for problem in &session.blockers_active {
            match merge_problem(project, problem, thresholds.min_occurrences, caps.problems) {
                ProblemMerge::Promoted => result.problems_promoted += 1,
                ProblemMerge::Recorded | ProblemMerge::Skipped => result.problems_skipped += 1,
            }
        }

        for event in &session.tool_events {
            let stats = project.tools.entry(event.tool.clone()).or_default();
            if event.success {
                stats.success_count += 1;
            } else {
                stats.fail_count += 1;
            }
            result.tool_patterns_updated += 1;
        }

        info!(
            "Promoted {} decisions and {} problems ({} tool events)",
            result.decisions_promoted, result.problems_promoted, result.tool_patterns_updated
        );
        result
    }

    /// Append tag-relevant decisions and resolved problems to a domain tier and save it
    pub fn promote_to_domain(&mut self, domain_id: &str) -> Result<DomainPromotion> {
        let promotion = self.promote_into_domain(domain_id)?;
        self.store.save_domain(domain_id)?;
        Ok(promotion)
    }

    fn promote_into_domain(&mut self, domain_id: &str) -> Result<DomainPromotion> {
        let mut promotion = DomainPromotion::default();
        let Some(session) = self.store.session().cloned() else {
            return Ok(promotion);
        };
        let caps = self.store.config().domain_caps;
        let domain = self.store.domain_mut(domain_id)?;

        for pending in &session.decisions_pending {
            if !is_domain_relevant(&pending.tags, domain_id) || domain.has_decision(&pending.context) {
                continue;
            }
            let decision = DomainDecision::new(
                pending.context.clone(),
                pending.decision.clone(),
                pending.confidence,
            )
            .with_rationale(format!("Validated {} times", pending.validated_count));
            push_bounded(&mut domain.decisions, decision, caps.decisions);
            promotion.decisions += 1;
        }

        for problem in &session.blockers_active {
            if !problem.resolved
                || !is_domain_relevant(&problem.tags, domain_id)
                || domain.has_problem(&problem.symptom)
            {
                continue;
            }
            let mut record = DomainProblem::new(
                problem.symptom.clone(),
                problem.solution.clone().unwrap_or_else(|| "Unknown".to_string()),
            );
            record.domain_context = problem.phase.map(|p| format!("Phase {} ({})", p, phase_name(p)));
            push_bounded(&mut domain.blockers, record, caps.problems);
            promotion.problems += 1;
        }

        debug!(
            domain = domain_id,
            decisions = promotion.decisions,
            problems = promotion.problems,
            "Promoted into domain"
        );
        Ok(promotion)
    }

    // ------------------------------------------------------------------
    // Velocity
    // ------------------------------------------------------------------

    /// Fold one phase duration into the project's rolling averages and save
    pub fn calculate_velocity(&mut self, phase: &str, minutes: f64) -> Result<PhaseVelocity> {
        let window = self.store.config().velocity_window;
        let updated = velocity::update_phase(&mut self.store.project_mut().velocity, phase, minutes, window);
        self.store.save_project()?;
        Ok(updated)
    }

    /// Append a run to the history, update completion counters and save
    pub fn record_workflow_completion(
        &mut self,
        workflow_id: &str,
        result: RunResult,
        minutes: f64,
        domain: Option<String>,
        complexity: u8,
    ) -> Result<()> {
        self.apply_completion(workflow_id, result, minutes, domain, complexity);
        self.store.save_project()
    }

    fn apply_completion(
        &mut self,
        workflow_id: &str,
        result: RunResult,
        minutes: f64,
        domain: Option<String>,
        complexity: u8,
    ) {
        let window = self.store.config().velocity_window;
        let cap = self.store.config().project_caps.history;
        let project = self.store.project_mut();

        let entry = RunHistoryEntry {
            id: workflow_id.to_string(),
            result,
            duration_min: round2(minutes),
            domain,
            complexity,
            timestamp: Some(Utc::now()),
        };
        push_bounded(&mut project.history, entry, cap);
        if result.is_success() {
            project.workflows_completed += 1;
        }
        velocity::update_complexity(&mut project.velocity, complexity, minutes, result, window);
        info!("Recorded run {} as {} ({} min)", workflow_id, result, round2(minutes));
    }

    // ------------------------------------------------------------------
    // Consolidation
    // ------------------------------------------------------------------

    /// Promote everything the session learned, save all tiers and purge the session.
    /// `None` without an active session.
    pub fn consolidate(&mut self, outcome: RunOutcome) -> Result<Option<ConsolidationSummary>> {
        let Some(session) = self.store.session().cloned() else {
            warn!("Nothing to consolidate: no active session");
            return Ok(None);
        };

        let result = outcome
            .result
            .or_else(|| outcome.success_rate.map(RunResult::from_success_rate))
            .unwrap_or_else(|| infer_result(&session));
        let duration_min = round2(outcome.duration_min.unwrap_or_else(|| session.total_duration_min()));

        self.apply_completion(
            &session.workflow_id,
            result,
            duration_min,
            session.active_domain.clone(),
            session.complexity_score,
        );

        let window = self.store.config().velocity_window;
        for (phase, timing) in &session.phase_timings {
            if let Some(minutes) = timing.duration_min {
                velocity::update_phase(
                    &mut self.store.project_mut().velocity,
                    &phase_name(*phase),
                    minutes,
                    window,
                );
            }
        }

        let learning = self.promote_into_project();

        let mut domain_promotion = DomainPromotion::default();
        if let Some(domain_id) = session.active_domain.as_deref() {
            domain_promotion = self.promote_into_domain(domain_id)?;
            self.store.domain_mut(domain_id)?.update_stats(result.is_success());
            self.store.save_domain(domain_id)?;
        }

        self.store.save_project()?;
        self.store.purge()?;

        info!(
            "Consolidated {}: {} in {} min, {} records promoted",
            session.workflow_id,
            result,
            duration_min,
            learning.total_promoted() + domain_promotion.decisions + domain_promotion.problems
        );
        Ok(Some(ConsolidationSummary {
            workflow_id: session.workflow_id,
            result,
            duration_min,
            domain: session.active_domain,
            learning,
            domain_promotion,
            tool_events: session.tool_events.len(),
        }))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Project decisions sharing a word with `context`, best first
    pub fn relevant_decisions(&self, context: &str, limit: usize) -> Vec<ValidatedDecision> {
        let words = query_words(context);
        let mut relevant: Vec<_> = self
            .store
            .project()
            .decisions
            .iter()
            .filter(|d| mentions_any(&d.context, &words))
            .cloned()
            .collect();
        relevant.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then(b.validated_count.cmp(&a.validated_count))
        });
        relevant.truncate(limit);
        relevant
    }

    /// Solved problems sharing a word with `symptom`, most frequent first
    pub fn relevant_problems(&self, symptom: &str, limit: usize) -> Vec<SolvedProblem> {
        let words = query_words(symptom);
        let mut relevant: Vec<_> = self
            .store
            .project()
            .blockers
            .iter()
            .filter(|b| mentions_any(&b.symptom, &words))
            .cloned()
            .collect();
        relevant.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        relevant.truncate(limit);
        relevant
    }

    pub fn tool_stats(&self) -> BTreeMap<String, ToolSummary> {
        self.store
            .project()
            .tools
            .iter()
            .map(|(tool, stats)| {
                let total = stats.success_count + stats.fail_count;
                let success_rate = if total > 0 {
                    round2(stats.success_count as f64 / total as f64)
                } else {
                    0.0
                };
                (
                    tool.clone(),
                    ToolSummary {
                        success_count: stats.success_count,
                        fail_count: stats.fail_count,
                        total,
                        success_rate,
                    },
                )
            })
            .collect()
    }

    pub fn velocity_stats(&self) -> VelocityStats {
        let project = self.store.project();
        VelocityStats {
            by_phase: project.velocity.by_phase.clone(),
            by_complexity: project.velocity.by_complexity.clone(),
            workflows_completed: project.workflows_completed,
        }
    }
}

/// What happened to one session problem during promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProblemMerge {
    /// Merged into a project record that has now been seen often enough
    Promoted,
    /// Stored or counted in the project tier, not yet a repeat
    Recorded,
    /// Unresolved or without a solution
    Skipped,
}

/// Merge a resolved problem into the matching project record, or record it as a first
/// occurrence when nothing matches
fn merge_problem(
    project: &mut ProjectMemory,
    problem: &ActiveProblem,
    min_occurrences: u32,
    cap: usize,
) -> ProblemMerge {
    if !problem.is_promotable() {
        return ProblemMerge::Skipped;
    }
    let solution = problem.solution.clone().unwrap_or_default();

    let Some(i) = project.find_problem(&problem.symptom) else {
        let record = SolvedProblem::new(problem.symptom.clone(), solution)
            .with_tags(problem.tags.clone());
        let occurrences = record.occurrences;
        push_bounded(&mut project.blockers, record, cap);
        debug!(symptom = %problem.symptom, "Recorded first occurrence of problem");
        return if occurrences >= min_occurrences {
            ProblemMerge::Promoted
        } else {
            ProblemMerge::Recorded
        };
    };

    let existing = &mut project.blockers[i];
    existing.occurrences += 1;
    existing.last_seen = Some(Utc::now().date_naive());
    existing.solution = solution;
    if existing.prevention.is_none() {
        let head: String = problem.symptom.chars().take(50).collect();
        existing.prevention = Some(format!("Check for: {}", head));
    }
    if existing.occurrences >= min_occurrences {
        ProblemMerge::Promoted
    } else {
        ProblemMerge::Recorded
    }
}

fn is_domain_relevant(tags: &[String], domain_id: &str) -> bool {
    let own = [domain_id];
    let keywords: &[&str] = match domain_id {
        "backend" => &["api", "fastapi", "async", "service", "repository"],
        "frontend" => &["react", "vue", "css", "component", "ui"],
        "database" => &["sql", "postgres", "migration", "rls", "query"],
        "testing" => &["test", "pytest", "mock", "fixture", "coverage"],
        "api" => &["rest", "graphql", "openapi", "endpoint", "route"],
        "security" => &["auth", "jwt", "owasp", "injection", "rls"],
        "infra" => &["docker", "k8s", "ci", "cd", "terraform"],
        _ => &own,
    };
    tags.iter().any(|tag| {
        let tag = tag.to_lowercase();
        keywords.iter().any(|kw| tag.contains(kw))
    })
}

fn query_words(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    QUERY_WORD
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

fn mentions_any(text: &str, words: &[String]) -> bool {
    let text = text.to_lowercase();
    words.iter().any(|w| text.contains(w.as_str()))
}
