//! Workflow orchestrator
//!
//! Thin async composition root over the memory store and learning engine. A run is
//! started, moves through numbered phases, and is completed or aborted; completion
//! consolidates everything the session learned.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::learning::{infer_result, ConsolidationSummary, LearningEngine, RunOutcome};
use crate::memory::{MemoryStore, PhaseContext};
use crate::tiers::{round2, ActiveProblem, PendingDecision, RunResult, Severity, ToolEvent};

static ISSUE_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"#(\d+)").unwrap());
static SLUG_NOISE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "pending"),
            WorkflowStatus::InProgress => write!(f, "in_progress"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Summary of one finished phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: i32,
    pub success: bool,
    pub duration_min: f64,

    /// Tool events recorded since the phase started
    pub tool_events: usize,

    /// Errors from failed tool events in this phase, truncated
    pub errors: Vec<String>,

    pub decisions_made: usize,
    pub problems_resolved: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub workflow_id: String,
    pub result: RunResult,
    pub duration_min: f64,
    pub phases_completed: usize,
    pub tool_events: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidation: Option<ConsolidationSummary>,
}

/// Observers for phase transitions. Errors are logged and never stop the run.
#[async_trait]
pub trait WorkflowHooks: Send + Sync {
    async fn on_phase_start(&self, _phase: i32, _description: &str) -> Result<()> {
        Ok(())
    }

    async fn on_phase_complete(&self, _result: &PhaseResult) -> Result<()> {
        Ok(())
    }

    async fn on_error(&self, _message: &str) -> Result<()> {
        Ok(())
    }
}

/// Options for [`run_workflow`]
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub workflow_id: Option<String>,
    pub domain: Option<String>,
    pub complexity: u8,
}

/// Drives one run through its phases
pub struct WorkflowOrchestrator {
    store: MemoryStore,
    workflow_id: String,
    description: String,
    domain: Option<String>,
    complexity: u8,
    status: WorkflowStatus,
    current_phase: Option<i32>,
    phase_results: BTreeMap<i32, PhaseResult>,
    started_at: Option<DateTime<Utc>>,
    hooks: Vec<Arc<dyn WorkflowHooks>>,
}

impl WorkflowOrchestrator {
    /// Open the memory store for a new, not yet started run
    pub fn new(config: Config, workflow_id: impl Into<String>, description: impl Into<String>) -> Result<Self> {
        Ok(Self {
            store: MemoryStore::open(config)?,
            workflow_id: workflow_id.into(),
            description: description.into(),
            domain: None,
            complexity: 0,
            status: WorkflowStatus::Pending,
            current_phase: None,
            phase_results: BTreeMap::new(),
            started_at: None,
            hooks: Vec::new(),
        })
    }

    pub fn with_domain(mut self, domain: Option<String>) -> Self {
        self.domain = domain;
        self
    }

    pub fn with_complexity(mut self, complexity: u8) -> Self {
        self.complexity = complexity.min(10);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn WorkflowHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn status(&self) -> WorkflowStatus {
        self.status
    }

    pub fn current_phase(&self) -> Option<i32> {
        self.current_phase
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkflowStatus::InProgress
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MemoryStore {
        &mut self.store
    }

    /// Learning engine over this run's store
    pub fn learning(&mut self) -> LearningEngine<'_> {
        LearningEngine::new(&mut self.store)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub async fn start(&mut self) -> Result<()> {
        if self.status != WorkflowStatus::Pending {
            return Err(Error::invalid_input(format!(
                "cannot start workflow {} while {}",
                self.workflow_id, self.status
            )));
        }
        self.store.start(
            self.workflow_id.clone(),
            self.description.clone(),
            self.complexity,
            self.domain.clone(),
        )?;
        if let Some(domain) = self.domain.clone() {
            self.store.load_domain(&domain)?;
        }
        self.started_at = Some(Utc::now());
        self.status = WorkflowStatus::InProgress;
        info!("Workflow {} started", self.workflow_id);
        Ok(())
    }

    /// Start a phase, completing the previous one first
    pub async fn start_phase(&mut self, phase: i32, description: &str) -> Result<()> {
        self.ensure_running()?;
        if self.current_phase.is_some() {
            self.complete_phase(true, "").await?;
        }
        self.store.start_phase(phase)?;
        self.current_phase = Some(phase);

        for hook in &self.hooks {
            if let Err(e) = hook.on_phase_start(phase, description).await {
                warn!("Phase start hook failed: {}", e);
            }
        }
        Ok(())
    }

    /// Close the current phase. `None` when no phase is running.
    pub async fn complete_phase(&mut self, success: bool, notes: &str) -> Result<Option<PhaseResult>> {
        let Some(phase) = self.current_phase.take() else {
            return Ok(None);
        };

        let (tool_events, errors, decisions_made, problems_resolved) = match self.store.session() {
            Some(session) => {
                let since = session.phase_timings.get(&phase).map(|t| t.start);
                let events: Vec<_> = session
                    .tool_events
                    .iter()
                    .filter(|e| since.map_or(true, |start| e.timestamp >= start))
                    .collect();
                let errors = events
                    .iter()
                    .filter(|e| !e.success)
                    .filter_map(|e| e.error.as_deref())
                    .map(|err| err.chars().take(100).collect::<String>())
                    .collect::<Vec<_>>();
                (
                    events.len(),
                    errors,
                    session.decisions_pending.len(),
                    session.blockers_active.iter().filter(|b| b.resolved).count(),
                )
            }
            None => (0, Vec::new(), 0, 0),
        };

        let duration_min = self.store.complete_phase(phase)?;
        let result = PhaseResult {
            phase,
            success,
            duration_min,
            tool_events,
            errors,
            decisions_made,
            problems_resolved,
            notes: (!notes.is_empty()).then(|| notes.to_string()),
        };
        self.phase_results.insert(phase, result.clone());

        for hook in &self.hooks {
            if let Err(e) = hook.on_phase_complete(&result).await {
                warn!("Phase complete hook failed: {}", e);
            }
        }
        if !success {
            self.notify_error(&format!("Phase {} failed", phase)).await;
        }
        Ok(Some(result))
    }

    /// Finish the run and consolidate its learnings
    pub async fn complete(&mut self, result: Option<RunResult>) -> Result<WorkflowOutcome> {
        self.ensure_running()?;
        self.finish(result).await
    }

    /// Record the abort as a critical problem and finish the run
    pub async fn abort(&mut self, reason: &str) -> Result<WorkflowOutcome> {
        warn!("Workflow {} aborted: {}", self.workflow_id, reason);
        self.store.record_problem(
            ActiveProblem::new(format!("Workflow aborted: {}", reason))
                .with_severity(Severity::Critical)
                .with_tags(vec!["abort".to_string(), "workflow".to_string()]),
        )?;
        self.notify_error(reason).await;
        self.finish(Some(RunResult::Aborted)).await
    }

    async fn finish(&mut self, result: Option<RunResult>) -> Result<WorkflowOutcome> {
        if self.current_phase.is_some() {
            self.complete_phase(true, "").await?;
        }

        let result = result.unwrap_or_else(|| match self.store.session() {
            Some(session) => infer_result(session),
            None => RunResult::Failed,
        });
        let duration_min = self
            .started_at
            .map(|start| round2((Utc::now() - start).num_milliseconds() as f64 / 60_000.0))
            .unwrap_or(0.0);
        let tool_events = self.store.session().map_or(0, |s| s.tool_events.len());

        let consolidation = self
            .learning()
            .consolidate(RunOutcome::with_result(result).duration(duration_min))?;

        self.status = match result {
            RunResult::Failed | RunResult::Aborted => WorkflowStatus::Failed,
            _ => WorkflowStatus::Completed,
        };
        info!("Workflow {} finished: {}", self.workflow_id, result);

        Ok(WorkflowOutcome {
            workflow_id: self.workflow_id.clone(),
            result,
            duration_min,
            phases_completed: self.phase_results.len(),
            tool_events,
            consolidation,
        })
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::invalid_input(format!(
                "workflow {} is not running ({})",
                self.workflow_id, self.status
            )))
        }
    }

    async fn notify_error(&self, message: &str) {
        for hook in &self.hooks {
            if let Err(e) = hook.on_error(message).await {
                warn!("Error hook failed: {}", e);
            }
        }
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    pub fn record_tool_event(&mut self, event: ToolEvent) -> Result<()> {
        self.learning().capture_tool_event(event)?;
        Ok(())
    }

    pub fn record_decision(&mut self, decision: PendingDecision) -> Result<()> {
        self.learning().capture_decision(decision)?;
        Ok(())
    }

    pub fn record_problem(&mut self, problem: ActiveProblem) -> Result<()> {
        self.learning().capture_problem(problem)?;
        Ok(())
    }

    pub fn resolve_problem(&mut self, symptom: &str, solution: &str) -> Result<bool> {
        self.learning().resolve_problem(symptom, solution)
    }

    /// Context for the current phase (phase -1 before any phase starts)
    pub fn context(&mut self) -> Result<PhaseContext> {
        let phase = self.current_phase.unwrap_or(-1);
        self.store.phase_context(phase)
    }
}

/// Identifier for a run: `YYYY-MM-DD_issue-N` when the description references an issue,
/// otherwise the first three words of the description
pub fn generate_run_id(description: &str, date: NaiveDate) -> String {
    let slug = match ISSUE_REF.captures(description) {
        Some(caps) => format!("issue-{}", &caps[1]),
        None => {
            let lower = description.to_lowercase();
            let cleaned = SLUG_NOISE.replace_all(&lower, "");
            let words: Vec<_> = cleaned.split_whitespace().take(3).collect();
            if words.is_empty() {
                "workflow".to_string()
            } else {
                words.join("-")
            }
        }
    };
    format!("{}_{}", date.format("%Y-%m-%d"), slug)
}

/// Future returned by a [`run_workflow`] body
pub type RunBody<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Start a run, execute `body`, and complete the run. A failing body aborts the run
/// with the error as the reason and the error is returned.
pub async fn run_workflow<T, F>(
    description: &str,
    config: Config,
    options: RunOptions,
    body: F,
) -> Result<(T, WorkflowOutcome)>
where
    F: for<'a> FnOnce(&'a mut WorkflowOrchestrator) -> RunBody<'a, T>,
{
    let workflow_id = options
        .workflow_id
        .unwrap_or_else(|| generate_run_id(description, Utc::now().date_naive()));

    let mut orchestrator = WorkflowOrchestrator::new(config, workflow_id, description)?
        .with_domain(options.domain)
        .with_complexity(options.complexity);
    orchestrator.start().await?;

    match body(&mut orchestrator).await {
        Ok(value) => {
            let outcome = orchestrator.complete(None).await?;
            Ok((value, outcome))
        }
        Err(e) => {
            if let Err(abort_err) = orchestrator.abort(&e.to_string()).await {
                warn!("Abort after failure also failed: {}", abort_err);
            }
            Err(e)
        }
    }
}
