//! Tiered memory store
//!
//! Owns the three tiers for one storage root. The session is kept in memory and written
//! through on every change; the project tier is loaded once when the store opens; domain
//! tiers are loaded on first use and cached.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::storage::{Loaded, TierStorage};
use crate::tiers::{
    phase_name, push_bounded, round2, ActiveProblem, DomainDecision, DomainMemory,
    PendingDecision, PhaseStatus, PhaseTiming, ProjectMemory, SessionMemory, ToolEvent,
    ValidatedDecision,
};

/// Domain knowledge included in a phase context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSummary {
    pub domain_id: String,
    pub display_name: String,
    pub key_concepts: Vec<String>,
    pub common_patterns: Vec<String>,
    pub anti_patterns: Vec<String>,
    pub decisions: Vec<DomainDecision>,
    pub success_rate: f64,
}

/// Everything the tiers know that is relevant to one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseContext {
    pub phase: i32,
    pub phase_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    #[serde(default)]
    pub complexity: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_domain: Option<String>,

    #[serde(default)]
    pub files_modified: Vec<String>,

    /// Most recently validated project decisions
    #[serde(default)]
    pub suggested_decisions: Vec<ValidatedDecision>,

    /// Rolling average for this phase, when any samples exist
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainSummary>,
}

/// The main memory store that coordinates the session, project and domain tiers
pub struct MemoryStore {
    config: Config,
    storage: TierStorage,
    session: Option<SessionMemory>,
    project: ProjectMemory,
    domains: BTreeMap<String, DomainMemory>,
}

impl MemoryStore {
    /// Open the store, loading any unpurged session and the project tier
    pub fn open(config: Config) -> Result<Self> {
        let storage = TierStorage::new(&config)?;

        let session = storage.load_session()?.into_option();
        if let Some(session) = &session {
            debug!("Resumed session {}", session.workflow_id);
        }

        let project = match storage.load_project()? {
            Loaded::Found(project) => project,
            Loaded::Missing => {
                let project = ProjectMemory::new(config.project_id.clone());
                storage.save_project(&project)?;
                project
            }
            Loaded::Corrupt => {
                warn!("Project memory unreadable, starting from an empty record");
                ProjectMemory::new(config.project_id.clone())
            }
        };

        Ok(Self {
            config,
            storage,
            session,
            project,
            domains: BTreeMap::new(),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the file storage
    pub fn storage(&self) -> &TierStorage {
        &self.storage
    }

    // ------------------------------------------------------------------
    // Session tier
    // ------------------------------------------------------------------

    /// Begin a new run, replacing any session that was never purged
    pub fn start(
        &mut self,
        run_id: impl Into<String>,
        description: impl Into<String>,
        complexity: u8,
        domain: Option<String>,
    ) -> Result<&SessionMemory> {
        if let Some(domain_id) = &domain {
            crate::storage::validate_domain_id(domain_id)?;
        }
        let session = SessionMemory::new(run_id, description, complexity, domain);
        if let Some(previous) = &self.session {
            warn!(
                "Replacing unconsolidated session {} with {}",
                previous.workflow_id, session.workflow_id
            );
        }
        info!(
            "Started session {} (complexity {}, domain {:?})",
            session.workflow_id, session.complexity_score, session.active_domain
        );
        self.storage.save_session(&session)?;
        Ok(&*self.session.insert(session))
    }

    pub fn session(&self) -> Option<&SessionMemory> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut SessionMemory> {
        self.session.as_mut()
    }

    /// Re-read the session from disk
    pub fn load_session(&mut self) -> Result<Option<&SessionMemory>> {
        self.session = self.storage.load_session()?.into_option();
        Ok(self.session.as_ref())
    }

    /// Persist the session; nothing to do without one
    pub fn save_session(&self) -> Result<()> {
        match &self.session {
            Some(session) => self.storage.save_session(session),
            None => Ok(()),
        }
    }

    /// Delete the session file and forget the in-memory session
    pub fn purge(&mut self) -> Result<bool> {
        let removed = self.storage.remove_session()?;
        if let Some(session) = self.session.take() {
            info!("Purged session {}", session.workflow_id);
        }
        Ok(removed)
    }

    /// Apply a change to the session and persist it. `None` without a session.
    pub fn update_session<T>(&mut self, f: impl FnOnce(&mut SessionMemory) -> T) -> Result<Option<T>> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };
        let value = f(session);
        self.storage.save_session(session)?;
        Ok(Some(value))
    }

    pub fn record_tool_event(&mut self, event: ToolEvent) -> Result<Option<ToolEvent>> {
        let cap = self.config.session_caps.tool_events;
        self.update_session(|session| {
            debug!(tool = %event.tool, success = event.success, "Recorded tool event");
            if let Some(file) = event.file.as_deref() {
                let files = if is_write_tool(&event.tool) {
                    &mut session.context_snapshot.files_modified
                } else {
                    &mut session.context_snapshot.files_read
                };
                push_unique(files, file);
            }
            push_bounded(&mut session.tool_events, event.clone(), cap);
            event
        })
    }

    pub fn record_decision(&mut self, decision: PendingDecision) -> Result<Option<PendingDecision>> {
        let cap = self.config.session_caps.decisions;
        self.update_session(|session| {
            debug!(context = %decision.context, "Recorded pending decision");
            push_bounded(&mut session.decisions_pending, decision.clone(), cap);
            decision
        })
    }

    /// Record a problem against the current phase
    pub fn record_problem(&mut self, mut problem: ActiveProblem) -> Result<Option<ActiveProblem>> {
        let cap = self.config.session_caps.problems;
        self.update_session(|session| {
            problem.phase = Some(session.current_phase);
            problem.resolved = problem.solution.is_some();
            debug!(symptom = %problem.symptom, "Recorded problem");
            push_bounded(&mut session.blockers_active, problem.clone(), cap);
            problem
        })
    }

    /// Resolve the first open problem whose symptom contains `symptom` (case-insensitive)
    pub fn resolve_problem(&mut self, symptom: &str, solution: &str) -> Result<bool> {
        let needle = symptom.to_lowercase();
        let Some(session) = self.session.as_mut() else {
            return Ok(false);
        };
        let Some(problem) = session
            .blockers_active
            .iter_mut()
            .find(|b| !b.resolved && b.symptom.to_lowercase().contains(&needle))
        else {
            return Ok(false);
        };
        problem.solution = Some(solution.to_string());
        problem.resolved = true;
        debug!(symptom = %problem.symptom, "Resolved problem");
        self.storage.save_session(session)?;
        Ok(true)
    }

    pub fn record_file_read(&mut self, path: &str) -> Result<()> {
        self.update_session(|s| push_unique(&mut s.context_snapshot.files_read, path))?;
        Ok(())
    }

    pub fn record_file_modified(&mut self, path: &str) -> Result<()> {
        self.update_session(|s| push_unique(&mut s.context_snapshot.files_modified, path))?;
        Ok(())
    }

    pub fn record_pattern(&mut self, category: &str, pattern: &str) -> Result<()> {
        self.update_session(|s| {
            let found = s
                .context_snapshot
                .patterns_found
                .entry(category.to_string())
                .or_default();
            push_unique(found, pattern);
        })?;
        Ok(())
    }

    pub fn set_active_domain(&mut self, domain_id: &str) -> Result<()> {
        self.update_session(|s| s.active_domain = Some(domain_id.to_string()))?;
        Ok(())
    }

    pub fn start_phase(&mut self, phase: i32) -> Result<()> {
        self.update_session(|s| {
            s.current_phase = phase;
            s.phase_status = PhaseStatus::InProgress;
            s.phase_timings.insert(
                phase,
                PhaseTiming {
                    start: Utc::now(),
                    end: None,
                    duration_min: None,
                },
            );
            info!("Phase {} ({}) started", phase, phase_name(phase));
        })?;
        Ok(())
    }

    /// Close a phase and return its duration in minutes (0.0 when it was never started)
    pub fn complete_phase(&mut self, phase: i32) -> Result<f64> {
        let duration = self.update_session(|s| {
            let Some(timing) = s.phase_timings.get_mut(&phase) else {
                return 0.0;
            };
            s.phase_status = PhaseStatus::Completed;
            let end = Utc::now();
            let minutes = round2((end - timing.start).num_milliseconds() as f64 / 60_000.0);
            timing.end = Some(end);
            timing.duration_min = Some(minutes);
            info!("Phase {} ({}) completed in {} min", phase, phase_name(phase), minutes);
            minutes
        })?;
        Ok(duration.unwrap_or(0.0))
    }

    // ------------------------------------------------------------------
    // Project tier
    // ------------------------------------------------------------------

    pub fn project(&self) -> &ProjectMemory {
        &self.project
    }

    pub fn project_mut(&mut self) -> &mut ProjectMemory {
        &mut self.project
    }

    /// Session alongside a mutable project tier, for promotion
    pub fn session_and_project_mut(&mut self) -> Option<(&SessionMemory, &mut ProjectMemory)> {
        let session = self.session.as_ref()?;
        Some((session, &mut self.project))
    }

    /// Discard the cached project tier and read it again
    pub fn load_project(&mut self) -> Result<&ProjectMemory> {
        self.project = self
            .storage
            .load_project()?
            .into_option()
            .unwrap_or_else(|| ProjectMemory::new(self.config.project_id.clone()));
        Ok(&self.project)
    }

    pub fn save_project(&mut self) -> Result<()> {
        self.project.touch();
        self.storage.save_project(&self.project)
    }

    // ------------------------------------------------------------------
    // Domain tier
    // ------------------------------------------------------------------

    /// Domain tier for `domain_id`, created and persisted when missing
    pub fn domain_mut(&mut self, domain_id: &str) -> Result<&mut DomainMemory> {
        if !self.domains.contains_key(domain_id) {
            let domain = match self.storage.load_domain(domain_id)? {
                Loaded::Found(domain) => domain,
                Loaded::Missing => {
                    let domain = DomainMemory::new(domain_id);
                    self.storage.save_domain(&domain)?;
                    domain
                }
                Loaded::Corrupt => {
                    warn!("Domain memory {} unreadable, starting fresh", domain_id);
                    DomainMemory::new(domain_id)
                }
            };
            self.domains.insert(domain_id.to_string(), domain);
        }
        self.domains
            .get_mut(domain_id)
            .ok_or_else(|| crate::Error::not_found(format!("domain {}", domain_id)))
    }

    pub fn load_domain(&mut self, domain_id: &str) -> Result<&DomainMemory> {
        Ok(&*self.domain_mut(domain_id)?)
    }

    /// Cached domain tier, if it has been loaded
    pub fn cached_domain(&self, domain_id: &str) -> Option<&DomainMemory> {
        self.domains.get(domain_id)
    }

    pub fn save_domain(&mut self, domain_id: &str) -> Result<()> {
        let domain = self.domain_mut(domain_id)?;
        domain.updated_at = Utc::now();
        let domain = domain.clone();
        self.storage.save_domain(&domain)
    }

    pub fn save_all_domains(&mut self) -> Result<()> {
        for domain in self.domains.values_mut() {
            domain.updated_at = Utc::now();
            self.storage.save_domain(domain)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Context
    // ------------------------------------------------------------------

    /// Combined context from all tiers for one phase
    pub fn phase_context(&mut self, phase: i32) -> Result<PhaseContext> {
        let suggested_decisions = {
            let decisions = &self.project.decisions;
            decisions[decisions.len().saturating_sub(10)..].to_vec()
        };
        let estimated_duration_min = self
            .project
            .velocity
            .by_phase
            .get(&phase_name(phase))
            .filter(|v| v.samples > 0)
            .map(|v| v.avg_min);

        let mut context = PhaseContext {
            phase,
            phase_name: phase_name(phase),
            workflow_id: None,
            task: None,
            complexity: 0,
            active_domain: None,
            files_modified: Vec::new(),
            suggested_decisions,
            estimated_duration_min,
            domain: None,
        };

        let Some(session) = &self.session else {
            return Ok(context);
        };
        context.workflow_id = Some(session.workflow_id.clone());
        context.task = Some(session.task_description.clone());
        context.complexity = session.complexity_score;
        context.active_domain = session.active_domain.clone();
        context.files_modified = session.context_snapshot.files_modified.clone();

        if let Some(domain_id) = context.active_domain.clone() {
            let domain = self.domain_mut(&domain_id)?;
            context.domain = Some(DomainSummary {
                domain_id: domain.domain_id.clone(),
                display_name: domain.display_name.clone(),
                key_concepts: domain.context.key_concepts.clone(),
                common_patterns: domain.context.common_patterns.clone(),
                anti_patterns: domain.context.anti_patterns.clone(),
                decisions: domain.decisions[domain.decisions.len().saturating_sub(5)..].to_vec(),
                success_rate: domain.success_rate,
            });
        }
        Ok(context)
    }
}

fn push_unique(items: &mut Vec<String>, value: &str) {
    if !items.iter().any(|v| v == value) {
        items.push(value.to_string());
    }
}

fn is_write_tool(tool: &str) -> bool {
    matches!(tool, "Write" | "Edit" | "MultiEdit" | "NotebookEdit")
}
