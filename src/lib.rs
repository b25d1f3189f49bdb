//! # Workflow Memory
//!
//! Persistent memory, learning and retry control for multi-phase task workflows.
//!
//! ## Architecture
//!
//! Knowledge lives in three tiers:
//! - **Tier 1: Session** - everything observed in one run, JSON, purged at the end
//! - **Tier 2: Project** - validated decisions, recurring problems, velocity, tool stats
//! - **Tier 3: Domain** - specialist knowledge shared across projects, one file per domain
//!
//! The learning engine promotes session records upward once they prove themselves, the
//! domain registry routes a task to the best-fitting domain, and the loop controller keeps
//! a run going until it finishes, times out or exhausts its retries.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use workflow_memory::{Config, LearningEngine, MemoryStore, RunOutcome, ToolEvent};
//!
//! let mut store = MemoryStore::open(Config::default())?;
//! store.start("2026-01-05_issue-64", "Add pagination", 5, Some("api".into()))?;
//!
//! // Record what happens during the run
//! store.start_phase(2)?;
//! store.record_tool_event(ToolEvent::new("Edit", true).with_file("src/api/users.py"))?;
//! store.complete_phase(2)?;
//!
//! // Promote what was learned and purge the session
//! let summary = LearningEngine::new(&mut store).consolidate(RunOutcome::with_success_rate(1.0))?;
//! ```

pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod learning;
pub mod memory;
pub mod registry;
pub mod storage;
pub mod tiers;
pub mod workflow;

pub use codec::{CodecKind, StructuredText};
pub use config::Config;
pub use control::{LoopController, LoopDecision, PlannedPhase};
pub use error::{Error, Result};
pub use learning::{ConsolidationSummary, LearningEngine, LearningResult, RunOutcome};
pub use memory::{MemoryStore, PhaseContext};
pub use registry::{DomainMatch, DomainProfile, DomainRegistry};
pub use tiers::{ActiveProblem, PendingDecision, RunResult, Severity, ToolEvent};
pub use workflow::{run_workflow, WorkflowHooks, WorkflowOrchestrator, WorkflowOutcome};
