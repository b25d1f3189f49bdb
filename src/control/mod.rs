//! Loop controller: decides whether a run may stop or must retry a phase
//!
//! On every stop event the controller checks, in order: the completion promise, the
//! iteration ceiling, the phase plan (all done or something blocked), and then looks for a
//! failure, either from the current planned phase's checkpoint or from markers in the
//! output. Failures send the run back to a phase, at most `max_phase_retries` times per phase.

pub mod checkpoint;
pub mod failure;
pub mod plan;
pub mod state;

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

pub use checkpoint::{Checkpoint, CheckpointOutcome, CommandOutput, CommandRunner, ShellRunner};
pub use failure::{detect_failure, FailureKind};
pub use plan::{PlanStatus, PlannedPhase};
pub use state::{FailureEntry, LoopState, RetryOutcome};

use crate::config::LoopConfig;
use crate::error::Result;
use crate::memory::MemoryStore;
use crate::tiers::PhaseStatus;

/// Why the run is allowed to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Completion promise seen, or every planned phase completed
    Success,
    /// Iteration ceiling reached
    Timeout,
    /// A planned phase used all of its retries
    Blocked,
    /// The loop is not enabled for this session
    Disabled,
    /// No active session
    NoSession,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Success => write!(f, "success"),
            ExitReason::Timeout => write!(f, "timeout"),
            ExitReason::Blocked => write!(f, "blocked"),
            ExitReason::Disabled => write!(f, "disabled"),
            ExitReason::NoSession => write!(f, "no_session"),
        }
    }
}

/// Decision returned for a stop event
#[derive(Debug, Clone, PartialEq)]
pub enum LoopDecision {
    AllowExit {
        reason: ExitReason,
        message: String,
    },
    Continue {
        /// Phase the run should work on next
        phase: i32,
        failure: Option<FailureKind>,
        retry: Option<RetryOutcome>,
        iteration: u32,
        reason: String,
    },
}

impl LoopDecision {
    fn exit(reason: ExitReason, message: impl Into<String>) -> Self {
        LoopDecision::AllowExit {
            reason,
            message: message.into(),
        }
    }

    pub fn allows_exit(&self) -> bool {
        matches!(self, LoopDecision::AllowExit { .. })
    }

    /// JSON the host expects on stdout to keep the loop going
    pub fn hook_response(&self) -> Option<serde_json::Value> {
        match self {
            LoopDecision::Continue { reason, .. } => Some(json!({
                "decision": "block",
                "reason": reason,
            })),
            LoopDecision::AllowExit { .. } => None,
        }
    }
}

/// Bounded-retry state machine driven by stop events
pub struct LoopController {
    config: LoopConfig,
    runner: Arc<dyn CommandRunner>,
}

impl LoopController {
    pub fn new(config: LoopConfig) -> Self {
        Self {
            config,
            runner: Arc::new(ShellRunner),
        }
    }

    /// Use a different command runner for checkpoints
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Enable the loop for the active session, optionally with an explicit phase plan
    pub fn enable(&self, memory: &mut MemoryStore, phases: Vec<PlannedPhase>) -> Result<bool> {
        let state = LoopState::enabled(&self.config).with_phases(phases);
        let enabled = memory.update_session(|session| {
            info!(
                "Loop enabled for {} (max {} iterations)",
                session.workflow_id, state.max_iterations
            );
            session.loop_state = Some(state);
        })?;
        Ok(enabled.is_some())
    }

    pub fn disable(&self, memory: &mut MemoryStore) -> Result<bool> {
        let disabled = memory.update_session(|session| match session.loop_state.as_mut() {
            Some(state) if state.enabled => {
                state.disable(false);
                true
            }
            _ => false,
        })?;
        Ok(disabled.unwrap_or(false))
    }

    /// Handle a stop event, running the current phase's checkpoint when it has one
    pub async fn on_stop(&self, memory: &mut MemoryStore, output: &str) -> Result<LoopDecision> {
        let pending = memory.session().and_then(|session| {
            let state = session.loop_state.as_ref().filter(|s| s.enabled)?;
            if exit_condition(state, output).is_some() {
                return None;
            }
            plan::current_phase(&state.phases).and_then(|p| p.checkpoint.clone())
        });

        let outcome = match pending {
            Some(cp) => {
                info!("Running checkpoint: {}", cp.command);
                let dir = self.config.checkpoint_dir.as_deref();
                let timeout = self.config.checkpoint_timeout;
                Some(checkpoint::run_checkpoint(self.runner.as_ref(), &cp, dir, timeout).await)
            }
            None => None,
        };
        self.evaluate(memory, output, outcome)
    }

    /// Decide a stop event given the output and an optional checkpoint result
    pub fn evaluate(
        &self,
        memory: &mut MemoryStore,
        output: &str,
        checkpoint: Option<CheckpointOutcome>,
    ) -> Result<LoopDecision> {
        let config = &self.config;
        let decision = memory.update_session(|session| {
            let Some(state) = session.loop_state.as_mut().filter(|s| s.enabled) else {
                return LoopDecision::exit(ExitReason::Disabled, "Loop not enabled");
            };

            if let Some((reason, message)) = exit_condition(state, output) {
                state.disable(reason == ExitReason::Success);
                info!("Loop finished ({}): {}", reason, message);
                return LoopDecision::exit(reason, message);
            }

            let plan_index = plan::current_phase(&state.phases)
                .and_then(|current| state.phases.iter().position(|p| p.id == current.id));

            let failure = match (plan_index, checkpoint) {
                (Some(i), Some(outcome)) => {
                    if outcome.passed {
                        state.phases[i].mark_completed();
                        info!("Checkpoint passed for {}", state.phases[i].name);
                        None
                    } else {
                        Some((FailureKind::CheckpointFailed, state.phases[i].id, outcome.message))
                    }
                }
                (Some(i), None) => match detect_failure(output) {
                    Some(kind) => Some((kind, state.phases[i].id, format!("Detected {}", kind))),
                    None => {
                        state.phases[i].mark_completed();
                        None
                    }
                },
                (None, _) => detect_failure(output)
                    .map(|kind| (kind, kind.retry_phase(), format!("Detected {}", kind))),
            };

            let mut retry = None;
            let mut phase = session.current_phase;
            let mut reason = String::new();
            let kind = failure.as_ref().map(|(kind, _, _)| *kind);

            if let Some((kind, target, message)) = failure {
                let max_retries = plan_index
                    .map(|i| state.phases[i].max_retries)
                    .unwrap_or(config.max_phase_retries);
                let outcome = state.record_retry(target, max_retries);
                match outcome {
                    RetryOutcome::Recorded { attempt, .. } => {
                        let action = format!("retry_from_phase_{}", target);
                        state.log_failure(target, message.clone(), action, config.failure_log_cap);
                        session.current_phase = target;
                        session.phase_status = PhaseStatus::InProgress;
                        phase = target;
                        info!(
                            "Detected {}, retrying from phase {} ({}/{})",
                            kind, target, attempt, max_retries
                        );
                        reason = format!(
                            "{}. Retrying from phase {} (attempt {}/{}). ",
                            message, target, attempt, max_retries
                        );
                    }
                    RetryOutcome::Blocked { .. } => {
                        warn!(
                            "Max retries ({}) reached for phase {}, continuing without reset",
                            max_retries, target
                        );
                        reason = format!(
                            "{}. Phase {} exhausted its {} retries. ",
                            message, target, max_retries
                        );
                    }
                }
                if let Some(i) = plan_index {
                    state.phases[i].apply_retry(outcome, message);
                }
                retry = Some(outcome);
            } else if let Some(next) = plan::next_pending(&state.phases) {
                phase = next.id;
            }

            state.iteration += 1;
            reason.push_str(&format!(
                "Loop continuing - iteration {}/{}. When done, output: {}",
                state.iteration, state.max_iterations, state.completion_promise
            ));
            LoopDecision::Continue {
                phase,
                failure: kind,
                retry,
                iteration: state.iteration,
                reason,
            }
        })?;

        Ok(decision.unwrap_or_else(|| LoopDecision::exit(ExitReason::NoSession, "No active session")))
    }
}

/// Conditions that end the loop regardless of failures
fn exit_condition(state: &LoopState, output: &str) -> Option<(ExitReason, String)> {
    if !state.completion_promise.is_empty() && output.contains(&state.completion_promise) {
        return Some((
            ExitReason::Success,
            format!("Completion promise detected after {} iteration(s)", state.iteration),
        ));
    }
    if state.iteration >= state.max_iterations {
        return Some((
            ExitReason::Timeout,
            format!("Max iterations ({}) reached without completion", state.max_iterations),
        ));
    }
    if plan::all_completed(&state.phases) {
        return Some((ExitReason::Success, "All planned phases completed".to_string()));
    }
    if plan::any_blocked(&state.phases) {
        let blocked: Vec<_> = state
            .phases
            .iter()
            .filter(|p| p.status == PlanStatus::Blocked)
            .map(|p| p.name.as_str())
            .collect();
        return Some((ExitReason::Blocked, format!("Blocked at: {}", blocked.join(", "))));
    }
    None
}
