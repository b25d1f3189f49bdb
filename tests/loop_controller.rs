//! Integration tests for the retry loop, with scripted checkpoint commands.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use workflow_memory::config::LoopConfig;
use workflow_memory::control::{
    Checkpoint, CommandOutput, CommandRunner, ExitReason, FailureKind, LoopController,
    LoopDecision, LoopState, PlanStatus, PlannedPhase, RetryOutcome,
};
use workflow_memory::{Config, MemoryStore};

/// Replays canned outputs and remembers the commands it was asked to run
#[derive(Default)]
struct ScriptedRunner {
    outputs: Mutex<VecDeque<CommandOutput>>,
    commands: Mutex<Vec<String>>,
    timeouts: Mutex<Vec<Duration>>,
}

impl ScriptedRunner {
    fn new(outputs: Vec<CommandOutput>) -> Arc<Self> {
        Arc::new(Self {
            outputs: Mutex::new(outputs.into()),
            commands: Mutex::new(Vec::new()),
            timeouts: Mutex::new(Vec::new()),
        })
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &str, _working_dir: Option<&Path>, timeout: Duration) -> CommandOutput {
        self.commands.lock().unwrap().push(command.to_string());
        self.timeouts.lock().unwrap().push(timeout);
        self.outputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| exited("", 0))
    }
}

fn exited(stdout: &str, code: i32) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(code),
        timed_out: false,
    }
}

fn timed_out() -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: String::new(),
        exit_code: None,
        timed_out: true,
    }
}

fn setup(dir: &TempDir, loop_config: LoopConfig) -> (MemoryStore, LoopController) {
    let mut config = Config::with_data_dir(dir.path());
    config.loop_defaults = loop_config;
    let controller = LoopController::new(config.loop_defaults.clone());
    let mut store = MemoryStore::open(config).unwrap();
    store.start("2026-03-09_loop", "Fix flaky checkout", 5, None).unwrap();
    (store, controller)
}

fn loop_state(store: &MemoryStore) -> LoopState {
    store.session().unwrap().loop_state.clone().unwrap()
}

#[tokio::test]
async fn test_promise_ends_the_loop() {
    let dir = TempDir::new().unwrap();
    let (mut store, controller) = setup(&dir, LoopConfig::default());
    assert!(controller.enable(&mut store, Vec::new()).unwrap());

    let decision = controller
        .on_stop(&mut store, "All done.\nWORKFLOW COMPLETE")
        .await
        .unwrap();
    assert!(matches!(
        decision,
        LoopDecision::AllowExit { reason: ExitReason::Success, .. }
    ));
    assert!(decision.hook_response().is_none());

    let state = loop_state(&store);
    assert!(!state.enabled);
    assert!(state.completion_detected);
}

#[tokio::test]
async fn test_iteration_ceiling_times_out() {
    let dir = TempDir::new().unwrap();
    let loop_config = LoopConfig {
        max_iterations: 3,
        ..Default::default()
    };
    let (mut store, controller) = setup(&dir, loop_config);
    controller.enable(&mut store, Vec::new()).unwrap();

    for expected in [2, 3] {
        match controller.on_stop(&mut store, "still working").await.unwrap() {
            LoopDecision::Continue { iteration, failure, .. } => {
                assert_eq!(iteration, expected);
                assert_eq!(failure, None);
            }
            other => panic!("expected Continue, got {:?}", other),
        }
    }

    let decision = controller.on_stop(&mut store, "still working").await.unwrap();
    assert_eq!(
        decision,
        LoopDecision::AllowExit {
            reason: ExitReason::Timeout,
            message: "Max iterations (3) reached without completion".to_string(),
        }
    );
    assert!(!loop_state(&store).enabled);
}

#[tokio::test]
async fn test_build_failure_outranks_test_failure() {
    let dir = TempDir::new().unwrap();
    let (mut store, controller) = setup(&dir, LoopConfig::default());
    controller.enable(&mut store, Vec::new()).unwrap();
    store.start_phase(3).unwrap();

    let decision = controller
        .on_stop(&mut store, "vite build failed\n2 tests failed")
        .await
        .unwrap();
    match decision {
        LoopDecision::Continue {
            phase,
            failure,
            retry,
            reason,
            ..
        } => {
            assert_eq!(phase, 2);
            assert_eq!(failure, Some(FailureKind::BuildFailed));
            assert_eq!(retry, Some(RetryOutcome::Recorded { phase: 2, attempt: 1 }));
            assert!(reason.starts_with("Detected build_failed. Retrying from phase 2 (attempt 1/3)."));
        }
        other => panic!("expected Continue, got {:?}", other),
    }

    assert_eq!(store.session().unwrap().current_phase, 2);
    let state = loop_state(&store);
    assert_eq!(state.failure_log.len(), 1);
    assert_eq!(state.failure_log[0].action, "retry_from_phase_2");
}

#[tokio::test]
async fn test_fourth_failure_blocks_phase() {
    let dir = TempDir::new().unwrap();
    let (mut store, controller) = setup(&dir, LoopConfig::default());
    controller.enable(&mut store, Vec::new()).unwrap();

    for attempt in 1..=3 {
        let decision = controller.on_stop(&mut store, "pytest failed").await.unwrap();
        match decision {
            LoopDecision::Continue { retry, .. } => {
                assert_eq!(retry, Some(RetryOutcome::Recorded { phase: 3, attempt }));
            }
            other => panic!("expected Continue, got {:?}", other),
        }
    }

    let decision = controller.on_stop(&mut store, "pytest failed").await.unwrap();
    match decision {
        LoopDecision::Continue { retry, reason, .. } => {
            assert_eq!(retry, Some(RetryOutcome::Blocked { phase: 3, attempts: 3 }));
            assert!(reason.contains("Phase 3 exhausted its 3 retries"));
        }
        other => panic!("expected Continue, got {:?}", other),
    }

    let state = loop_state(&store);
    assert_eq!(state.retries_for(3), 3);
    assert!(state.is_blocked(3));
    assert_eq!(state.failure_log.len(), 3);
}

#[tokio::test]
async fn test_plan_checkpoints_drive_phases() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new(vec![
        exited("Finished release", 0),
        exited("1 failed, 11 passed", 1),
        exited("12 passed", 0),
    ]);
    let (mut store, controller) = setup(&dir, LoopConfig::default());
    let controller = controller.with_runner(runner.clone());

    let plan = vec![
        PlannedPhase::new(2, "build").with_checkpoint(Checkpoint::new("cargo build")),
        PlannedPhase::new(3, "tests")
            .with_checkpoint(Checkpoint::new("pytest -q").expecting("no failed")),
    ];
    controller.enable(&mut store, plan).unwrap();

    // build passes, the plan moves on to tests
    match controller.on_stop(&mut store, "").await.unwrap() {
        LoopDecision::Continue { phase, failure, .. } => {
            assert_eq!(phase, 3);
            assert_eq!(failure, None);
        }
        other => panic!("expected Continue, got {:?}", other),
    }

    // tests fail their checkpoint
    match controller.on_stop(&mut store, "").await.unwrap() {
        LoopDecision::Continue { phase, failure, retry, .. } => {
            assert_eq!(phase, 3);
            assert_eq!(failure, Some(FailureKind::CheckpointFailed));
            assert_eq!(retry, Some(RetryOutcome::Recorded { phase: 3, attempt: 1 }));
        }
        other => panic!("expected Continue, got {:?}", other),
    }
    let state = loop_state(&store);
    assert_eq!(state.phases[1].status, PlanStatus::Failed);
    assert_eq!(
        state.phases[1].error_message.as_deref(),
        Some("Found forbidden output: failed")
    );

    // the retry passes
    let decision = controller.on_stop(&mut store, "").await.unwrap();
    assert!(!decision.allows_exit());
    assert_eq!(loop_state(&store).phases[1].status, PlanStatus::Completed);

    // every phase is done, no further commands run
    let decision = controller.on_stop(&mut store, "").await.unwrap();
    assert!(matches!(
        decision,
        LoopDecision::AllowExit { reason: ExitReason::Success, .. }
    ));
    assert_eq!(runner.commands(), vec!["cargo build", "pytest -q", "pytest -q"]);
}

#[tokio::test]
async fn test_checkpoint_timeout_blocks_plan() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new(vec![timed_out(), timed_out()]);
    let (mut store, controller) = setup(&dir, LoopConfig::default());
    let controller = controller.with_runner(runner);

    let mut build = PlannedPhase::new(2, "build")
        .with_checkpoint(Checkpoint::new("npm run build").with_timeout(30));
    build.max_retries = 1;
    controller.enable(&mut store, vec![build]).unwrap();

    match controller.on_stop(&mut store, "").await.unwrap() {
        LoopDecision::Continue { reason, retry, .. } => {
            assert!(reason.starts_with("Checkpoint timeout after 30s"));
            assert_eq!(retry, Some(RetryOutcome::Recorded { phase: 2, attempt: 1 }));
        }
        other => panic!("expected Continue, got {:?}", other),
    }

    let decision = controller.on_stop(&mut store, "").await.unwrap();
    assert!(matches!(
        decision,
        LoopDecision::Continue {
            retry: Some(RetryOutcome::Blocked { .. }),
            ..
        }
    ));
    assert_eq!(loop_state(&store).phases[0].status, PlanStatus::Blocked);

    let decision = controller.on_stop(&mut store, "").await.unwrap();
    assert_eq!(
        decision,
        LoopDecision::AllowExit {
            reason: ExitReason::Blocked,
            message: "Blocked at: build".to_string(),
        }
    );
}

#[tokio::test]
async fn test_checkpoints_without_timeout_use_configured_limit() {
    let dir = TempDir::new().unwrap();
    let runner = ScriptedRunner::new(vec![timed_out(), exited("ok", 0)]);
    let loop_config = LoopConfig {
        checkpoint_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    let (mut store, controller) = setup(&dir, loop_config);
    let controller = controller.with_runner(runner.clone());

    let plan = vec![
        PlannedPhase::new(2, "build").with_checkpoint(Checkpoint::new("make")),
        PlannedPhase::new(3, "lint").with_checkpoint(Checkpoint::new("ruff check").with_timeout(30)),
    ];
    controller.enable(&mut store, plan).unwrap();

    match controller.on_stop(&mut store, "").await.unwrap() {
        LoopDecision::Continue { reason, .. } => {
            assert!(reason.starts_with("Checkpoint timeout after 5s"));
        }
        other => panic!("expected Continue, got {:?}", other),
    }
    controller.on_stop(&mut store, "").await.unwrap();
    controller.on_stop(&mut store, "").await.unwrap();

    assert_eq!(runner.commands(), vec!["make", "make", "ruff check"]);
    assert_eq!(
        runner.timeouts(),
        vec![
            Duration::from_secs(5),
            Duration::from_secs(5),
            Duration::from_secs(30)
        ]
    );
}

#[tokio::test]
async fn test_disable_lets_the_run_stop() {
    let dir = TempDir::new().unwrap();
    let (mut store, controller) = setup(&dir, LoopConfig::default());
    controller.enable(&mut store, Vec::new()).unwrap();
    assert!(controller.disable(&mut store).unwrap());
    assert!(!controller.disable(&mut store).unwrap());

    let decision = controller.on_stop(&mut store, "build failed").await.unwrap();
    assert!(matches!(
        decision,
        LoopDecision::AllowExit { reason: ExitReason::Disabled, .. }
    ));
}
