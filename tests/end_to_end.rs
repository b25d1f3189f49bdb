//! Integration tests for a full run: session capture, consolidation and promotion.

use tempfile::TempDir;
use workflow_memory::{
    tiers::SolvedProblem, ActiveProblem, Config, DomainRegistry, LearningEngine, MemoryStore,
    PendingDecision, RunOutcome, RunResult, Severity, ToolEvent,
};

fn test_config(dir: &TempDir) -> Config {
    Config::with_data_dir(dir.path()).with_project_id("shop")
}

#[test]
fn test_full_run_consolidates_and_purges() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let session_path = config.session_path();
    let mut store = MemoryStore::open(config).unwrap();
    let completed_before = store.project().workflows_completed;

    store
        .start("2026-03-09_issue-64", "Add pagination to /users", 7, Some("api".into()))
        .unwrap();
    store.start_phase(2).unwrap();
    store
        .record_tool_event(ToolEvent::new("Edit", true).with_file("src/api/users.py"))
        .unwrap();
    store
        .record_tool_event(ToolEvent::new("Bash", false).with_error("pytest failed"))
        .unwrap();
    store
        .record_tool_event(ToolEvent::new("Bash", true).with_correction("fixed fixture"))
        .unwrap();
    store.complete_phase(2).unwrap();
    assert!(session_path.exists());

    let summary = LearningEngine::new(&mut store)
        .consolidate(RunOutcome::with_success_rate(1.0))
        .unwrap()
        .expect("session was active");

    assert_eq!(summary.result, RunResult::Success);
    assert_eq!(summary.domain.as_deref(), Some("api"));
    assert_eq!(summary.tool_events, 3);
    assert_eq!(summary.learning.tool_patterns_updated, 3);

    let project = store.project();
    assert_eq!(project.workflows_completed, completed_before + 1);
    assert!(project.tools["Bash"].fail_count >= 1);
    assert_eq!(project.tools["Bash"].success_count, 1);
    assert!(project.velocity.by_phase.contains_key("execution"));
    assert_eq!(project.velocity.by_complexity["high"].samples, 1);
    assert_eq!(project.history.last().unwrap().id, "2026-03-09_issue-64");

    assert!(store.session().is_none());
    assert!(!session_path.exists());
}

#[test]
fn test_project_tier_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let mut store = MemoryStore::open(test_config(&dir)).unwrap();
        store.start("run-1", "Refactor service layer", 4, None).unwrap();
        store
            .record_decision(
                PendingDecision::new("Service layer error handling", "Return typed errors", 0.9),
            )
            .unwrap();

        let mut engine = LearningEngine::new(&mut store);
        assert!(engine.validate_decision("error handling", true).unwrap());
        assert!(engine.validate_decision("error handling", true).unwrap());
        let summary = engine.consolidate(RunOutcome::default()).unwrap().unwrap();
        assert_eq!(summary.learning.decisions_promoted, 1);
    }

    let store = MemoryStore::open(test_config(&dir)).unwrap();
    assert!(store.session().is_none());
    assert_eq!(store.project().decisions.len(), 1);
    assert_eq!(store.project().decisions[0].decision, "Return typed errors");
    assert_eq!(store.project().history.len(), 1);
}

#[test]
fn test_recurring_problem_promotes_and_reaches_domain() {
    let dir = TempDir::new().unwrap();
    let mut store = MemoryStore::open(test_config(&dir)).unwrap();
    store.project_mut().blockers.push(
        SolvedProblem::new("Migration lock timeout on deploy", "Run migrations before rollout"),
    );
    store.save_project().unwrap();

    store
        .start("run-2", "Add index to orders table", 5, Some("database".into()))
        .unwrap();
    store
        .record_problem(
            ActiveProblem::new("Migration lock timeout")
                .with_severity(Severity::High)
                .with_tags(vec!["migration".into()]),
        )
        .unwrap();
    assert!(store
        .resolve_problem("lock timeout", "Use lock_timeout and retry")
        .unwrap());

    let summary = LearningEngine::new(&mut store)
        .consolidate(RunOutcome::default())
        .unwrap()
        .unwrap();
    assert_eq!(summary.result, RunResult::Success);
    assert_eq!(summary.learning.problems_promoted, 1);
    assert_eq!(summary.domain_promotion.problems, 1);

    let blocker = &store.project().blockers[0];
    assert_eq!(blocker.occurrences, 2);
    assert_eq!(blocker.solution, "Use lock_timeout and retry");

    let domain = store.load_domain("database").unwrap();
    assert_eq!(domain.tasks_handled, 1);
    assert!(domain.has_problem("Migration lock timeout"));
}

#[test]
fn test_unresolved_critical_problem_fails_run() {
    let dir = TempDir::new().unwrap();
    let mut store = MemoryStore::open(test_config(&dir)).unwrap();
    store.start("run-3", "Upgrade auth library", 3, None).unwrap();
    store
        .record_problem(ActiveProblem::new("Tokens rejected").with_severity(Severity::Critical))
        .unwrap();

    let summary = LearningEngine::new(&mut store)
        .consolidate(RunOutcome::default())
        .unwrap()
        .unwrap();
    assert_eq!(summary.result, RunResult::Failed);
    assert_eq!(store.project().workflows_completed, 0);
}

#[test]
fn test_registry_context_uses_domain_memory() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let registry = DomainRegistry::load(&config);
    let mut store = MemoryStore::open(config).unwrap();

    let matched = registry.match_domain(
        "Write pytest fixtures to raise coverage",
        &["tests/test_orders.py".to_string()],
    );
    assert_eq!(matched.domain_id, "testing");

    let context = registry
        .expert_context(&matched.domain_id, Some(&mut store))
        .unwrap();
    let prompt = context.prompt_context();
    assert!(prompt.starts_with("## Testing Expert Context"));
    assert!(prompt.contains("**Domain:** testing"));
}

#[test]
fn test_consolidate_without_session_is_noop() {
    let dir = TempDir::new().unwrap();
    let mut store = MemoryStore::open(test_config(&dir)).unwrap();

    let summary = tokio_test::block_on(async {
        LearningEngine::new(&mut store).consolidate(RunOutcome::with_result(RunResult::Success))
    })
    .unwrap();
    assert!(summary.is_none());
    assert!(store.project().history.is_empty());
}

#[test]
fn test_first_resolution_is_recorded_then_promoted_on_repeat() {
    let dir = TempDir::new().unwrap();
    let mut store = MemoryStore::open(test_config(&dir)).unwrap();

    for (run, expected_promoted) in [("run-a", 0), ("run-b", 1)] {
        store.start(run, "Seed fixtures", 3, None).unwrap();
        store
            .record_problem(ActiveProblem::new("Connection refused on 5432").with_solution("start db"))
            .unwrap();
        let summary = LearningEngine::new(&mut store)
            .consolidate(RunOutcome::default())
            .unwrap()
            .unwrap();
        assert_eq!(summary.learning.problems_promoted, expected_promoted);
        assert_eq!(store.project().blockers.len(), 1);
    }

    let reopened = MemoryStore::open(test_config(&dir)).unwrap();
    let blocker = &reopened.project().blockers[0];
    assert_eq!(blocker.symptom, "Connection refused on 5432");
    assert_eq!(blocker.occurrences, 2);
    assert_eq!(blocker.solution, "start db");
}
