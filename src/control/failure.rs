//! Text-based failure detection

use serde::{Deserialize, Serialize};

const BUILD_MARKERS: &[&str] = &[
    "build failed",
    "compilation error",
    "vite build failed",
    "webpack error",
    "esbuild error",
    "bundler error",
];

const LINT_MARKERS: &[&str] = &[
    "eslint",
    "ruff",
    "lint error",
    "linting error",
    "typescript error",
    "mypy",
    "type error",
    "tslint",
    "prettier error",
];

const TEST_MARKERS: &[&str] = &[
    "pytest failed",
    "vitest failed",
    "test failed",
    "tests failed",
    "assertionerror",
    "error: expect(",
    "failed",
];

/// Phase that produces the code, retried when the build breaks
pub const EXECUTION_PHASE: i32 = 2;

/// Phase that verifies the code, retried on lint and test failures
pub const REVIEW_PHASE: i32 = 3;

/// Class of failure found in command output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BuildFailed,
    LintFailed,
    TestsFailed,
    CheckpointFailed,
    Unknown,
}

impl FailureKind {
    /// Phase to return to for this kind of failure
    pub fn retry_phase(&self) -> i32 {
        match self {
            FailureKind::BuildFailed => EXECUTION_PHASE,
            _ => REVIEW_PHASE,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::BuildFailed => write!(f, "build_failed"),
            FailureKind::LintFailed => write!(f, "lint_failed"),
            FailureKind::TestsFailed => write!(f, "tests_failed"),
            FailureKind::CheckpointFailed => write!(f, "checkpoint_failed"),
            FailureKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Scan output for failure markers. Build beats lint, lint beats tests.
pub fn detect_failure(output: &str) -> Option<FailureKind> {
    let lower = output.to_lowercase();
    let hit = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if hit(BUILD_MARKERS) {
        Some(FailureKind::BuildFailed)
    } else if hit(LINT_MARKERS) {
        Some(FailureKind::LintFailed)
    } else if hit(TEST_MARKERS) {
        Some(FailureKind::TestsFailed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_takes_priority() {
        let output = "Build failed\nlint error in foo.py\npytest FAILED";
        assert_eq!(detect_failure(output), Some(FailureKind::BuildFailed));
    }

    #[test]
    fn lint_beats_tests() {
        assert_eq!(
            detect_failure("mypy: found 2 errors; 1 test failed"),
            Some(FailureKind::LintFailed)
        );
    }

    #[test]
    fn detects_test_failures_case_insensitively() {
        assert_eq!(detect_failure("pytest failed: 3 errors"), Some(FailureKind::TestsFailed));
        assert_eq!(detect_failure("AssertionError: x != y"), Some(FailureKind::TestsFailed));
    }

    #[test]
    fn clean_output_has_no_failure() {
        assert_eq!(detect_failure("all 42 tests passed"), None);
    }

    #[test]
    fn retry_targets() {
        assert_eq!(FailureKind::BuildFailed.retry_phase(), 2);
        assert_eq!(FailureKind::LintFailed.retry_phase(), 3);
        assert_eq!(FailureKind::TestsFailed.retry_phase(), 3);
        assert_eq!(FailureKind::Unknown.retry_phase(), 3);
    }
}
