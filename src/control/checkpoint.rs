//! Verification commands attached to planned phases

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

fn default_expected() -> String {
    "exit 0".to_string()
}

/// A command whose result decides whether a phase passed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub command: String,

    /// `exit 0`, `no <text>`, or text that must appear in the output
    #[serde(default = "default_expected")]
    pub expected: String,

    /// Seconds before the command is abandoned; the loop's configured timeout when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl Checkpoint {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            expected: default_expected(),
            timeout: None,
        }
    }

    pub fn expecting(mut self, expected: impl Into<String>) -> Self {
        self.expected = expected.into();
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    /// This checkpoint's timeout, or `default` when it declares none
    pub fn effective_timeout(&self, default: Duration) -> Duration {
        self.timeout.map(Duration::from_secs).unwrap_or(default)
    }
}

/// Raw result of running a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Combined stdout and stderr
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Interpreted result of a checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointOutcome {
    pub passed: bool,
    pub message: String,
    pub output: String,
}

/// Runs checkpoint commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, working_dir: Option<&Path>, timeout: Duration) -> CommandOutput;
}

/// Runs commands through the platform shell
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, working_dir: Option<&Path>, timeout: Duration) -> CommandOutput {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);

        debug!(command = %command, "Running checkpoint command");
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                exit_code: output.status.code(),
                timed_out: false,
            },
            Ok(Err(e)) => {
                warn!(command = %command, error = %e, "Checkpoint command failed to execute");
                CommandOutput {
                    stdout: String::new(),
                    stderr: e.to_string(),
                    exit_code: None,
                    timed_out: false,
                }
            }
            Err(_) => CommandOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                timed_out: true,
            },
        }
    }
}

/// Judge command output against a checkpoint's expectation. `timeout` is the limit the
/// command ran under.
pub fn evaluate(checkpoint: &Checkpoint, output: &CommandOutput, timeout: Duration) -> CheckpointOutcome {
    let combined = output.combined();
    if output.timed_out {
        return CheckpointOutcome {
            passed: false,
            message: format!("Checkpoint timeout after {}s", timeout.as_secs()),
            output: combined,
        };
    }

    let expected = checkpoint.expected.trim();
    let lower = combined.to_lowercase();
    let (passed, message) = if expected == "exit 0" {
        match output.exit_code {
            Some(0) => (true, "Command exited with code 0".to_string()),
            Some(code) => (false, format!("Command exited with code {}", code)),
            None => (false, format!("Command did not run: {}", output.stderr.trim())),
        }
    } else if let Some(forbidden) = expected.strip_prefix("no ") {
        let forbidden = forbidden.to_lowercase();
        if lower.contains(&forbidden) {
            (false, format!("Found forbidden output: {}", forbidden))
        } else {
            (true, format!("No '{}' in output", forbidden))
        }
    } else if lower.contains(&expected.to_lowercase()) {
        (true, format!("Found expected output: {}", expected))
    } else {
        (false, format!("Expected output not found: {}", expected))
    };

    CheckpointOutcome {
        passed,
        message,
        output: combined,
    }
}

/// Run a checkpoint with the given runner and judge the result
pub async fn run_checkpoint(
    runner: &dyn CommandRunner,
    checkpoint: &Checkpoint,
    working_dir: Option<&Path>,
    default_timeout: Duration,
) -> CheckpointOutcome {
    let timeout = checkpoint.effective_timeout(default_timeout);
    let output = runner.run(&checkpoint.command, working_dir, timeout).await;
    evaluate(checkpoint, &output, timeout)
}
