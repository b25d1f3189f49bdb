//! Workflow hook adapter
//!
//! Reads one JSON event from stdin and applies it to the memory under the storage root.
//! Logs go to stderr; stdout carries only what the host needs to read back. The process
//! always exits 0 so a memory failure never blocks the host workflow.

use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workflow_memory::{
    control::{LoopController, PlannedPhase},
    learning::{LearningEngine, RunOutcome},
    registry::DomainRegistry,
    tiers::{RunResult, ToolEvent},
    workflow::generate_run_id,
    Config, MemoryStore,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum HookEvent {
    Start {
        description: String,
        #[serde(default)]
        workflow_id: Option<String>,
        #[serde(default)]
        domain: Option<String>,
        #[serde(default)]
        files: Vec<String>,
        #[serde(default)]
        complexity: u8,
        /// Enable the retry loop for this run
        #[serde(default, rename = "loop")]
        enable_loop: bool,
        #[serde(default)]
        max_iterations: Option<u32>,
        #[serde(default)]
        completion_promise: Option<String>,
        #[serde(default)]
        phases: Vec<PlannedPhase>,
    },
    Tool {
        tool: String,
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default)]
        file: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        params: Option<serde_json::Value>,
    },
    Stop {
        #[serde(default)]
        output: String,
    },
    End {
        #[serde(default)]
        result: Option<RunResult>,
        #[serde(default)]
        success_rate: Option<f64>,
        #[serde(default)]
        duration_min: Option<f64>,
    },
}

fn default_success() -> bool {
    true
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        tracing::error!("workflow-hook failed: {:#}", e);
    }
}

async fn run() -> anyhow::Result<()> {
    let mut config = match storage_root() {
        Some(root) => Config::with_data_dir(root),
        None => Config::default(),
    };
    tracing::debug!("Data directory: {:?}", config.data_dir);

    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("reading hook event from stdin")?;
    let event: HookEvent = serde_json::from_str(&input).context("parsing hook event")?;

    match event {
        HookEvent::Start {
            description,
            workflow_id,
            domain,
            files,
            complexity,
            enable_loop,
            max_iterations,
            completion_promise,
            phases,
        } => {
            if let Some(max) = max_iterations {
                config.loop_defaults.max_iterations = max;
            }
            if let Some(promise) = completion_promise {
                config.loop_defaults.completion_promise = promise;
            }

            let registry = DomainRegistry::load(&config);
            let matched = registry.match_domain(&description, &files);
            let domain_id = domain.unwrap_or_else(|| matched.domain_id.clone());
            let workflow_id = workflow_id
                .unwrap_or_else(|| generate_run_id(&description, chrono::Utc::now().date_naive()));

            let controller = LoopController::new(config.loop_defaults.clone());
            let mut store = MemoryStore::open(config)?;
            store.start(workflow_id.clone(), description, complexity, Some(domain_id.clone()))?;
            if enable_loop {
                controller.enable(&mut store, phases)?;
            }
            let context = registry.expert_context(&domain_id, Some(&mut store))?;

            println!(
                "{}",
                json!({
                    "workflow_id": workflow_id,
                    "domain": domain_id,
                    "match": matched,
                    "context": context.prompt_context(),
                })
            );
        }
        HookEvent::Tool {
            tool,
            success,
            file,
            error,
            params,
        } => {
            let mut event = ToolEvent::new(tool, success);
            event.file = file;
            event.error = error;
            event.params = params;

            let mut store = MemoryStore::open(config)?;
            if store.record_tool_event(event)?.is_none() {
                tracing::debug!("No active session, tool event dropped");
            }
        }
        HookEvent::Stop { output } => {
            let controller = LoopController::new(config.loop_defaults.clone());
            let mut store = MemoryStore::open(config)?;
            let decision = controller.on_stop(&mut store, &output).await?;
            if let Some(response) = decision.hook_response() {
                println!("{}", response);
            }
        }
        HookEvent::End {
            result,
            success_rate,
            duration_min,
        } => {
            let mut store = MemoryStore::open(config)?;
            let outcome = RunOutcome {
                result,
                duration_min,
                success_rate,
            };
            if let Some(summary) = LearningEngine::new(&mut store).consolidate(outcome)? {
                println!("{}", serde_json::to_string(&summary)?);
            }
        }
    }
    Ok(())
}

/// `--root <path>` wins over `WORKFLOW_MEMORY_ROOT`
fn storage_root() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--root" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--root=") {
            return Some(PathBuf::from(path));
        }
    }
    std::env::var_os("WORKFLOW_MEMORY_ROOT").map(PathBuf::from)
}
