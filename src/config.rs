//! Configuration for workflow-memory

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::CodecKind;
use crate::error::Result;

/// Capacity limits for the session tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCaps {
    pub tool_events: usize,
    pub decisions: usize,
    pub problems: usize,
}

impl Default for SessionCaps {
    fn default() -> Self {
        Self {
            tool_events: 200,
            decisions: 50,
            problems: 30,
        }
    }
}

/// Capacity limits for the project tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectCaps {
    pub decisions: usize,
    pub problems: usize,
    pub history: usize,
}

impl Default for ProjectCaps {
    fn default() -> Self {
        Self {
            decisions: 100,
            problems: 100,
            history: 100,
        }
    }
}

/// Capacity limits for each domain tier file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainCaps {
    pub decisions: usize,
    pub problems: usize,
}

impl Default for DomainCaps {
    fn default() -> Self {
        Self {
            decisions: 50,
            problems: 50,
        }
    }
}

/// Thresholds gating promotion between tiers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PromotionThresholds {
    /// Minimum confidence for a decision to leave the session tier
    pub min_confidence: f64,

    /// Minimum validation count for a decision to leave the session tier
    pub min_validations: u32,

    /// Minimum total occurrences for a problem to be kept in the project tier
    pub min_occurrences: u32,
}

impl Default for PromotionThresholds {
    fn default() -> Self {
        Self {
            min_confidence: 0.8,
            min_validations: 2,
            min_occurrences: 2,
        }
    }
}

/// Weights used when scoring a task against domain profiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub keyword_weight: f64,
    pub pattern_weight: f64,
    pub keyword_boost: f64,
    pub pattern_boost: f64,
    pub min_confidence: f64,
    pub fallback_domain: String,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            keyword_weight: 0.6,
            pattern_weight: 0.4,
            keyword_boost: 0.25,
            pattern_boost: 0.35,
            min_confidence: 0.3,
            fallback_domain: "backend".to_string(),
        }
    }
}

/// Defaults for the retry loop controller
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub completion_promise: String,
    pub max_phase_retries: u32,
    pub failure_log_cap: usize,
    /// Limit for checkpoints that declare no timeout of their own
    pub checkpoint_timeout: Duration,

    /// Working directory for checkpoint commands (process cwd when unset)
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            completion_promise: "WORKFLOW COMPLETE".to_string(),
            max_phase_retries: 3,
            failure_log_cap: 100,
            checkpoint_timeout: Duration::from_secs(60),
            checkpoint_dir: None,
        }
    }
}

/// Configuration for the memory system
#[derive(Debug, Clone)]
pub struct Config {
    /// Storage root for all tier files
    pub data_dir: PathBuf,

    /// Identifier written into the project tier on first creation
    pub project_id: String,

    /// Backend used for the structured-text tiers
    pub codec: CodecKind,

    pub session_caps: SessionCaps,
    pub project_caps: ProjectCaps,
    pub domain_caps: DomainCaps,
    pub promotion: PromotionThresholds,

    /// Sample count at which rolling velocity averages saturate
    pub velocity_window: u32,

    pub matching: MatchingConfig,
    pub loop_defaults: LoopConfig,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("workflow-memory");

        Self {
            data_dir,
            project_id: "default".to_string(),
            codec: CodecKind::preferred(),
            session_caps: SessionCaps::default(),
            project_caps: ProjectCaps::default(),
            domain_caps: DomainCaps::default(),
            promotion: PromotionThresholds::default(),
            velocity_window: 10,
            matching: MatchingConfig::default(),
            loop_defaults: LoopConfig::default(),
        }
    }
}

impl Config {
    /// Create a new config with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Use a specific structured-text backend
    pub fn with_codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    /// Set the project identifier
    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = project_id.into();
        self
    }

    /// Directory holding the session and project tiers
    pub fn memoria_dir(&self) -> PathBuf {
        self.data_dir.join("memoria")
    }

    /// Directory holding one file per domain
    pub fn domain_dir(&self) -> PathBuf {
        self.data_dir.join("agents").join("memory")
    }

    /// Get the path to the session tier
    pub fn session_path(&self) -> PathBuf {
        self.memoria_dir().join("short_term.json")
    }

    /// Get the path to the project tier
    pub fn project_path(&self) -> PathBuf {
        self.memoria_dir().join("long_term.yaml")
    }

    /// Get the path to a domain tier; ids that could leave the domain directory are rejected
    pub fn domain_path(&self, domain_id: &str) -> Result<PathBuf> {
        crate::storage::validate_domain_id(domain_id)?;
        Ok(self.domain_dir().join(format!("{}.yaml", domain_id)))
    }

    /// Get the path to the optional domain registry file
    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("agents").join("registry.yaml")
    }

    /// Directory holding per-domain prompt templates
    pub fn prompts_dir(&self) -> PathBuf {
        self.data_dir.join("agents").join("prompts")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.memoria_dir())?;
        std::fs::create_dir_all(self.domain_dir())?;
        Ok(())
    }
}
