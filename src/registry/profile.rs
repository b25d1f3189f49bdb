//! Domain profiles, matches and expert contexts

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::tiers::{DomainDecision, DomainMemory, DomainProblem};

/// Static description of a specialist domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainProfile {
    pub domain_id: String,
    pub display_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub keywords: Vec<String>,

    /// fnmatch-style globs matched against file paths
    #[serde(default)]
    pub file_patterns: Vec<String>,

    #[serde(default)]
    pub tools_preferred: Vec<String>,

    #[serde(default)]
    pub anti_patterns: Vec<String>,
}

impl DomainProfile {
    pub fn new(domain_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            domain_id: domain_id.into(),
            display_name: display_name.into(),
            description: String::new(),
            keywords: Vec::new(),
            file_patterns: Vec::new(),
            tools_preferred: Vec::new(),
            anti_patterns: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = to_strings(keywords);
        self
    }

    pub fn with_file_patterns(mut self, patterns: &[&str]) -> Self {
        self.file_patterns = to_strings(patterns);
        self
    }

    pub fn with_tools(mut self, tools: &[&str]) -> Self {
        self.tools_preferred = to_strings(tools);
        self
    }

    pub fn with_anti_patterns(mut self, anti_patterns: &[&str]) -> Self {
        self.anti_patterns = to_strings(anti_patterns);
        self
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Result of scoring a task against the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainMatch {
    pub domain_id: String,
    pub confidence: f64,
    pub matched_keywords: Vec<String>,
    pub matched_patterns: Vec<String>,
    pub reasoning: String,
}

/// A profile combined with what the domain tier has learned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertContext {
    pub profile: DomainProfile,
    pub key_concepts: Vec<String>,
    pub common_patterns: Vec<String>,
    pub relevant_decisions: Vec<DomainDecision>,
    pub known_blockers: Vec<DomainProblem>,
    pub success_rate: f64,
    pub tasks_handled: u32,
}

impl ExpertContext {
    /// Context with no learned knowledge
    pub fn from_profile(profile: DomainProfile) -> Self {
        Self {
            profile,
            key_concepts: Vec::new(),
            common_patterns: Vec::new(),
            relevant_decisions: Vec::new(),
            known_blockers: Vec::new(),
            success_rate: 1.0,
            tasks_handled: 0,
        }
    }

    /// Fill in learned knowledge from a domain tier
    pub fn with_memory(mut self, memory: &DomainMemory) -> Self {
        self.key_concepts = memory.context.key_concepts.clone();
        self.common_patterns = memory.context.common_patterns.clone();
        self.relevant_decisions = memory.decisions.clone();
        self.known_blockers = memory.blockers.clone();
        self.success_rate = memory.success_rate;
        self.tasks_handled = memory.tasks_handled;
        self
    }

    /// Markdown block for inclusion in prompts
    pub fn prompt_context(&self) -> String {
        let mut lines = vec![
            format!("## {} Context", self.profile.display_name),
            String::new(),
            format!("**Domain:** {}", self.profile.domain_id),
            format!(
                "**Experience:** {} tasks, {:.0}% success rate",
                self.tasks_handled,
                self.success_rate * 100.0
            ),
            String::new(),
        ];

        let mut section = |title: &str, items: Vec<String>| {
            if items.is_empty() {
                return;
            }
            lines.push(format!("**{}:**", title));
            lines.extend(items.into_iter().map(|item| format!("- {}", item)));
            lines.push(String::new());
        };

        section("Key Concepts", self.key_concepts.iter().take(5).cloned().collect());
        section(
            "Common Patterns",
            self.common_patterns.iter().take(3).cloned().collect(),
        );
        section(
            "Relevant Past Decisions",
            self.relevant_decisions
                .iter()
                .take(3)
                .map(|d| format!("{}: {}", d.scenario, d.decision))
                .collect(),
        );
        section(
            "Known Blockers & Solutions",
            self.known_blockers
                .iter()
                .take(3)
                .map(|b| format!("{} -> {}", b.symptom, b.solution))
                .collect(),
        );

        lines.join("\n")
    }
}

/// A profile plus its activation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainExpert {
    pub profile: DomainProfile,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ExpertContext>,

    #[serde(default)]
    pub is_active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<PathBuf>,
}

impl DomainExpert {
    pub fn new(profile: DomainProfile, prompt_template: Option<PathBuf>) -> Self {
        Self {
            profile,
            context: None,
            is_active: false,
            activated_at: None,
            prompt_template,
        }
    }

    pub fn activate(&mut self, context: ExpertContext) {
        self.context = Some(context);
        self.is_active = true;
        self.activated_at = Some(Utc::now());
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
    }
}

/// Built-in profiles used when no registry file is present
pub static DEFAULT_PROFILES: Lazy<Vec<DomainProfile>> = Lazy::new(|| {
    vec![
        DomainProfile::new("backend", "Backend Expert")
            .with_description("FastAPI, SQLAlchemy, async patterns, Clean Architecture")
            .with_keywords(&[
                "fastapi", "api", "endpoint", "route", "handler", "controller", "service",
                "use case", "repository", "async", "await",
            ])
            .with_file_patterns(&["**/app/**", "**/src/**", "**/*_service.py", "**/*_use_case.py"])
            .with_tools(&["Read", "Edit", "Grep"])
            .with_anti_patterns(&["Business logic in controllers", "N+1 queries"]),
        DomainProfile::new("frontend", "Frontend Expert")
            .with_description("React, Vue, TypeScript, Tailwind CSS, component architecture")
            .with_keywords(&[
                "react", "vue", "component", "ui", "css", "tailwind", "button", "form", "modal",
                "hook", "state", "props",
            ])
            .with_file_patterns(&["**/components/**", "**/*.tsx", "**/*.jsx", "**/*.vue"])
            .with_tools(&["Read", "Edit", "Write"])
            .with_anti_patterns(&["Prop drilling", "Giant components"]),
        DomainProfile::new("database", "Database Expert")
            .with_description("PostgreSQL, SQLAlchemy, migrations, RLS, indexing")
            .with_keywords(&[
                "sql", "migration", "alembic", "schema", "table", "index", "query", "rls",
                "postgres", "database", "model",
            ])
            .with_file_patterns(&["**/migrations/**", "**/models/**", "**/*_model.py"])
            .with_tools(&["Read", "Edit", "Bash"])
            .with_anti_patterns(&["Missing indexes", "N+1 queries", "Raw SQL injection"]),
        DomainProfile::new("testing", "Testing Expert")
            .with_description("Pytest, mocking, fixtures, coverage, TDD")
            .with_keywords(&[
                "test", "pytest", "mock", "fixture", "coverage", "unit", "integration", "e2e",
                "assert", "conftest",
            ])
            .with_file_patterns(&["**/tests/**", "**/*_test.py", "**/test_*.py", "**/conftest.py"])
            .with_tools(&["Read", "Edit", "Bash"])
            .with_anti_patterns(&["Flaky tests", "Missing assertions", "Test pollution"]),
        DomainProfile::new("api", "API Expert")
            .with_description("REST, GraphQL, OpenAPI, request/response handling")
            .with_keywords(&[
                "rest", "graphql", "openapi", "swagger", "endpoint", "request", "response",
                "json", "http", "status code",
            ])
            .with_file_patterns(&["**/api/**", "**/routes/**", "**/schemas/**"])
            .with_tools(&["Read", "Edit", "WebFetch"])
            .with_anti_patterns(&["Missing validation", "Inconsistent responses"]),
        DomainProfile::new("security", "Security Expert")
            .with_description("Authentication, authorization, OWASP, JWT, RBAC")
            .with_keywords(&[
                "auth", "jwt", "permission", "rbac", "owasp", "vulnerability", "token",
                "password", "encryption", "security",
            ])
            .with_file_patterns(&["**/auth/**", "**/security/**", "**/middleware/**"])
            .with_tools(&["Read", "Grep", "Edit"])
            .with_anti_patterns(&["Hardcoded secrets", "SQL injection", "XSS"]),
        DomainProfile::new("infra", "Infrastructure Expert")
            .with_description("Docker, Kubernetes, CI/CD, Terraform, deployment")
            .with_keywords(&[
                "docker", "kubernetes", "k8s", "ci", "cd", "deploy", "terraform", "nginx",
                "redis", "github actions", "pipeline",
            ])
            .with_file_patterns(&["**/Dockerfile*", "**/*.yaml", "**/.github/**", "**/deploy/**"])
            .with_tools(&["Read", "Edit", "Bash"])
            .with_anti_patterns(&["Secrets in code", "Missing health checks"]),
    ]
});
