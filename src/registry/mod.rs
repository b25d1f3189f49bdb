//! Domain registry
//!
//! Scores a task description and file list against the known domain profiles and hands
//! out expert contexts built from the domain tier. Profiles come from `agents/registry.yaml`
//! when it exists and parses, otherwise from the built-in set.

mod matcher;
mod profile;

pub use matcher::{glob_regex, CompiledProfile, ProfileScore};
pub use profile::{DomainExpert, DomainMatch, DomainProfile, ExpertContext, DEFAULT_PROFILES};

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::codec::StructuredText;
use crate::config::{Config, MatchingConfig};
use crate::error::Result;
use crate::memory::MemoryStore;

/// Keywords in a registry file: a flat list or split into tiers
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeywordSpec {
    List(Vec<String>),
    Tiered {
        #[serde(default)]
        primary: Vec<String>,
        #[serde(default)]
        secondary: Vec<String>,
    },
}

impl Default for KeywordSpec {
    fn default() -> Self {
        KeywordSpec::List(Vec::new())
    }
}

impl KeywordSpec {
    fn flatten(self) -> Vec<String> {
        match self {
            KeywordSpec::List(list) => list,
            KeywordSpec::Tiered { mut primary, secondary } => {
                primary.extend(secondary);
                primary
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegistryEntry {
    display_name: Option<String>,
    description: String,
    keywords: KeywordSpec,
    file_patterns: Vec<String>,
    tools_preferred: Vec<String>,
    anti_patterns: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RegistryFile {
    matching: MatchingConfig,
    agents: BTreeMap<String, RegistryEntry>,
}

impl RegistryEntry {
    fn into_profile(self, domain_id: &str) -> DomainProfile {
        DomainProfile {
            domain_id: domain_id.to_string(),
            display_name: self.display_name.unwrap_or_else(|| title(domain_id)),
            description: self.description,
            keywords: self.keywords.flatten(),
            file_patterns: self.file_patterns,
            tools_preferred: self.tools_preferred,
            anti_patterns: self.anti_patterns,
        }
    }
}

/// Registry of domain profiles and their experts
#[derive(Debug, Clone)]
pub struct DomainRegistry {
    matching: MatchingConfig,
    profiles: BTreeMap<String, CompiledProfile>,
    experts: BTreeMap<String, DomainExpert>,
    prompts_dir: Option<PathBuf>,
}

impl DomainRegistry {
    /// Registry over the built-in profiles
    pub fn with_defaults(matching: MatchingConfig) -> Self {
        let profiles = DEFAULT_PROFILES
            .iter()
            .cloned()
            .filter_map(|profile| match CompiledProfile::compile(profile) {
                Ok(compiled) => Some(compiled),
                Err(e) => {
                    warn!("Skipping built-in profile: {}", e);
                    None
                }
            });
        Self::assemble(matching, profiles, None)
    }

    /// Registry over explicit profiles
    pub fn from_profiles(profiles: Vec<DomainProfile>, matching: MatchingConfig) -> Result<Self> {
        let compiled = profiles
            .into_iter()
            .map(CompiledProfile::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::assemble(matching, compiled, None))
    }

    /// Load the registry file under the config's data directory, falling back to the
    /// built-in profiles when it is missing or unusable
    pub fn load(config: &Config) -> Self {
        let prompts_dir = config.prompts_dir();
        let path = config.registry_path();
        let registry = match Self::read_file(&path, StructuredText::new(config.codec)) {
            Ok(Some(registry)) => {
                info!("Loaded {} domain profiles from {:?}", registry.profiles.len(), path);
                registry
            }
            Ok(None) => Self::with_defaults(config.matching.clone()),
            Err(e) => {
                warn!("Registry file {:?} unusable, using built-in profiles: {}", path, e);
                Self::with_defaults(config.matching.clone())
            }
        };
        registry.with_prompts_dir(prompts_dir)
    }

    fn read_file(path: &Path, codec: StructuredText) -> Result<Option<Self>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: RegistryFile = codec.decode(&text)?;
        if file.agents.is_empty() {
            return Err(crate::Error::config("registry defines no agents"));
        }
        let profiles = file
            .agents
            .into_iter()
            .map(|(id, entry)| CompiledProfile::compile(entry.into_profile(&id)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(Self::assemble(file.matching, profiles, None)))
    }

    fn assemble(
        matching: MatchingConfig,
        profiles: impl IntoIterator<Item = CompiledProfile>,
        prompts_dir: Option<PathBuf>,
    ) -> Self {
        let profiles: BTreeMap<_, _> = profiles
            .into_iter()
            .map(|p| (p.profile.domain_id.clone(), p))
            .collect();
        let mut registry = Self {
            matching,
            profiles,
            experts: BTreeMap::new(),
            prompts_dir,
        };
        registry.rebuild_experts();
        registry
    }

    /// Point expert prompt templates at `dir/{domain}.md`
    pub fn with_prompts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompts_dir = Some(dir.into());
        self.rebuild_experts();
        self
    }

    fn rebuild_experts(&mut self) {
        self.experts = self
            .profiles
            .iter()
            .map(|(id, compiled)| {
                let template = self
                    .prompts_dir
                    .as_ref()
                    .map(|dir| dir.join(format!("{}.md", id)));
                (id.clone(), DomainExpert::new(compiled.profile.clone(), template))
            })
            .collect();
    }

    pub fn matching(&self) -> &MatchingConfig {
        &self.matching
    }

    // ------------------------------------------------------------------
    // Matching
    // ------------------------------------------------------------------

    /// Pick the domain that best fits a task
    pub fn match_domain(&self, description: &str, files: &[String]) -> DomainMatch {
        let text = description.to_lowercase();

        let mut best: Option<(&CompiledProfile, ProfileScore)> = None;
        for compiled in self.profiles.values() {
            let score = compiled.score(&text, files, &self.matching);
            let better = best.as_ref().map_or(true, |(_, b)| score.total > b.total);
            if better {
                best = Some((compiled, score));
            }
        }

        let best_total = best.as_ref().map_or(0.0, |(_, s)| s.total);
        let Some((compiled, score)) = best.filter(|_| best_total >= self.matching.min_confidence)
        else {
            let fallback = self.matching.fallback_domain.clone();
            debug!("No domain above {:.2}, falling back to {}", best_total, fallback);
            return DomainMatch {
                reasoning: format!(
                    "Low confidence ({:.2}), using fallback: {}",
                    best_total, fallback
                ),
                domain_id: fallback,
                confidence: 0.5,
                matched_keywords: Vec::new(),
                matched_patterns: Vec::new(),
            };
        };

        let profile = &compiled.profile;
        let mut parts = Vec::new();
        if !score.matched_keywords.is_empty() {
            parts.push(format!(
                "Matched keywords: {}",
                score.matched_keywords.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        if !score.matched_patterns.is_empty() {
            parts.push(format!(
                "Matched patterns: {}",
                score.matched_patterns.iter().take(2).cloned().collect::<Vec<_>>().join(", ")
            ));
        }
        parts.push(format!("Domain: {}", profile.display_name));

        debug!(domain = %profile.domain_id, confidence = score.total, "Matched domain");
        DomainMatch {
            domain_id: profile.domain_id.clone(),
            confidence: score.total,
            matched_keywords: score.matched_keywords,
            matched_patterns: score.matched_patterns,
            reasoning: parts.join("; "),
        }
    }

    // ------------------------------------------------------------------
    // Experts
    // ------------------------------------------------------------------

    /// Profile plus learned knowledge; unknown ids use the fallback profile
    pub fn expert_context(&self, domain_id: &str, memory: Option<&mut MemoryStore>) -> Result<ExpertContext> {
        let profile = self
            .profile(domain_id)
            .or_else(|| self.profile(&self.matching.fallback_domain))
            .or_else(|| DEFAULT_PROFILES.first())
            .cloned()
            .unwrap_or_else(|| DomainProfile::new(domain_id, title(domain_id)));

        let context = ExpertContext::from_profile(profile);
        match memory {
            Some(store) => {
                let id = context.profile.domain_id.clone();
                Ok(context.with_memory(store.load_domain(&id)?))
            }
            None => Ok(context),
        }
    }

    /// Activate an expert. `None` for an unknown domain.
    pub fn activate_expert(
        &mut self,
        domain_id: &str,
        memory: Option<&mut MemoryStore>,
    ) -> Result<Option<&DomainExpert>> {
        if !self.experts.contains_key(domain_id) {
            return Ok(None);
        }
        let context = self.expert_context(domain_id, memory)?;
        let Some(expert) = self.experts.get_mut(domain_id) else {
            return Ok(None);
        };
        expert.activate(context);
        info!("Activated {}", expert.profile.display_name);
        Ok(Some(&*expert))
    }

    pub fn deactivate_expert(&mut self, domain_id: &str) -> bool {
        match self.experts.get_mut(domain_id) {
            Some(expert) if expert.is_active => {
                expert.deactivate();
                true
            }
            _ => false,
        }
    }

    pub fn deactivate_all(&mut self) {
        self.experts.values_mut().for_each(DomainExpert::deactivate);
    }

    pub fn active_experts(&self) -> Vec<&DomainExpert> {
        self.experts.values().filter(|e| e.is_active).collect()
    }

    pub fn expert(&self, domain_id: &str) -> Option<&DomainExpert> {
        self.experts.get(domain_id)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn list_domains(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    pub fn profile(&self, domain_id: &str) -> Option<&DomainProfile> {
        self.profiles.get(domain_id).map(|c| &c.profile)
    }

    /// Keywords per domain
    pub fn all_keywords(&self) -> BTreeMap<&str, &[String]> {
        self.profiles
            .iter()
            .map(|(id, c)| (id.as_str(), c.profile.keywords.as_slice()))
            .collect()
    }

    /// Domains with a keyword containing `keyword` (case-insensitive)
    pub fn find_domains_by_keyword(&self, keyword: &str) -> Vec<&str> {
        let needle = keyword.to_lowercase();
        self.profiles
            .iter()
            .filter(|(_, c)| {
                c.profile
                    .keywords
                    .iter()
                    .any(|kw| kw.to_lowercase().contains(&needle))
            })
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Every distinct file pattern across profiles
    pub fn all_file_patterns(&self) -> BTreeSet<&str> {
        self.profiles
            .values()
            .flat_map(|c| c.profile.file_patterns.iter().map(String::as_str))
            .collect()
    }
}

impl Default for DomainRegistry {
    fn default() -> Self {
        Self::with_defaults(MatchingConfig::default())
    }
}

fn title(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
