//! Keyword and file-pattern scoring

use regex::Regex;

use super::profile::DomainProfile;
use crate::config::MatchingConfig;
use crate::error::{Error, Result};

/// A profile with its keyword and glob regexes compiled
#[derive(Debug, Clone)]
pub struct CompiledProfile {
    pub profile: DomainProfile,
    keywords: Vec<(String, Regex)>,
    patterns: Vec<(String, Regex)>,
}

/// Score of one profile against one task
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileScore {
    pub total: f64,
    pub matched_keywords: Vec<String>,
    pub matched_patterns: Vec<String>,
}

impl CompiledProfile {
    pub fn compile(profile: DomainProfile) -> Result<Self> {
        let keywords = profile
            .keywords
            .iter()
            .map(|kw| Ok((kw.clone(), keyword_regex(kw)?)))
            .collect::<Result<Vec<_>>>()?;
        let patterns = profile
            .file_patterns
            .iter()
            .map(|p| Ok((p.clone(), glob_regex(p)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            profile,
            keywords,
            patterns,
        })
    }

    /// Weighted boost score for a lowercased description and a file list
    pub fn score(&self, description_lower: &str, files: &[String], config: &MatchingConfig) -> ProfileScore {
        let matched_keywords: Vec<String> = self
            .keywords
            .iter()
            .filter(|(_, re)| re.is_match(description_lower))
            .map(|(kw, _)| kw.clone())
            .collect();

        let matched_patterns: Vec<String> = if files.is_empty() {
            Vec::new()
        } else {
            self.patterns
                .iter()
                .filter(|(_, re)| files.iter().any(|f| re.is_match(f)))
                .map(|(p, _)| p.clone())
                .collect()
        };

        let keyword_score = (matched_keywords.len() as f64 * config.keyword_boost).min(1.0);
        let pattern_score = (matched_patterns.len() as f64 * config.pattern_boost).min(1.0);
        ProfileScore {
            total: keyword_score * config.keyword_weight + pattern_score * config.pattern_weight,
            matched_keywords,
            matched_patterns,
        }
    }
}

/// Keyword matches when it starts a word: `test` matches `tests` and `testing`
fn keyword_regex(keyword: &str) -> Result<Regex> {
    let pattern = format!(r"\b{}\w*\b", regex::escape(&keyword.to_lowercase()));
    Regex::new(&pattern).map_err(|e| Error::config(format!("keyword {:?}: {}", keyword, e)))
}

/// Translate an fnmatch-style glob into an anchored regex. `*` crosses directory separators.
pub fn glob_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            '[' => {
                let mut class = String::new();
                let mut closed = false;
                if chars.peek() == Some(&'!') {
                    chars.next();
                    class.push('^');
                }
                for next in chars.by_ref() {
                    if next == ']' && !class.is_empty() && class != "^" {
                        closed = true;
                        break;
                    }
                    if next == '\\' || next == '[' {
                        class.push('\\');
                    }
                    class.push(next);
                }
                if closed {
                    pattern.push('[');
                    pattern.push_str(&class);
                    pattern.push(']');
                } else {
                    pattern.push_str(&regex::escape("["));
                    pattern.push_str(&regex::escape(class.trim_start_matches('^')));
                }
            }
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern).map_err(|e| Error::config(format!("file pattern {:?}: {}", glob, e)))
}
