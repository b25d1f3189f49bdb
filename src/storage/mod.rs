//! File storage for the memory tiers

mod atomic;

pub use atomic::atomic_write;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::StructuredText;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::tiers::{DomainMemory, ProjectMemory, SessionMemory};

/// Domain ids name a file inside the domain directory, so they may not carry path syntax
pub fn validate_domain_id(domain_id: &str) -> Result<()> {
    if domain_id.trim().is_empty() {
        return Err(Error::invalid_input("domain id is empty"));
    }
    if domain_id.contains(['/', '\\']) || domain_id.contains("..") {
        return Err(Error::invalid_input(format!(
            "domain id {:?} must not contain path separators or '..'",
            domain_id
        )));
    }
    Ok(())
}

/// Result of reading a tier file
#[derive(Debug)]
pub enum Loaded<T> {
    /// The file existed and decoded cleanly
    Found(T),

    /// No file at the expected path
    Missing,

    /// The file exists but could not be decoded
    Corrupt,
}

impl<T> Loaded<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Loaded::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// Reads and writes tier files under the configured storage root
#[derive(Debug, Clone)]
pub struct TierStorage {
    session_path: PathBuf,
    project_path: PathBuf,
    domain_dir: PathBuf,
    codec: StructuredText,
}

impl TierStorage {
    /// Create storage rooted at the config's data directory
    pub fn new(config: &Config) -> Result<Self> {
        config.ensure_dirs()?;
        Ok(Self {
            session_path: config.session_path(),
            project_path: config.project_path(),
            domain_dir: config.domain_dir(),
            codec: StructuredText::new(config.codec),
        })
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }

    pub fn domain_path(&self, domain_id: &str) -> Result<PathBuf> {
        validate_domain_id(domain_id)?;
        Ok(self.domain_dir.join(format!("{}.yaml", domain_id)))
    }

    pub fn codec(&self) -> StructuredText {
        self.codec
    }

    pub fn load_session(&self) -> Result<Loaded<SessionMemory>> {
        let Some(text) = read_if_exists(&self.session_path)? else {
            return Ok(Loaded::Missing);
        };
        match serde_json::from_str(&text) {
            Ok(session) => Ok(Loaded::Found(session)),
            Err(e) => {
                tracing::warn!("Failed to decode session file {:?}: {}", self.session_path, e);
                Ok(Loaded::Corrupt)
            }
        }
    }

    pub fn save_session(&self, session: &SessionMemory) -> Result<()> {
        let json = serde_json::to_vec_pretty(session)?;
        atomic_write(&self.session_path, &json)
    }

    /// Remove the session file; a missing file is not an error
    pub fn remove_session(&self) -> Result<bool> {
        match std::fs::remove_file(&self.session_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_project(&self) -> Result<Loaded<ProjectMemory>> {
        self.load_structured(&self.project_path)
    }

    pub fn save_project(&self, project: &ProjectMemory) -> Result<()> {
        self.save_structured(&self.project_path, project)
    }

    pub fn load_domain(&self, domain_id: &str) -> Result<Loaded<DomainMemory>> {
        self.load_structured(&self.domain_path(domain_id)?)
    }

    pub fn save_domain(&self, domain: &DomainMemory) -> Result<()> {
        self.save_structured(&self.domain_path(&domain.domain_id)?, domain)
    }

    /// Decode any structured-text file with the configured backend
    pub fn load_structured<T: DeserializeOwned>(&self, path: &Path) -> Result<Loaded<T>> {
        let Some(text) = read_if_exists(path)? else {
            return Ok(Loaded::Missing);
        };
        match self.codec.decode(&text) {
            Ok(value) => Ok(Loaded::Found(value)),
            Err(e) if e.is_decode() => {
                tracing::warn!("Failed to decode {:?}: {}", path, e);
                Ok(Loaded::Corrupt)
            }
            Err(e) => Err(e),
        }
    }

    fn save_structured<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let text = self.codec.encode(value)?;
        atomic_write(path, text.as_bytes())
    }
}

fn read_if_exists(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> TierStorage {
        TierStorage::new(&Config::with_data_dir(dir.path())).unwrap()
    }

    #[test]
    fn missing_files_report_missing() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        assert!(matches!(storage.load_session().unwrap(), Loaded::Missing));
        assert!(matches!(storage.load_project().unwrap(), Loaded::Missing));
        assert!(matches!(storage.load_domain("api").unwrap(), Loaded::Missing));
    }

    #[test]
    fn domain_ids_with_path_syntax_are_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        for id in ["../escape", "nested/api", "nested\\api", "..", ""] {
            assert!(storage.load_domain(id).is_err(), "{:?} accepted", id);
        }
        assert!(storage.save_domain(&DomainMemory::new("../escape")).is_err());
        assert!(!dir.path().join("agents").join("escape.yaml").exists());
        assert!(storage.domain_path("api-v2.beta").is_ok());
    }

    #[test]
    fn corrupt_files_report_corrupt() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        std::fs::write(storage.session_path(), "{ not json").unwrap();
        std::fs::write(storage.project_path(), "decisions: [unterminated\n").unwrap();

        assert!(matches!(storage.load_session().unwrap(), Loaded::Corrupt));
        assert!(matches!(storage.load_project().unwrap(), Loaded::Corrupt));
    }

    #[test]
    fn session_round_trip_and_removal() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let session = SessionMemory::new("run-1", "add endpoint", 4, None);

        storage.save_session(&session).unwrap();
        let loaded = storage.load_session().unwrap().into_option().unwrap();
        assert_eq!(loaded, session);

        assert!(storage.remove_session().unwrap());
        assert!(!storage.remove_session().unwrap());
    }
}
