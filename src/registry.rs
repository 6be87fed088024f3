//! Persona registry: the authoritative list of persona ids to drive.
//!
//! The registry is an upstream collaborator. The only contract the rest of
//! the crate relies on is a stable, sorted enumeration.

use crate::errors::ConfigError;
use glob::glob;
use std::path::PathBuf;

/// Source of persona ids.
pub trait PersonaRegistry {
    /// Enumerate persona ids in a stable sorted order.
    fn persona_ids(&self) -> Result<Vec<String>, ConfigError>;
}

/// Registry backed by the persona definition files `pid_*.json` in a directory.
///
/// The persona id is the file stem (`pid_574.json` -> `pid_574`).
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    dir: PathBuf,
    max_personas: Option<usize>,
}

impl DirectoryRegistry {
    pub fn new(dir: impl Into<PathBuf>, max_personas: Option<usize>) -> Self {
        Self {
            dir: dir.into(),
            max_personas,
        }
    }
}

impl PersonaRegistry for DirectoryRegistry {
    fn persona_ids(&self) -> Result<Vec<String>, ConfigError> {
        if !self.dir.is_dir() {
            return Err(ConfigError::PersonaDirMissing {
                path: self.dir.clone(),
            });
        }

        let pattern = self.dir.join("pid_*.json").to_string_lossy().to_string();
        let entries = glob(&pattern).map_err(|e| ConfigError::RegistryUnreadable {
            path: self.dir.clone(),
            message: e.to_string(),
        })?;

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| ConfigError::RegistryUnreadable {
                path: self.dir.clone(),
                message: e.to_string(),
            })?;
            if !path.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }

        Ok(sorted_and_limited(ids, self.max_personas))
    }
}

/// Registry over an explicit list of ids.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    ids: Vec<String>,
}

impl StaticRegistry {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

impl PersonaRegistry for StaticRegistry {
    fn persona_ids(&self) -> Result<Vec<String>, ConfigError> {
        Ok(sorted_and_limited(self.ids.clone(), None))
    }
}

fn sorted_and_limited(mut ids: Vec<String>, limit: Option<usize>) -> Vec<String> {
    ids.sort_by(|a, b| natural_key(a).cmp(&natural_key(b)));
    ids.dedup();
    if let Some(limit) = limit {
        ids.truncate(limit);
    }
    ids
}

/// Sort key placing `pid_2` before `pid_10`.
fn natural_key(id: &str) -> (String, u64, String) {
    let digits_at = id
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);
    match digits_at {
        Some(i) => {
            let number = id[i..].parse::<u64>().unwrap_or(u64::MAX);
            (id[..i].to_string(), number, id.to_string())
        }
        None => (id.to_string(), 0, id.to_string()),
    }
}
