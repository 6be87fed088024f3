use crate::layout::is_error_marker;
use serde::Serialize;
use std::path::PathBuf;

/// Derived state of a single run directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// At least one file and no error marker.
    Valid,
    /// At least one file whose name carries the error marker.
    Erroneous,
    /// No files yet. The worker may still be writing, or died before writing anything.
    Unknown,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Valid => write!(f, "valid"),
            RunState::Erroneous => write!(f, "erroneous"),
            RunState::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunDescriptor {
    /// Ordinal as currently named on disk (may have gaps before reconciliation).
    pub ordinal: u32,
    pub name: String,
    pub path: PathBuf,
    pub files: Vec<String>,
    pub state: RunState,
}

impl RunDescriptor {
    pub fn new(ordinal: u32, name: String, path: PathBuf, files: Vec<String>) -> Self {
        let state = if files.iter().any(|f| is_error_marker(f)) {
            RunState::Erroneous
        } else if files.is_empty() {
            RunState::Unknown
        } else {
            RunState::Valid
        };
        Self {
            ordinal,
            name,
            path,
            files,
            state,
        }
    }

    pub fn error_files(&self) -> Vec<String> {
        super::matched_error_files(&self.files)
    }
}

/// Every run found for one persona.
#[derive(Debug, Clone, Serialize)]
pub struct PersonaRuns {
    pub persona_id: String,
    /// Persona directory, `None` when it does not exist.
    pub dir: Option<PathBuf>,
    /// Runs sorted by ordinal.
    pub runs: Vec<RunDescriptor>,
    /// False when the persona directory exists but could not be listed.
    pub readable: bool,
}

impl PersonaRuns {
    pub fn absent(persona_id: &str) -> Self {
        Self {
            persona_id: persona_id.to_string(),
            dir: None,
            runs: Vec::new(),
            readable: true,
        }
    }

    pub fn unreadable(persona_id: &str, dir: PathBuf) -> Self {
        Self {
            persona_id: persona_id.to_string(),
            dir: Some(dir),
            runs: Vec::new(),
            readable: false,
        }
    }

    pub fn valid_run_count(&self) -> u32 {
        self.count(RunState::Valid)
    }

    pub fn count(&self, state: RunState) -> u32 {
        self.runs.iter().filter(|r| r.state == state).count() as u32
    }

    /// Ordinals as named on disk, ascending.
    pub fn ordinals(&self) -> Vec<u32> {
        self.runs.iter().map(|r| r.ordinal).collect()
    }
}

/// Result of scanning the output tree for a list of personas.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanResult {
    /// One entry per requested persona, in registry order.
    pub personas: Vec<PersonaRuns>,
    /// Non-fatal problems encountered while scanning.
    pub warnings: Vec<String>,
}

impl ScanResult {
    pub fn persona(&self, persona_id: &str) -> Option<&PersonaRuns> {
        self.personas.iter().find(|p| p.persona_id == persona_id)
    }

    pub fn total_runs(&self) -> usize {
        self.personas.iter().map(|p| p.runs.len()).sum()
    }
}
