//! Artifact scanner: derives persona and run state from the output tree.
//!
//! The scan is a pure read of the filesystem. Nothing is cached between
//! calls, so a controller killed at any point recomputes the same state on
//! restart. Unreadable entries are skipped and reported as warnings rather
//! than failing the whole scan.

pub mod types;

pub use types::{PersonaRuns, RunDescriptor, RunState, ScanResult};

use crate::layout::{self, is_error_marker};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Anything that can report the current persona/run state.
///
/// The filesystem walk is the only implementation today; a persisted index
/// could implement this without the planner or dispatcher noticing.
pub trait StateSource: Send + Sync {
    fn scan(&self, persona_ids: &[String]) -> ScanResult;
}

/// Filesystem-backed scanner over an output root.
#[derive(Debug, Clone)]
pub struct ArtifactScanner {
    output_root: PathBuf,
}

impl ArtifactScanner {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    fn scan_persona(&self, persona_id: &str, warnings: &mut Vec<String>) -> PersonaRuns {
        let dir = layout::persona_dir(&self.output_root, persona_id);
        if !dir.is_dir() {
            return PersonaRuns::absent(persona_id);
        }

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                let msg = format!("Skipping unreadable persona directory {}: {}", dir.display(), e);
                tracing::warn!(persona = persona_id, error = %e, "skipping unreadable persona directory");
                warnings.push(msg);
                return PersonaRuns::unreadable(persona_id, dir);
            }
        };

        let mut runs = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warnings.push(format!("Failed to read entry in {}: {}", dir.display(), e));
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(ordinal) = layout::parse_run_ordinal(persona_id, &name) else {
                tracing::debug!(persona = persona_id, dir = %name, "ignoring non-run directory");
                warnings.push(format!(
                    "Ignoring directory {} in {}: not a run of {}",
                    name,
                    dir.display(),
                    persona_id
                ));
                continue;
            };

            match list_run_files(&path) {
                Ok(files) => runs.push(RunDescriptor::new(ordinal, name, path, files)),
                Err(e) => {
                    tracing::warn!(persona = persona_id, run = %name, error = %e, "skipping unreadable run directory");
                    warnings.push(format!("Skipping unreadable run {}: {}", path.display(), e));
                }
            }
        }

        runs.sort_by(|a, b| a.ordinal.cmp(&b.ordinal).then_with(|| a.name.cmp(&b.name)));

        PersonaRuns {
            persona_id: persona_id.to_string(),
            dir: Some(dir),
            runs,
            readable: true,
        }
    }
}

impl StateSource for ArtifactScanner {
    fn scan(&self, persona_ids: &[String]) -> ScanResult {
        let mut warnings = Vec::new();

        if !self.output_root.is_dir() {
            tracing::debug!(root = %self.output_root.display(), "output root missing, every persona has zero runs");
            return ScanResult {
                personas: persona_ids.iter().map(|id| PersonaRuns::absent(id)).collect(),
                warnings,
            };
        }

        let personas = persona_ids
            .iter()
            .map(|id| self.scan_persona(id, &mut warnings))
            .collect();

        ScanResult { personas, warnings }
    }
}

/// Names of every file inside a run directory, recursively, sorted.
fn list_run_files(run_dir: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(run_dir).min_depth(1) {
        let entry = entry.map_err(std::io::Error::other)?;
        if entry.file_type().is_file() {
            files.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    files.sort();
    Ok(files)
}

/// File names in `files` that mark the run as erroneous.
pub fn matched_error_files(files: &[String]) -> Vec<String> {
    files
        .iter()
        .filter(|f| is_error_marker(f))
        .cloned()
        .collect()
}
