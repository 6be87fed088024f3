//! Purges run directories poisoned by a worker failure.
//!
//! Deletion is permanent. A half-written run cannot be replayed because the
//! worker is not idempotent mid-run, so the only safe move is to drop it and
//! let the planner request a replacement.

use crate::scanner::{RunState, ScanResult};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;

/// One deleted run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuarantineEntry {
    pub persona_id: String,
    pub removed_ordinal: u32,
    pub run_name: String,
    pub matched_file_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuarantineReport {
    pub removed: Vec<QuarantineEntry>,
    /// Persona directories deleted because no run survived.
    pub removed_persona_dirs: Vec<String>,
    /// Persona directories with no runs left that still hold other entries.
    pub kept_persona_dirs: Vec<String>,
    /// Deletions that failed; the run will be seen again on the next scan.
    pub failures: Vec<String>,
}

impl QuarantineReport {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.removed_persona_dirs.is_empty() && self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} run(s) removed, {} persona dir(s) removed, {} failure(s)",
            self.removed.len(),
            self.removed_persona_dirs.len(),
            self.failures.len()
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorQuarantine;

impl ErrorQuarantine {
    pub fn new() -> Self {
        Self
    }

    /// Delete every erroneous run in `scan`, then every persona directory left without runs.
    pub fn purge(&self, scan: &ScanResult) -> QuarantineReport {
        let mut report = QuarantineReport::default();

        for persona in &scan.personas {
            let Some(dir) = persona.dir.as_ref() else {
                continue;
            };
            if !persona.readable {
                continue;
            }

            let mut remaining = persona.runs.len();
            for run in persona.runs.iter().filter(|r| r.state == RunState::Erroneous) {
                let matched = run.error_files();
                match fs::remove_dir_all(&run.path) {
                    Ok(()) => {
                        tracing::info!(
                            persona = %persona.persona_id,
                            run = %run.name,
                            matched = ?matched,
                            "quarantined erroneous run"
                        );
                        remaining -= 1;
                        report.removed.push(QuarantineEntry {
                            persona_id: persona.persona_id.clone(),
                            removed_ordinal: run.ordinal,
                            run_name: run.name.clone(),
                            matched_file_names: matched,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(run = %run.path.display(), error = %e, "failed to remove erroneous run");
                        report
                            .failures
                            .push(format!("Failed to remove {}: {}", run.path.display(), e));
                    }
                }
            }

            if remaining == 0 {
                // Non-recursive: entries the scanner skipped must survive.
                match fs::remove_dir(dir) {
                    Ok(()) => {
                        tracing::info!(persona = %persona.persona_id, "removed persona directory with no runs left");
                        report.removed_persona_dirs.push(persona.persona_id.clone());
                    }
                    Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => {
                        tracing::warn!(
                            dir = %dir.display(),
                            "persona directory has no runs left but holds other entries, keeping it"
                        );
                        report.kept_persona_dirs.push(persona.persona_id.clone());
                    }
                    Err(e) => {
                        tracing::warn!(dir = %dir.display(), error = %e, "failed to remove empty persona directory");
                        report
                            .failures
                            .push(format!("Failed to remove {}: {}", dir.display(), e));
                    }
                }
            }
        }

        report
    }
}
