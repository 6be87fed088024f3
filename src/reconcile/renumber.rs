//! Re-densifies run ordinals after quarantine.
//!
//! Runs are renamed in ascending ordinal order to `1..K`. Since every target
//! ordinal is at most the source ordinal, an ascending pass never renames onto
//! a directory that is still waiting to be processed. A rename that fails, or
//! whose target is unexpectedly occupied, is skipped; the next pass retries it.

use crate::layout::{rewrite_run_prefix, run_dir_name};
use crate::scanner::ScanResult;
use serde::Serialize;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameEntry {
    pub persona_id: String,
    pub from: String,
    pub to: String,
    /// Files inside the run whose run prefix was rewritten.
    pub files_renamed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RenumberReport {
    pub renamed: Vec<RenameEntry>,
    pub failures: Vec<String>,
}

impl RenumberReport {
    pub fn is_empty(&self) -> bool {
        self.renamed.is_empty() && self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} run(s) renumbered, {} failure(s)",
            self.renamed.len(),
            self.failures.len()
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceRenumberer;

impl SequenceRenumberer {
    pub fn new() -> Self {
        Self
    }

    /// Rename the runs of every persona in `scan` to a dense `1..K` sequence.
    ///
    /// `scan` must reflect the tree after quarantine.
    pub fn renumber(&self, scan: &ScanResult) -> RenumberReport {
        let mut report = RenumberReport::default();

        for persona in &scan.personas {
            let Some(dir) = persona.dir.as_ref() else {
                continue;
            };

            for (index, run) in persona.runs.iter().enumerate() {
                let target_name = run_dir_name(&persona.persona_id, index as u32 + 1);
                if run.name == target_name {
                    continue;
                }

                let target = dir.join(&target_name);
                if target.exists() {
                    tracing::warn!(
                        persona = %persona.persona_id,
                        from = %run.name,
                        to = %target_name,
                        "rename target already exists, leaving run for the next pass"
                    );
                    report.failures.push(format!(
                        "Cannot rename {} to {}: target exists",
                        run.path.display(),
                        target_name
                    ));
                    continue;
                }

                if let Err(e) = fs::rename(&run.path, &target) {
                    tracing::warn!(run = %run.path.display(), error = %e, "failed to renumber run");
                    report.failures.push(format!(
                        "Failed to rename {} to {}: {}",
                        run.path.display(),
                        target_name,
                        e
                    ));
                    continue;
                }

                let files_renamed =
                    rename_prefixed_files(&target, &run.name, &target_name, &mut report.failures);
                tracing::info!(
                    persona = %persona.persona_id,
                    from = %run.name,
                    to = %target_name,
                    files_renamed,
                    "renumbered run"
                );
                report.renamed.push(RenameEntry {
                    persona_id: persona.persona_id.clone(),
                    from: run.name.clone(),
                    to: target_name,
                    files_renamed,
                });
            }
        }

        report
    }
}

/// Rewrite the run prefix of every file under `run_dir` named after `old_run`.
fn rename_prefixed_files(
    run_dir: &Path,
    old_run: &str,
    new_run: &str,
    failures: &mut Vec<String>,
) -> usize {
    let candidates: Vec<_> = WalkDir::new(run_dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            rewrite_run_prefix(&name, old_run, new_run).map(|new_name| (e.into_path(), new_name))
        })
        .collect();

    let mut renamed = 0;
    for (path, new_name) in candidates {
        let new_path = path.with_file_name(&new_name);
        match fs::rename(&path, &new_path) {
            Ok(()) => renamed += 1,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "failed to rewrite run prefix");
                failures.push(format!("Failed to rename {}: {}", path.display(), e));
            }
        }
    }
    renamed
}
