use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::DispatchReport;

/// Newline-delimited list of personas whose last dispatch failed.
///
/// Written whenever it is non-empty and removed once every entry has
/// succeeded, so its presence alone means there is something to retry.
#[derive(Debug, Clone)]
pub struct FailureManifest {
    path: PathBuf,
    ids: Vec<String>,
}

impl FailureManifest {
    /// Load the manifest at `path`. A missing file is an empty manifest.
    pub fn load(path: &Path) -> Result<Self> {
        let ids = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read failure manifest {}", path.display()))?;
            let mut ids: Vec<String> = Vec::new();
            for id in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
                if !ids.iter().any(|existing| existing == id) {
                    ids.push(id.to_string());
                }
            }
            ids
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            ids,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, persona_id: &str) -> bool {
        self.ids.iter().any(|id| id == persona_id)
    }

    pub fn record_failure(&mut self, persona_id: &str) {
        if !self.contains(persona_id) {
            self.ids.push(persona_id.to_string());
        }
    }

    pub fn record_success(&mut self, persona_id: &str) {
        self.ids.retain(|id| id != persona_id);
    }

    /// Fold one dispatch pass into the manifest. Interrupted personas are left as they were.
    pub fn apply(&mut self, report: &DispatchReport) {
        for id in &report.succeeded {
            self.record_success(id);
        }
        for id in &report.failed {
            self.record_failure(id);
        }
    }

    pub fn save(&self) -> Result<()> {
        if self.ids.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path).with_context(|| {
                    format!("Failed to remove failure manifest {}", self.path.display())
                })?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create failure manifest directory")?;
        }
        let mut content = self.ids.join("\n");
        content.push('\n');
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write failure manifest {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn report(succeeded: &[&str], failed: &[&str]) -> DispatchReport {
        DispatchReport {
            succeeded: succeeded.iter().map(|s| s.to_string()).collect(),
            failed: failed.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let manifest = FailureManifest::load(&dir.path().join("failed.txt")).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_load_skips_blank_lines_and_duplicates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed.txt");
        fs::write(&path, "pid_1\n\n  pid_2 \npid_1\n").unwrap();
        let manifest = FailureManifest::load(&path).unwrap();
        assert_eq!(manifest.ids(), &["pid_1".to_string(), "pid_2".to_string()]);
    }

    #[test]
    fn test_apply_adds_failures_and_clears_successes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed.txt");
        fs::write(&path, "pid_1\npid_2\n").unwrap();

        let mut manifest = FailureManifest::load(&path).unwrap();
        manifest.apply(&report(&["pid_1"], &["pid_3", "pid_2"]));
        manifest.save().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "pid_2\npid_3\n");
    }

    #[test]
    fn test_save_removes_file_when_cleared() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed.txt");
        fs::write(&path, "pid_1\n").unwrap();

        let mut manifest = FailureManifest::load(&path).unwrap();
        manifest.apply(&report(&["pid_1"], &[]));
        manifest.save().unwrap();

        assert!(!path.exists());
    }

    #[test]
    fn test_save_empty_without_file_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state/failed.txt");
        FailureManifest::load(&path).unwrap().save().unwrap();
        assert!(!path.exists());
    }
}
