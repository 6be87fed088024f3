//! Whole-tree copies of the output root.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::errors::SnapshotError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub destination: PathBuf,
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

pub struct SnapshotManager {
    source: PathBuf,
}

impl SnapshotManager {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// Copy the whole source tree to `destination`.
    ///
    /// An existing destination is refused unless `overwrite` is set, in which
    /// case it is removed first.
    pub fn snapshot(
        &self,
        destination: &Path,
        overwrite: bool,
    ) -> Result<SnapshotSummary, SnapshotError> {
        if !self.source.is_dir() {
            return Err(SnapshotError::SourceMissing {
                path: self.source.clone(),
            });
        }
        let source = self
            .source
            .canonicalize()
            .map_err(|source| SnapshotError::CopyFailed {
                path: self.source.clone(),
                source,
            })?;
        // Both checks run before anything is removed.
        let resolved = absolute(destination);
        if resolved.starts_with(&source) {
            return Err(SnapshotError::DestinationInsideSource {
                path: destination.to_path_buf(),
            });
        }
        if source.starts_with(&resolved) {
            return Err(SnapshotError::DestinationContainsSource {
                path: destination.to_path_buf(),
            });
        }

        if destination.exists() {
            if !overwrite {
                return Err(SnapshotError::DestinationExists {
                    path: destination.to_path_buf(),
                });
            }
            let removed = if destination.is_dir() {
                fs::remove_dir_all(destination)
            } else {
                fs::remove_file(destination)
            };
            removed.map_err(|source| SnapshotError::CopyFailed {
                path: destination.to_path_buf(),
                source,
            })?;
            tracing::info!(destination = %destination.display(), "removed previous snapshot");
        }

        let mut summary = SnapshotSummary {
            destination: destination.to_path_buf(),
            ..Default::default()
        };

        for entry in WalkDir::new(&source).follow_links(false) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| source.clone());
                SnapshotError::CopyFailed {
                    path,
                    source: e.into(),
                }
            })?;
            let relative = entry.path().strip_prefix(&source).unwrap_or(entry.path());
            let target = destination.join(relative);

            let copy_failed = |source| SnapshotError::CopyFailed {
                path: entry.path().to_path_buf(),
                source,
            };
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).map_err(copy_failed)?;
                summary.directories += 1;
            } else if entry.file_type().is_symlink() {
                copy_symlink(entry.path(), &target).map_err(copy_failed)?;
                summary.files += 1;
            } else {
                summary.bytes += fs::copy(entry.path(), &target).map_err(copy_failed)?;
                summary.files += 1;
            }
        }

        tracing::info!(
            destination = %destination.display(),
            files = summary.files,
            bytes = summary.bytes,
            "snapshot complete"
        );
        Ok(summary)
    }
}

/// Recreate the link itself rather than copying what it points at.
#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(link)?, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, _target: &Path) -> std::io::Result<()> {
    tracing::warn!(link = %link.display(), "skipping symlink in snapshot");
    Ok(())
}

/// Absolute form of `path` without requiring it to exist.
fn absolute(path: &Path) -> PathBuf {
    let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    // Resolve the deepest existing ancestor so symlinked temp dirs compare equal.
    for ancestor in path.ancestors() {
        if let Ok(resolved) = ancestor.canonicalize() {
            let rest = path.strip_prefix(ancestor).unwrap_or(Path::new(""));
            return resolved.join(rest);
        }
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn populate(root: &Path) {
        let run = root.join("pid_1/pid_1_sim001");
        fs::create_dir_all(&run).unwrap();
        fs::write(run.join("pid_1_sim001_response.json"), "{\"a\":1}").unwrap();
        fs::write(run.join("prompt.txt"), "hi").unwrap();
        fs::create_dir_all(root.join("pid_2")).unwrap();
    }

    #[test]
    fn test_snapshot_copies_whole_tree() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("out");
        populate(&source);
        let dest = dir.path().join("snap");

        let summary = SnapshotManager::new(&source).snapshot(&dest, false).unwrap();

        assert_eq!(summary.files, 2);
        // out, pid_1, pid_1_sim001, pid_2
        assert_eq!(summary.directories, 4);
        assert_eq!(summary.bytes, 9);
        assert_eq!(
            fs::read_to_string(dest.join("pid_1/pid_1_sim001/prompt.txt")).unwrap(),
            "hi"
        );
        assert!(dest.join("pid_2").is_dir());
    }

    #[test]
    fn test_snapshot_refuses_existing_destination() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("out");
        populate(&source);
        let dest = dir.path().join("snap");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("keep.txt"), "old").unwrap();

        let err = SnapshotManager::new(&source)
            .snapshot(&dest, false)
            .unwrap_err();

        assert!(matches!(err, SnapshotError::DestinationExists { .. }));
        assert!(dest.join("keep.txt").exists());
    }

    #[test]
    fn test_snapshot_overwrite_replaces_destination() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("out");
        populate(&source);
        let dest = dir.path().join("snap");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.txt"), "old").unwrap();

        SnapshotManager::new(&source).snapshot(&dest, true).unwrap();

        assert!(!dest.join("stale.txt").exists());
        assert!(dest.join("pid_1/pid_1_sim001/prompt.txt").exists());
    }

    #[test]
    fn test_snapshot_missing_source() {
        let dir = tempdir().unwrap();
        let err = SnapshotManager::new(dir.path().join("absent"))
            .snapshot(&dir.path().join("snap"), false)
            .unwrap_err();
        assert!(matches!(err, SnapshotError::SourceMissing { .. }));
    }

    #[test]
    fn test_snapshot_refuses_destination_inside_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("out");
        populate(&source);

        let err = SnapshotManager::new(&source)
            .snapshot(&source.join("nested/snap"), false)
            .unwrap_err();
        assert!(matches!(err, SnapshotError::DestinationInsideSource { .. }));
    }

    #[test]
    fn test_snapshot_refuses_destination_containing_source() {
        let dir = tempdir().unwrap();
        let parent = dir.path().join("text_simulation");
        let source = parent.join("text_simulation_output");
        populate(&source);

        let err = SnapshotManager::new(&source)
            .snapshot(&parent, true)
            .unwrap_err();

        assert!(matches!(err, SnapshotError::DestinationContainsSource { .. }));
        assert!(source.join("pid_1/pid_1_sim001/prompt.txt").exists());
    }

    #[test]
    fn test_snapshot_refuses_source_itself() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("out");
        populate(&source);

        let err = SnapshotManager::new(&source)
            .snapshot(&source, true)
            .unwrap_err();

        assert!(matches!(err, SnapshotError::DestinationInsideSource { .. }));
        assert!(source.join("pid_1/pid_1_sim001/prompt.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_snapshot_copies_symlinks_as_links() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("out");
        populate(&source);
        std::os::unix::fs::symlink("pid_1", source.join("latest")).unwrap();
        std::os::unix::fs::symlink(
            "pid_1_sim001_response.json",
            source.join("pid_1/pid_1_sim001/current.json"),
        )
        .unwrap();
        let dest = dir.path().join("snap");

        let summary = SnapshotManager::new(&source).snapshot(&dest, false).unwrap();

        assert_eq!(summary.files, 4);
        let link = dest.join("latest");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("pid_1"));
        assert_eq!(
            fs::read_to_string(dest.join("pid_1/pid_1_sim001/current.json")).unwrap(),
            "{\"a\":1}"
        );
    }
}
