//! Append-only dispatch log, one file per dispatch pass.
//!
//! Every line is flushed as soon as it is written so the file can be tailed
//! while the worker is still running.

use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::worker::{InvocationOutcome, OutputSink, WorkerRequest};
use crate::errors::DispatchError;

pub struct DispatchLog {
    path: PathBuf,
    file: File,
}

impl DispatchLog {
    /// Open `<log_dir>/dispatch-<YYYYmmdd-HHMMSS>.log` for appending.
    pub fn create(log_dir: &Path) -> Result<Self, DispatchError> {
        let name = format!("dispatch-{}.log", Local::now().format("%Y%m%d-%H%M%S"));
        Self::open(&log_dir.join(name))
    }

    pub fn open(path: &Path) -> Result<Self, DispatchError> {
        let log_open_failed = |source| DispatchError::LogOpenFailed {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(log_open_failed)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(log_open_failed)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&mut self, index: usize, total: usize, request: &WorkerRequest) {
        self.write(&format!(
            "=== [{}/{}] {} (increment {}) ===",
            index,
            total,
            request.joined_ids(),
            request.increment
        ));
    }

    pub fn trailer(&mut self, outcome: &InvocationOutcome) {
        let text = match outcome {
            InvocationOutcome::Exited { code } => format!("=== exit code {} ===", code),
            InvocationOutcome::Interrupted => "=== interrupted ===".to_string(),
            InvocationOutcome::SpawnFailed { message } => {
                format!("=== spawn failed: {} ===", message)
            }
        };
        self.write(&text);
    }

    pub fn write(&mut self, line: &str) {
        let result = writeln!(self.file, "{}", line).and_then(|_| self.file.flush());
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write dispatch log");
        }
    }
}

impl OutputSink for DispatchLog {
    fn line(&mut self, line: &str) {
        self.write(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_names_file_by_timestamp() {
        let dir = tempdir().unwrap();
        let log = DispatchLog::create(&dir.path().join("logs")).unwrap();
        let name = log.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("dispatch-"));
        assert!(name.ends_with(".log"));
        // dispatch-YYYYmmdd-HHMMSS.log
        assert_eq!(name.len(), "dispatch-".len() + 15 + ".log".len());
    }

    #[test]
    fn test_lines_are_visible_immediately() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dispatch.log");
        let mut log = DispatchLog::open(&path).unwrap();

        log.header(1, 2, &WorkerRequest::new(vec!["pid_1".into(), "pid_2".into()], 3));
        log.line("simulating pid_1");

        // Read back while the handle is still open.
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "=== [1/2] pid_1,pid_2 (increment 3) ===\nsimulating pid_1\n"
        );

        log.trailer(&InvocationOutcome::Exited { code: 2 });
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.ends_with("=== exit code 2 ===\n"));
    }

    #[test]
    fn test_open_appends() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dispatch.log");
        DispatchLog::open(&path).unwrap().write("first");
        DispatchLog::open(&path).unwrap().write("second");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_open_fails_when_parent_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let err = DispatchLog::open(&blocker.join("dispatch.log")).err().unwrap();
        assert!(matches!(err, DispatchError::LogOpenFailed { .. }));
    }
}
