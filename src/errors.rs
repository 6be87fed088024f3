//! Typed error hierarchy for twinrun.
//!
//! Three enums cover the places where callers need to match on the failure:
//! - `ConfigError`: fatal configuration problems, raised before any dispatch
//! - `DispatchError`: worker invocation plumbing (spawn, log file)
//! - `SnapshotError`: output tree backup failures
//!
//! Everything else propagates as `anyhow::Error` with context attached.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors. These abort the run before anything is dispatched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {message}")]
    ParseFailed { path: PathBuf, message: String },

    #[error("Persona directory not found: {path}")]
    PersonaDirMissing { path: PathBuf },

    #[error("Failed to read persona registry at {path}: {message}")]
    RegistryUnreadable { path: PathBuf, message: String },

    #[error("Output root parent does not exist: {path}")]
    OutputParentMissing { path: PathBuf },

    #[error("Worker command is empty")]
    EmptyWorkerCommand,

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Errors from the dispatcher and worker invocation.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to spawn worker '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open dispatch log at {path}: {source}")]
    LogOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from copying the output tree.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot source does not exist: {path}")]
    SourceMissing { path: PathBuf },

    #[error("Snapshot destination already exists: {path} (pass --force to overwrite)")]
    DestinationExists { path: PathBuf },

    #[error("Snapshot destination {path} is inside the source tree")]
    DestinationInsideSource { path: PathBuf },

    #[error("Snapshot destination {path} contains the source tree")]
    DestinationContainsSource { path: PathBuf },

    #[error("Failed to copy {path}: {source}")]
    CopyFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_persona_dir_missing_carries_path() {
        let err = ConfigError::PersonaDirMissing {
            path: PathBuf::from("/data/personas"),
        };
        assert!(err.to_string().contains("/data/personas"));
        assert!(matches!(err, ConfigError::PersonaDirMissing { .. }));
    }

    #[test]
    fn dispatch_error_spawn_failed_is_matchable() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "python3 not found");
        let err = DispatchError::SpawnFailed {
            command: "python3".to_string(),
            source: io_err,
        };
        match &err {
            DispatchError::SpawnFailed { command, source } => {
                assert_eq!(command, "python3");
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected SpawnFailed"),
        }
    }

    #[test]
    fn snapshot_error_destination_exists_mentions_force() {
        let err = SnapshotError::DestinationExists {
            path: PathBuf::from("/backup"),
        };
        assert!(err.to_string().contains("--force"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ConfigError::EmptyWorkerCommand);
        assert_std_error(&DispatchError::LogOpenFailed {
            path: PathBuf::from("logs/dispatch.log"),
            source: std::io::Error::other("denied"),
        });
        assert_std_error(&SnapshotError::SourceMissing {
            path: PathBuf::from("x"),
        });
    }
}
