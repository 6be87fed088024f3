use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;
use crate::registry::DirectoryRegistry;
use crate::twin_config::{CONFIG_FILE, DispatchMode, TwinToml};

/// Name of the state directory inside the project.
pub const STATE_DIR: &str = ".twinrun";

/// Command-line overrides applied on top of `twinrun.toml`.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub target_count: Option<u32>,
    pub mode: Option<DispatchMode>,
    pub delay_secs: Option<u64>,
    pub max_cycles: Option<u32>,
}

/// Resolved, immutable runtime configuration.
///
/// Built once from `twinrun.toml`, the environment and the command line, then
/// passed by reference to every component. All paths are absolute.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub config_file: PathBuf,
    pub output_root: PathBuf,
    pub persona_dir: PathBuf,
    pub worker_config: PathBuf,
    pub failure_manifest: PathBuf,
    pub snapshot_dir: Option<PathBuf>,
    pub target_count: u32,
    pub max_personas: Option<usize>,
    pub per_invocation_cap: Option<u32>,
    pub mode: DispatchMode,
    pub delay: Duration,
    pub max_cycles: u32,
    pub num_workers: Option<u32>,
    pub worker_cmd: String,
    pub worker_args: Vec<String>,
    pub worker_env: BTreeMap<String, String>,
    pub verbose: bool,
    toml: TwinToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, overrides: &Overrides, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let state_dir = project_dir.join(STATE_DIR);

        let config_file = match &overrides.config_file {
            Some(path) => resolve(&project_dir, path),
            None => state_dir.join(CONFIG_FILE),
        };
        let toml = if overrides.config_file.is_some() {
            TwinToml::load(&config_file)?
        } else {
            TwinToml::load_or_default(&state_dir)?
        };

        let paths = &toml.paths;
        let failure_manifest = paths
            .failure_manifest
            .as_ref()
            .map(|p| resolve(&project_dir, p))
            .unwrap_or_else(|| state_dir.join("failed_personas.txt"));

        Ok(Self {
            log_dir: state_dir.join("logs"),
            audit_dir: state_dir.join("audit"),
            config_file,
            output_root: resolve(&project_dir, &paths.output_root),
            persona_dir: resolve(&project_dir, &paths.persona_dir),
            worker_config: resolve(&project_dir, &paths.worker_config),
            failure_manifest,
            snapshot_dir: paths.snapshot_dir.as_ref().map(|p| resolve(&project_dir, p)),
            target_count: overrides
                .target_count
                .unwrap_or(toml.simulation.target_count),
            max_personas: toml.simulation.max_personas,
            per_invocation_cap: toml.simulation.per_invocation_cap,
            mode: overrides.mode.unwrap_or(toml.dispatch.mode),
            delay: Duration::from_secs(overrides.delay_secs.unwrap_or(toml.dispatch.delay_secs)),
            max_cycles: overrides.max_cycles.unwrap_or(toml.dispatch.max_cycles),
            num_workers: toml.dispatch.num_workers,
            worker_cmd: toml.worker_cmd(),
            worker_args: toml.worker_args(),
            worker_env: toml.worker.env.clone(),
            verbose,
            project_dir,
            state_dir,
            toml,
        })
    }

    /// The parsed file this configuration was built from.
    pub fn toml(&self) -> &TwinToml {
        &self.toml
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        std::fs::create_dir_all(self.audit_dir.join("runs"))
            .context("Failed to create audit runs directory")?;
        Ok(())
    }

    pub fn registry(&self) -> DirectoryRegistry {
        DirectoryRegistry::new(&self.persona_dir, self.max_personas)
    }

    /// Check everything dispatch depends on. Any error here is fatal.
    pub fn validate_for_dispatch(&self) -> Result<(), ConfigError> {
        if self.worker_cmd.trim().is_empty() {
            return Err(ConfigError::EmptyWorkerCommand);
        }
        if !self.persona_dir.is_dir() {
            return Err(ConfigError::PersonaDirMissing {
                path: self.persona_dir.clone(),
            });
        }
        if let Some(parent) = self.output_root.parent()
            && !parent.is_dir()
        {
            return Err(ConfigError::OutputParentMissing {
                path: parent.to_path_buf(),
            });
        }
        if self.max_cycles == 0 {
            return Err(ConfigError::InvalidValue {
                field: "dispatch.max_cycles",
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Environment for worker processes: `<project>/.env` first, then `[worker.env]`.
    pub fn worker_environment(&self) -> Result<Vec<(String, String)>> {
        let mut env: BTreeMap<String, String> = BTreeMap::new();

        let dotenv = self.project_dir.join(".env");
        if dotenv.is_file() {
            let iter = dotenvy::from_path_iter(&dotenv)
                .with_context(|| format!("Failed to read {}", dotenv.display()))?;
            for item in iter {
                let (key, value) =
                    item.with_context(|| format!("Failed to parse {}", dotenv.display()))?;
                env.insert(key, value);
            }
        }

        for (key, value) in &self.worker_env {
            env.insert(key.clone(), value.clone());
        }

        Ok(env.into_iter().collect())
    }
}

fn resolve(project_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_dir.join(path)
    }
}
