//! Configuration file for twinrun.
//!
//! Settings are read from `.twinrun/twinrun.toml` in the project directory.
//! Every field has a default, so an absent or empty file is valid.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "digital-twin"
//!
//! [paths]
//! output_root = "text_simulation/text_simulation_output"
//! persona_dir = "data/mega_persona_json/mega_persona"
//! worker_config = "text_simulation/configs/openai_config.yaml"
//! failure_manifest = ".twinrun/failed_personas.txt"
//! snapshot_dir = "backups/text_simulation_output"
//!
//! [simulation]
//! target_count = 100
//! max_personas = 2058
//! per_invocation_cap = 10
//!
//! [dispatch]
//! mode = "sequential"
//! delay_secs = 5
//! max_cycles = 3
//! num_workers = 8
//!
//! [worker]
//! command = "python3"
//! args = ["text_simulation/run_LLM_simulations.py"]
//!
//! [worker.env]
//! PYTHONPATH = "text_simulation"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;

/// Env var overriding the worker command when the file does not set one.
pub const WORKER_CMD_ENV: &str = "TWINRUN_WORKER_CMD";

/// Name of the configuration file inside the state directory.
pub const CONFIG_FILE: &str = "twinrun.toml";

/// How pending personas are handed to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// One invocation for the whole plan. A failure fails every persona in it.
    Batch,
    /// One invocation per persona with a delay in between.
    #[default]
    Sequential,
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchMode::Batch => write!(f, "batch"),
            DispatchMode::Sequential => write!(f, "sequential"),
        }
    }
}

impl std::str::FromStr for DispatchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "batch" => Ok(DispatchMode::Batch),
            "sequential" => Ok(DispatchMode::Sequential),
            _ => anyhow::bail!(
                "Invalid dispatch mode '{}'. Valid values: batch, sequential",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsSection {
    /// Root of the simulation output tree
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Directory of `pid_*.json` persona definitions
    #[serde(default = "default_persona_dir")]
    pub persona_dir: PathBuf,
    /// Config file handed to the worker untouched
    #[serde(default = "default_worker_config")]
    pub worker_config: PathBuf,
    /// Failure manifest location (default: `.twinrun/failed_personas.txt`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_manifest: Option<PathBuf>,
    /// Default destination for `twinrun snapshot`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_dir: Option<PathBuf>,
}

fn default_output_root() -> PathBuf {
    PathBuf::from("text_simulation/text_simulation_output")
}

fn default_persona_dir() -> PathBuf {
    PathBuf::from("data/mega_persona_json/mega_persona")
}

fn default_worker_config() -> PathBuf {
    PathBuf::from("text_simulation/configs/openai_config.yaml")
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            output_root: default_output_root(),
            persona_dir: default_persona_dir(),
            worker_config: default_worker_config(),
            failure_manifest: None,
            snapshot_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSection {
    /// Valid runs wanted per persona
    #[serde(default = "default_target_count")]
    pub target_count: u32,
    /// Only drive the first N personas of the registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_personas: Option<usize>,
    /// Upper bound on runs requested from one invocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_invocation_cap: Option<u32>,
}

fn default_target_count() -> u32 {
    1
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            target_count: default_target_count(),
            max_personas: None,
            per_invocation_cap: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSection {
    #[serde(default)]
    pub mode: DispatchMode,
    /// Pause between sequential invocations, in seconds
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    /// Reconcile/dispatch cycles before giving up on a run
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    /// Forwarded to the worker as `--num_workers`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_workers: Option<u32>,
}

fn default_delay_secs() -> u64 {
    5
}

fn default_max_cycles() -> u32 {
    1
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            delay_secs: default_delay_secs(),
            max_cycles: default_max_cycles(),
            num_workers: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Executable to spawn (default: `$TWINRUN_WORKER_CMD` or `python3`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments placed before the dispatch arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Extra environment for the worker
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// The complete twinrun.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwinToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub worker: WorkerSection,
}

impl TwinToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;

        let toml = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(toml)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse twinrun.toml")
    }

    /// Load `twinrun.toml` from the state directory, or defaults when absent.
    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let config_path = state_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize twinrun.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Worker command (file -> env -> default).
    pub fn worker_cmd(&self) -> String {
        self.worker
            .command
            .clone()
            .or_else(|| std::env::var(WORKER_CMD_ENV).ok())
            .unwrap_or_else(|| "python3".to_string())
    }

    pub fn worker_args(&self) -> Vec<String> {
        self.worker
            .args
            .clone()
            .unwrap_or_else(|| vec!["text_simulation/run_LLM_simulations.py".to_string()])
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.simulation.target_count == 0 {
            warnings.push(
                "simulation.target_count is 0: every persona is already complete".to_string(),
            );
        }
        if self.simulation.per_invocation_cap == Some(0) {
            warnings.push("simulation.per_invocation_cap is 0 and will be ignored".to_string());
        }
        if self.simulation.max_personas == Some(0) {
            warnings.push("simulation.max_personas is 0: no persona will be driven".to_string());
        }
        if self.dispatch.max_cycles == 0 {
            warnings.push("dispatch.max_cycles is 0: nothing will be dispatched".to_string());
        }
        if self.dispatch.mode == DispatchMode::Batch && self.dispatch.delay_secs > 0 {
            warnings.push("dispatch.delay_secs only applies to sequential mode".to_string());
        }
        if let Some(cmd) = &self.worker.command
            && cmd.trim().is_empty()
        {
            warnings.push("worker.command is empty".to_string());
        }

        warnings
    }
}
