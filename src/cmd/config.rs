//! Configuration view and validation commands: `twinrun config`.

use anyhow::Result;
use std::path::Path;

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    use twinrun::config::{Config, STATE_DIR};
    use twinrun::twin_config::{CONFIG_FILE, TwinToml};

    let config_path = match &cli.config {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => project_dir.join(path),
        None => project_dir.join(STATE_DIR).join(CONFIG_FILE),
    };

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("twinrun Configuration");
            println!("=====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No twinrun.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let config = Config::new(project_dir.to_path_buf(), &cli.overrides(), cli.verbose)?;
            let toml = config.toml();

            if let Some(name) = &toml.project.name {
                println!("[project]");
                println!("  name = \"{}\"", name);
                println!();
            }

            println!("[paths]");
            println!("  output_root = \"{}\"", config.output_root.display());
            println!("  persona_dir = \"{}\"", config.persona_dir.display());
            println!("  worker_config = \"{}\"", config.worker_config.display());
            println!(
                "  failure_manifest = \"{}\"",
                config.failure_manifest.display()
            );
            if let Some(dir) = &config.snapshot_dir {
                println!("  snapshot_dir = \"{}\"", dir.display());
            }
            println!();

            println!("[simulation]");
            println!("  target_count = {}", config.target_count);
            if let Some(max) = config.max_personas {
                println!("  max_personas = {}", max);
            }
            if let Some(cap) = config.per_invocation_cap {
                println!("  per_invocation_cap = {}", cap);
            }
            println!();

            println!("[dispatch]");
            println!("  mode = \"{}\"", config.mode);
            println!("  delay_secs = {}", config.delay.as_secs());
            println!("  max_cycles = {}", config.max_cycles);
            if let Some(workers) = config.num_workers {
                println!("  num_workers = {}", workers);
            }
            println!();

            println!("[worker]");
            println!("  command = \"{}\"", config.worker_cmd);
            println!("  args = {:?}", config.worker_args);
            if !config.worker_env.is_empty() {
                // Values may be secrets.
                let keys: Vec<&str> = config.worker_env.keys().map(String::as_str).collect();
                println!("  env = [{}]", keys.join(", "));
            }
            println!();

            if !config_path.exists() {
                println!("Run 'twinrun config init' to create a twinrun.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = Config::new(project_dir.to_path_buf(), &cli.overrides(), cli.verbose)?;
            let mut warnings = config.toml().validate();
            if let Err(e) = config.validate_for_dispatch() {
                warnings.push(format!("not ready to dispatch: {}", e));
            }

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("twinrun.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let toml = TwinToml::default();
            toml.save(&config_path)?;

            println!("Created twinrun.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [paths] output_root, persona_dir, worker_config");
            println!("  - [simulation] target_count, max_personas, per_invocation_cap");
            println!("  - [dispatch] mode, delay_secs, max_cycles, num_workers");
            println!("  - [worker] command, args, env");
            println!();
        }
    }

    Ok(())
}
