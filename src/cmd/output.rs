//! Output tree maintenance: `twinrun snapshot` and `twinrun clean`.

use anyhow::{Context, Result};
use console::style;
use std::path::{Path, PathBuf};

use super::super::Cli;

pub fn cmd_snapshot(
    cli: &Cli,
    project_dir: &Path,
    destination: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    use twinrun::config::Config;
    use twinrun::snapshot::SnapshotManager;

    let config = Config::new(project_dir.to_path_buf(), &cli.overrides(), cli.verbose)?;

    let destination = match destination {
        Some(dest) if dest.is_absolute() => dest,
        Some(dest) => std::env::current_dir()
            .context("Failed to get current directory")?
            .join(dest),
        None => config.snapshot_dir.clone().context(
            "No snapshot destination given and paths.snapshot_dir is not set in twinrun.toml",
        )?,
    };

    let summary = SnapshotManager::new(&config.output_root).snapshot(&destination, force)?;

    println!(
        "Snapshot of {} written to {}",
        config.output_root.display(),
        style(summary.destination.display()).green()
    );
    println!(
        "  {} file(s), {} director(ies), {} byte(s)",
        summary.files, summary.directories, summary.bytes
    );
    Ok(())
}

pub fn cmd_clean(cli: &Cli, project_dir: &Path) -> Result<()> {
    use dialoguer::Confirm;
    use twinrun::config::Config;

    let config = Config::new(project_dir.to_path_buf(), &cli.overrides(), cli.verbose)?;
    let root = &config.output_root;

    if !cli.yes {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "This will delete every run under {}. Are you sure?",
                root.display()
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Clean cancelled");
            return Ok(());
        }
    }

    if root.exists() {
        std::fs::remove_dir_all(root)
            .with_context(|| format!("Failed to remove {}", root.display()))?;
    }
    std::fs::create_dir_all(root)
        .with_context(|| format!("Failed to recreate {}", root.display()))?;
    tracing::info!(root = %root.display(), "output root cleaned");

    println!("Cleaned {}", root.display());
    Ok(())
}
