//! Reconcile-plan-dispatch loop: `twinrun run`.

use anyhow::Result;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;

use super::super::Cli;

pub async fn cmd_run(
    cli: &Cli,
    project_dir: PathBuf,
    pids: Option<Vec<String>>,
    retry_failed: bool,
    dry_run: bool,
) -> Result<()> {
    use twinrun::audit::{AuditLogger, RunConfig, RunOutcome};
    use twinrun::config::Config;
    use twinrun::dispatch::{CommandWorker, Dispatcher, FailureManifest};
    use twinrun::pipeline::{Pipeline, RunOptions};
    use twinrun::registry::PersonaRegistry;
    use twinrun::ui::DispatchUI;
    use twinrun::worker_summary::WorkerSummary;

    let config = Config::new(project_dir, &cli.overrides(), cli.verbose)?;
    config.validate_for_dispatch()?;
    config.ensure_directories()?;

    let persona_ids = config.registry().persona_ids()?;
    if persona_ids.is_empty() {
        println!(
            "No personas found in {}. Nothing to do.",
            config.persona_dir.display()
        );
        return Ok(());
    }

    let allow_list = if retry_failed {
        let manifest = FailureManifest::load(&config.failure_manifest)?;
        if manifest.is_empty() {
            println!("Failure manifest is empty. Nothing to retry.");
            return Ok(());
        }
        Some(manifest.ids().to_vec())
    } else {
        pids.map(|ids| {
            ids.into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect::<Vec<_>>()
        })
    };

    println!();
    println!(
        "{} {} persona(s), target {} run(s), {} mode, up to {} cycle(s)",
        style("twinrun").bold(),
        persona_ids.len(),
        config.target_count,
        config.mode,
        config.max_cycles
    );
    if let Some(ids) = &allow_list {
        println!("Restricted to: {}", ids.join(", "));
    }
    if let Some(summary) = WorkerSummary::try_load(&config.worker_config) {
        for line in summary.lines() {
            println!("  {}", style(line).dim());
        }
    }

    let ui = Arc::new(DispatchUI::new(cli.verbose));
    let worker = CommandWorker::from_config(&config)?;
    let dispatcher = Dispatcher::new(
        worker,
        config.mode,
        config.delay,
        config.log_dir.clone(),
    )
    .with_ui(ui.clone());

    let run_config = RunConfig::from_config(&config, allow_list.clone(), dry_run);
    let mut pipeline = Pipeline::new(&config, dispatcher)
        .with_ui(ui)
        .with_audit(AuditLogger::new(&config.audit_dir), run_config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping dispatch");
            let _ = shutdown_tx.send(true);
        }
    });

    let options = RunOptions {
        allow_list,
        dry_run,
    };
    let report = pipeline.run(&persona_ids, &options, shutdown_rx).await?;

    println!();
    if let Some(stale) = &report.stale_audit_file {
        println!(
            "{} An earlier run never finished; its audit record was closed as abandoned: {}",
            style("Note:").yellow(),
            stale.display()
        );
    }
    match report.outcome {
        RunOutcome::Complete => println!(
            "{} Every persona in scope has {} valid run(s).",
            style("Done.").green().bold(),
            config.target_count
        ),
        RunOutcome::CyclesExhausted => println!(
            "{} {} incomplete, {} new after {} cycle(s). Run again to continue.",
            style("Stopped.").yellow().bold(),
            report.summary.incomplete,
            report.summary.new,
            report.cycles.len()
        ),
        RunOutcome::Interrupted => println!(
            "{} Run again to resume; the next reconcile judges partial output.",
            style("Interrupted.").red().bold()
        ),
        RunOutcome::DryRun => {
            if let Some(cycle) = report.cycles.last() {
                println!("{}", style("Dry run. Would dispatch:").bold());
                for item in &cycle.plan.items {
                    println!(
                        "  {:<16} {:<11} {} run(s)",
                        item.persona_id, item.classification, item.increment
                    );
                }
            }
        }
        RunOutcome::InProgress | RunOutcome::Abandoned => {}
    }

    if !report.failed.is_empty() {
        println!(
            "{} persona(s) in failure manifest {}: {}",
            style(report.failed.len()).red(),
            config.failure_manifest.display(),
            report.failed.join(", ")
        );
        println!("Retry them with 'twinrun run --retry-failed'.");
    }
    for cycle in &report.cycles {
        if let Some(log) = cycle.dispatch.as_ref().and_then(|d| d.log_file.as_ref()) {
            println!("{} {}", style("Log:").dim(), log.display());
        }
    }
    if let Some(audit) = &report.audit_file {
        println!("{} {}", style("Audit:").dim(), audit.display());
    }
    println!();

    Ok(())
}
