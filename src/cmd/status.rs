//! Read-only status report and standalone reconciliation: `twinrun status`, `twinrun reconcile`.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::Cli;

pub fn cmd_status(cli: &Cli, project_dir: &Path) -> Result<()> {
    use twinrun::audit::AuditLogger;
    use twinrun::config::Config;
    use twinrun::planner::{Classification, WorkPlanner};
    use twinrun::registry::PersonaRegistry;
    use twinrun::scanner::{ArtifactScanner, RunState, StateSource};
    use twinrun::ui::icons::WARN;

    let config = Config::new(project_dir.to_path_buf(), &cli.overrides(), cli.verbose)?;
    let persona_ids = config.registry().persona_ids()?;

    let scan = ArtifactScanner::new(&config.output_root).scan(&persona_ids);
    let plan = WorkPlanner::new(config.target_count)
        .with_cap(config.per_invocation_cap)
        .plan(&scan, None);

    println!();
    println!("Output root: {}", config.output_root.display());
    println!("Target: {} run(s) per persona", config.target_count);
    println!();
    println!(
        "{:<16} {:>6} {:>10} {:>8}  {:<11} {:>9}",
        "PERSONA", "VALID", "ERRONEOUS", "UNKNOWN", "STATUS", "REMAINING"
    );

    let mut hidden = 0;
    for (persona, state) in scan.personas.iter().zip(&plan.states) {
        let erroneous = persona.count(RunState::Erroneous);
        let unknown = persona.count(RunState::Unknown);
        if !cli.verbose
            && state.classification == Classification::Complete
            && erroneous == 0
            && unknown == 0
        {
            hidden += 1;
            continue;
        }
        let status = match state.classification {
            Classification::Complete => style(format!("{:<11}", "complete")).green(),
            Classification::Incomplete => style(format!("{:<11}", "incomplete")).yellow(),
            Classification::New => style(format!("{:<11}", "new")).cyan(),
        };
        println!(
            "{:<16} {:>6} {:>10} {:>8}  {} {:>9}",
            persona.persona_id,
            state.valid_run_count,
            erroneous,
            unknown,
            status,
            state.remaining()
        );
    }
    if hidden > 0 {
        println!(
            "{}",
            style(format!("({} complete persona(s) hidden, use --verbose)", hidden)).dim()
        );
    }

    for warning in &scan.warnings {
        println!("{} {}", style("warning:").yellow(), warning);
    }

    println!();
    println!(
        "Personas: {} | complete: {} | incomplete: {} | new: {}",
        plan.summary.total(),
        style(plan.summary.complete).green(),
        style(plan.summary.incomplete).yellow(),
        style(plan.summary.new).cyan()
    );
    let erroneous: u32 = scan
        .personas
        .iter()
        .map(|p| p.count(RunState::Erroneous))
        .sum();
    if erroneous > 0 {
        println!(
            "{} erroneous run(s) will be removed by the next reconcile",
            style(erroneous).red()
        );
    }

    let mut audit = AuditLogger::new(&config.audit_dir);
    if audit.load_current()?
        && let Some(run) = audit.current_run()
    {
        println!(
            "{} run started {} has not finished ({} cycle(s) recorded). Do not reconcile while it is active.",
            WARN,
            run.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            run.cycles.len()
        );
    }
    if let Some(run) = audit.last_run()? {
        let invocations: usize = run.cycles.iter().map(|c| c.invocations.len()).sum();
        println!(
            "Last run: {} ({}), {} cycle(s), {} invocation(s)",
            run.ended_at
                .unwrap_or(run.started_at)
                .format("%Y-%m-%d %H:%M:%S UTC"),
            run.outcome,
            run.cycles.len(),
            invocations
        );
    }
    println!();
    Ok(())
}

pub fn cmd_reconcile(cli: &Cli, project_dir: &Path) -> Result<()> {
    use twinrun::config::Config;
    use twinrun::reconcile::Reconciler;
    use twinrun::registry::PersonaRegistry;
    use twinrun::ui::icons::{RENAME, TRASH, WARN};

    let config = Config::new(project_dir.to_path_buf(), &cli.overrides(), cli.verbose)?;
    let persona_ids = config.registry().persona_ids()?;

    let result = Reconciler::new(&config.output_root).reconcile(&persona_ids);
    let report = &result.report;

    println!();
    for entry in &report.quarantine.removed {
        println!(
            "{} removed {} {}",
            TRASH,
            style(&entry.run_name).red(),
            style(format!("({})", entry.matched_file_names.join(", "))).dim()
        );
    }
    for persona in &report.quarantine.removed_persona_dirs {
        println!("{} removed empty persona directory {}", TRASH, persona);
    }
    for persona in &report.quarantine.kept_persona_dirs {
        println!(
            "{} kept persona directory {}: no runs left but it holds other entries",
            WARN,
            style(persona).yellow()
        );
    }
    for entry in &report.renumber.renamed {
        println!(
            "{} {} -> {}",
            RENAME,
            style(&entry.from).dim(),
            style(&entry.to).cyan()
        );
    }
    for warning in &report.warnings {
        println!("{} {}", WARN, style(warning).yellow());
    }
    for failure in report
        .quarantine
        .failures
        .iter()
        .chain(&report.renumber.failures)
    {
        println!("{} {}", WARN, style(failure).red());
    }

    if report.changed_anything() {
        println!();
    }
    println!("{}", report.quarantine.summary());
    println!("{}", report.renumber.summary());
    println!(
        "{} run(s) on disk across {} persona(s)",
        result.scan.total_runs(),
        persona_ids.len()
    );
    println!();
    Ok(())
}
