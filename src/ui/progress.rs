use crate::dispatch::{InvocationOutcome, WorkerRequest};
use crate::planner::DispatchPlan;
use crate::reconcile::ReconcileReport;
use crate::ui::icons::{CHECK, CLOCK, CROSS, RENAME, RUNNING, SPARKLE, STOP, TRASH, WARN};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal UI for a `twinrun run`, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Persona bar: how many planned personas of the current cycle have been handed to the worker
/// - Worker bar: spinner with the invocation in flight
///
/// Worker output is printed above the bars as it arrives. When stderr is not a
/// terminal the bars are hidden and lines go to stdout instead.
pub struct DispatchUI {
    multi: MultiProgress,
    persona_bar: ProgressBar,
    worker_bar: ProgressBar,
    verbose: bool,
}

impl DispatchUI {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let persona_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let persona_bar = multi.add(ProgressBar::new(0));
        persona_bar.set_style(persona_style);
        persona_bar.set_prefix("Personas");

        let worker_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let worker_bar = multi.add(ProgressBar::new_spinner());
        worker_bar.set_style(worker_style);
        worker_bar.set_prefix("  Worker");

        Self {
            multi,
            persona_bar,
            worker_bar,
            verbose,
        }
    }

    /// Print a line above the bars, falling back to stdout when they are hidden.
    pub fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() || self.multi.println(msg.as_ref()).is_err() {
            println!("{}", msg.as_ref());
        }
    }

    pub fn print_separator(&self) {
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
    }

    pub fn start_cycle(&self, cycle: u32, max_cycles: u32) {
        self.print_line("");
        self.print_separator();
        self.print_line(format!(
            "{} Cycle {}/{}",
            style("▶").green().bold(),
            style(cycle).yellow().bold(),
            max_cycles
        ));
        self.print_separator();
    }

    pub fn show_reconcile(&self, report: &ReconcileReport) {
        for entry in &report.quarantine.removed {
            self.print_line(format!(
                "  {} {} {}",
                TRASH,
                style(&entry.run_name).red(),
                style(format!("({})", entry.matched_file_names.join(", "))).dim()
            ));
        }
        if self.verbose {
            for entry in &report.renumber.renamed {
                self.print_line(format!(
                    "  {} {} -> {}",
                    RENAME,
                    style(&entry.from).dim(),
                    style(&entry.to).cyan()
                ));
            }
        }
        for warning in &report.warnings {
            self.print_line(format!("  {} {}", WARN, style(warning).yellow()));
        }
        self.print_line(format!(
            "  Reconciled: {}; {}",
            report.quarantine.summary(),
            report.renumber.summary()
        ));
    }

    pub fn show_plan(&self, plan: &DispatchPlan) {
        self.print_line(format!(
            "  Target {} run(s): {} complete, {} incomplete, {} new",
            style(plan.target_count).cyan(),
            style(plan.summary.complete).green(),
            style(plan.summary.incomplete).yellow(),
            style(plan.summary.new).cyan()
        ));
        if !plan.is_empty() {
            self.print_line(format!(
                "  {} persona(s) to dispatch",
                style(plan.items.len()).bold()
            ));
        }
    }

    /// Size the persona bar for a new dispatch pass.
    pub fn start_pass(&self, total_personas: usize) {
        self.persona_bar.set_length(total_personas as u64);
        self.persona_bar.set_position(0);
    }

    pub fn start_invocation(&self, index: usize, total: usize, request: &WorkerRequest) {
        self.persona_bar
            .set_message(format!("invocation {}/{}", style(index).cyan(), total));
        self.worker_bar.set_message(format!(
            "{} {} {}",
            RUNNING,
            style(request.joined_ids()).yellow(),
            style(format!("(increment {})", request.increment)).dim()
        ));
        self.worker_bar
            .enable_steady_tick(Duration::from_millis(100));
        self.print_line(format!(
            "{} [{}/{}] {} {}",
            style("▶").green().bold(),
            index,
            total,
            style(request.joined_ids()).yellow().bold(),
            style(format!("(increment {})", request.increment)).dim()
        ));
    }

    /// Echo one line of worker output.
    pub fn worker_line(&self, line: &str) {
        self.print_line(format!("    {}", line));
    }

    pub fn invocation_finished(&self, request: &WorkerRequest, outcome: &InvocationOutcome) {
        self.persona_bar.inc(request.persona_ids.len() as u64);
        let line = match outcome {
            InvocationOutcome::Exited { code: 0 } => format!(
                "  {} {} finished",
                CHECK,
                style(request.joined_ids()).green()
            ),
            InvocationOutcome::Interrupted => format!(
                "  {} {} interrupted",
                STOP,
                style(request.joined_ids()).yellow()
            ),
            other => format!(
                "  {} {} failed: {}",
                CROSS,
                style(request.joined_ids()).red().bold(),
                other
            ),
        };
        self.print_line(line);
    }

    pub fn waiting(&self, delay: Duration) {
        self.worker_bar.set_message(format!(
            "{} waiting {}s before next persona",
            CLOCK,
            delay.as_secs()
        ));
        if self.verbose {
            self.print_line(format!(
                "    {} {}",
                style("→").dim(),
                style(format!("sleeping {}s", delay.as_secs())).dim()
            ));
        }
    }

    /// Stop the spinner and print the pass summary.
    pub fn pass_finished(&self, succeeded: usize, failed: usize, interrupted: bool) {
        self.worker_bar.disable_steady_tick();
        self.worker_bar.set_message("");
        let summary = format!(
            "{} succeeded, {} failed",
            style(succeeded).green(),
            style(failed).red()
        );
        if interrupted {
            self.print_line(format!("\n{} Dispatch interrupted: {}\n", STOP, summary));
        } else {
            self.print_line(format!("\n{} Dispatch complete: {}\n", SPARKLE, summary));
        }
    }

    /// Tear the bars down at the end of the run.
    pub fn close(&self) {
        self.worker_bar.finish_and_clear();
        self.persona_bar.finish_and_clear();
    }
}
