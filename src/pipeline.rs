//! Resumable run loop: reconcile, plan, dispatch, repeat.
//!
//! Every cycle starts from a cold reconciliation of the output tree, so a run
//! that was killed at any point resumes by simply being started again.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use crate::audit::{AuditLogger, CycleAudit, RunConfig, RunOutcome};
use crate::config::Config;
use crate::dispatch::{DispatchReport, Dispatcher, FailureManifest, Worker};
use crate::planner::{DispatchPlan, PlanSummary, WorkPlanner};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::ui::DispatchUI;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Restrict dispatch to these personas.
    pub allow_list: Option<Vec<String>>,
    /// Reconcile and plan, but dispatch nothing.
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u32,
    pub reconcile: ReconcileReport,
    pub plan: DispatchPlan,
    pub dispatch: Option<DispatchReport>,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub cycles: Vec<CycleReport>,
    /// Reconciliation after the last dispatch, when one ran to completion.
    pub closing: Option<ReconcileReport>,
    /// Completion counts as of the last reconciliation.
    pub summary: PlanSummary,
    pub outcome: RunOutcome,
    /// Manifest contents after the run.
    pub failed: Vec<String>,
    pub audit_file: Option<PathBuf>,
    /// Record of an earlier run that died mid-run, closed before this one started.
    pub stale_audit_file: Option<PathBuf>,
}

impl PipelineReport {
    pub fn interrupted(&self) -> bool {
        self.outcome == RunOutcome::Interrupted
    }

    pub fn dispatched_any(&self) -> bool {
        self.cycles.iter().any(|c| c.dispatch.is_some())
    }
}

pub struct Pipeline<W: Worker> {
    reconciler: Reconciler,
    planner: WorkPlanner,
    dispatcher: Dispatcher<W>,
    manifest_path: PathBuf,
    max_cycles: u32,
    audit: Option<(AuditLogger, RunConfig)>,
    ui: Option<Arc<DispatchUI>>,
}

impl<W: Worker> Pipeline<W> {
    pub fn new(config: &Config, dispatcher: Dispatcher<W>) -> Self {
        Self {
            reconciler: Reconciler::new(&config.output_root),
            planner: WorkPlanner::new(config.target_count).with_cap(config.per_invocation_cap),
            dispatcher,
            manifest_path: config.failure_manifest.clone(),
            max_cycles: config.max_cycles,
            audit: None,
            ui: None,
        }
    }

    pub fn with_audit(mut self, logger: AuditLogger, run_config: RunConfig) -> Self {
        self.audit = Some((logger, run_config));
        self
    }

    pub fn with_ui(mut self, ui: Arc<DispatchUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Drive `persona_ids` toward the target for up to `max_cycles` cycles.
    pub async fn run(
        &mut self,
        persona_ids: &[String],
        options: &RunOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Result<PipelineReport> {
        let mut stale_audit_file = None;
        if let Some((logger, run_config)) = &mut self.audit {
            stale_audit_file = logger.close_stale_run()?;
            logger.start_run(run_config.clone())?;
        }

        let allow_list = options.allow_list.as_deref();
        let mut manifest = FailureManifest::load(&self.manifest_path)?;
        let mut cycles = Vec::new();
        let mut summary = PlanSummary::default();
        let mut outcome = RunOutcome::CyclesExhausted;

        for cycle in 1..=self.max_cycles {
            if *shutdown.borrow() {
                outcome = RunOutcome::Interrupted;
                break;
            }
            if let Some(ui) = &self.ui {
                ui.start_cycle(cycle, self.max_cycles);
            }

            let reconciliation = self.reconciler.reconcile(persona_ids);
            let plan = self.planner.plan(&reconciliation.scan, allow_list);
            summary = plan.summary.clone();
            tracing::info!(
                cycle,
                removed = reconciliation.report.quarantine.removed_count(),
                renamed = reconciliation.report.renumber.renamed.len(),
                planned = plan.items.len(),
                "cycle planned"
            );
            if let Some(ui) = &self.ui {
                ui.show_reconcile(&reconciliation.report);
                ui.show_plan(&plan);
            }

            let mut audit_cycle = CycleAudit::new(cycle, &reconciliation.report, &plan);
            let stop = if plan.is_empty() {
                outcome = RunOutcome::Complete;
                true
            } else {
                options.dry_run
            };
            if stop {
                if options.dry_run && !plan.is_empty() {
                    outcome = RunOutcome::DryRun;
                }
                audit_cycle.finish(None);
                self.record_cycle(audit_cycle)?;
                cycles.push(CycleReport {
                    cycle,
                    reconcile: reconciliation.report,
                    plan,
                    dispatch: None,
                });
                break;
            }

            let report = self.dispatcher.dispatch(&plan, shutdown.clone()).await?;
            manifest.apply(&report);
            manifest.save()?;

            audit_cycle.finish(Some(&report));
            self.record_cycle(audit_cycle)?;

            let interrupted = report.interrupted;
            cycles.push(CycleReport {
                cycle,
                reconcile: reconciliation.report,
                plan,
                dispatch: Some(report),
            });
            if interrupted {
                outcome = RunOutcome::Interrupted;
                break;
            }
        }

        // Judge the last pass's artifacts so the summary reflects what is on disk.
        let mut closing = None;
        let last_dispatched = cycles.last().is_some_and(|c| c.dispatch.is_some());
        if outcome == RunOutcome::CyclesExhausted && last_dispatched {
            let reconciliation = self.reconciler.reconcile(persona_ids);
            let plan = self.planner.plan(&reconciliation.scan, allow_list);
            summary = plan.summary.clone();
            if plan.is_empty() {
                outcome = RunOutcome::Complete;
            }
            if let Some(ui) = &self.ui {
                ui.print_line("");
                ui.show_reconcile(&reconciliation.report);
                ui.show_plan(&plan);
            }
            closing = Some(reconciliation.report);
        }

        let audit_file = match &mut self.audit {
            Some((logger, _)) => Some(logger.finish_run(outcome.clone())?),
            None => None,
        };
        if let Some(ui) = &self.ui {
            ui.close();
        }

        Ok(PipelineReport {
            cycles,
            closing,
            summary,
            outcome,
            failed: manifest.ids().to_vec(),
            audit_file,
            stale_audit_file,
        })
    }

    fn record_cycle(&mut self, cycle: CycleAudit) -> Result<()> {
        if let Some((logger, _)) = &mut self.audit {
            logger.add_cycle(cycle)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Overrides;
    use crate::dispatch::{InvocationOutcome, OutputSink, WorkerRequest};
    use crate::layout::run_dir_name;
    use crate::twin_config::DispatchMode;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    /// Writes one run per requested increment, poisoning the runs of `poison`
    /// and exiting 2 for `fail`.
    struct TreeWorker {
        root: PathBuf,
        poison: Vec<String>,
        fail: Vec<String>,
        calls: Mutex<Vec<WorkerRequest>>,
    }

    impl TreeWorker {
        fn new(root: &Path) -> Self {
            Self {
                root: root.to_path_buf(),
                poison: Vec::new(),
                fail: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn next_ordinal(&self, persona: &str) -> u32 {
            let dir = self.root.join(persona);
            fs::read_dir(&dir).map(|it| it.count() as u32).unwrap_or(0) + 1
        }
    }

    #[async_trait]
    impl Worker for TreeWorker {
        async fn invoke(
            &self,
            request: &WorkerRequest,
            _sink: &mut dyn OutputSink,
            _shutdown: &mut watch::Receiver<bool>,
        ) -> InvocationOutcome {
            self.calls.lock().unwrap().push(request.clone());
            for persona in &request.persona_ids {
                for _ in 0..request.increment {
                    let name = run_dir_name(persona, self.next_ordinal(persona));
                    let dir = self.root.join(persona).join(&name);
                    fs::create_dir_all(&dir).unwrap();
                    let file = if self.poison.contains(persona) {
                        "error.log".to_string()
                    } else {
                        format!("{}_response.json", name)
                    };
                    fs::write(dir.join(file), "{}").unwrap();
                }
            }
            let failed = request.persona_ids.iter().any(|p| self.fail.contains(p));
            InvocationOutcome::Exited {
                code: if failed { 2 } else { 0 },
            }
        }
    }

    fn project(toml: &str) -> (TempDir, Config) {
        let dir = tempdir().unwrap();
        let state = dir.path().join(".twinrun");
        fs::create_dir_all(&state).unwrap();
        fs::write(state.join("twinrun.toml"), toml).unwrap();
        let config = Config::new(dir.path().to_path_buf(), &Overrides::default(), false).unwrap();
        (dir, config)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn pipeline(config: &Config, worker: TreeWorker) -> Pipeline<TreeWorker> {
        let dispatcher = Dispatcher::new(
            worker,
            config.mode,
            Duration::ZERO,
            config.log_dir.clone(),
        );
        Pipeline::new(config, dispatcher)
    }

    #[tokio::test]
    async fn test_run_reaches_target_and_completes() {
        let (_dir, config) = project(
            "[paths]\noutput_root = \"out\"\n[simulation]\ntarget_count = 2\n[dispatch]\nmode = \"batch\"\nmax_cycles = 2\n",
        );
        let worker = TreeWorker::new(&config.output_root);
        let mut p = pipeline(&config, worker);
        let (_tx, rx) = watch::channel(false);

        let report = p
            .run(&ids(&["pid_1", "pid_2"]), &RunOptions::default(), rx)
            .await
            .unwrap();

        // The second cycle finds nothing left to do.
        assert_eq!(report.outcome, RunOutcome::Complete);
        assert_eq!(report.cycles.len(), 2);
        assert!(report.cycles[1].dispatch.is_none());
        assert!(report.closing.is_none());
        assert_eq!(report.summary.complete, 2);
        assert!(config.output_root.join("pid_2/pid_2_sim002").is_dir());
    }

    #[tokio::test]
    async fn test_poisoned_runs_are_redone_next_cycle() {
        let (_dir, config) = project(
            "[paths]\noutput_root = \"out\"\n[simulation]\ntarget_count = 1\n[dispatch]\nmax_cycles = 3\n",
        );
        let mut worker = TreeWorker::new(&config.output_root);
        worker.poison = ids(&["pid_1"]);
        let mut p = pipeline(&config, worker);
        let (_tx, rx) = watch::channel(false);

        let report = p
            .run(&ids(&["pid_1", "pid_2"]), &RunOptions::default(), rx)
            .await
            .unwrap();

        // pid_1 never produces a clean run, so every cycle retries it.
        assert_eq!(report.outcome, RunOutcome::CyclesExhausted);
        assert_eq!(report.cycles.len(), 3);
        assert_eq!(report.cycles[1].plan.persona_ids(), vec!["pid_1"]);
        assert!(report.closing.is_some());
        assert!(!config.output_root.join("pid_1").exists());
        assert_eq!(report.summary.complete, 1);
        assert_eq!(report.summary.new, 1);
    }

    #[tokio::test]
    async fn test_failed_persona_is_recorded_and_others_kept() {
        let (_dir, config) = project(
            "[paths]\noutput_root = \"out\"\n[simulation]\ntarget_count = 1\n",
        );
        let mut worker = TreeWorker::new(&config.output_root);
        worker.fail = ids(&["pid_a"]);
        let mut p = pipeline(&config, worker);
        let (_tx, rx) = watch::channel(false);

        let report = p
            .run(&ids(&["pid_a", "pid_b"]), &RunOptions::default(), rx)
            .await
            .unwrap();

        assert_eq!(report.failed, vec!["pid_a".to_string()]);
        assert_eq!(
            fs::read_to_string(&config.failure_manifest).unwrap(),
            "pid_a\n"
        );
        assert!(config.output_root.join("pid_b/pid_b_sim001").is_dir());
    }

    #[tokio::test]
    async fn test_allow_list_limits_dispatch() {
        let (_dir, config) = project(
            "[paths]\noutput_root = \"out\"\n[simulation]\ntarget_count = 1\n",
        );
        let mut p = pipeline(&config, TreeWorker::new(&config.output_root));
        let (_tx, rx) = watch::channel(false);
        let options = RunOptions {
            allow_list: Some(ids(&["pid_2"])),
            dry_run: false,
        };

        let report = p
            .run(&ids(&["pid_1", "pid_2", "pid_3"]), &options, rx)
            .await
            .unwrap();

        assert_eq!(report.cycles[0].plan.persona_ids(), vec!["pid_2"]);
        assert!(!config.output_root.join("pid_1").exists());
        assert_eq!(report.outcome, RunOutcome::Complete);
    }

    #[tokio::test]
    async fn test_dry_run_dispatches_nothing() {
        let (_dir, config) = project("[paths]\noutput_root = \"out\"\n");
        let mut p = pipeline(&config, TreeWorker::new(&config.output_root));
        let (_tx, rx) = watch::channel(false);
        let options = RunOptions {
            allow_list: None,
            dry_run: true,
        };

        let report = p.run(&ids(&["pid_1"]), &options, rx).await.unwrap();

        assert_eq!(report.outcome, RunOutcome::DryRun);
        assert!(!report.dispatched_any());
        assert_eq!(report.cycles[0].plan.items.len(), 1);
        assert!(!config.output_root.exists());
    }

    #[tokio::test]
    async fn test_audit_record_written() {
        let (_dir, config) = project("[paths]\noutput_root = \"out\"\n");
        config.ensure_directories().unwrap();
        let run_config = RunConfig::from_config(&config, None, false);
        let mut p = pipeline(&config, TreeWorker::new(&config.output_root))
            .with_audit(AuditLogger::new(&config.audit_dir), run_config);
        let (_tx, rx) = watch::channel(false);

        let report = p
            .run(&ids(&["pid_1"]), &RunOptions::default(), rx)
            .await
            .unwrap();

        let audit_file = report.audit_file.expect("audit file written");
        let run = AuditLogger::new(&config.audit_dir).load_run(&audit_file).unwrap();
        assert_eq!(run.cycles.len(), 1);
        assert_eq!(run.cycles[0].invocations.len(), 1);
        assert_eq!(run.outcome, RunOutcome::Complete);
        assert!(!config.audit_dir.join("current-run.json").exists());
        assert!(report.stale_audit_file.is_none());
    }

    #[tokio::test]
    async fn test_unfinished_audit_from_earlier_run_is_closed() {
        let (_dir, config) = project("[paths]\noutput_root = \"out\"\n");
        config.ensure_directories().unwrap();
        let run_config = RunConfig::from_config(&config, None, false);
        let mut crashed = AuditLogger::new(&config.audit_dir);
        crashed.start_run(run_config.clone()).unwrap();
        drop(crashed);

        let mut p = pipeline(&config, TreeWorker::new(&config.output_root))
            .with_audit(AuditLogger::new(&config.audit_dir), run_config);
        let (_tx, rx) = watch::channel(false);
        let report = p
            .run(&ids(&["pid_1"]), &RunOptions::default(), rx)
            .await
            .unwrap();

        let logger = AuditLogger::new(&config.audit_dir);
        let stale = report.stale_audit_file.expect("earlier record closed");
        assert_eq!(logger.load_run(&stale).unwrap().outcome, RunOutcome::Abandoned);
        assert_eq!(logger.list_runs().unwrap().len(), 2);
        assert_eq!(
            logger.last_run().unwrap().map(|r| r.outcome),
            Some(RunOutcome::Complete)
        );
    }

    #[tokio::test]
    async fn test_shutdown_before_start_dispatches_nothing() {
        let (_dir, config) = project("[paths]\noutput_root = \"out\"\n");
        let mut p = pipeline(&config, TreeWorker::new(&config.output_root));
        let (_tx, rx) = watch::channel(true);

        let report = p
            .run(&ids(&["pid_1"]), &RunOptions::default(), rx)
            .await
            .unwrap();

        assert!(report.interrupted());
        assert!(report.cycles.is_empty());
    }

    #[test]
    fn test_sequential_mode_from_config() {
        let (_dir, config) = project("[dispatch]\nmode = \"sequential\"\n");
        assert_eq!(config.mode, DispatchMode::Sequential);
    }
}
