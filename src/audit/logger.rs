use super::{AuditRun, CycleAudit, RunConfig, RunOutcome};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub struct AuditLogger {
    audit_dir: PathBuf,
    current_run: Option<AuditRun>,
    current_run_file: PathBuf,
}

impl AuditLogger {
    pub fn new(audit_dir: &Path) -> Self {
        let current_run_file = audit_dir.join("current-run.json");
        Self {
            audit_dir: audit_dir.to_path_buf(),
            current_run: None,
            current_run_file,
        }
    }

    pub fn start_run(&mut self, config: RunConfig) -> Result<()> {
        let run = AuditRun::new(config);
        self.current_run = Some(run);
        self.save_current()?;
        Ok(())
    }

    /// Append a finished cycle to the current run.
    ///
    /// Returns an error if no run is active.
    pub fn add_cycle(&mut self, cycle: CycleAudit) -> Result<()> {
        let run = self
            .current_run
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("add_cycle called with no active run"))?;
        run.cycles.push(cycle);
        self.save_current()
    }

    pub fn finish_run(&mut self, outcome: RunOutcome) -> Result<PathBuf> {
        let run = self
            .current_run
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("No current run to finish"))?;

        run.finish(outcome);

        let filename = format!(
            "{}_{}.json",
            run.started_at.format("%Y-%m-%dT%H-%M-%S"),
            &run.run_id.to_string()[..8]
        );
        let runs_dir = self.audit_dir.join("runs");
        fs::create_dir_all(&runs_dir).context("Failed to create audit runs directory")?;
        let run_file = runs_dir.join(&filename);

        let json = serde_json::to_string_pretty(&run).context("Failed to serialize audit run")?;
        fs::write(&run_file, json).context("Failed to write audit run file")?;

        if self.current_run_file.exists() {
            fs::remove_file(&self.current_run_file)
                .context("Failed to remove current-run.json after finishing run")?;
        }

        self.current_run = None;
        Ok(run_file)
    }

    pub fn save_current(&self) -> Result<()> {
        if let Some(ref run) = self.current_run {
            let json =
                serde_json::to_string_pretty(&run).context("Failed to serialize current run")?;
            fs::write(&self.current_run_file, json).context("Failed to write current run file")?;
        }
        Ok(())
    }

    pub fn load_current(&mut self) -> Result<bool> {
        if self.current_run_file.exists() {
            let content = fs::read_to_string(&self.current_run_file)
                .context("Failed to read current run file")?;
            let run: AuditRun =
                serde_json::from_str(&content).context("Failed to parse current run file")?;
            self.current_run = Some(run);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn current_run(&self) -> Option<&AuditRun> {
        self.current_run.as_ref()
    }

    /// Close out a `current-run.json` left behind by a process that died mid-run.
    ///
    /// Returns the path of the finished record, or `None` when there was nothing to close.
    pub fn close_stale_run(&mut self) -> Result<Option<PathBuf>> {
        if !self.load_current()? {
            return Ok(None);
        }
        if let Some(run) = self.current_run() {
            tracing::warn!(
                run_id = %run.run_id,
                started_at = %run.started_at,
                "previous run never finished, closing its audit record"
            );
        }
        self.finish_run(RunOutcome::Abandoned).map(Some)
    }

    /// The most recently finished run, if any. Unreadable records are skipped.
    pub fn last_run(&self) -> Result<Option<AuditRun>> {
        let mut latest: Option<AuditRun> = None;
        for path in self.list_runs()? {
            let run = match self.load_run(&path) {
                Ok(run) => run,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping audit record");
                    continue;
                }
            };
            let finished = run.ended_at.unwrap_or(run.started_at);
            if latest
                .as_ref()
                .is_none_or(|l| finished > l.ended_at.unwrap_or(l.started_at))
            {
                latest = Some(run);
            }
        }
        Ok(latest)
    }

    /// Finished run records, most recent first.
    pub fn list_runs(&self) -> Result<Vec<PathBuf>> {
        let runs_dir = self.audit_dir.join("runs");
        if !runs_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs: Vec<PathBuf> = fs::read_dir(&runs_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();

        runs.sort();
        runs.reverse();
        Ok(runs)
    }

    pub fn load_run(&self, path: &Path) -> Result<AuditRun> {
        let content = fs::read_to_string(path).context("Failed to read audit run file")?;
        let run: AuditRun =
            serde_json::from_str(&content).context("Failed to parse audit run file")?;
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::DispatchPlan;
    use crate::reconcile::ReconcileReport;
    use tempfile::TempDir;

    /// Logger over a fresh temp dir. Keep the guard alive for the whole test.
    fn setup_logger() -> (AuditLogger, TempDir) {
        let dir = TempDir::new().expect("failed to create temp dir");
        let logger = AuditLogger::new(dir.path());
        (logger, dir)
    }

    fn make_run_config() -> RunConfig {
        RunConfig {
            project_dir: PathBuf::from("."),
            output_root: PathBuf::from("out"),
            target_count: 2,
            mode: "batch".to_string(),
            delay_secs: 0,
            max_cycles: 2,
            worker_cmd: "sh".to_string(),
            worker_args: vec!["-c".to_string(), "true".to_string()],
            allow_list: Some(vec!["pid_1".to_string()]),
            dry_run: false,
        }
    }

    fn empty_cycle(n: u32) -> CycleAudit {
        CycleAudit::new(n, &ReconcileReport::default(), &DispatchPlan::default())
    }

    #[test]
    fn test_add_cycle_without_active_run_returns_err() {
        let (mut logger, _dir) = setup_logger();
        assert!(logger.add_cycle(empty_cycle(1)).is_err());
    }

    #[test]
    fn test_finish_without_active_run_returns_err() {
        let (mut logger, _dir) = setup_logger();
        assert!(logger.finish_run(RunOutcome::Complete).is_err());
    }

    #[test]
    fn test_run_file_is_valid_json() {
        let (mut logger, _dir) = setup_logger();
        logger.start_run(make_run_config()).unwrap();
        logger.add_cycle(empty_cycle(1)).unwrap();
        let run_path = logger.finish_run(RunOutcome::CyclesExhausted).unwrap();

        let content = std::fs::read_to_string(&run_path).expect("run file must exist");
        let value: serde_json::Value =
            serde_json::from_str(&content).expect("run file must be valid JSON");

        let run_id = value["run_id"].as_str().expect("run_id must be a string");
        assert_eq!(run_id.len(), 36);
        assert_eq!(value["cycles"].as_array().map(Vec::len), Some(1));
        assert_eq!(value["outcome"], "CyclesExhausted");
        assert!(!value["ended_at"].is_null());
    }

    #[test]
    fn test_cycles_persisted_while_in_progress() {
        let (mut logger, dir) = setup_logger();
        logger.start_run(make_run_config()).unwrap();
        logger.add_cycle(empty_cycle(1)).unwrap();
        logger.add_cycle(empty_cycle(2)).unwrap();

        let mut second_logger = AuditLogger::new(dir.path());
        assert!(second_logger.load_current().unwrap());
        let run = second_logger.current_run().expect("loaded run must be present");
        assert_eq!(run.cycles.len(), 2);
        assert_eq!(run.outcome, RunOutcome::InProgress);
    }

    #[test]
    fn test_finish_run_removes_current_run_file() {
        let (mut logger, dir) = setup_logger();
        logger.start_run(make_run_config()).unwrap();
        assert!(dir.path().join("current-run.json").exists());

        logger.finish_run(RunOutcome::Complete).unwrap();
        assert!(!dir.path().join("current-run.json").exists());
        assert_eq!(logger.list_runs().unwrap().len(), 1);
    }

    #[test]
    fn test_load_run_round_trips_outcome() {
        let (mut logger, _dir) = setup_logger();
        logger.start_run(make_run_config()).unwrap();
        let path = logger.finish_run(RunOutcome::Interrupted).unwrap();

        let run = logger.load_run(&path).unwrap();
        assert_eq!(run.outcome, RunOutcome::Interrupted);
        assert_eq!(run.config.allow_list, Some(vec!["pid_1".to_string()]));
    }

    #[test]
    fn test_close_stale_run_finishes_leftover_record() {
        let (mut logger, dir) = setup_logger();
        logger.start_run(make_run_config()).unwrap();
        logger.add_cycle(empty_cycle(1)).unwrap();
        drop(logger);

        let mut next = AuditLogger::new(dir.path());
        let path = next
            .close_stale_run()
            .unwrap()
            .expect("leftover record must be closed");

        assert!(!dir.path().join("current-run.json").exists());
        let run = next.load_run(&path).unwrap();
        assert_eq!(run.outcome, RunOutcome::Abandoned);
        assert_eq!(run.cycles.len(), 1);
        assert!(next.current_run().is_none());
    }

    #[test]
    fn test_close_stale_run_without_leftover_is_noop() {
        let (mut logger, dir) = setup_logger();
        assert!(logger.close_stale_run().unwrap().is_none());
        assert!(!dir.path().join("runs").exists());
    }

    #[test]
    fn test_last_run_picks_most_recently_finished() {
        let (mut logger, _dir) = setup_logger();
        assert!(logger.last_run().unwrap().is_none());

        logger.start_run(make_run_config()).unwrap();
        logger.finish_run(RunOutcome::CyclesExhausted).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        logger.start_run(make_run_config()).unwrap();
        logger.finish_run(RunOutcome::Complete).unwrap();

        let last = logger.last_run().unwrap().expect("two runs recorded");
        assert_eq!(last.outcome, RunOutcome::Complete);
    }
}
