use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::Config;
use crate::dispatch::{DispatchReport, InvocationRecord};
use crate::planner::{DispatchPlan, PlanSummary};
use crate::reconcile::ReconcileReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub config: RunConfig,
    pub cycles: Vec<CycleAudit>,
    pub outcome: RunOutcome,
}

impl AuditRun {
    pub fn new(config: RunConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            ended_at: None,
            config,
            cycles: Vec::new(),
            outcome: RunOutcome::InProgress,
        }
    }

    pub fn finish(&mut self, outcome: RunOutcome) {
        self.ended_at = Some(Utc::now());
        self.outcome = outcome;
    }
}

/// Settings a run was started with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub project_dir: PathBuf,
    pub output_root: PathBuf,
    pub target_count: u32,
    pub mode: String,
    pub delay_secs: u64,
    pub max_cycles: u32,
    pub worker_cmd: String,
    pub worker_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_list: Option<Vec<String>>,
    pub dry_run: bool,
}

impl RunConfig {
    pub fn from_config(config: &Config, allow_list: Option<Vec<String>>, dry_run: bool) -> Self {
        Self {
            project_dir: config.project_dir.clone(),
            output_root: config.output_root.clone(),
            target_count: config.target_count,
            mode: config.mode.to_string(),
            delay_secs: config.delay.as_secs(),
            max_cycles: config.max_cycles,
            worker_cmd: config.worker_cmd.clone(),
            worker_args: config.worker_args.clone(),
            allow_list,
            dry_run,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleAudit {
    pub cycle: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub reconcile: ReconcileSummary,
    pub plan: PlanSummary,
    pub planned: Vec<String>,
    pub invocations: Vec<InvocationAudit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl CycleAudit {
    pub fn new(cycle: u32, reconcile: &ReconcileReport, plan: &DispatchPlan) -> Self {
        Self {
            cycle,
            started_at: Utc::now(),
            ended_at: None,
            reconcile: ReconcileSummary::from(reconcile),
            plan: plan.summary.clone(),
            planned: plan.persona_ids(),
            invocations: Vec::new(),
            log_file: None,
        }
    }

    pub fn finish(&mut self, dispatch: Option<&DispatchReport>) {
        self.ended_at = Some(Utc::now());
        if let Some(report) = dispatch {
            self.invocations = report.invocations.iter().map(InvocationAudit::from).collect();
            self.log_file = report.log_file.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub runs_removed: usize,
    pub persona_dirs_removed: usize,
    pub runs_renumbered: usize,
    pub failures: usize,
}

impl From<&ReconcileReport> for ReconcileSummary {
    fn from(report: &ReconcileReport) -> Self {
        Self {
            runs_removed: report.quarantine.removed_count(),
            persona_dirs_removed: report.quarantine.removed_persona_dirs.len(),
            runs_renumbered: report.renumber.renamed.len(),
            failures: report.failure_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationAudit {
    pub persona_ids: Vec<String>,
    pub increment: u32,
    pub outcome: String,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

impl From<&InvocationRecord> for InvocationAudit {
    fn from(record: &InvocationRecord) -> Self {
        Self {
            persona_ids: record.request.persona_ids.clone(),
            increment: record.request.increment,
            outcome: record.outcome.to_string(),
            exit_code: record.outcome.exit_code(),
            started_at: record.started_at,
            duration_secs: record.duration_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum RunOutcome {
    InProgress,
    /// Every persona reached the target.
    Complete,
    /// Cycles ran out with work remaining.
    CyclesExhausted,
    Interrupted,
    DryRun,
    /// The process died without finishing the record.
    Abandoned,
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::InProgress => write!(f, "in progress"),
            RunOutcome::Complete => write!(f, "complete"),
            RunOutcome::CyclesExhausted => write!(f, "cycles exhausted"),
            RunOutcome::Interrupted => write!(f, "interrupted"),
            RunOutcome::DryRun => write!(f, "dry run"),
            RunOutcome::Abandoned => write!(f, "abandoned"),
        }
    }
}

pub mod logger;
pub use logger::AuditLogger;
