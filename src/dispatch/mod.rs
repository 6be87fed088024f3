//! Dispatcher: hands planned personas to the worker in batch or sequential mode.
//!
//! Batch mode issues one invocation covering the whole plan. Sequential mode
//! issues one invocation per persona and sleeps between them. Either way the
//! worker's output goes to the durable dispatch log and, when a UI is attached,
//! to the console. Exit status is the only success signal; artifact validity
//! is judged by the next reconciliation.

pub mod log;
pub mod manifest;
pub mod worker;

pub use log::DispatchLog;
pub use manifest::FailureManifest;
pub use worker::{
    CommandWorker, InvocationOutcome, OutputSink, Worker, WorkerRequest, wait_for_shutdown,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::errors::DispatchError;
use crate::planner::DispatchPlan;
use crate::twin_config::DispatchMode;
use crate::ui::DispatchUI;

#[derive(Debug, Clone, Serialize)]
pub struct InvocationRecord {
    /// 1-based position within the pass.
    pub index: usize,
    pub request: WorkerRequest,
    pub outcome: InvocationOutcome,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub invocations: Vec<InvocationRecord>,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Planned personas never handed to the worker because of an interrupt.
    pub not_dispatched: Vec<String>,
    pub interrupted: bool,
    pub log_file: Option<PathBuf>,
}

impl DispatchReport {
    fn record(&mut self, record: InvocationRecord) {
        let ids = &record.request.persona_ids;
        if record.outcome.is_success() {
            self.succeeded.extend(ids.iter().cloned());
        } else if record.outcome.is_failure() {
            self.failed.extend(ids.iter().cloned());
        } else {
            self.interrupted = true;
        }
        self.invocations.push(record);
    }
}

/// Console plus durable log, fed by the worker.
struct TeeSink<'a> {
    log: &'a mut DispatchLog,
    ui: Option<&'a DispatchUI>,
}

impl OutputSink for TeeSink<'_> {
    fn line(&mut self, line: &str) {
        self.log.write(line);
        if let Some(ui) = self.ui {
            ui.worker_line(line);
        }
    }
}

pub struct Dispatcher<W: Worker> {
    worker: W,
    mode: DispatchMode,
    delay: Duration,
    log_dir: PathBuf,
    ui: Option<Arc<DispatchUI>>,
}

impl<W: Worker> Dispatcher<W> {
    pub fn new(worker: W, mode: DispatchMode, delay: Duration, log_dir: PathBuf) -> Self {
        Self {
            worker,
            mode,
            delay,
            log_dir,
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<DispatchUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Break `plan` into worker requests according to the dispatch mode.
    pub fn requests(&self, plan: &DispatchPlan) -> Vec<WorkerRequest> {
        if plan.is_empty() {
            return Vec::new();
        }
        match self.mode {
            DispatchMode::Batch => vec![WorkerRequest::new(
                plan.persona_ids(),
                plan.max_increment(),
            )],
            DispatchMode::Sequential => plan
                .items
                .iter()
                .map(|item| WorkerRequest::new(vec![item.persona_id.clone()], item.increment))
                .collect(),
        }
    }

    /// Run every invocation the plan calls for.
    ///
    /// Stops early, without recording failures, once `shutdown` turns true.
    pub async fn dispatch(
        &self,
        plan: &DispatchPlan,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<DispatchReport, DispatchError> {
        let requests = self.requests(plan);
        let mut report = DispatchReport::default();
        if requests.is_empty() {
            return Ok(report);
        }

        let mut log = DispatchLog::create(&self.log_dir)?;
        report.log_file = Some(log.path().to_path_buf());
        tracing::info!(
            mode = %self.mode,
            invocations = requests.len(),
            log = %log.path().display(),
            "dispatch started"
        );

        let total = requests.len();
        if let Some(ui) = &self.ui {
            ui.start_pass(plan.items.len());
        }
        for (i, request) in requests.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                if let Some(ui) = &self.ui {
                    ui.waiting(self.delay);
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    _ = wait_for_shutdown(&mut shutdown) => {
                        report.interrupted = true;
                    }
                }
            }
            if report.interrupted || *shutdown.borrow() {
                report.interrupted = true;
                report.not_dispatched = requests[i..]
                    .iter()
                    .flat_map(|r| r.persona_ids.iter().cloned())
                    .collect();
                break;
            }

            let index = i + 1;
            log.header(index, total, request);
            if let Some(ui) = &self.ui {
                ui.start_invocation(index, total, request);
            }

            let started_at = Utc::now();
            let start = Instant::now();
            let outcome = {
                let mut sink = TeeSink {
                    log: &mut log,
                    ui: self.ui.as_deref(),
                };
                self.worker.invoke(request, &mut sink, &mut shutdown).await
            };
            let duration = start.elapsed();

            log.trailer(&outcome);
            if let Some(ui) = &self.ui {
                ui.invocation_finished(request, &outcome);
            }
            if outcome.is_failure() {
                tracing::warn!(personas = %request.joined_ids(), outcome = %outcome, "invocation failed");
            } else {
                tracing::info!(personas = %request.joined_ids(), outcome = %outcome, "invocation finished");
            }

            report.record(InvocationRecord {
                index,
                request: request.clone(),
                outcome,
                started_at,
                duration_secs: duration.as_secs_f64(),
            });
            if report.interrupted {
                report.not_dispatched = requests[index..]
                    .iter()
                    .flat_map(|r| r.persona_ids.iter().cloned())
                    .collect();
                break;
            }
        }

        if let Some(ui) = &self.ui {
            ui.pass_finished(report.succeeded.len(), report.failed.len(), report.interrupted);
        }
        Ok(report)
    }
}
