//! Worker invocation: one external simulation process per request.

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::errors::DispatchError;

/// What one invocation is asked to produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerRequest {
    pub persona_ids: Vec<String>,
    /// Runs requested per persona.
    pub increment: u32,
}

impl WorkerRequest {
    pub fn new(persona_ids: Vec<String>, increment: u32) -> Self {
        Self {
            persona_ids,
            increment,
        }
    }

    /// Comma-joined id list, as passed to `--pids`.
    pub fn joined_ids(&self) -> String {
        self.persona_ids.join(",")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// The process ran to completion. `-1` when it was killed by a signal.
    Exited { code: i32 },
    /// Shutdown was requested while the process ran; it was killed.
    Interrupted,
    /// The process could not be started.
    SpawnFailed { message: String },
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Exited { code: 0 })
    }

    pub fn is_failure(&self) -> bool {
        match self {
            InvocationOutcome::Exited { code } => *code != 0,
            InvocationOutcome::SpawnFailed { .. } => true,
            InvocationOutcome::Interrupted => false,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            InvocationOutcome::Exited { code } => Some(*code),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvocationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvocationOutcome::Exited { code } => write!(f, "exit code {}", code),
            InvocationOutcome::Interrupted => write!(f, "interrupted"),
            InvocationOutcome::SpawnFailed { message } => write!(f, "spawn failed: {}", message),
        }
    }
}

/// Receives the worker's combined output, one line at a time.
pub trait OutputSink: Send {
    fn line(&mut self, line: &str);
}

impl OutputSink for Vec<String> {
    fn line(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

#[async_trait]
pub trait Worker: Send + Sync {
    /// Run one invocation to completion, or until `shutdown` turns true.
    async fn invoke(
        &self,
        request: &WorkerRequest,
        sink: &mut dyn OutputSink,
        shutdown: &mut watch::Receiver<bool>,
    ) -> InvocationOutcome;
}

/// Resolves once `shutdown` reads true. Never resolves if the sender is gone.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Runs the configured simulation command as a child process.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    command: String,
    base_args: Vec<String>,
    worker_config: PathBuf,
    output_root: PathBuf,
    max_personas: Option<usize>,
    num_workers: Option<u32>,
    env: Vec<(String, String)>,
    working_dir: PathBuf,
}

impl CommandWorker {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            command: config.worker_cmd.clone(),
            base_args: config.worker_args.clone(),
            worker_config: config.worker_config.clone(),
            output_root: config.output_root.clone(),
            max_personas: config.max_personas,
            num_workers: config.num_workers,
            env: config.worker_environment()?,
            working_dir: config.project_dir.clone(),
        })
    }

    /// A worker that runs `command` with `base_args` and nothing else configured.
    pub fn new(command: impl Into<String>, base_args: Vec<String>, output_root: PathBuf) -> Self {
        Self {
            command: command.into(),
            base_args,
            worker_config: PathBuf::new(),
            output_root: output_root.clone(),
            max_personas: None,
            num_workers: None,
            env: Vec::new(),
            working_dir: output_root,
        }
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Full argument list for `request`, after the configured base args.
    pub fn args_for(&self, request: &WorkerRequest) -> Vec<String> {
        let mut args = self.base_args.clone();
        if !self.worker_config.as_os_str().is_empty() {
            args.push("--config".to_string());
            args.push(self.worker_config.display().to_string());
        }
        args.push("--output_dir".to_string());
        args.push(self.output_root.display().to_string());
        args.push("--pids".to_string());
        args.push(request.joined_ids());
        args.push("--num_simulations_per_persona".to_string());
        args.push(request.increment.to_string());
        if let Some(n) = self.max_personas {
            args.push("--max_personas".to_string());
            args.push(n.to_string());
        }
        if let Some(w) = self.num_workers {
            args.push("--num_workers".to_string());
            args.push(w.to_string());
        }
        args
    }

    /// Human-readable command line for logs.
    pub fn display_command(&self, request: &WorkerRequest) -> String {
        format!("{} {}", self.command, self.args_for(request).join(" "))
    }
}

#[async_trait]
impl Worker for CommandWorker {
    async fn invoke(
        &self,
        request: &WorkerRequest,
        sink: &mut dyn OutputSink,
        shutdown: &mut watch::Receiver<bool>,
    ) -> InvocationOutcome {
        let mut cmd = Command::new(&self.command);
        cmd.args(self.args_for(request))
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group: a terminal Ctrl-C reaches twinrun only, and the
        // worker is stopped through `interrupt`.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                let err = DispatchError::SpawnFailed {
                    command: self.command.clone(),
                    source,
                };
                tracing::warn!(error = %err, "worker spawn failed");
                return InvocationOutcome::SpawnFailed {
                    message: err.to_string(),
                };
            }
        };
        tracing::info!(
            pid = child.id().unwrap_or(0),
            command = %self.display_command(request),
            "worker started"
        );

        // stdout and stderr are merged into one line stream.
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(shutdown) => {
                    return interrupt(&mut child).await;
                }
                line = rx.recv() => match line {
                    Some(line) => sink.line(&line),
                    None => break,
                },
            }
        }

        let status = tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => return interrupt(&mut child).await,
            status = child.wait() => status,
        };
        let code = match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                tracing::warn!(error = %e, "failed to wait for worker");
                -1
            }
        };
        if code != 0 && *shutdown.borrow() {
            // Died of the same interrupt that is stopping the pass.
            return InvocationOutcome::Interrupted;
        }
        InvocationOutcome::Exited { code }
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).is_err() {
            break;
        }
    }
}

async fn interrupt(child: &mut tokio::process::Child) -> InvocationOutcome {
    tracing::warn!(pid = child.id().unwrap_or(0), "interrupt received, killing worker");
    // kill() also reaps the process.
    if let Err(e) = child.kill().await {
        tracing::warn!(error = %e, "failed to kill worker");
    }
    InvocationOutcome::Interrupted
}
