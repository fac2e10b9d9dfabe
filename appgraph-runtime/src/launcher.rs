//! Process launch handoff.
//!
//! The engine's contract with the external runtime: once a resource
//! completes all phases, its fully resolved `LaunchSpec` is handed to a
//! [`ProcessLauncher`]. The launcher reports "started" or "failed to
//! start"; supervision beyond that point is out of scope.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

const LOG_BUFFER_SIZE: usize = 1000;
const LOG_CHANNEL_SIZE: usize = 256;

/// A fully resolved launch request. Every environment value is concrete;
/// unresolved placeholders never reach the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub resource: String,
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

/// One line of process output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLine {
    pub resource: String,
    /// `"stdout"` or `"stderr"`.
    pub stream: String,
    pub message: String,
}

/// Result of a successful handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchHandle {
    pub pid: Option<u32>,
}

/// Seam to the external process/container runtime.
#[async_trait]
pub trait ProcessLauncher: Send + Sync + std::fmt::Debug {
    /// Launch the resource's process. Returns once the process has been
    /// handed to the operating system.
    async fn launch(&self, spec: LaunchSpec) -> Result<LaunchHandle>;
}

/// Launcher backed by `tokio::process`.
///
/// Stdout and stderr are read line-by-line into a broadcast channel with a
/// bounded replay buffer, so late subscribers still see recent output.
/// Children are killed when the launcher is dropped or shut down.
#[derive(Debug, Clone)]
pub struct TokioLauncher {
    log_tx: broadcast::Sender<LogLine>,
    buffer: Arc<Mutex<VecDeque<LogLine>>>,
    children: Arc<Mutex<Vec<Child>>>,
}

impl Default for TokioLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioLauncher {
    #[must_use]
    pub fn new() -> Self {
        let (log_tx, _) = broadcast::channel(LOG_CHANNEL_SIZE);
        Self {
            log_tx,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(LOG_BUFFER_SIZE))),
            children: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribe to log lines from all launched processes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.log_tx.subscribe()
    }

    /// Log lines as a stream, dropping entries a slow consumer missed.
    #[must_use]
    pub fn log_stream(&self) -> BoxStream<'static, LogLine> {
        let rx = self.log_tx.subscribe();
        Box::pin(BroadcastStream::new(rx).filter_map(|line| async move { line.ok() }))
    }

    /// Recently captured log lines, oldest first.
    pub async fn recent_logs(&self) -> Vec<LogLine> {
        self.buffer.lock().await.iter().cloned().collect()
    }

    /// Kill every child this launcher spawned.
    pub async fn shutdown(&self) {
        let mut children = self.children.lock().await;
        for child in children.iter_mut() {
            let _ = child.kill().await;
        }
        children.clear();
    }

    async fn push_log(&self, line: LogLine) {
        let mut buffer = self.buffer.lock().await;
        if buffer.len() >= LOG_BUFFER_SIZE {
            buffer.pop_front();
        }
        buffer.push_back(line.clone());
        drop(buffer);

        // Ignore the error when nobody is subscribed.
        let _ = self.log_tx.send(line);
    }

    fn spawn_reader(
        &self,
        resource: String,
        stream: &'static str,
        source: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    ) {
        let launcher = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(source).lines();
            while let Ok(Some(message)) = lines.next_line().await {
                launcher
                    .push_log(LogLine {
                        resource: resource.clone(),
                        stream: stream.to_string(),
                        message,
                    })
                    .await;
            }
        });
    }
}

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, spec: LaunchSpec) -> Result<LaunchHandle> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn '{}' for resource '{}'",
                spec.command, spec.resource
            )
        })?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(spec.resource.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(spec.resource.clone(), "stderr", stderr);
        }
        self.children.lock().await.push(child);

        info!("launched resource {} (pid {:?})", spec.resource, pid);
        Ok(LaunchHandle { pid })
    }
}
