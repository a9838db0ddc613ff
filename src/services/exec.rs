//! Bounded command execution inside a game-server container.
//!
//! Output is collected until the remote process finishes, the stream breaks
//! or the deadline passes. Whatever was read before a failure is handed back
//! with the error.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::{console, game};
use crate::domain::ResourceNames;
use crate::k8s::{ClusterApi, ClusterError, ExecSession};
use k8s_openapi::api::core::v1::Pod;

const READ_CHUNK: usize = 4096;

/// Captured output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    fn from_buffers(stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecErrorKind {
    #[error("no running pod for {0}")]
    NoRunningPod(String),

    #[error("could not open exec stream: {0}")]
    Open(#[from] ClusterError),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("exec stream failed: {0}")]
    Stream(String),

    #[error("command failed: {0}")]
    NonZeroExit(String),
}

/// A failed execution together with the output captured before it failed.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct ExecError {
    pub kind: ExecErrorKind,
    pub output: ExecOutput,
}

impl ExecError {
    fn without_output(kind: impl Into<ExecErrorKind>) -> Self {
        Self {
            kind: kind.into(),
            output: ExecOutput::default(),
        }
    }

    const fn outcome(&self) -> &'static str {
        match self.kind {
            ExecErrorKind::NoRunningPod(_) | ExecErrorKind::Open(_) => "unavailable",
            ExecErrorKind::Timeout(_) => "timeout",
            ExecErrorKind::Stream(_) => "stream_error",
            ExecErrorKind::NonZeroExit(_) => "failed",
        }
    }
}

/// Runs shell commands in the game container through [`ClusterApi::open_exec`].
pub struct RemoteExecutor {
    cluster: Arc<dyn ClusterApi>,
    timeout: Duration,
}

impl RemoteExecutor {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterApi>, timeout: Duration) -> Self {
        Self { cluster, timeout }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `command` through the container shell on a specific pod. Only
    /// fixed, internal commands go through here.
    pub async fn exec(&self, pod: &str, command: &str) -> Result<ExecOutput, ExecError> {
        self.exec_argv(pod, shell_argv(command)).await
    }

    async fn exec_argv(&self, pod: &str, argv: Vec<String>) -> Result<ExecOutput, ExecError> {
        let result = self.run(pod, argv).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };
        metrics::counter!("remote_exec_total", "outcome" => outcome).increment(1);

        match &result {
            Ok(_) => debug!(pod, "Remote command finished"),
            Err(e) => warn!(pod, error = %e, "Remote command failed"),
        }

        result
    }

    /// Runs `command` through the shell on the workload's current pod.
    pub async fn exec_in_workload(
        &self,
        names: &ResourceNames,
        command: &str,
    ) -> Result<ExecOutput, ExecError> {
        let pod = self.require_pod(names).await?;
        self.exec(&pod, command).await
    }

    /// Sends an in-game console command, e.g. `say hello` or `whitelist add steve`.
    ///
    /// The command is handed to the dispatch helper as a single argument, so
    /// shell metacharacters reach the game console verbatim.
    pub async fn console(
        &self,
        names: &ResourceNames,
        command: &str,
    ) -> Result<ExecOutput, ExecError> {
        let pod = self.require_pod(names).await?;
        info!(workload = %names.workload, pod = %pod, "Dispatching console command");
        self.exec_argv(&pod, console_argv(command)).await
    }

    /// Flushes the world to disk on a specific pod.
    pub async fn save_all(&self, pod: &str) -> Result<ExecOutput, ExecError> {
        self.exec(pod, console::SAVE_ALL).await
    }

    /// Name of the workload's pod, if one is in the `Running` phase.
    pub async fn running_pod(&self, names: &ResourceNames) -> Result<Option<String>, ExecError> {
        let pod = self
            .cluster
            .find_pod(&names.selector())
            .await
            .map_err(ExecError::without_output)?;

        Ok(pod.filter(is_running).and_then(|p| p.metadata.name))
    }

    async fn require_pod(&self, names: &ResourceNames) -> Result<String, ExecError> {
        self.running_pod(names).await?.ok_or_else(|| {
            ExecError::without_output(ExecErrorKind::NoRunningPod(names.workload.clone()))
        })
    }

    async fn run(&self, pod: &str, argv: Vec<String>) -> Result<ExecOutput, ExecError> {
        let deadline = Instant::now() + self.timeout;

        let session = tokio::time::timeout_at(
            deadline,
            self.cluster.open_exec(pod, game::CONTAINER_NAME, argv),
        )
        .await
        .map_err(|_| ExecError::without_output(ExecErrorKind::Timeout(self.timeout)))?
        .map_err(ExecError::without_output)?;

        collect(session, deadline, self.timeout).await
    }
}

/// Whether the pod has reached the `Running` phase.
#[must_use]
pub fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == "Running")
}

fn shell_argv(command: &str) -> Vec<String> {
    console::SHELL
        .iter()
        .map(|s| (*s).to_string())
        .chain(std::iter::once(command.to_string()))
        .collect()
}

/// Argument vector for the in-container dispatch helper. The whole command
/// stays one argument and no shell is involved.
#[must_use]
pub fn console_argv(command: &str) -> Vec<String> {
    vec![
        console::DISPATCH_PREFIX.to_string(),
        command.trim().to_string(),
    ]
}

/// Drains both streams and waits for the exit status. The session is dropped
/// on every return path, which aborts the connection.
async fn collect(
    mut session: ExecSession,
    deadline: Instant,
    timeout: Duration,
) -> Result<ExecOutput, ExecError> {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut out_chunk = [0u8; READ_CHUNK];
    let mut err_chunk = [0u8; READ_CHUNK];
    let mut stdout_done = false;
    let mut stderr_done = false;
    let mut status: Option<Result<(), String>> = None;

    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    let failure = loop {
        if stdout_done && stderr_done {
            if let Some(status) = status.take() {
                break status.err().map(ExecErrorKind::NonZeroExit);
            }
        }

        tokio::select! {
            () = &mut sleep => break Some(ExecErrorKind::Timeout(timeout)),

            read = session.stdout.read(&mut out_chunk), if !stdout_done => match read {
                Ok(0) => stdout_done = true,
                Ok(n) => stdout.extend_from_slice(&out_chunk[..n]),
                Err(e) => break Some(ExecErrorKind::Stream(e.to_string())),
            },

            read = session.stderr.read(&mut err_chunk), if !stderr_done => match read {
                Ok(0) => stderr_done = true,
                Ok(n) => stderr.extend_from_slice(&err_chunk[..n]),
                Err(e) => break Some(ExecErrorKind::Stream(e.to_string())),
            },

            exit = &mut session.status, if status.is_none() => status = Some(exit),
        }
    };

    drop(session);

    let output = ExecOutput::from_buffers(&stdout, &stderr);
    match failure {
        None => Ok(output),
        Some(kind) => Err(ExecError { kind, output }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_commands_bypass_the_shell() {
        assert_eq!(console_argv("say hi"), vec!["mc-send-to-console", "say hi"]);
        assert_eq!(
            console_argv("  whitelist add steve \n"),
            vec!["mc-send-to-console", "whitelist add steve"]
        );
        assert_eq!(
            console_argv("say $(id); rm -rf /data"),
            vec!["mc-send-to-console", "say $(id); rm -rf /data"]
        );
    }

    #[test]
    fn internal_commands_use_the_shell() {
        assert_eq!(
            shell_argv(console::SAVE_ALL),
            vec!["/bin/bash", "-c", "mc-send-to-console save-all"]
        );
    }

    #[test]
    fn only_running_pods_count() {
        use k8s_openapi::api::core::v1::PodStatus;

        let with_phase = |phase: Option<&str>| Pod {
            status: Some(PodStatus {
                phase: phase.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(is_running(&with_phase(Some("Running"))));
        assert!(!is_running(&with_phase(Some("Pending"))));
        assert!(!is_running(&with_phase(None)));
        assert!(!is_running(&Pod::default()));
    }

    #[test]
    fn outcome_labels() {
        let timeout = ExecError::without_output(ExecErrorKind::Timeout(Duration::from_secs(1)));
        assert_eq!(timeout.outcome(), "timeout");
        let failed = ExecError::without_output(ExecErrorKind::NonZeroExit("exit 1".into()));
        assert_eq!(failed.outcome(), "failed");
        assert_eq!(failed.to_string(), "command failed: exit 1");
    }
}
