// src/exec/command.rs

//! Shell command executor.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::dag::{NodeFailure, NodeOutcome, Work, WorkNode};
use crate::exec::backend::{ExecFuture, NodeExecutor};

/// Runs [`Work::Command`] nodes through the platform shell.
///
/// Command stdout is logged at `info`, stderr at `debug`. A non-zero exit
/// status (or a command that cannot be spawned at all) fails the node.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    working_dir: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command from `dir` instead of the current directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
        }
    }

    async fn run(&self, node: &WorkNode, line: &str) -> anyhow::Result<()> {
        info!(node = %node.id(), cmd = %line, "starting command");
        let started = Instant::now();

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(line);
            c
        };

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for '{}'", node.display_name()))?;

        // Drain both pipes so the child never blocks on a full buffer.
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let id = node.id().clone();
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(node = %id, "{}", line);
                }
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            let id = node.id().clone();
            readers.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(node = %id, "stderr: {}", line);
                }
            }));
        }

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for process of '{}'", node.display_name()))?;

        for reader in readers {
            let _ = reader.await;
        }

        let code = status.code().unwrap_or(-1);
        info!(
            node = %node.id(),
            exit_code = code,
            success = status.success(),
            elapsed = ?started.elapsed(),
            "command exited"
        );

        if status.success() {
            Ok(())
        } else {
            Err(anyhow!("command `{line}` exited with code {code}"))
        }
    }
}

impl NodeExecutor for CommandExecutor {
    fn name(&self) -> &str {
        "command"
    }

    fn accepts(&self, node: &WorkNode) -> bool {
        matches!(node.work(), Work::Command(_))
    }

    fn execute<'a>(&'a self, node: &'a WorkNode) -> ExecFuture<'a> {
        Box::pin(async move {
            let Work::Command(line) = node.work() else {
                return Ok(NodeOutcome::Failed(NodeFailure::new(
                    node,
                    anyhow!("node has no command to run"),
                )));
            };

            let outcome = match self.run(node, line).await {
                Ok(()) => NodeOutcome::Completed,
                Err(err) => NodeOutcome::Failed(NodeFailure::new(node, err)),
            };
            Ok(outcome)
        })
    }
}
