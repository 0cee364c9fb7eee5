//! Channel backed by one local child process per remote command.

use super::{
    CommandChannel, CommandResult, KubectlTarget, RemoteCommand, SshTarget, StdinStream,
};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// How a remote argv is turned into a local process.
#[derive(Debug, Clone)]
pub enum Launcher {
    Kubectl(KubectlTarget),
    Ssh(SshTarget),
    /// Run the argv directly on this machine
    Local,
}

impl Launcher {
    fn command(&self, remote: &RemoteCommand) -> Result<Command> {
        match self {
            Launcher::Kubectl(target) => Ok(target.command(remote)),
            Launcher::Ssh(target) => Ok(target.command(remote)),
            Launcher::Local => {
                let (program, args) = remote.argv.split_first().ok_or_else(|| {
                    SyncError::Config("Cannot execute an empty command".to_string())
                })?;
                let mut cmd = Command::new(program);
                cmd.args(args);
                Ok(cmd)
            }
        }
    }

    /// Whether a nonzero exit came from the launcher rather than the remote
    /// process. Returns the reason when it did.
    fn channel_fault(&self, status: Option<i32>, stderr: &str) -> Option<String> {
        match self {
            Launcher::Kubectl(target) => target.channel_fault(status, stderr),
            Launcher::Ssh(target) => target.channel_fault(status, stderr),
            Launcher::Local => match status {
                None => Some("terminated by signal".to_string()),
                Some(_) => None,
            },
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Launcher::Kubectl(target) => target.describe(),
            Launcher::Ssh(target) => target.describe(),
            Launcher::Local => "local".to_string(),
        }
    }
}

pub struct ProcessChannel {
    launcher: Launcher,
    timeout: Duration,
}

impl ProcessChannel {
    pub fn new(launcher: Launcher, timeout: Duration) -> Self {
        Self { launcher, timeout }
    }

    async fn run(
        &self,
        mut command: RemoteCommand,
        stream: Option<StdinStream>,
    ) -> Result<CommandResult> {
        let shown = command.display();
        let started = Instant::now();
        let timeout = command.timeout.unwrap_or(self.timeout);

        let mut cmd = self.launcher.command(&command)?;
        cmd.stdin(if command.stdin.is_some() || stream.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| SyncError::TransportFailure {
            command: shown.clone(),
            reason: format!("failed to spawn {}: {}", self.launcher.describe(), e),
        })?;

        // Feed stdin concurrently so a chatty remote can't deadlock us
        let input = command.stdin.take();
        let feeder = child.stdin.take().map(|mut pipe| {
            tokio::spawn(async move {
                if let Some(input) = input {
                    pipe.write_all(&input).await?;
                }
                // Dropping the receiver on a write error stops the producer
                if let Some(mut stream) = stream {
                    while let Some(chunk) = stream.recv().await {
                        pipe.write_all(&chunk).await?;
                    }
                }
                pipe.shutdown().await
            })
        });

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(SyncError::TransportFailure {
                    command: shown,
                    reason: e.to_string(),
                })
            }
            // Dropping the wait future drops the child, which kills it
            Err(_) => return Err(SyncError::timeout(shown, timeout)),
        };

        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(command = %shown, error = %e, "stdin pipe closed early"),
                Err(e) => tracing::debug!(command = %shown, error = %e, "stdin writer task failed"),
            }
        }

        let status = output.status.code();
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        tracing::trace!(
            command = %shown,
            status = ?status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Remote command finished"
        );

        if output.status.success() {
            return Ok(CommandResult {
                stdout,
                stderr,
                status,
                succeeded: true,
            });
        }

        if let Some(reason) = self.launcher.channel_fault(status, &stderr) {
            return Err(SyncError::TransportFailure {
                command: shown,
                reason,
            });
        }

        Ok(CommandResult {
            stdout,
            stderr,
            status,
            succeeded: false,
        })
    }
}

#[async_trait]
impl CommandChannel for ProcessChannel {
    async fn execute(&self, command: RemoteCommand) -> Result<CommandResult> {
        self.run(command, None).await
    }

    async fn execute_streaming(
        &self,
        command: RemoteCommand,
        input: StdinStream,
    ) -> Result<CommandResult> {
        self.run(command, Some(input)).await
    }

    fn describe(&self) -> String {
        self.launcher.describe()
    }
}
