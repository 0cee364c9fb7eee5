//! Remote command channel - the only primitive for affecting remote state.
//!
//! Every call runs exactly one remote process with no shell state carried
//! between calls. Channel-level faults (spawn failure, connection refused,
//! target not running, timeout) surface as `SyncError::TransportFailure`;
//! a remote process that ran and exited nonzero is a normal `CommandResult`.
//!
//! # Launchers
//!
//! ```text
//! kubectl exec -i -n <ns> <pod> [-c <container>] -- <argv...>
//! ssh [-l user] [-p port] [-i key] <host> <quoted argv>
//! <argv...>                                  (local)
//! ```

pub mod kubectl;
pub mod process;
pub mod ssh;

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use kubectl::KubectlTarget;
pub use process::{Launcher, ProcessChannel};
pub use ssh::SshTarget;

/// One invocation on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub argv: Vec<String>,
    /// Bytes fed to the remote process on standard input
    pub stdin: Option<Bytes>,
    /// Overrides the channel's per-command timeout
    pub timeout: Option<Duration>,
}

/// Chunks streamed to a remote process's standard input. The sender
/// closing ends the input.
pub type StdinStream = mpsc::Receiver<Bytes>;

impl RemoteCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout: None,
        }
    }

    /// `sh -c <script> sh <args...>`; arguments arrive as `$1..$n` so they
    /// never pass through the remote shell's parser.
    pub fn shell<I, S>(script: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
        ];
        argv.extend(args.into_iter().map(Into::into));
        Self {
            argv,
            stdin: None,
            timeout: None,
        }
    }

    pub fn with_stdin(mut self, input: impl Into<Bytes>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Human-readable rendering for logs, truncated so inline payloads
    /// don't flood the output.
    pub fn display(&self) -> String {
        const MAX_ARG: usize = 80;
        let shown: Vec<String> = self
            .argv
            .iter()
            .map(|a| {
                if a.len() > MAX_ARG {
                    let cut = (0..=MAX_ARG).rev().find(|i| a.is_char_boundary(*i)).unwrap_or(0);
                    format!("{}...({} bytes)", &a[..cut], a.len())
                } else {
                    a.clone()
                }
            })
            .collect();
        shell_words::join(shown)
    }
}

/// Captured outcome of a remote process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    /// Remote exit status when the transport reports one
    pub status: Option<i32>,
    pub succeeded: bool,
}

impl CommandResult {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status: Some(0),
            succeeded: true,
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status: Some(status),
            succeeded: false,
        }
    }

    /// Turn a nonzero remote exit into `SyncError::RemoteCommand`.
    pub fn check(self, command: &RemoteCommand) -> Result<Self> {
        if self.succeeded {
            if !self.stderr.trim().is_empty() {
                tracing::debug!(
                    command = %command.display(),
                    stderr = %self.stderr.trim(),
                    "Remote command wrote to stderr"
                );
            }
            Ok(self)
        } else {
            Err(SyncError::RemoteCommand {
                command: command.display(),
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Run one command remotely and capture its output.
    async fn execute(&self, command: RemoteCommand) -> Result<CommandResult>;

    /// Run one command with `input` streamed to its standard input.
    ///
    /// The default collects the stream and calls `execute`; channels backed
    /// by a real pipe should forward chunks as they arrive.
    async fn execute_streaming(
        &self,
        command: RemoteCommand,
        mut input: StdinStream,
    ) -> Result<CommandResult> {
        let mut collected = BytesMut::new();
        while let Some(chunk) = input.recv().await {
            collected.extend_from_slice(&chunk);
        }
        self.execute(command.with_stdin(collected.freeze())).await
    }

    /// Short description of the remote target for logs.
    fn describe(&self) -> String;
}

pub type SharedChannel = Arc<dyn CommandChannel>;

/// Build the channel for a configured target.
pub fn connect(launcher: Launcher, timeout: Duration) -> SharedChannel {
    Arc::new(ProcessChannel::new(launcher, timeout))
}
