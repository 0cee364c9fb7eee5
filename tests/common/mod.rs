//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use podsync::encode::{decode, inline_payload};
use podsync::transport::{
    CommandChannel, CommandResult, Launcher, ProcessChannel, RemoteCommand,
};
use podsync::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every command after it runs. With an inner channel the command
/// really executes; without one, directory checks answer "exists" and
/// everything else succeeds.
pub struct RecordingChannel {
    inner: Option<ProcessChannel>,
    commands: Mutex<Vec<RemoteCommand>>,
}

impl RecordingChannel {
    /// Executes on this machine, so a temp directory stands in for the
    /// remote filesystem.
    pub fn local() -> Arc<Self> {
        Arc::new(Self {
            inner: Some(ProcessChannel::new(Launcher::Local, Duration::from_secs(30))),
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn recording_only() -> Arc<Self> {
        Arc::new(Self {
            inner: None,
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn commands(&self) -> Vec<RemoteCommand> {
        self.commands.lock().unwrap().clone()
    }

    /// Inline writes to `target`, decoded.
    pub fn writes_to(&self, target: &str) -> Vec<Vec<u8>> {
        self.commands()
            .iter()
            .filter_map(|cmd| {
                let (encoding, payload, to) = inline_payload(cmd)?;
                (to == target).then(|| decode(encoding, payload)).flatten()
            })
            .collect()
    }

    /// Delete commands targeting `target`.
    pub fn deletes_of(&self, target: &str) -> usize {
        self.commands()
            .iter()
            .filter(|cmd| is_script(cmd, "rm -rf") && cmd.argv.last().map(String::as_str) == Some(target))
            .count()
    }

    /// Whether the bootstrap archive has been extracted.
    pub fn bulk_done(&self) -> bool {
        self.commands()
            .iter()
            .any(|cmd| is_script(cmd, "tar -xzf") && is_script(cmd, "mkdir -p"))
    }
}

fn is_script(cmd: &RemoteCommand, needle: &str) -> bool {
    cmd.argv.get(2).map_or(false, |script| script.contains(needle))
}

#[async_trait]
impl CommandChannel for RecordingChannel {
    async fn execute(&self, command: RemoteCommand) -> Result<CommandResult> {
        let result = match &self.inner {
            Some(inner) => inner.execute(command.clone()).await,
            None if is_script(&command, "if [ -d") => Ok(CommandResult::success("0")),
            None => Ok(CommandResult::success("")),
        };
        self.commands.lock().unwrap().push(command);
        result
    }

    fn describe(&self) -> String {
        "recording".to_string()
    }
}

/// Poll `check` until it holds or ten seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}
