//! Remote directory provisioning.

use crate::error::{Result, SyncError};
use crate::path::RemotePath;
use crate::transport::{RemoteCommand, SharedChannel};

const CHECK_DIR_SCRIPT: &str = r#"if [ -d "$1" ]; then printf 0; else printf 1; fi"#;

const MKDIR_SCRIPT: &str = r#"mkdir -p -- "$1""#;

/// Checks for and creates remote directories ahead of writes.
#[derive(Clone)]
pub struct Provisioner {
    channel: SharedChannel,
}

impl Provisioner {
    pub fn new(channel: SharedChannel) -> Self {
        Self { channel }
    }

    /// Whether `dir` exists on the remote side as a directory.
    pub async fn directory_exists(&self, dir: &RemotePath) -> Result<bool> {
        let command = RemoteCommand::shell(CHECK_DIR_SCRIPT, [dir.as_str()]);
        let result = self.channel.execute(command.clone()).await?.check(&command)?;
        match result.stdout.trim() {
            "0" => Ok(true),
            "1" => Ok(false),
            other => Err(SyncError::RemoteCommand {
                command: command.display(),
                status: result.status,
                stderr: format!("unexpected directory check output: {:?}", other),
            }),
        }
    }

    /// Make sure `dir` exists remotely. Safe to call repeatedly.
    pub async fn ensure_directory(&self, dir: &RemotePath) -> Result<()> {
        let missing = |reason: String| SyncError::RemoteDirectoryMissing {
            path: dir.to_string(),
            reason,
        };

        let exists = match self.directory_exists(dir).await {
            Ok(exists) => exists,
            Err(e @ SyncError::TransportFailure { .. }) => return Err(e),
            Err(e) => return Err(missing(e.to_string())),
        };
        if exists {
            return Ok(());
        }

        tracing::debug!(remote = %dir, "Creating remote directory");
        let command = RemoteCommand::shell(MKDIR_SCRIPT, [dir.as_str()]);
        match self.channel.execute(command.clone()).await?.check(&command) {
            Ok(_) => Ok(()),
            Err(e) => Err(missing(e.to_string())),
        }
    }
}
