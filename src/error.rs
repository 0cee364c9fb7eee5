use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Path {path} is outside the watch root {root}")]
    PathOutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Transport failure running `{command}`: {reason}")]
    TransportFailure { command: String, reason: String },

    #[error("Remote command `{command}` exited with status {status:?}: {stderr}")]
    RemoteCommand {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Remote directory {path} is missing and could not be created: {reason}")]
    RemoteDirectoryMissing { path: String, reason: String },

    #[error("Unsupported content in {path}: {reason}")]
    UnsupportedContent { path: PathBuf, reason: String },

    #[error("File vanished before it could be read: {path}")]
    LocalReadRace { path: PathBuf },

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    pub fn timeout(command: impl Into<String>, after: Duration) -> Self {
        SyncError::TransportFailure {
            command: command.into(),
            reason: format!("timed out after {}s", after.as_secs_f64()),
        }
    }

    /// Errors that are expected while files churn and are not worth a warning.
    pub fn is_benign(&self) -> bool {
        matches!(self, SyncError::LocalReadRace { .. })
    }

    /// Short label used as a structured logging field.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::PathOutsideRoot { .. } => "path_outside_root",
            SyncError::TransportFailure { .. } => "transport_failure",
            SyncError::RemoteCommand { .. } => "remote_command",
            SyncError::RemoteDirectoryMissing { .. } => "remote_directory_missing",
            SyncError::UnsupportedContent { .. } => "unsupported_content",
            SyncError::LocalReadRace { .. } => "local_read_race",
            SyncError::Watch(_) => "watch",
            SyncError::Config(_) => "config",
            SyncError::Io(_) => "io",
        }
    }
}
