//! Event and operation types flowing through the pipeline.
//!
//! Watcher -> Debouncer -> Engine, connected by channels. Raw events are
//! unbounded because they originate on notify's own thread; operations are
//! bounded for backpressure.

use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;

/// Channel size for Debouncer -> Engine
pub const OPERATION_CHANNEL_SIZE: usize = 1024;

// =============================================================================
// ChangeEvent: Watcher -> Debouncer
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    /// The path was renamed away; its old name no longer exists
    Renamed,
}

impl ChangeKind {
    pub fn is_removal(self) -> bool {
        matches!(self, ChangeKind::Removed | ChangeKind::Renamed)
    }
}

/// One filesystem notification for one path.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
    pub observed_at: Instant,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            observed_at: Instant::now(),
        }
    }
}

// =============================================================================
// SyncOperation: Debouncer -> Engine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Upsert,
    Delete,
}

/// Coalesced unit of work for one local path. The engine derives the
/// remote path when it dispatches the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOperation {
    pub kind: OperationKind,
    pub local_path: PathBuf,
}

impl SyncOperation {
    pub fn upsert(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: OperationKind::Upsert,
            local_path: path.into(),
        }
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: OperationKind::Delete,
            local_path: path.into(),
        }
    }
}

// =============================================================================
// Channel types
// =============================================================================

pub type EventSender = mpsc::UnboundedSender<ChangeEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ChangeEvent>;
pub type OperationSender = mpsc::Sender<SyncOperation>;
pub type OperationReceiver = mpsc::Receiver<SyncOperation>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

pub fn operation_channel() -> (OperationSender, OperationReceiver) {
    mpsc::channel(OPERATION_CHANNEL_SIZE)
}
