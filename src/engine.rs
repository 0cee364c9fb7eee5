//! Applies sync operations to the remote side.
//!
//! Operations for different paths run concurrently up to `max_parallel`.
//! Operations for the same path never overlap: while one is in flight the
//! newest follow-up is parked and dispatched when it completes.

use crate::encode::ContentEncoder;
use crate::error::{Result, SyncError};
use crate::event::{OperationKind, OperationReceiver, SyncOperation};
use crate::path::PathTranslator;
use crate::provision::Provisioner;
use crate::transport::{RemoteCommand, SharedChannel};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{Id, JoinSet};

const DELETE_SCRIPT: &str = r#"rm -rf -- "$1""#;

pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Everything an operation needs, shared by all in-flight tasks.
pub struct SyncContext {
    pub translator: PathTranslator,
    pub channel: SharedChannel,
    pub provisioner: Provisioner,
    pub encoder: ContentEncoder,
}

impl SyncContext {
    pub fn new(translator: PathTranslator, channel: SharedChannel, encoder: ContentEncoder) -> Self {
        Self {
            provisioner: Provisioner::new(channel.clone()),
            translator,
            channel,
            encoder,
        }
    }
}

/// Counters for a sync session
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Files written remotely
    pub upserts: u64,

    /// Paths removed remotely
    pub deletes: u64,

    /// Operations that failed and left the path out of sync
    pub failed: u64,

    /// Operations skipped because the local file vanished
    pub skipped: u64,

    /// Operations replaced by a newer one before they ran
    pub superseded: u64,

    /// Content bytes written
    pub bytes: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed(&self) -> u64 {
        self.upserts + self.deletes
    }
}

/// Run one operation to completion. Returns the content bytes written.
pub async fn apply(ctx: &SyncContext, op: &SyncOperation) -> Result<u64> {
    match op.kind {
        OperationKind::Upsert => upsert(ctx, &op.local_path).await,
        OperationKind::Delete => delete(ctx, &op.local_path).await.map(|()| 0),
    }
}

async fn upsert(ctx: &SyncContext, local: &Path) -> Result<u64> {
    let remote = ctx.translator.to_remote(local)?;

    if let Some(parent) = remote.parent() {
        ctx.provisioner.ensure_directory(&parent).await?;
    }

    let content = match tokio::fs::read(local).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(SyncError::LocalReadRace {
                path: local.to_path_buf(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    let command = ctx.encoder.write_command(local, &remote, &content)?;
    ctx.channel.execute(command.clone()).await?.check(&command)?;

    Ok(content.len() as u64)
}

async fn delete(ctx: &SyncContext, local: &Path) -> Result<()> {
    let remote = ctx.translator.to_remote(local)?;
    let command = RemoteCommand::shell(DELETE_SCRIPT, [remote.as_str()]);
    ctx.channel.execute(command.clone()).await?.check(&command)?;
    Ok(())
}

/// Single sink for operation outcomes: logs and counts.
pub fn report(
    stats: &mut EngineStats,
    op: &SyncOperation,
    result: &Result<u64>,
    elapsed: Duration,
) {
    let path = op.local_path.display();
    let elapsed_ms = elapsed.as_millis() as u64;

    match result {
        Ok(bytes) => {
            match op.kind {
                OperationKind::Upsert => {
                    stats.upserts += 1;
                    stats.bytes += bytes;
                    tracing::info!(path = %path, bytes, elapsed_ms, "Synced");
                }
                OperationKind::Delete => {
                    stats.deletes += 1;
                    tracing::info!(path = %path, elapsed_ms, "Deleted");
                }
            }
        }
        Err(e) if e.is_benign() => {
            stats.skipped += 1;
            tracing::debug!(path = %path, error = %e, "Skipped");
        }
        Err(e) => {
            stats.failed += 1;
            tracing::warn!(
                path = %path,
                op = ?op.kind,
                kind = e.kind(),
                error = %e,
                elapsed_ms,
                "Sync operation failed"
            );
        }
    }
}

type Completion = (SyncOperation, Result<u64>, Duration);

pub struct SyncEngine {
    ctx: Arc<SyncContext>,
    max_parallel: usize,
    stats: EngineStats,
    in_flight: HashSet<PathBuf>,
    parked: HashMap<PathBuf, SyncOperation>,
    tasks: JoinSet<Completion>,
    /// Path each running task works on, so an aborted task still frees it
    running: HashMap<Id, PathBuf>,
}

impl SyncEngine {
    pub fn new(ctx: Arc<SyncContext>, max_parallel: usize) -> Self {
        Self {
            ctx,
            max_parallel: max_parallel.max(1),
            stats: EngineStats::new(),
            in_flight: HashSet::new(),
            parked: HashMap::new(),
            tasks: JoinSet::new(),
            running: HashMap::new(),
        }
    }

    /// Consume operations until the receiver closes, then drain. Returns an
    /// error only for failures that make further syncing meaningless.
    pub async fn run(mut self, mut ops: OperationReceiver) -> Result<EngineStats> {
        let mut open = true;
        let mut fatal: Option<SyncError> = None;

        loop {
            if !open && self.tasks.is_empty() {
                break;
            }

            tokio::select! {
                op = ops.recv(), if open && self.tasks.len() < self.max_parallel => match op {
                    Some(op) => self.submit(op),
                    None => open = false,
                },
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    let (op, result, elapsed) = match joined {
                        Ok((id, completion)) => {
                            self.running.remove(&id);
                            completion
                        }
                        Err(e) => {
                            self.stats.failed += 1;
                            match self.running.remove(&e.id()) {
                                Some(path) => {
                                    tracing::error!(path = %path.display(), error = %e, "Sync task aborted");
                                    self.release(&path);
                                }
                                None => tracing::error!(error = %e, "Sync task aborted"),
                            }
                            continue;
                        }
                    };
                    if let Err(SyncError::PathOutsideRoot { path, root }) = &result {
                        tracing::error!(path = %path.display(), "Path escaped the watch root, stopping");
                        open = false;
                        self.parked.clear();
                        fatal.get_or_insert_with(|| SyncError::PathOutsideRoot {
                            path: path.clone(),
                            root: root.clone(),
                        });
                    }

                    report(&mut self.stats, &op, &result, elapsed);
                    self.release(&op.local_path);
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => Ok(self.stats),
        }
    }

    fn submit(&mut self, op: SyncOperation) {
        if self.in_flight.contains(&op.local_path) {
            if let Some(old) = self.parked.insert(op.local_path.clone(), op) {
                self.stats.superseded += 1;
                tracing::trace!(path = %old.local_path.display(), "Replaced parked operation");
            }
            return;
        }
        self.dispatch(op);
    }

    /// The path is idle again; run whatever was parked behind it.
    fn release(&mut self, path: &Path) {
        self.in_flight.remove(path);
        if let Some(next) = self.parked.remove(path) {
            self.dispatch(next);
        }
    }

    fn dispatch(&mut self, op: SyncOperation) {
        let path = op.local_path.clone();
        self.in_flight.insert(path.clone());
        let ctx = self.ctx.clone();
        let handle = self.tasks.spawn(async move {
            let started = Instant::now();
            let result = apply(&ctx, &op).await;
            (op, result, started.elapsed())
        });
        self.running.insert(handle.id(), path);
    }
}
