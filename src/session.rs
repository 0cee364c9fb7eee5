//! Startup sequence and the live sync loop.

use crate::bulk::{BulkReport, BulkSync};
use crate::config::Config;
use crate::debounce::Debouncer;
use crate::engine::{EngineStats, SyncContext, SyncEngine};
use crate::error::{Result, SyncError};
use crate::event::{event_channel, operation_channel};
use crate::path::RemotePath;
use crate::provision::Provisioner;
use crate::transport::{self, RemoteCommand, SharedChannel};
use crate::watcher::TreeWatcher;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// What a finished session did.
#[derive(Debug)]
pub struct SessionReport {
    pub bulk: Option<BulkReport>,
    pub stats: EngineStats,
}

/// Run a session against the channel described by `config`.
pub async fn run<F>(config: Config, shutdown: F) -> Result<SessionReport>
where
    F: Future<Output = ()>,
{
    config.validate()?;
    let channel = transport::connect(config.launcher()?, config.exec_timeout());
    run_with_channel(config, channel, shutdown).await
}

/// Run a session over an existing channel. Returns after `shutdown`
/// resolves and every accepted operation has finished.
pub async fn run_with_channel<F>(
    config: Config,
    channel: SharedChannel,
    shutdown: F,
) -> Result<SessionReport>
where
    F: Future<Output = ()>,
{
    let root = local_root(&config.source)?;
    let prefix = config.remote_root();

    probe(&channel).await?;
    prepare_remote_root(&channel, &prefix, config.create_remote_root).await?;

    // Watches go in before the bootstrap so nothing changed during it is lost
    let watcher = TreeWatcher::start(&root, config.rename_policy)?;

    let bulk = if config.initial_sync {
        let bulk = BulkSync::new(channel.clone(), &root, prefix.clone())
            .with_timeout(config.bulk_timeout());
        Some(bulk.run().await?)
    } else {
        tracing::info!("Skipping initial sync");
        None
    };

    let ctx = Arc::new(SyncContext::new(
        config.translator(&root),
        channel,
        config.encoder(),
    ));

    let (event_tx, event_rx) = event_channel();
    let (op_tx, op_rx) = operation_channel();

    let debouncer = tokio::spawn(Debouncer::new(config.debounce()).run(event_rx, op_tx));
    let mut engine = tokio::spawn(SyncEngine::new(ctx, config.max_parallel).run(op_rx));

    tracing::info!(
        source = %root.display(),
        dest = %prefix,
        debounce_ms = config.debounce_ms,
        "Watching for changes"
    );

    let mut watch = Box::pin(watcher.run(event_tx, shutdown));

    // Either shutdown was requested, or the engine stopped on its own. In
    // both cases dropping the watcher closes the event channel and the
    // debouncer flushes whatever is pending.
    let engine_result = tokio::select! {
        _ = &mut watch => {
            tracing::info!("Shutting down, draining pending operations");
            (&mut engine).await
        }
        result = &mut engine => result,
    };
    drop(watch);

    reap(debouncer, "debouncer").await;

    let stats = engine_result
        .map_err(|e| SyncError::Io(io::Error::new(io::ErrorKind::Other, e)))??;

    tracing::info!(
        upserts = stats.upserts,
        deletes = stats.deletes,
        failed = stats.failed,
        bytes = stats.bytes,
        "Session finished"
    );

    Ok(SessionReport { bulk, stats })
}

/// Wait for a helper task. A panic is logged, not propagated; returns
/// whether the task finished cleanly.
async fn reap(task: JoinHandle<()>, name: &str) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(task = name, error = %e, "Background task aborted");
            false
        }
    }
}

fn local_root(source: &Path) -> Result<PathBuf> {
    let root = source.canonicalize().map_err(|e| {
        SyncError::Config(format!(
            "Local directory {} is not accessible: {}",
            source.display(),
            e
        ))
    })?;
    if !root.is_dir() {
        return Err(SyncError::Config(format!(
            "Local path {} is not a directory",
            root.display()
        )));
    }
    Ok(root)
}

/// Run a no-op remotely to confirm the channel works at all.
async fn probe(channel: &SharedChannel) -> Result<()> {
    let command = RemoteCommand::new(["true"]);
    channel.execute(command.clone()).await?.check(&command)?;
    tracing::info!(remote = %channel.describe(), "Remote reachable");
    Ok(())
}

async fn prepare_remote_root(
    channel: &SharedChannel,
    prefix: &RemotePath,
    create: bool,
) -> Result<()> {
    let provisioner = Provisioner::new(channel.clone());
    if create {
        return provisioner.ensure_directory(prefix).await;
    }
    if provisioner.directory_exists(prefix).await? {
        Ok(())
    } else {
        Err(SyncError::RemoteDirectoryMissing {
            path: prefix.to_string(),
            reason: "does not exist (pass --create-remote-root to create it)".to_string(),
        })
    }
}
