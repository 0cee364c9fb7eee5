//! Directory tree watcher.
//!
//! Every directory under the root gets its own non-recursive watch, so
//! registration is explicit and the tracked set is inspectable. When a
//! directory appears at runtime (created or moved in) the watcher re-walks
//! it, registers every directory inside, and reports the files already
//! present, which closes the gap between mkdir and the watch landing.

use crate::error::{Result, SyncError};
use crate::event::{ChangeEvent, ChangeKind, EventSender};
use ignore::WalkBuilder;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::mpsc;

/// What a rename means for the path it arrives at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenamePolicy {
    /// Old name is deleted remotely, new name is synced like a create
    #[default]
    Mirror,
    /// Old name is deleted remotely, new name is ignored until it changes
    DeleteOnly,
}

impl FromStr for RenamePolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mirror" => Ok(RenamePolicy::Mirror),
            "delete-only" => Ok(RenamePolicy::DeleteOnly),
            other => Err(SyncError::Config(format!(
                "Unknown rename policy '{}', expected mirror or delete-only",
                other
            ))),
        }
    }
}

pub struct TreeWatcher {
    root: PathBuf,
    watcher: RecommendedWatcher,
    raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    tracked: HashSet<PathBuf>,
    rename_policy: RenamePolicy,
}

impl TreeWatcher {
    /// Create the watcher and register every directory under `root`.
    pub fn start(root: impl Into<PathBuf>, rename_policy: RenamePolicy) -> Result<Self> {
        let root = root.into();
        let (tx, raw_rx) = mpsc::unbounded_channel();

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;

        let mut this = Self {
            root: root.clone(),
            watcher,
            raw_rx,
            tracked: HashSet::new(),
            rename_policy,
        };

        // The root itself must be watchable; nested failures are tolerated
        this.watcher.watch(&root, RecursiveMode::NonRecursive)?;
        this.tracked.insert(root.clone());
        this.on_directory_discovered(&root);

        tracing::info!(
            root = %root.display(),
            directories = this.tracked.len(),
            "Watching directory tree"
        );
        Ok(this)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tracked(&self) -> &HashSet<PathBuf> {
        &self.tracked
    }

    /// Watch `dir` and every directory below it. Returns the regular files
    /// found along the way.
    pub fn on_directory_discovered(&mut self, dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();

        let walker = WalkBuilder::new(dir)
            .standard_filters(false)
            .follow_links(false)
            .build();

        for entry in walker.flatten() {
            let Some(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();

            if file_type.is_dir() {
                // Re-watch even if tracked: a deleted and recreated
                // directory lost its kernel watch
                match self.watcher.watch(path, RecursiveMode::NonRecursive) {
                    Ok(()) => {
                        if self.tracked.insert(path.to_path_buf()) {
                            tracing::trace!(path = %path.display(), "Registered watch");
                        }
                    }
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "Could not watch directory");
                    }
                }
            } else if file_type.is_file() {
                files.push(path.to_path_buf());
            }
        }

        files
    }

    /// Translate one notify event into change events, registering watches
    /// for directories that appeared.
    pub fn translate(&mut self, event: Event) -> Vec<ChangeEvent> {
        let mut out = Vec::new();

        match event.kind {
            EventKind::Create(_) => {
                for path in event.paths {
                    self.arrived(path, true, &mut out);
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::From => {
                    for path in event.paths {
                        out.push(ChangeEvent::new(ChangeKind::Renamed, path));
                    }
                }
                RenameMode::To => {
                    let announce = self.rename_policy == RenamePolicy::Mirror;
                    for path in event.paths {
                        self.arrived(path, announce, &mut out);
                    }
                }
                RenameMode::Both => {
                    let mut paths = event.paths.into_iter();
                    if let Some(from) = paths.next() {
                        out.push(ChangeEvent::new(ChangeKind::Renamed, from));
                    }
                    let announce = self.rename_policy == RenamePolicy::Mirror;
                    for to in paths {
                        self.arrived(to, announce, &mut out);
                    }
                }
                // Backends that can't tell which side of the rename this is
                _ => {
                    let announce = self.rename_policy == RenamePolicy::Mirror;
                    for path in event.paths {
                        if path.symlink_metadata().is_ok() {
                            self.arrived(path, announce, &mut out);
                        } else {
                            out.push(ChangeEvent::new(ChangeKind::Renamed, path));
                        }
                    }
                }
            },
            // Permission and timestamp changes don't alter content
            EventKind::Modify(ModifyKind::Metadata(_)) => {}
            EventKind::Modify(_) | EventKind::Any => {
                for path in event.paths {
                    out.push(ChangeEvent::new(ChangeKind::Modified, path));
                }
            }
            EventKind::Remove(_) => {
                for path in event.paths {
                    out.push(ChangeEvent::new(ChangeKind::Removed, path));
                }
            }
            EventKind::Access(_) | EventKind::Other => {}
        }

        out.retain(|e| {
            let inside = e.path.starts_with(&self.root);
            if !inside {
                tracing::warn!(path = %e.path.display(), "Ignoring event outside watch root");
            }
            inside
        });
        out
    }

    /// A path appeared. Directories are walked and registered; with
    /// `announce` the arrival and any files inside are reported as created.
    fn arrived(&mut self, path: PathBuf, announce: bool, out: &mut Vec<ChangeEvent>) {
        let is_dir = path
            .symlink_metadata()
            .map(|m| m.file_type().is_dir())
            .unwrap_or(false);

        if is_dir {
            let files = self.on_directory_discovered(&path);
            if announce {
                out.extend(
                    files
                        .into_iter()
                        .map(|f| ChangeEvent::new(ChangeKind::Created, f)),
                );
            }
        }

        if announce {
            out.push(ChangeEvent::new(ChangeKind::Created, path));
        }
    }

    /// Forward change events until `shutdown` resolves or the sender's
    /// receiver is gone. Dropping `self` releases every registration.
    pub async fn run<F>(mut self, events: EventSender, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::debug!("Watcher shutting down");
                    break;
                }
                raw = self.raw_rx.recv() => match raw {
                    Some(Ok(event)) => {
                        tracing::trace!(kind = ?event.kind, paths = ?event.paths, "Filesystem event");
                        for change in self.translate(event) {
                            if events.send(change).is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Watcher error");
                    }
                    None => break,
                }
            }
        }
    }
}
