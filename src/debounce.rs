//! Per-path quiescence windows.
//!
//! Editors emit several notifications for one logical save (swap file,
//! truncate, write, chmod). Each path keeps only its latest event kind and
//! a deadline that every new event pushes back; when the deadline passes
//! the kind is turned into at most one `SyncOperation`.

use crate::event::{ChangeEvent, ChangeKind, EventReceiver, OperationSender, SyncOperation};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
struct Pending {
    kind: ChangeKind,
    deadline: Instant,
    events: u32,
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record an event; the last kind wins and the window restarts.
    pub fn submit(&mut self, event: ChangeEvent) {
        let deadline = event.observed_at + self.window;
        self.pending
            .entry(event.path)
            .and_modify(|p| {
                p.kind = event.kind;
                p.deadline = p.deadline.max(deadline);
                p.events += 1;
            })
            .or_insert(Pending {
                kind: event.kind,
                deadline,
                events: 1,
            });
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove every path whose window closed at or before `now`, ordered
    /// by when the window closed.
    pub fn take_due(&mut self, now: Instant) -> Vec<(PathBuf, ChangeKind)> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        self.take(due)
    }

    /// Close every window immediately (shutdown).
    pub fn take_all(&mut self) -> Vec<(PathBuf, ChangeKind)> {
        let all: Vec<PathBuf> = self.pending.keys().cloned().collect();
        self.take(all)
    }

    fn take(&mut self, paths: Vec<PathBuf>) -> Vec<(PathBuf, ChangeKind)> {
        let mut closed: Vec<(PathBuf, Pending)> = paths
            .into_iter()
            .filter_map(|path| self.pending.remove(&path).map(|p| (path, p)))
            .collect();
        closed.sort_by(|a, b| a.1.deadline.cmp(&b.1.deadline).then_with(|| a.0.cmp(&b.0)));

        closed
            .into_iter()
            .map(|(path, p)| {
                if p.events > 1 {
                    tracing::trace!(path = %path.display(), events = p.events, "Coalesced events");
                }
                (path, p.kind)
            })
            .collect()
    }

    /// Run until `events` closes, sending operations to `ops`. Pending
    /// windows are flushed on shutdown.
    pub async fn run(mut self, mut events: EventReceiver, ops: OperationSender) {
        loop {
            let deadline = self.next_deadline();
            let sleep = tokio::time::sleep_until(
                deadline
                    .map(tokio::time::Instant::from_std)
                    .unwrap_or_else(tokio::time::Instant::now),
            );

            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.submit(event),
                    None => break,
                },
                _ = sleep, if deadline.is_some() => {
                    let due = self.take_due(Instant::now());
                    if !emit(due, &ops).await {
                        return;
                    }
                }
            }
        }

        let rest = self.take_all();
        if !rest.is_empty() {
            tracing::debug!(count = rest.len(), "Flushing pending changes on shutdown");
        }
        emit(rest, &ops).await;
    }
}

/// Returns false once the engine side has gone away.
async fn emit(closed: Vec<(PathBuf, ChangeKind)>, ops: &OperationSender) -> bool {
    for (path, kind) in closed {
        if let Some(op) = resolve(&path, kind).await {
            if ops.send(op).await.is_err() {
                return false;
            }
        }
    }
    true
}

/// Decide what a closed window means given the current local state.
pub async fn resolve(path: &Path, kind: ChangeKind) -> Option<SyncOperation> {
    if kind.is_removal() {
        return Some(SyncOperation::delete(path));
    }

    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_file() => Some(SyncOperation::upsert(path)),
        Ok(_) => {
            tracing::trace!(path = %path.display(), "Not a regular file, skipping");
            None
        }
        Err(_) => {
            // Swap files and other short-lived editor artifacts
            tracing::trace!(path = %path.display(), "Vanished before window closed, skipping");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{operation_channel, event_channel, OperationKind};
    use std::fs;
    use tempfile::TempDir;

    fn event_at(kind: ChangeKind, path: &str, at: Instant) -> ChangeEvent {
        ChangeEvent {
            kind,
            path: PathBuf::from(path),
            observed_at: at,
        }
    }

    #[test]
    fn test_burst_collapses_to_last_kind() {
        let start = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(500));

        d.submit(event_at(ChangeKind::Created, "/ws/a", start));
        d.submit(event_at(ChangeKind::Modified, "/ws/a", start + Duration::from_millis(100)));
        d.submit(event_at(ChangeKind::Removed, "/ws/a", start + Duration::from_millis(200)));
        assert_eq!(d.len(), 1);

        // Window restarted by the last event
        assert!(d.take_due(start + Duration::from_millis(600)).is_empty());
        let due = d.take_due(start + Duration::from_millis(700));
        assert_eq!(due, vec![(PathBuf::from("/ws/a"), ChangeKind::Removed)]);
        assert!(d.is_empty());
    }

    #[test]
    fn test_due_ordered_by_window_close() {
        let start = Instant::now();
        let mut d = Debouncer::new(Duration::from_millis(100));

        d.submit(event_at(ChangeKind::Modified, "/ws/late", start + Duration::from_millis(50)));
        d.submit(event_at(ChangeKind::Modified, "/ws/early", start));
        d.submit(event_at(ChangeKind::Modified, "/ws/pending", start + Duration::from_millis(500)));

        let due = d.take_due(start + Duration::from_millis(200));
        let paths: Vec<_> = due.iter().map(|(p, _)| p.to_string_lossy().into_owned()).collect();
        assert_eq!(paths, vec!["/ws/early", "/ws/late"]);
        assert_eq!(d.len(), 1);
        assert_eq!(d.next_deadline(), Some(start + Duration::from_millis(600)));
    }

    #[test]
    fn test_take_all() {
        let start = Instant::now();
        let mut d = Debouncer::new(Duration::from_secs(60));
        d.submit(event_at(ChangeKind::Modified, "/ws/a", start));
        d.submit(event_at(ChangeKind::Removed, "/ws/b", start));
        assert_eq!(d.take_all().len(), 2);
        assert!(d.next_deadline().is_none());
    }

    #[tokio::test]
    async fn test_resolve_rules() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("f.txt");
        fs::write(&file, "x").unwrap();

        let op = resolve(&file, ChangeKind::Modified).await.unwrap();
        assert_eq!(op.kind, OperationKind::Upsert);

        // Directories are never upserted
        assert!(resolve(tmp.path(), ChangeKind::Created).await.is_none());

        // Gone before the window closed
        let gone = tmp.path().join("gone.swp");
        assert!(resolve(&gone, ChangeKind::Created).await.is_none());

        // Deletes don't need the path to exist
        let op = resolve(&gone, ChangeKind::Renamed).await.unwrap();
        assert_eq!(op.kind, OperationKind::Delete);
    }

    #[tokio::test]
    async fn test_run_emits_single_upsert_for_burst() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("burst.txt");
        fs::write(&file, "v3").unwrap();

        let (event_tx, event_rx) = event_channel();
        let (op_tx, mut op_rx) = operation_channel();
        let handle = tokio::spawn(Debouncer::new(Duration::from_millis(50)).run(event_rx, op_tx));

        for kind in [ChangeKind::Created, ChangeKind::Modified, ChangeKind::Modified] {
            event_tx.send(ChangeEvent::new(kind, &file)).unwrap();
        }

        let op = op_rx.recv().await.unwrap();
        assert_eq!(op, SyncOperation::upsert(&file));

        drop(event_tx);
        handle.await.unwrap();
        assert!(op_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_run_flushes_on_shutdown() {
        let (event_tx, event_rx) = event_channel();
        let (op_tx, mut op_rx) = operation_channel();
        let handle = tokio::spawn(Debouncer::new(Duration::from_secs(3600)).run(event_rx, op_tx));

        event_tx
            .send(ChangeEvent::new(ChangeKind::Removed, "/ws/old.txt"))
            .unwrap();
        drop(event_tx);
        handle.await.unwrap();

        assert_eq!(op_rx.recv().await.unwrap(), SyncOperation::delete("/ws/old.txt"));
    }
}
