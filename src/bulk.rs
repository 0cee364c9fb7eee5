//! Bulk archive sync.
//!
//! Builds a gzip-compressed tar of the whole watch root and ships it to the
//! remote side in one command, establishing a baseline before live events
//! are processed. The archive is written to several sinks at once so the
//! transport pipe and a BLAKE3 digest are fed in the same pass; memory is
//! bounded by the pipe depth, not the size of the tree.

use crate::error::{Result, SyncError};
use crate::path::RemotePath;
use crate::transport::{RemoteCommand, SharedChannel};
use bytes::{Bytes, BytesMut};
use flate2::write::GzEncoder;
use flate2::Compression;
use ignore::WalkBuilder;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

const EXTRACT_SCRIPT: &str = r#"set -e
mkdir -p -- "$1"
tar -xzf - -C "$1""#;

/// The extract runs far longer than a single-file write.
pub const DEFAULT_BULK_TIMEOUT: Duration = Duration::from_secs(600);

const PIPE_CHUNK: usize = 64 * 1024;

/// Chunks buffered between the archive builder and the remote process.
const PIPE_DEPTH: usize = 16;

/// Counts for one archive build.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub files: u64,
    pub dirs: u64,
    /// Symlinks, sockets and entries that vanished mid-walk
    pub skipped: u64,
    /// Uncompressed regular-file bytes
    pub content_bytes: u64,
}

impl ArchiveSummary {
    pub fn entries(&self) -> u64 {
        self.files + self.dirs
    }
}

/// Writes every buffer to all sinks, like `tee`.
pub struct Fanout<'a> {
    sinks: Vec<&'a mut dyn Write>,
}

impl<'a> Fanout<'a> {
    pub fn new(sinks: Vec<&'a mut dyn Write>) -> Self {
        Self { sinks }
    }
}

impl Write for Fanout<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for sink in self.sinks.iter_mut() {
            sink.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.flush()?;
        }
        Ok(())
    }
}

/// Blocking `Write` that forwards fixed-size chunks into a channel.
/// Writes fail with `BrokenPipe` once the receiving side is gone.
pub struct ChunkWriter {
    tx: mpsc::Sender<Bytes>,
    buf: BytesMut,
    written: u64,
}

impl ChunkWriter {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            tx,
            buf: BytesMut::with_capacity(PIPE_CHUNK),
            written: 0,
        }
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.tx.blocking_send(chunk).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "remote stopped reading the archive")
        })
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = PIPE_CHUNK - self.buf.len();
        let n = data.len().min(room);
        self.buf.extend_from_slice(&data[..n]);
        self.written += n as u64;
        if self.buf.len() >= PIPE_CHUNK {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

/// Stream a gzip tar of `root` into `sink`. Entry names are relative to
/// `root`; the root itself is not an entry.
pub fn build_archive<W: Write>(root: &Path, sink: W) -> Result<ArchiveSummary> {
    if !root.is_dir() {
        return Err(SyncError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Unable to archive {}: not a directory", root.display()),
        )));
    }

    let gz = GzEncoder::new(sink, Compression::default());
    let mut builder = tar::Builder::new(gz);
    builder.follow_symlinks(false);

    let mut summary = ArchiveSummary::default();

    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable entry");
                summary.skipped += 1;
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path();
        let rel = match path.strip_prefix(root) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let Some(file_type) = entry.file_type() else {
            summary.skipped += 1;
            continue;
        };

        let appended = if file_type.is_dir() {
            builder.append_dir(rel, path).map(|_| {
                summary.dirs += 1;
            })
        } else if file_type.is_file() {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            builder.append_path_with_name(path, rel).map(|_| {
                summary.files += 1;
                summary.content_bytes += size;
            })
        } else {
            tracing::debug!(path = %path.display(), "Skipping non-regular entry");
            summary.skipped += 1;
            Ok(())
        };

        match appended {
            Ok(()) => {}
            // Editors delete temp files while we walk
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Entry vanished during archive");
                summary.skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    builder.into_inner()?.finish()?;
    Ok(summary)
}

/// A single-entry gzip tar holding `content` under `name`.
pub fn archive_single(name: &str, content: &[u8], source: &Path) -> Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_entry_type(tar::EntryType::Regular);

    let metadata = std::fs::metadata(source).ok();
    header.set_mode(file_mode(metadata.as_ref()));
    let mtime = metadata
        .and_then(|m| m.modified().ok())
        .unwrap_or_else(SystemTime::now)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    header.set_mtime(mtime);

    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(gz);
    builder.append_data(&mut header, name, content)?;
    Ok(builder.into_inner()?.finish()?)
}

#[cfg(unix)]
fn file_mode(metadata: Option<&std::fs::Metadata>) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.map(|m| m.permissions().mode() & 0o7777).unwrap_or(0o644)
}

#[cfg(not(unix))]
fn file_mode(_metadata: Option<&std::fs::Metadata>) -> u32 {
    0o644
}

/// Outcome of a bootstrap transfer.
#[derive(Debug, Clone)]
pub struct BulkReport {
    pub summary: ArchiveSummary,
    pub archive_bytes: u64,
    /// BLAKE3 of the compressed stream, hex encoded
    pub digest: String,
}

/// One-shot full-tree transfer run before the live event loop.
pub struct BulkSync {
    channel: SharedChannel,
    root: PathBuf,
    prefix: RemotePath,
    timeout: Duration,
}

impl BulkSync {
    pub fn new(channel: SharedChannel, root: impl Into<PathBuf>, prefix: RemotePath) -> Self {
        Self {
            channel,
            root: root.into(),
            prefix,
            timeout: DEFAULT_BULK_TIMEOUT,
        }
    }

    /// Upper bound for the extract command, replacing the channel's
    /// per-command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn run(&self) -> Result<BulkReport> {
        let started = Instant::now();
        let root = self.root.clone();
        let (tx, rx) = mpsc::channel(PIPE_DEPTH);

        // Tar and gzip are blocking work; chunks flow to the remote as they
        // are produced
        let producer = tokio::task::spawn_blocking(move || {
            let mut pipe = ChunkWriter::new(tx);
            let mut hasher = blake3::Hasher::new();
            let summary = build_archive(
                &root,
                Fanout::new(vec![&mut pipe as &mut dyn Write, &mut hasher as &mut dyn Write]),
            )?;
            pipe.flush()?;
            Ok::<_, SyncError>((summary, pipe.written(), hasher.finalize().to_hex().to_string()))
        });

        let command = RemoteCommand::shell(EXTRACT_SCRIPT, [self.prefix.as_str()])
            .with_timeout(self.timeout);
        let outcome = self
            .channel
            .execute_streaming(command.clone(), rx)
            .await
            .and_then(|result| result.check(&command));
        let built = producer
            .await
            .map_err(|e| SyncError::Io(io::Error::new(io::ErrorKind::Other, e)))?;

        let (summary, archive_bytes, digest) = match (outcome, built) {
            (Ok(_), Ok(built)) => built,
            // A broken pipe only means the remote side failed first
            (Err(e), Err(SyncError::Io(io_err))) if io_err.kind() == io::ErrorKind::BrokenPipe => {
                return Err(e)
            }
            (_, Err(e)) | (Err(e), Ok(_)) => return Err(e),
        };

        tracing::info!(
            remote = %self.prefix,
            files = summary.files,
            dirs = summary.dirs,
            skipped = summary.skipped,
            archive_bytes,
            digest = %digest,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Initial sync complete"
        );

        Ok(BulkReport {
            summary,
            archive_bytes,
            digest,
        })
    }
}
