//! Exact remote commands produced for local changes, checked against a
//! channel that only records.

mod common;

use common::RecordingChannel;
use flate2::read::GzDecoder;
use podsync::bulk::BulkSync;
use podsync::debounce::Debouncer;
use podsync::encode::{ContentEncoder, Encoding, DEFAULT_INLINE_LIMIT};
use podsync::event::{event_channel, operation_channel, ChangeEvent, ChangeKind};
use podsync::path::{PathTranslator, RemotePath};
use podsync::{SyncContext, SyncEngine};
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_create_and_delete_commands() {
    // Stands in for a watch root at /ws synced to /app
    let ws = TempDir::new().unwrap();
    fs::create_dir(ws.path().join("a")).unwrap();
    let file = ws.path().join("a/b.txt");
    fs::write(&file, "hello").unwrap();

    let channel = RecordingChannel::recording_only();
    let ctx = Arc::new(SyncContext::new(
        PathTranslator::new(ws.path(), RemotePath::new("/app")),
        channel.clone(),
        ContentEncoder::new(Encoding::Base64, DEFAULT_INLINE_LIMIT, None),
    ));

    let (event_tx, event_rx) = event_channel();
    let (op_tx, op_rx) = operation_channel();
    let debouncer = tokio::spawn(Debouncer::new(Duration::from_millis(20)).run(event_rx, op_tx));
    let engine = tokio::spawn(SyncEngine::new(ctx, 2).run(op_rx));

    event_tx.send(ChangeEvent::new(ChangeKind::Created, &file)).unwrap();
    event_tx.send(ChangeEvent::new(ChangeKind::Modified, &file)).unwrap();
    assert!(common::eventually(|| !channel.writes_to("/app/a/b.txt").is_empty()).await);

    fs::remove_file(&file).unwrap();
    event_tx.send(ChangeEvent::new(ChangeKind::Removed, &file)).unwrap();
    drop(event_tx);

    debouncer.await.unwrap();
    let stats = engine.await.unwrap().unwrap();

    assert_eq!(channel.writes_to("/app/a/b.txt"), vec![b"hello".to_vec()]);
    assert_eq!(channel.deletes_of("/app/a/b.txt"), 1);
    assert_eq!(stats.upserts, 1);
    assert_eq!(stats.deletes, 1);

    let delete = channel
        .commands()
        .into_iter()
        .find(|c| c.argv.get(2).map_or(false, |s| s.starts_with("rm ")))
        .unwrap();
    assert_eq!(
        delete.argv,
        vec!["sh", "-c", "rm -rf -- \"$1\"", "sh", "/app/a/b.txt"]
    );
}

#[tokio::test]
async fn test_printf_encoding_round_trips_text() {
    let ws = TempDir::new().unwrap();
    let file = ws.path().join("notes.md");
    let text = "100% sure\\not a -flag\n\ttabbed 'quoted' \"double\" $HOME `tick`\n";
    fs::write(&file, text).unwrap();

    let channel = RecordingChannel::recording_only();
    let ctx = SyncContext::new(
        PathTranslator::new(ws.path(), RemotePath::new("/app")),
        channel.clone(),
        ContentEncoder::new(Encoding::Printf, DEFAULT_INLINE_LIMIT, None),
    );

    podsync::engine::apply(&ctx, &podsync::event::SyncOperation::upsert(&file))
        .await
        .unwrap();

    assert_eq!(channel.writes_to("/app/notes.md"), vec![text.as_bytes().to_vec()]);
}

#[tokio::test]
async fn test_bulk_archive_has_every_file_and_directory() {
    let ws = TempDir::new().unwrap();
    let root = ws.path();
    fs::create_dir_all(root.join("src/bin")).unwrap();
    fs::create_dir(root.join("empty")).unwrap();
    fs::write(root.join("Cargo.toml"), "[package]").unwrap();
    fs::write(root.join("src/lib.rs"), "pub fn f() {}").unwrap();
    fs::write(root.join("src/bin/main.rs"), "fn main() {}").unwrap();

    let channel = RecordingChannel::recording_only();
    let report = BulkSync::new(channel.clone(), root, RemotePath::new("/app"))
        .run()
        .await
        .unwrap();

    // 3 files, 3 directories
    assert_eq!(report.summary.entries(), 6);

    let commands = channel.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].argv.last().map(String::as_str), Some("/app"));

    let stdin = commands[0].stdin.clone().unwrap();
    assert_eq!(
        blake3::hash(&stdin).to_hex().to_string(),
        report.digest
    );

    let mut archive = tar::Archive::new(GzDecoder::new(&stdin[..]));
    let names: BTreeSet<String> = archive
        .entries()
        .unwrap()
        .map(|e| {
            let e = e.unwrap();
            e.path().unwrap().to_string_lossy().trim_end_matches('/').to_string()
        })
        .collect();

    let expected: BTreeSet<String> = [
        "Cargo.toml",
        "empty",
        "src",
        "src/bin",
        "src/bin/main.rs",
        "src/lib.rs",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assert_eq!(names, expected);
}
