mod common;

use common::Fixture;
use mycloud_rescue_core::index::LoadOptions;
use mycloud_rescue_core::reconcile::{rebuild_from_destination, ReconcileOptions};
use mycloud_rescue_core::{
    Ledger, MetadataIndex, ResumeLog, SilentReporter, TransferEngine, TransferOptions, WalkMode,
};
use std::fs;
use std::sync::atomic::Ordering;

#[test]
fn test_rebuild_matches_out_of_band_copy() {
    let fx = Fixture::photo_tree();
    fx.write_dest("folder1/photo.jpg", b"copied by hand");
    fx.write_dest("folder1/holiday-notes.txt", b"not in the database");
    fx.write_dest("loose.bin", b"neither");

    let index = MetadataIndex::load(&fx.db, LoadOptions::default()).unwrap();
    let ledger = Ledger::open(&fx.db).unwrap();
    let stats = rebuild_from_destination(
        &index,
        &ledger,
        &fx.dest,
        &ReconcileOptions::default(),
        None,
        &SilentReporter,
    )
    .unwrap();

    assert_eq!(stats.scanned, 3);
    assert_eq!(stats.matched, 1);
    assert_eq!(stats.newly_recorded, 1);
    assert_eq!(stats.unmatched, 2);
    assert_eq!(stats.log_entries, None);

    let entries = ledger.completed_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].file_id, "3");
    assert_eq!(entries[0].filename, "folder1/photo.jpg");
}

#[test]
fn test_rebuild_matches_sanitized_paths() {
    let fx = Fixture::new();
    fx.add_dir("1", "folder|name", None);
    fx.add_file("2", "file|test.jpg", Some("1"), "abc123");
    fx.write_dest("folder-name/file-test.jpg", b"sanitized copy");

    let index = MetadataIndex::load(&fx.db, LoadOptions::default()).unwrap();
    let ledger = Ledger::open(&fx.db).unwrap();
    let stats = rebuild_from_destination(
        &index,
        &ledger,
        &fx.dest,
        &ReconcileOptions::default(),
        None,
        &SilentReporter,
    )
    .unwrap();

    assert_eq!(stats.matched, 1);
    assert!(ledger.is_completed("2").unwrap());
}

#[test]
fn test_rebuild_is_idempotent_and_rewrites_log() {
    let fx = Fixture::photo_tree();
    fx.write_dest("folder1/photo.jpg", b"copy");
    let index = MetadataIndex::load(&fx.db, LoadOptions::default()).unwrap();
    let ledger = Ledger::open(&fx.db).unwrap();
    let log = ResumeLog::new(fx.root.join("copied.log"));

    let first = rebuild_from_destination(
        &index,
        &ledger,
        &fx.dest,
        &ReconcileOptions::default(),
        Some(&log),
        &SilentReporter,
    )
    .unwrap();
    let second = rebuild_from_destination(
        &index,
        &ledger,
        &fx.dest,
        &ReconcileOptions::default(),
        Some(&log),
        &SilentReporter,
    )
    .unwrap();

    assert_eq!(first.newly_recorded, 1);
    assert_eq!(second.matched, 1);
    assert_eq!(second.newly_recorded, 0);
    assert_eq!(second.log_entries, Some(1));
    assert_eq!(ledger.summary().unwrap().completed, 1);
    assert_eq!(log.entries().unwrap().len(), 1);
}

#[test]
fn test_rebuilt_ledger_short_circuits_transfer() {
    let fx = Fixture::photo_tree();
    fx.add_blob("abc123", b"source");
    fx.write_dest("folder1/photo.jpg", b"copy");
    let index = MetadataIndex::load(&fx.db, LoadOptions::default()).unwrap();
    let ledger = Ledger::open(&fx.db).unwrap();

    rebuild_from_destination(
        &index,
        &ledger,
        &fx.dest,
        &ReconcileOptions::default(),
        None,
        &SilentReporter,
    )
    .unwrap();

    let engine = TransferEngine::new(&index, &ledger, &fx.source, &fx.dest, TransferOptions::default());
    let stats = engine.materialize_all(WalkMode::Database, &SilentReporter).unwrap();
    assert_eq!(stats.processed, 0);
    assert_eq!(stats.copied, 0);
}

#[test]
fn test_rebuild_on_missing_destination_is_empty() {
    let fx = Fixture::photo_tree();
    let index = MetadataIndex::load(&fx.db, LoadOptions::default()).unwrap();
    let ledger = Ledger::open(&fx.db).unwrap();

    let stats = rebuild_from_destination(
        &index,
        &ledger,
        &fx.root.join("nowhere"),
        &ReconcileOptions::default(),
        None,
        &SilentReporter,
    )
    .unwrap();
    assert_eq!(stats.scanned, 0);
    assert_eq!(stats.matched, 0);
}

#[test]
fn test_cancelled_rebuild_keeps_ledger_and_log() {
    let fx = Fixture::photo_tree();
    fx.write_dest("folder1/photo.jpg", b"copy");
    let index = MetadataIndex::load(&fx.db, LoadOptions::default()).unwrap();
    let ledger = Ledger::open(&fx.db).unwrap();
    let log = ResumeLog::new(fx.root.join("copied.log"));
    log.append(&fx.root.join("earlier/entry.jpg")).unwrap();

    let options = ReconcileOptions::default();
    options.cancel.store(true, Ordering::SeqCst);
    let stats = rebuild_from_destination(
        &index,
        &ledger,
        &fx.dest,
        &options,
        Some(&log),
        &SilentReporter,
    )
    .unwrap();

    assert!(stats.interrupted);
    assert_eq!(stats.scanned, 0);
    assert_eq!(stats.log_entries, None);
    assert_eq!(ledger.summary().unwrap().completed, 0);
    assert_eq!(log.entries().unwrap().len(), 1);
    assert!(!fx.root.join("copied.log.tmp").exists());
    assert!(fs::read_to_string(log.path()).unwrap().contains("entry.jpg"));
}
