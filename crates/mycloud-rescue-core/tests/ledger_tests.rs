mod common;

use common::Fixture;
use mycloud_rescue_core::ledger::models::{REASON_NOT_IN_DATABASE, REASON_SOURCE_MISSING};
use mycloud_rescue_core::ledger::RetryPolicy;
use mycloud_rescue_core::{Ledger, ResumeLog};
use rusqlite::Connection;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_mark_completed_twice_keeps_one_row() {
    let tmp = tempdir().unwrap();
    let ledger = Ledger::open(&tmp.path().join("ledger.db")).unwrap();

    assert!(ledger.mark_completed("42", "abc123").unwrap());
    assert!(!ledger.mark_completed("42", "abc123").unwrap());

    assert!(ledger.is_completed("42").unwrap());
    assert_eq!(ledger.summary().unwrap().completed, 1);
    let entries = ledger.completed_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].file_id, "42");
    assert_eq!(entries[0].filename, "abc123");
    assert!(!entries[0].copied_at.is_empty());
}

#[test]
fn test_mark_failed_twice_keeps_first_reason() {
    let tmp = tempdir().unwrap();
    let ledger = Ledger::open(&tmp.path().join("ledger.db")).unwrap();

    assert!(ledger.mark_failed("abc123", REASON_SOURCE_MISSING).unwrap());
    assert!(!ledger.mark_failed("abc123", "copy_error: Other").unwrap());

    assert!(ledger.is_failed("abc123").unwrap());
    assert!(!ledger.is_failed("other").unwrap());
    assert_eq!(
        ledger.failure_reason("abc123").unwrap().as_deref(),
        Some(REASON_SOURCE_MISSING)
    );
    assert_eq!(ledger.failure_reason("other").unwrap(), None);
}

#[test]
fn test_open_is_repeatable() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("ledger.db");
    {
        let ledger = Ledger::open(&path).unwrap();
        ledger.mark_completed("1", "a").unwrap();
    }
    let ledger = Ledger::open(&path).unwrap();
    assert!(ledger.is_completed("1").unwrap());
}

#[test]
fn test_open_adds_missing_mtime_column() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("old.db");
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE copied_files (
                file_id TEXT PRIMARY KEY,
                filename TEXT,
                copied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
             );
             INSERT INTO copied_files (file_id, filename) VALUES ('7', 'c7');",
        )
        .unwrap();
    }

    let ledger = Ledger::open(&path).unwrap();
    let entries = ledger.completed_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].mtime_refreshed);

    assert!(ledger.mark_mtime_refreshed("7").unwrap());
    assert!(!ledger.mark_mtime_refreshed("missing").unwrap());
    assert!(ledger.completed_entries().unwrap()[0].mtime_refreshed);
    assert_eq!(ledger.summary().unwrap().mtime_refreshed, 1);
}

#[test]
fn test_batch_counts_only_new_rows() {
    let tmp = tempdir().unwrap();
    let ledger = Ledger::open(&tmp.path().join("ledger.db")).unwrap();
    ledger.mark_completed("1", "a").unwrap();

    let batch = vec![
        ("1".to_string(), "a".to_string()),
        ("2".to_string(), "b".to_string()),
        ("3".to_string(), "c".to_string()),
    ];
    assert_eq!(ledger.mark_completed_batch(&batch).unwrap(), 2);
    assert_eq!(ledger.mark_completed_batch(&batch).unwrap(), 0);
    assert_eq!(ledger.mark_completed_batch(&[]).unwrap(), 0);
    assert_eq!(ledger.summary().unwrap().completed, 3);
}

#[test]
fn test_clear_failures_matches_literal_prefix() {
    let tmp = tempdir().unwrap();
    let ledger = Ledger::open(&tmp.path().join("ledger.db")).unwrap();
    ledger.mark_failed("a", "copy_error: PermissionDenied").unwrap();
    ledger.mark_failed("b", "copy_error: StorageFull").unwrap();
    ledger.mark_failed("c", REASON_SOURCE_MISSING).unwrap();
    ledger.mark_failed("d", "copyXerror: Other").unwrap();
    ledger.mark_failed("e", REASON_NOT_IN_DATABASE).unwrap();

    assert_eq!(ledger.clear_failures("copy_error").unwrap(), 2);
    assert!(!ledger.is_failed("a").unwrap());
    assert!(!ledger.is_failed("b").unwrap());
    assert!(ledger.is_failed("c").unwrap());
    assert!(ledger.is_failed("d").unwrap());
    assert_eq!(ledger.summary().unwrap().failed, 3);
}

#[test]
fn test_concurrent_writers_lose_nothing() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("ledger.db");
    let policy = RetryPolicy {
        attempts: 5,
        delay: Duration::from_millis(10),
    };
    let first = Ledger::open(&path).unwrap().with_retry(policy);
    let second = Ledger::open(&path).unwrap().with_retry(policy);

    thread::scope(|s| {
        for (ledger, prefix) in [(&first, "a"), (&second, "b")] {
            s.spawn(move || {
                for i in 0..50 {
                    ledger.mark_completed(&format!("{}{}", prefix, i), "x").unwrap();
                }
            });
        }
    });

    assert_eq!(first.summary().unwrap().completed, 100);
}

#[test]
fn test_reader_sees_committed_writes() {
    let tmp = tempdir().unwrap();
    let ledger = Ledger::open(&tmp.path().join("ledger.db")).unwrap();
    let reader = ledger.reader().unwrap();
    assert!(!reader.is_completed("9").unwrap());

    ledger.mark_completed("9", "c9").unwrap();
    ledger.mark_failed("c10", REASON_SOURCE_MISSING).unwrap();
    assert!(reader.is_completed("9").unwrap());
    assert!(reader.is_failed("c10").unwrap());
}

#[test]
fn test_pending_file_ids_skips_completed_and_failed() {
    let fx = Fixture::new();
    fx.add_dir("1", "root", None);
    fx.add_file("2", "a.jpg", Some("1"), "c2");
    fx.add_file("3", "b.jpg", Some("1"), "c3");
    fx.add_file("4", "c.jpg", Some("1"), "c4");

    let ledger = Ledger::open(&fx.db).unwrap();
    ledger.mark_completed("2", "c2").unwrap();
    ledger.mark_failed("c3", REASON_SOURCE_MISSING).unwrap();

    let mut pending = ledger.pending_file_ids().unwrap();
    pending.sort();
    assert_eq!(pending, vec!["1".to_string(), "4".to_string()]);
}

#[test]
fn test_pending_file_ids_without_files_table_errors() {
    let tmp = tempdir().unwrap();
    let ledger = Ledger::open(&tmp.path().join("ledger.db")).unwrap();
    assert!(ledger.pending_file_ids().is_err());
}

#[test]
fn test_resume_log_append_and_rewrite() {
    let tmp = tempdir().unwrap();
    let dest = tmp.path().join("dest");
    fs::create_dir_all(dest.join("a")).unwrap();
    fs::write(dest.join("a/one.txt"), b"1").unwrap();
    fs::write(dest.join("two.txt"), b"2").unwrap();
    fs::write(dest.join("a/.three.txt.partial"), b"3").unwrap();

    let log = ResumeLog::new(tmp.path().join("logs/copied.log"));
    assert!(log.entries().unwrap().is_empty());

    log.append(Path::new("/somewhere/stale.txt")).unwrap();
    assert_eq!(log.entries().unwrap().len(), 1);

    let lines = log.rewrite_from_destination(&dest).unwrap();
    assert_eq!(lines, 2);
    let entries = log.entries().unwrap();
    assert!(entries.contains(&*dest.join("a/one.txt").to_string_lossy()));
    assert!(entries.contains(&*dest.join("two.txt").to_string_lossy()));
    assert!(!entries.contains("/somewhere/stale.txt"));

    log.append(&dest.join("four.txt")).unwrap();
    assert_eq!(log.entries().unwrap().len(), 3);
    assert!(!tmp.path().join("logs/copied.log.tmp").exists());
}
