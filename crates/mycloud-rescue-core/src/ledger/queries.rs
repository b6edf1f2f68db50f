use super::models::*;
use super::sqlite::{Ledger, LedgerReader};
use crate::error::Error;
use rusqlite::{params, Connection, OptionalExtension, Result};
use tracing::debug;

impl Ledger {
    // ── Writes ───────────────────────────────────────────────────

    /// Insert-if-absent. Returns `true` when a new row was written.
    pub fn mark_completed(&self, file_id: &str, filename: &str) -> Result<bool> {
        self.retry().run(|| {
            let conn = self.writer().lock();
            let n = conn.execute(
                "INSERT OR IGNORE INTO copied_files (file_id, filename, mtime_refreshed) \
                 VALUES (?1, ?2, 0)",
                params![file_id, filename],
            )?;
            Ok(n == 1)
        })
    }

    /// Insert-if-absent for many `(file_id, filename)` pairs in one
    /// transaction. Returns the number of new rows.
    pub fn mark_completed_batch(&self, entries: &[(String, String)]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let inserted = self.retry().run(|| {
            let conn = self.writer().lock();
            let tx = conn.unchecked_transaction()?;
            let mut count = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT OR IGNORE INTO copied_files (file_id, filename, mtime_refreshed) \
                     VALUES (?1, ?2, 0)",
                )?;
                for (file_id, filename) in entries {
                    count += stmt.execute(params![file_id, filename])?;
                }
            }
            tx.commit()?;
            Ok(count)
        })?;
        debug!("Recorded {} of {} completed entries", inserted, entries.len());
        Ok(inserted)
    }

    /// Insert-if-absent. Returns `true` when a new row was written.
    pub fn mark_failed(&self, key: &str, reason: &str) -> Result<bool> {
        self.retry().run(|| {
            let conn = self.writer().lock();
            let n = conn.execute(
                "INSERT OR IGNORE INTO skipped_files (filename, reason) VALUES (?1, ?2)",
                params![key, reason],
            )?;
            Ok(n == 1)
        })
    }

    /// Returns `false` when no completed entry exists for `file_id`.
    pub fn mark_mtime_refreshed(&self, file_id: &str) -> Result<bool> {
        self.retry().run(|| {
            let conn = self.writer().lock();
            let n = conn.execute(
                "UPDATE copied_files SET mtime_refreshed = 1 WHERE file_id = ?1",
                params![file_id],
            )?;
            Ok(n > 0)
        })
    }

    /// Drop failure rows whose reason starts with `reason_prefix` so they are
    /// attempted again on the next run.
    pub fn clear_failures(&self, reason_prefix: &str) -> Result<usize> {
        let escaped = reason_prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("{}%", escaped);
        self.retry().run(|| {
            let conn = self.writer().lock();
            conn.execute(
                "DELETE FROM skipped_files WHERE reason LIKE ?1 ESCAPE '\\'",
                params![pattern],
            )
        })
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn is_completed(&self, file_id: &str) -> Result<bool> {
        is_completed(&self.writer().lock(), file_id)
    }

    pub fn is_failed(&self, key: &str) -> Result<bool> {
        is_failed(&self.writer().lock(), key)
    }

    pub fn failure_reason(&self, key: &str) -> Result<Option<String>> {
        self.writer()
            .lock()
            .query_row(
                "SELECT reason FROM skipped_files WHERE filename = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn summary(&self) -> Result<LedgerSummary> {
        let conn = self.writer().lock();
        let (completed, mtime_refreshed) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(mtime_refreshed = 1), 0) FROM copied_files",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let failed = conn.query_row("SELECT COUNT(*) FROM skipped_files", [], |row| row.get(0))?;
        Ok(LedgerSummary {
            completed,
            failed,
            mtime_refreshed,
        })
    }

    pub fn completed_entries(&self) -> Result<Vec<CompletedEntry>> {
        let conn = self.writer().lock();
        let mut stmt = conn.prepare(
            "SELECT file_id, COALESCE(filename, ''), COALESCE(copied_at, ''), \
                    COALESCE(mtime_refreshed, 0) \
             FROM copied_files ORDER BY rowid",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(CompletedEntry {
                    file_id: row.get(0)?,
                    filename: row.get(1)?,
                    copied_at: row.get(2)?,
                    mtime_refreshed: row.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn failed_entries(&self) -> Result<Vec<FailedEntry>> {
        let conn = self.writer().lock();
        let mut stmt = conn.prepare(
            "SELECT filename, COALESCE(reason, ''), COALESCE(timestamp, '') \
             FROM skipped_files ORDER BY rowid",
        )?;
        let entries = stmt
            .query_map([], |row| {
                Ok(FailedEntry {
                    key: row.get(0)?,
                    reason: row.get(1)?,
                    timestamp: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Ids of `Files` rows with neither a completed entry (by id) nor a
    /// failure entry (by content ID). Directories are included; callers
    /// filter them against the index.
    pub fn pending_file_ids(&self) -> std::result::Result<Vec<String>, Error> {
        let conn = self.writer().lock();
        let mut stmt = conn.prepare(
            "SELECT CAST(f.id AS TEXT) FROM Files f \
             LEFT JOIN copied_files c ON c.file_id = CAST(f.id AS TEXT) \
             LEFT JOIN skipped_files s ON s.filename = f.contentID \
             WHERE c.file_id IS NULL AND s.filename IS NULL",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>>>()?;
        debug!("{} records pending transfer", ids.len());
        Ok(ids)
    }
}

impl LedgerReader {
    pub fn is_completed(&self, file_id: &str) -> Result<bool> {
        is_completed(self.connection(), file_id)
    }

    pub fn is_failed(&self, key: &str) -> Result<bool> {
        is_failed(self.connection(), key)
    }
}

fn is_completed(conn: &Connection, file_id: &str) -> Result<bool> {
    conn.prepare_cached("SELECT 1 FROM copied_files WHERE file_id = ?1")?
        .exists(params![file_id])
}

fn is_failed(conn: &Connection, key: &str) -> Result<bool> {
    conn.prepare_cached("SELECT 1 FROM skipped_files WHERE filename = ?1")?
        .exists(params![key])
}
