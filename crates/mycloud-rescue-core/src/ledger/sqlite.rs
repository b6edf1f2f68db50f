use super::retry::RetryPolicy;
use crate::error::Error;
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Durable record of completed and failed transfers, stored next to the
/// `Files` table in the appliance database.
///
/// All writes go through one connection behind a mutex; workers that only
/// need membership checks open their own [`LedgerReader`].
pub struct Ledger {
    path: PathBuf,
    writer: Mutex<Connection>,
    retry: RetryPolicy,
}

/// Read-only connection for per-worker membership queries.
pub struct LedgerReader {
    conn: Connection,
}

impl Ledger {
    /// Open (or create) the database at `path` and make sure both ledger
    /// tables exist. Safe to call repeatedly.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        configure_pragmas(&conn)?;
        migrate_schema(&conn)?;
        Ok(Ledger {
            path: path.to_path_buf(),
            writer: Mutex::new(conn),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reader(&self) -> Result<LedgerReader, Error> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(LedgerReader { conn })
    }

    pub(crate) fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub(crate) fn writer(&self) -> &Mutex<Connection> {
        &self.writer
    }
}

impl LedgerReader {
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn configure_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;
    debug!("Ledger pragmas configured (WAL mode, 5s busy timeout)");
    Ok(())
}

/// Create both tables if absent, then add columns that older ledgers lack.
fn migrate_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(include_str!("schema.sql"))?;

    let mut stmt = conn.prepare("PRAGMA table_info(copied_files)")?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if !columns.iter().any(|c| c == "mtime_refreshed") {
        debug!("Adding mtime_refreshed column to existing copied_files table");
        conn.execute_batch(
            "ALTER TABLE copied_files ADD COLUMN mtime_refreshed INTEGER DEFAULT 0",
        )?;
    }
    debug!("Ledger schema initialized");
    Ok(())
}
