pub mod models;

pub use models::{FileRecord, RecordTimes, DIRECTORY_MIME_TYPE};

use crate::error::Error;
use crate::progress::{ProgressReporter, SilentReporter};
use ahash::AHashMap;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use tracing::{debug, info, warn};

const FILES_TABLE: &str = "Files";
const REQUIRED_COLUMNS: [&str; 4] = ["id", "name", "parentID", "contentID"];
const TIMESTAMP_COLUMNS: [&str; 4] = ["imageDate", "videoDate", "cTime", "birthTime"];

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Skip the four timestamp columns to keep per-record memory down.
    pub low_memory: bool,
}

/// In-memory copy of the `Files` table, keyed by record id, with reverse
/// lookups by content ID and by name. Built once and read-only afterwards.
#[derive(Debug, Default)]
pub struct MetadataIndex {
    records: Vec<FileRecord>,
    by_id: AHashMap<String, usize>,
    by_content_id: AHashMap<String, usize>,
    by_name: AHashMap<String, usize>,
}

impl MetadataIndex {
    /// Read every row of the `Files` table in one pass.
    pub fn load(db_path: &Path, options: LoadOptions) -> Result<Self, Error> {
        Self::load_with_reporter(db_path, options, &SilentReporter)
    }

    pub fn load_with_reporter(
        db_path: &Path,
        options: LoadOptions,
        reporter: &dyn ProgressReporter,
    ) -> Result<Self, Error> {
        reporter.on_load_start(db_path);
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(std::time::Duration::from_millis(5000))?;

        let columns = table_columns(&conn, FILES_TABLE)?;
        if columns.is_empty() {
            return Err(Error::Schema(format!(
                "table '{}' not found in {}",
                FILES_TABLE,
                db_path.display()
            )));
        }
        let has = |name: &str| columns.iter().any(|c| c.eq_ignore_ascii_case(name));
        for required in REQUIRED_COLUMNS {
            if !has(required) {
                return Err(Error::Schema(format!(
                    "table '{}' is missing required column '{}'",
                    FILES_TABLE, required
                )));
            }
        }

        ensure_lookup_indexes(&conn, has("contentID"), has("parentID"));

        let optional = |name: &str, wanted: bool| {
            if wanted && has(name) {
                name.to_string()
            } else {
                "NULL".to_string()
            }
        };
        let mut select: Vec<String> = REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect();
        for ts in TIMESTAMP_COLUMNS {
            select.push(optional(ts, !options.low_memory));
        }
        select.push(optional("mimeType", true));
        let sql = format!("SELECT {} FROM {}", select.join(", "), FILES_TABLE);

        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map([], |row| {
                let id = text_value(row.get_ref(0)?).unwrap_or_default();
                let name = text_value(row.get_ref(1)?).unwrap_or_default();
                let parent_id = text_value(row.get_ref(2)?);
                let content_id = text_value(row.get_ref(3)?);
                let times = RecordTimes {
                    image_date: millis_value(row.get_ref(4)?),
                    video_date: millis_value(row.get_ref(5)?),
                    c_time: millis_value(row.get_ref(6)?),
                    birth_time: millis_value(row.get_ref(7)?),
                };
                let dir_marker = matches!(
                    text_value(row.get_ref(8)?).as_deref(),
                    Some(DIRECTORY_MIME_TYPE)
                );
                Ok(FileRecord {
                    id,
                    name,
                    parent_id,
                    content_id,
                    dir_marker,
                    times: None,
                }
                .with_times(times))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let index = Self::from_records(records);
        info!(
            "Loaded {} records ({} files) from {}{}",
            index.len(),
            index.file_count(),
            db_path.display(),
            if options.low_memory { " in low-memory mode" } else { "" }
        );
        reporter.on_load_complete(index.len(), index.file_count());
        Ok(index)
    }

    /// Build an index from already materialised records, in the given order.
    pub fn from_records(records: Vec<FileRecord>) -> Self {
        let mut by_id = AHashMap::with_capacity(records.len());
        let mut by_content_id = AHashMap::new();
        let mut by_name = AHashMap::new();

        for (pos, record) in records.iter().enumerate() {
            by_id.insert(record.id.clone(), pos);
            if let Some(cid) = record.content_id.as_deref().filter(|c| !c.is_empty()) {
                by_content_id.insert(cid.to_string(), pos);
            }
            if !record.name.is_empty() {
                by_name.insert(record.name.clone(), pos);
            }
        }
        debug!(
            "Built reverse lookups: {} content IDs, {} names",
            by_content_id.len(),
            by_name.len()
        );

        Self {
            records,
            by_id,
            by_content_id,
            by_name,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn file_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_file()).count()
    }

    /// Records in load order.
    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.records.iter().filter(|r| r.is_file())
    }

    pub fn get(&self, id: &str) -> Option<&FileRecord> {
        self.by_id.get(id).map(|&pos| &self.records[pos])
    }

    /// The parent record of `id`, if both exist.
    pub fn parent_of(&self, id: &str) -> Option<&FileRecord> {
        self.get(id)
            .and_then(|r| r.parent_id.as_deref())
            .and_then(|pid| self.get(pid))
    }

    /// First record name (in load order) containing both `auth` and `|`.
    pub fn find_auth_root(&self) -> Option<&str> {
        self.records
            .iter()
            .map(|r| r.name.as_str())
            .find(|name| name.contains("auth") && name.contains('|'))
    }

    pub fn resolve_by_content_id(&self, content_id: &str) -> Option<&FileRecord> {
        self.by_content_id.get(content_id).map(|&pos| &self.records[pos])
    }

    pub fn resolve_by_name(&self, name: &str) -> Option<&FileRecord> {
        self.by_name.get(name).map(|&pos| &self.records[pos])
    }

    /// Map a physical blob filename back to its record: content ID first,
    /// then logical name.
    pub fn resolve_filename(&self, filename: &str) -> Option<&FileRecord> {
        self.resolve_by_content_id(filename)
            .or_else(|| self.resolve_by_name(filename))
    }

    pub fn has_pipe_names(&self) -> bool {
        self.records.iter().any(|r| r.name.contains('|'))
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, Error> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn ensure_lookup_indexes(conn: &Connection, content_id: bool, parent_id: bool) {
    let mut sql = String::new();
    if content_id {
        sql.push_str("CREATE INDEX IF NOT EXISTS idx_contentID ON Files (contentID);");
    }
    if parent_id {
        sql.push_str("CREATE INDEX IF NOT EXISTS idx_parentID ON Files (parentID);");
    }
    if let Err(e) = conn.execute_batch(&sql) {
        warn!("Could not create lookup indexes on {}: {}", FILES_TABLE, e);
    }
}

fn text_value(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

/// Only numeric cells count as timestamps.
fn millis_value(value: ValueRef<'_>) -> Option<i64> {
    match value {
        ValueRef::Integer(i) => Some(i),
        ValueRef::Real(f) => Some(f as i64),
        _ => None,
    }
}
