/// Reason recorded when a record's blob is absent from the source store.
pub const REASON_SOURCE_MISSING: &str = "source_missing";
/// Reason recorded when a physical source file has no `Files` row.
pub const REASON_NOT_IN_DATABASE: &str = "not_in_database";
/// Prefix of reasons recorded for I/O failures during copy or link.
pub const REASON_COPY_ERROR_PREFIX: &str = "copy_error";

/// A successful transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedEntry {
    pub file_id: String,
    pub filename: String,
    pub copied_at: String,
    pub mtime_refreshed: bool,
}

/// A permanently skipped key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub key: String,
    pub reason: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSummary {
    pub completed: i64,
    pub failed: i64,
    pub mtime_refreshed: i64,
}
