/// Result of processing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Blob copied into place and ledger updated.
    Copied,
    /// Dry run: a copy would have happened.
    WouldCopy,
    /// Ledger (or resume log) already lists the record.
    AlreadyCompleted,
    /// A regular file already sits at the destination path.
    AlreadyAtDestination,
    /// Recorded as failed on an earlier run; never retried automatically.
    PreviouslyFailed,
    /// Blob absent in both sharded and flat layouts.
    SourceMissing,
    /// Physical source file with no matching record.
    NotInDatabase,
    /// Directory record, or no usable path could be reconstructed.
    Unresolvable,
    /// I/O failure during the copy; carries the recorded reason.
    Error(String),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Copied => "copied",
            Outcome::WouldCopy => "would_copy",
            Outcome::AlreadyCompleted => "already_completed",
            Outcome::AlreadyAtDestination => "already_at_destination",
            Outcome::PreviouslyFailed => "previously_failed",
            Outcome::SourceMissing => "source_missing",
            Outcome::NotInDatabase => "not_in_database",
            Outcome::Unresolvable => "unresolvable",
            Outcome::Error(_) => "error",
        }
    }
}
