pub mod copy;
pub mod outcome;
pub mod semaphore;

pub use outcome::Outcome;
pub use semaphore::{DiskPermit, DiskSemaphore};

use crate::error::Error;
use crate::index::{FileRecord, MetadataIndex};
use crate::ledger::models::{REASON_NOT_IN_DATABASE, REASON_SOURCE_MISSING};
use crate::ledger::{Ledger, LedgerReader, ResumeLog};
use crate::locator::ContentLocator;
use crate::progress::ProgressReporter;
use crate::resolver::{PathResolver, RootStrip};
use crate::scanner;
use ahash::AHashSet;
use dashmap::DashMap;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const PROGRESS_INTERVAL: usize = 100;

#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub dry_run: bool,
    pub sanitize_pipes: bool,
    pub preserve_mtime: bool,
    pub refresh_mtime_existing: bool,
    /// Stop after this many candidates.
    pub limit: Option<usize>,
    pub workers: usize,
    /// 0 keeps `fs::copy`.
    pub io_buffer_size: usize,
    /// 0 disables the disk semaphore.
    pub io_max_concurrency: usize,
    pub root_strip: RootStrip,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            sanitize_pipes: false,
            preserve_mtime: true,
            refresh_mtime_existing: false,
            limit: None,
            workers: 4,
            io_buffer_size: 0,
            io_max_concurrency: 0,
            root_strip: RootStrip::Detect,
        }
    }
}

/// Where the candidate set comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WalkMode {
    /// Records with no ledger entry, straight from the database.
    #[default]
    Database,
    /// Every blob under the source root, mapped back to a record by filename.
    SourceTree,
}

#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    pub processed: usize,
    pub copied: usize,
    pub would_copy: usize,
    pub already_completed: usize,
    pub already_at_destination: usize,
    pub previously_failed: usize,
    pub source_missing: usize,
    pub not_in_database: usize,
    pub unresolvable: usize,
    pub errors: usize,
    pub bytes_copied: u64,
    pub interrupted: bool,
    pub duration: Duration,
    /// Failure reasons recorded this run, most frequent first.
    pub failure_reasons: Vec<(String, usize)>,
}

impl TransferStats {
    pub fn transferred(&self) -> usize {
        self.copied + self.would_copy
    }

    pub fn skipped(&self) -> usize {
        self.processed - self.transferred()
    }
}

#[derive(Default)]
struct Counters {
    processed: AtomicUsize,
    copied: AtomicUsize,
    would_copy: AtomicUsize,
    already_completed: AtomicUsize,
    already_at_destination: AtomicUsize,
    previously_failed: AtomicUsize,
    source_missing: AtomicUsize,
    not_in_database: AtomicUsize,
    unresolvable: AtomicUsize,
    errors: AtomicUsize,
    bytes_copied: AtomicU64,
}

enum Candidate<'r> {
    Record(&'r FileRecord),
    Blob(PathBuf),
}

/// Materializes records from the content store into the destination tree,
/// recording every outcome in the ledger.
///
/// The ledger is written only after the file is in place. Counters
/// accumulate over the engine's lifetime and can be read at any time with
/// [`TransferEngine::stats`].
pub struct TransferEngine<'a> {
    index: &'a MetadataIndex,
    ledger: &'a Ledger,
    resolver: PathResolver<'a>,
    locator: ContentLocator,
    dest_root: PathBuf,
    options: TransferOptions,
    resume_log: Option<&'a ResumeLog>,
    disk_permits: Option<DiskSemaphore>,
    cancel: Arc<AtomicBool>,
    counters: Counters,
    failure_reasons: DashMap<String, usize>,
}

impl<'a> TransferEngine<'a> {
    pub fn new(
        index: &'a MetadataIndex,
        ledger: &'a Ledger,
        source_root: impl Into<PathBuf>,
        dest_root: impl Into<PathBuf>,
        options: TransferOptions,
    ) -> Self {
        let resolver = PathResolver::new(index, &options.root_strip, options.sanitize_pipes);
        let disk_permits = match options.io_max_concurrency {
            0 => None,
            n => Some(DiskSemaphore::new(n)),
        };
        Self {
            index,
            ledger,
            resolver,
            locator: ContentLocator::new(source_root),
            dest_root: dest_root.into(),
            options,
            resume_log: None,
            disk_permits,
            cancel: Arc::new(AtomicBool::new(false)),
            counters: Counters::default(),
            failure_reasons: DashMap::new(),
        }
    }

    pub fn with_resume_log(mut self, log: &'a ResumeLog) -> Self {
        self.resume_log = Some(log);
        self
    }

    /// Share an existing cancellation flag, e.g. one already wired to a
    /// signal handler.
    pub fn with_cancel_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancel = token;
        self
    }

    /// Setting the returned flag stops workers from picking up new records.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn resolver(&self) -> &PathResolver<'a> {
        &self.resolver
    }

    pub fn dest_root(&self) -> &Path {
        &self.dest_root
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Process a single record on the calling thread.
    pub fn transfer(&self, record: &FileRecord) -> Outcome {
        let outcome = self.process_record(record, None, None, None);
        debug!("Record {}: {}", record.id, outcome.label());
        self.tally(&outcome);
        outcome
    }

    /// Run every eligible candidate through the worker pool.
    pub fn materialize_all(
        &self,
        mode: WalkMode,
        reporter: &dyn ProgressReporter,
    ) -> Result<TransferStats, Error> {
        let start = Instant::now();
        let mut candidates = self.candidates(mode)?;
        if let Some(limit) = self.options.limit {
            if candidates.len() > limit {
                info!("Limiting run to {} of {} candidates", limit, candidates.len());
                candidates.truncate(limit);
            }
        }

        let logged = match (mode, self.resume_log) {
            (WalkMode::SourceTree, Some(log)) => {
                let entries = log.entries()?;
                debug!("Loaded {} resume log entries", entries.len());
                Some(entries)
            }
            _ => None,
        };

        info!(
            "Transferring {} candidates with {} workers{}",
            candidates.len(),
            self.options.workers,
            if self.options.dry_run { " (dry run)" } else { "" }
        );
        reporter.on_transfer_start(candidates.len());

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.workers.max(1))
            .build()
            .map_err(|e| Error::Other(format!("failed to build worker pool: {}", e)))?;

        pool.install(|| {
            candidates.par_iter().for_each_init(
                || match self.ledger.reader() {
                    Ok(reader) => Some(reader),
                    Err(e) => {
                        warn!("Falling back to the shared ledger connection: {}", e);
                        None
                    }
                },
                |reader, candidate| {
                    if self.cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    let outcome = match candidate {
                        Candidate::Record(record) => {
                            self.process_record(record, None, reader.as_ref(), logged.as_ref())
                        }
                        Candidate::Blob(path) => {
                            self.process_blob(path, reader.as_ref(), logged.as_ref())
                        }
                    };
                    let processed = self.tally(&outcome);
                    if processed % PROGRESS_INTERVAL == 0 {
                        let transferred = self.counters.copied.load(Ordering::Relaxed)
                            + self.counters.would_copy.load(Ordering::Relaxed);
                        reporter.on_transfer_progress(
                            processed,
                            transferred,
                            processed.saturating_sub(transferred),
                        );
                    }
                },
            );
        });

        let mut stats = self.stats();
        stats.duration = start.elapsed();
        if stats.interrupted {
            warn!("Transfer interrupted after {} records", stats.processed);
        }
        info!(
            "Transfer finished: {} copied, {} already present, {} failed in {:.2}s",
            stats.copied,
            stats.already_completed + stats.already_at_destination,
            stats.source_missing + stats.not_in_database + stats.errors,
            stats.duration.as_secs_f64()
        );
        reporter.on_transfer_complete(&stats);
        Ok(stats)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> TransferStats {
        let c = &self.counters;
        let mut failure_reasons: Vec<(String, usize)> = self
            .failure_reasons
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        failure_reasons.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        TransferStats {
            processed: c.processed.load(Ordering::Relaxed),
            copied: c.copied.load(Ordering::Relaxed),
            would_copy: c.would_copy.load(Ordering::Relaxed),
            already_completed: c.already_completed.load(Ordering::Relaxed),
            already_at_destination: c.already_at_destination.load(Ordering::Relaxed),
            previously_failed: c.previously_failed.load(Ordering::Relaxed),
            source_missing: c.source_missing.load(Ordering::Relaxed),
            not_in_database: c.not_in_database.load(Ordering::Relaxed),
            unresolvable: c.unresolvable.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            bytes_copied: c.bytes_copied.load(Ordering::Relaxed),
            interrupted: self.cancel.load(Ordering::Relaxed),
            duration: Duration::default(),
            failure_reasons,
        }
    }

    fn candidates(&self, mode: WalkMode) -> Result<Vec<Candidate<'a>>, Error> {
        let index = self.index;
        match mode {
            WalkMode::Database => {
                let records: Vec<Candidate<'a>> = match self.ledger.pending_file_ids() {
                    Ok(ids) => ids
                        .iter()
                        .filter_map(|id| index.get(id))
                        .filter(|r| r.is_file())
                        .map(Candidate::Record)
                        .collect(),
                    Err(e) => {
                        warn!("Pending-record query failed, walking the whole index: {}", e);
                        index.files().map(Candidate::Record).collect()
                    }
                };
                debug!("{} pending file records", records.len());
                Ok(records)
            }
            WalkMode::SourceTree => {
                let blobs = scanner::collect_source_files(self.locator.source_root())?;
                debug!(
                    "{} blobs under {}",
                    blobs.len(),
                    self.locator.source_root().display()
                );
                Ok(blobs.into_iter().map(Candidate::Blob).collect())
            }
        }
    }

    fn process_blob(
        &self,
        path: &Path,
        reader: Option<&LedgerReader>,
        logged: Option<&AHashSet<String>>,
    ) -> Outcome {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match self.index.resolve_filename(&filename) {
            Some(record) => self.process_record(record, Some(path), reader, logged),
            None => {
                debug!("No record for source file {}", path.display());
                if !self.options.dry_run {
                    self.record_failed(&filename, REASON_NOT_IN_DATABASE);
                }
                Outcome::NotInDatabase
            }
        }
    }

    /// `walked` is the blob found by a source-tree walk; database walks leave
    /// it empty and look the blob up by content ID.
    fn process_record(
        &self,
        record: &FileRecord,
        walked: Option<&Path>,
        reader: Option<&LedgerReader>,
        logged: Option<&AHashSet<String>>,
    ) -> Outcome {
        if !record.is_file() {
            return Outcome::Unresolvable;
        }
        if self.is_completed(&record.id, reader) {
            return Outcome::AlreadyCompleted;
        }
        if self.is_failed(record.failure_key(), reader) {
            return Outcome::PreviouslyFailed;
        }

        let Some(rel_path) = self.resolver.resolve(&record.id) else {
            debug!("No usable path for record {}", record.id);
            return Outcome::Unresolvable;
        };
        let dest = self.dest_root.join(&rel_path);

        if logged.is_some_and(|entries| entries.contains(&*dest.to_string_lossy())) {
            return Outcome::AlreadyCompleted;
        }

        if dest.is_file() {
            if !self.options.dry_run {
                let refreshed = self.options.refresh_mtime_existing && self.apply_mtime(record, &dest);
                self.record_completed(record, refreshed);
            }
            return Outcome::AlreadyAtDestination;
        }

        let source = match walked {
            Some(path) => path.to_path_buf(),
            None => self.locator.resolve(record.content_id.as_deref()),
        };
        if !source.is_file() {
            debug!("Source missing for {}: {}", rel_path, source.display());
            if !self.options.dry_run {
                self.record_failed(record.failure_key(), REASON_SOURCE_MISSING);
            }
            return Outcome::SourceMissing;
        }

        if self.options.dry_run {
            debug!("Would copy {} -> {}", source.display(), dest.display());
            return Outcome::WouldCopy;
        }

        let copied = {
            let _permit = self.disk_permits.as_ref().map(DiskSemaphore::acquire);
            copy::copy_blob(&source, &dest, self.options.io_buffer_size)
        };
        match copied {
            Ok(bytes) => {
                self.counters.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
            }
            Err(e) => {
                let reason = copy::classify_io_error(&e);
                error!("Error copying {} to {}: {}", source.display(), dest.display(), e);
                self.record_failed(record.failure_key(), &reason);
                return Outcome::Error(reason);
            }
        }

        let refreshed = self.options.preserve_mtime && self.apply_mtime(record, &dest);
        self.record_completed(record, refreshed);
        if let Some(log) = self.resume_log {
            if let Err(e) = log.append(&dest) {
                warn!("Could not append {} to resume log: {}", dest.display(), e);
            }
        }
        debug!("Copied {} -> {}", source.display(), dest.display());
        Outcome::Copied
    }

    fn apply_mtime(&self, record: &FileRecord, dest: &Path) -> bool {
        let Some(millis) = record.best_timestamp() else {
            return false;
        };
        match copy::set_mtime_millis(dest, millis) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not set mtime on {}: {}", dest.display(), e);
                false
            }
        }
    }

    fn is_completed(&self, id: &str, reader: Option<&LedgerReader>) -> bool {
        let result = match reader {
            Some(r) => r.is_completed(id),
            None => self.ledger.is_completed(id),
        };
        result.unwrap_or_else(|e| {
            warn!("Ledger lookup failed for {}: {}", id, e);
            false
        })
    }

    fn is_failed(&self, key: &str, reader: Option<&LedgerReader>) -> bool {
        let result = match reader {
            Some(r) => r.is_failed(key),
            None => self.ledger.is_failed(key),
        };
        result.unwrap_or_else(|e| {
            warn!("Ledger lookup failed for {}: {}", key, e);
            false
        })
    }

    /// Write failures are logged; the in-memory outcome still counts.
    fn record_completed(&self, record: &FileRecord, mtime_refreshed: bool) {
        let label = record.content_id.as_deref().unwrap_or_default();
        if let Err(e) = self.ledger.mark_completed(&record.id, label) {
            error!("Could not record completion of {}: {}", record.id, e);
            return;
        }
        if mtime_refreshed {
            if let Err(e) = self.ledger.mark_mtime_refreshed(&record.id) {
                warn!("Could not flag mtime refresh for {}: {}", record.id, e);
            }
        }
    }

    fn record_failed(&self, key: &str, reason: &str) {
        if let Err(e) = self.ledger.mark_failed(key, reason) {
            error!("Could not record failure of {}: {}", key, e);
        }
    }

    fn tally(&self, outcome: &Outcome) -> usize {
        let c = &self.counters;
        let counter = match outcome {
            Outcome::Copied => &c.copied,
            Outcome::WouldCopy => &c.would_copy,
            Outcome::AlreadyCompleted => &c.already_completed,
            Outcome::AlreadyAtDestination => &c.already_at_destination,
            Outcome::PreviouslyFailed => &c.previously_failed,
            Outcome::SourceMissing => &c.source_missing,
            Outcome::NotInDatabase => &c.not_in_database,
            Outcome::Unresolvable => &c.unresolvable,
            Outcome::Error(_) => &c.errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let reason = match outcome {
            Outcome::SourceMissing => Some(REASON_SOURCE_MISSING),
            Outcome::NotInDatabase => Some(REASON_NOT_IN_DATABASE),
            Outcome::Error(reason) => Some(reason.as_str()),
            _ => None,
        };
        if let Some(reason) = reason {
            *self.failure_reasons.entry(reason.to_string()).or_insert(0) += 1;
        }

        c.processed.fetch_add(1, Ordering::Relaxed) + 1
    }
}
