use crate::error::Error;
use crate::index::MetadataIndex;
use crate::ledger::Ledger;
use crate::progress::ProgressReporter;
use crate::resolver::{PathResolver, RootStrip};
use crate::transfer::copy;
use filetime::FileTime;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const PROGRESS_INTERVAL: usize = 1000;
const TOLERANCE_MILLIS: u64 = 1000;

#[derive(Debug, Clone, Default)]
pub struct MtimeSyncOptions {
    pub dry_run: bool,
    pub sanitize_pipes: bool,
    pub root_strip: RootStrip,
    pub cancel: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Default)]
pub struct MtimeSyncStats {
    pub total: usize,
    pub updated: usize,
    pub no_change_needed: usize,
    pub skipped_no_timestamp: usize,
    pub skipped_not_found: usize,
    pub errors: usize,
    pub interrupted: bool,
    pub duration: Duration,
}

/// Set the mtime of every file the ledger lists as completed to the
/// record's best timestamp. Files already within a second of it are left
/// alone. Successful updates flag the ledger row as refreshed.
pub fn sync_mtimes(
    index: &MetadataIndex,
    ledger: &Ledger,
    dest_root: &Path,
    options: &MtimeSyncOptions,
    reporter: &dyn ProgressReporter,
) -> Result<MtimeSyncStats, Error> {
    let start = Instant::now();
    let resolver = PathResolver::new(index, &options.root_strip, options.sanitize_pipes);
    let entries = ledger.completed_entries()?;
    let mut stats = MtimeSyncStats::default();

    info!("Syncing mtimes for {} completed entries", entries.len());
    reporter.on_mtime_start(entries.len());

    for entry in &entries {
        if options.cancel.load(Ordering::Relaxed) {
            warn!("Mtime sync interrupted after {} entries", stats.total);
            stats.interrupted = true;
            break;
        }
        stats.total += 1;
        if stats.total % PROGRESS_INTERVAL == 0 {
            reporter.on_mtime_progress(stats.total, stats.updated);
        }

        let Some(record) = index.get(&entry.file_id) else {
            debug!("Ledger entry {} has no record", entry.file_id);
            stats.skipped_not_found += 1;
            continue;
        };
        let Some(millis) = record.best_timestamp() else {
            stats.skipped_no_timestamp += 1;
            continue;
        };
        let Some(rel_path) = resolver.resolve(&record.id) else {
            stats.skipped_not_found += 1;
            continue;
        };
        let dest = dest_root.join(&rel_path);
        let metadata = match fs::metadata(&dest) {
            Ok(m) if m.is_file() => m,
            _ => {
                debug!("Not found at destination: {}", rel_path);
                stats.skipped_not_found += 1;
                continue;
            }
        };

        let current = to_millis(FileTime::from_last_modification_time(&metadata));
        if within_tolerance(current, millis) {
            stats.no_change_needed += 1;
            continue;
        }

        if options.dry_run {
            debug!("Would set mtime of {} to {}", rel_path, millis);
            stats.updated += 1;
            continue;
        }

        match copy::set_mtime_millis(&dest, millis) {
            Ok(()) => {
                stats.updated += 1;
                if let Err(e) = ledger.mark_mtime_refreshed(&record.id) {
                    warn!("Could not flag mtime refresh for {}: {}", record.id, e);
                }
            }
            Err(e) => {
                warn!("Could not set mtime on {}: {}", dest.display(), e);
                stats.errors += 1;
            }
        }
    }

    stats.duration = start.elapsed();
    info!(
        "Mtime sync finished: {} updated, {} unchanged, {} without timestamp, {} not found, {} errors",
        stats.updated,
        stats.no_change_needed,
        stats.skipped_no_timestamp,
        stats.skipped_not_found,
        stats.errors
    );
    reporter.on_mtime_complete(&stats);
    Ok(stats)
}

fn to_millis(time: FileTime) -> i64 {
    time.unix_seconds()
        .saturating_mul(1000)
        .saturating_add(i64::from(time.nanoseconds() / 1_000_000))
}

fn within_tolerance(current: i64, wanted: i64) -> bool {
    current.abs_diff(wanted) < TOLERANCE_MILLIS
}
