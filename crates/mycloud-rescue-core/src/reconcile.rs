use crate::error::Error;
use crate::index::MetadataIndex;
use crate::ledger::{Ledger, ResumeLog};
use crate::progress::ProgressReporter;
use crate::resolver::{PathResolver, RootStrip};
use crate::scanner;
use ahash::AHashMap;
use rayon::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const BATCH_SIZE: usize = 10_000;
const PROGRESS_INTERVAL: usize = 10_000;

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub root_strip: RootStrip,
    /// Checked before each destination entry; matches found so far are
    /// still committed when it is set.
    pub cancel: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileStats {
    /// Number of reconstructed paths available for matching.
    pub lookup_paths: usize,
    pub scanned: usize,
    pub matched: usize,
    /// Matches that were not already in the ledger.
    pub newly_recorded: usize,
    pub unmatched: usize,
    pub log_entries: Option<usize>,
    pub interrupted: bool,
    pub duration: Duration,
}

/// Rebuild the completed half of the ledger from what already sits under
/// `dest_root`.
///
/// Every file record's unsanitized path is computed up front; each
/// destination file is then matched by its relative path, retrying with
/// `-` turned back into `|` for trees written with pipe sanitization.
/// Files with no matching record are counted and left alone. When a resume
/// log is given it is regenerated from the same walk, unless the scan is
/// cancelled part way, in which case the old log is kept.
pub fn rebuild_from_destination(
    index: &MetadataIndex,
    ledger: &Ledger,
    dest_root: &Path,
    options: &ReconcileOptions,
    resume_log: Option<&ResumeLog>,
    reporter: &dyn ProgressReporter,
) -> Result<ReconcileStats, Error> {
    let start = Instant::now();
    let resolver = PathResolver::new(index, &options.root_strip, false);

    info!("Building path lookup for {} file records...", index.file_count());
    let path_to_id = build_path_lookup(index, &resolver);
    let mut stats = ReconcileStats {
        lookup_paths: path_to_id.len(),
        ..ReconcileStats::default()
    };
    debug!("{} reconstructed paths available for matching", stats.lookup_paths);
    reporter.on_reconcile_start(stats.lookup_paths);

    let mut rewrite = match resume_log {
        Some(log) => Some(log.begin_rewrite()?),
        None => None,
    };

    info!("Scanning {} for existing files...", dest_root.display());
    let mut batch: Vec<(String, String)> = Vec::with_capacity(BATCH_SIZE);
    for entry in scanner::files_under(dest_root) {
        if options.cancel.load(Ordering::Relaxed) {
            stats.interrupted = true;
            break;
        }
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable destination entry: {}", e);
                continue;
            }
        };
        stats.scanned += 1;
        if let Some(rewrite) = rewrite.as_mut() {
            rewrite.push(entry.path())?;
        }

        let rel_path = relative_path(dest_root, entry.path());
        match match_path(&path_to_id, &rel_path) {
            Some(id) => {
                stats.matched += 1;
                batch.push((id.to_string(), rel_path));
                if batch.len() >= BATCH_SIZE {
                    stats.newly_recorded += flush(ledger, &mut batch)?;
                }
            }
            None => {
                debug!("No record matches {}", rel_path);
                stats.unmatched += 1;
            }
        }

        if stats.scanned % PROGRESS_INTERVAL == 0 {
            info!(
                "Scanned {} files ({} matched, {} unmatched)",
                stats.scanned, stats.matched, stats.unmatched
            );
            reporter.on_reconcile_progress(stats.scanned, stats.matched, stats.unmatched);
        }
    }
    stats.newly_recorded += flush(ledger, &mut batch)?;
    drop(path_to_id);

    match (rewrite, resume_log) {
        (Some(rewrite), Some(log)) if !stats.interrupted => {
            stats.log_entries = Some(rewrite.commit(log)?);
        }
        (Some(rewrite), Some(log)) => {
            warn!("Scan interrupted; keeping the previous {}", log.path().display());
            rewrite.discard();
        }
        _ => {}
    }

    stats.duration = start.elapsed();
    if stats.interrupted {
        warn!("Reconciliation interrupted after {} files", stats.scanned);
    }
    info!(
        "Reconciliation finished: {} scanned, {} matched ({} new), {} unmatched in {:.2}s",
        stats.scanned,
        stats.matched,
        stats.newly_recorded,
        stats.unmatched,
        stats.duration.as_secs_f64()
    );
    reporter.on_reconcile_complete(&stats);
    Ok(stats)
}

/// Relative path -> record id for every file record. Paths are resolved in
/// parallel but inserted in load order, so a later record wins a collision.
fn build_path_lookup<'i>(
    index: &'i MetadataIndex,
    resolver: &PathResolver<'_>,
) -> AHashMap<String, &'i str> {
    let resolved: Vec<(String, &'i str)> = index
        .records()
        .par_iter()
        .filter(|r| r.is_file())
        .filter_map(|r| resolver.resolve(&r.id).map(|path| (path, r.id.as_str())))
        .collect();

    let mut lookup = AHashMap::with_capacity(resolved.len());
    for (path, id) in resolved {
        lookup.insert(path, id);
    }
    lookup
}

fn match_path<'i>(lookup: &AHashMap<String, &'i str>, rel_path: &str) -> Option<&'i str> {
    if let Some(id) = lookup.get(rel_path).copied() {
        return Some(id);
    }
    if rel_path.contains('-') {
        return lookup.get(&rel_path.replace('-', "|")).copied();
    }
    None
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn flush(ledger: &Ledger, batch: &mut Vec<(String, String)>) -> Result<usize, Error> {
    if batch.is_empty() {
        return Ok(0);
    }
    let inserted = ledger.mark_completed_batch(batch)?;
    debug!("Committed batch of {} matches ({} new)", batch.len(), inserted);
    batch.clear();
    Ok(inserted)
}
