use crate::farm::FarmStats;
use crate::mtime::MtimeSyncStats;
use crate::reconcile::ReconcileStats;
use crate::transfer::TransferStats;
use std::path::Path;

/// Trait for observing long-running phases.
///
/// The CLI implements it with tracing/indicatif. Engines only emit counts;
/// formatting is left to the reporter. All methods have default no-op
/// implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_load_start(&self, _db_path: &Path) {}
    fn on_load_complete(&self, _records: usize, _files: usize) {}

    fn on_reconcile_start(&self, _lookup_paths: usize) {}
    fn on_reconcile_progress(&self, _scanned: usize, _matched: usize, _unmatched: usize) {}
    fn on_reconcile_complete(&self, _stats: &ReconcileStats) {}

    fn on_transfer_start(&self, _eligible: usize) {}
    fn on_transfer_progress(&self, _processed: usize, _transferred: usize, _skipped: usize) {}
    fn on_transfer_complete(&self, _stats: &TransferStats) {}

    fn on_farm_start(&self, _records: usize) {}
    fn on_farm_progress(&self, _processed: usize, _created: usize) {}
    fn on_farm_complete(&self, _stats: &FarmStats) {}

    fn on_mtime_start(&self, _entries: usize) {}
    fn on_mtime_progress(&self, _processed: usize, _updated: usize) {}
    fn on_mtime_complete(&self, _stats: &MtimeSyncStats) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
