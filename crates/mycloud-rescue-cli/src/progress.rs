use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use mycloud_rescue_core::farm::FarmStats;
use mycloud_rescue_core::mtime::MtimeSyncStats;
use mycloud_rescue_core::reconcile::ReconcileStats;
use mycloud_rescue_core::{ProgressReporter, TransferStats};
use parking_lot::Mutex;
use std::path::Path;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Index load: spinner
/// - Reconciliation: spinner (destination size unknown upfront)
/// - Transfer, symlink farm, mtime sync: bars over the known record count
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        let mut guard = self.bar.lock();
        if let Some(old) = guard.take() {
            old.finish_and_clear();
        }
        *guard = Some(pb);
    }

    fn finish_bar(&self) {
        if let Some(pb) = self.bar.lock().take() {
            pb.finish_and_clear();
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Some(pb) = self.bar.lock().as_ref() {
            f(pb);
        }
    }

    fn start_spinner(&self, message: &str) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars(TICK_CHARS),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn start_bar(&self, label: &str, len: usize) {
        let pb = ProgressBar::new(len as u64);
        let template = format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} ({{eta}} remaining) {{msg}}",
            label
        );
        pb.set_style(
            ProgressStyle::with_template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("━╸─")
                .tick_chars(TICK_CHARS),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }
}

fn done(message: String) {
    eprintln!("  \x1b[32m✓\x1b[0m {}", message);
}

fn finished(interrupted: bool) -> &'static str {
    if interrupted {
        "interrupted"
    } else {
        "complete"
    }
}

impl ProgressReporter for CliReporter {
    fn on_load_start(&self, db_path: &Path) {
        self.start_spinner(&format!("Loading records from {}...", db_path.display()));
    }

    fn on_load_complete(&self, records: usize, files: usize) {
        self.finish_bar();
        done(format!("Loaded {} records ({} files)", records, files));
    }

    fn on_reconcile_start(&self, lookup_paths: usize) {
        self.start_spinner(&format!(
            "Matching destination files against {} database paths...",
            lookup_paths
        ));
    }

    fn on_reconcile_progress(&self, scanned: usize, matched: usize, unmatched: usize) {
        self.with_bar(|pb| {
            pb.set_message(format!(
                "Scanned {} files ({} matched, {} unmatched)",
                scanned, matched, unmatched
            ))
        });
    }

    fn on_reconcile_complete(&self, stats: &ReconcileStats) {
        self.finish_bar();
        done(format!(
            "Reconciliation {}: {} matched, {} unmatched in {}",
            finished(stats.interrupted),
            stats.matched,
            stats.unmatched,
            HumanDuration(stats.duration)
        ));
    }

    fn on_transfer_start(&self, eligible: usize) {
        self.start_bar("Copying", eligible);
    }

    fn on_transfer_progress(&self, processed: usize, transferred: usize, skipped: usize) {
        self.with_bar(|pb| {
            pb.set_position(processed as u64);
            pb.set_message(format!("{} copied, {} skipped", transferred, skipped));
        });
    }

    fn on_transfer_complete(&self, stats: &TransferStats) {
        self.finish_bar();
        done(format!(
            "Transfer {}: {} of {} records transferred in {}",
            finished(stats.interrupted),
            stats.transferred(),
            stats.processed,
            HumanDuration(stats.duration)
        ));
    }

    fn on_farm_start(&self, records: usize) {
        self.start_bar("Linking", records);
    }

    fn on_farm_progress(&self, processed: usize, created: usize) {
        self.with_bar(|pb| {
            pb.set_position(processed as u64);
            pb.set_message(format!("{} links", created));
        });
    }

    fn on_farm_complete(&self, stats: &FarmStats) {
        self.finish_bar();
        done(format!(
            "Symlink farm {}: {} links in {}",
            finished(stats.interrupted),
            stats.created,
            HumanDuration(stats.duration)
        ));
    }

    fn on_mtime_start(&self, entries: usize) {
        self.start_bar("Syncing", entries);
    }

    fn on_mtime_progress(&self, processed: usize, updated: usize) {
        self.with_bar(|pb| {
            pb.set_position(processed as u64);
            pb.set_message(format!("{} updated", updated));
        });
    }

    fn on_mtime_complete(&self, stats: &MtimeSyncStats) {
        self.finish_bar();
        done(format!(
            "Mtime sync {}: {} of {} updated in {}",
            finished(stats.interrupted),
            stats.updated,
            stats.total,
            HumanDuration(stats.duration)
        ));
    }
}
