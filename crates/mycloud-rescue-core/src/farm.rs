use crate::error::Error;
use crate::index::MetadataIndex;
use crate::locator::ContentLocator;
use crate::progress::ProgressReporter;
use crate::resolver::{PathResolver, RootStrip};
use crate::transfer::copy;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const PROGRESS_INTERVAL: usize = 1000;

#[derive(Debug, Clone, Default)]
pub struct FarmOptions {
    pub dry_run: bool,
    pub sanitize_pipes: bool,
    pub root_strip: RootStrip,
    pub cancel: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Default)]
pub struct FarmStats {
    pub created: usize,
    pub skipped_directories: usize,
    pub skipped_no_source: usize,
    pub skipped_real_file: usize,
    /// Unresolvable paths and failed link operations.
    pub errors: usize,
    pub interrupted: bool,
    pub duration: Duration,
}

/// Mirror the logical tree under `farm_root` as symlinks pointing at the
/// source blobs. An existing symlink is replaced; an existing regular file
/// is left untouched. The ledger is never consulted or written.
pub fn build_symlink_farm(
    index: &MetadataIndex,
    source_root: &Path,
    farm_root: &Path,
    options: &FarmOptions,
    reporter: &dyn ProgressReporter,
) -> Result<FarmStats, Error> {
    let start = Instant::now();
    let resolver = PathResolver::new(index, &options.root_strip, options.sanitize_pipes);
    let locator = ContentLocator::new(source_root);
    let mut stats = FarmStats::default();

    if !options.dry_run {
        fs::create_dir_all(farm_root)?;
    }

    info!(
        "Creating symlinks for {} records under {}",
        index.len(),
        farm_root.display()
    );
    reporter.on_farm_start(index.len());

    for (i, record) in index.records().iter().enumerate() {
        if options.cancel.load(Ordering::Relaxed) {
            warn!("Symlink farm interrupted after {} records", i);
            stats.interrupted = true;
            break;
        }
        if i > 0 && i % PROGRESS_INTERVAL == 0 {
            reporter.on_farm_progress(i, stats.created);
        }

        if !record.is_file() {
            stats.skipped_directories += 1;
            continue;
        }

        let source = locator.resolve(record.content_id.as_deref());
        if !source.is_file() {
            debug!("No source blob for {}", record.failure_key());
            stats.skipped_no_source += 1;
            continue;
        }

        let Some(rel_path) = resolver.resolve(&record.id) else {
            warn!("Could not reconstruct path for record {}", record.id);
            stats.errors += 1;
            continue;
        };
        let link = farm_root.join(&rel_path);

        if options.dry_run {
            debug!("Would link {} -> {}", link.display(), source.display());
            stats.created += 1;
            continue;
        }

        match place_link(&source, &link) {
            Ok(true) => stats.created += 1,
            Ok(false) => {
                debug!("Real file exists, leaving {}", link.display());
                stats.skipped_real_file += 1;
            }
            Err(e) => {
                warn!("Could not link {}: {}", link.display(), e);
                stats.errors += 1;
            }
        }
    }

    stats.duration = start.elapsed();
    info!(
        "Symlink farm finished: {} created, {} directories, {} without source, {} errors",
        stats.created, stats.skipped_directories, stats.skipped_no_source, stats.errors
    );
    reporter.on_farm_complete(&stats);
    Ok(stats)
}

/// Returns `false` when a regular file already occupies `link`.
fn place_link(source: &Path, link: &Path) -> io::Result<bool> {
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => fs::remove_file(link)?,
        Ok(_) => return Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    copy::create_symlink(&link_target(source), link)?;
    Ok(true)
}

/// Links must survive being followed from anywhere, so relative source
/// roots are made absolute.
fn link_target(source: &Path) -> PathBuf {
    source.canonicalize().unwrap_or_else(|_| source.to_path_buf())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::index::FileRecord;
    use crate::progress::SilentReporter;
    use tempfile::tempdir;

    fn index() -> MetadataIndex {
        MetadataIndex::from_records(vec![
            FileRecord::new("1", "root", None, None),
            FileRecord::new("2", "a.txt", Some("1"), Some("abc")),
            FileRecord::new("3", "b.txt", Some("1"), Some("missing")),
        ])
    }

    #[test]
    fn test_links_point_at_blobs() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir_all(source.join("a")).unwrap();
        fs::write(source.join("a/abc"), b"data").unwrap();
        let farm = tmp.path().join("farm");

        let stats = build_symlink_farm(
            &index(),
            &source,
            &farm,
            &FarmOptions::default(),
            &SilentReporter,
        )
        .unwrap();

        assert_eq!(stats.created, 1);
        assert_eq!(stats.skipped_directories, 1);
        assert_eq!(stats.skipped_no_source, 1);
        let link = farm.join("root/a.txt");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&link).unwrap(), b"data");
    }

    #[test]
    fn test_real_file_is_left_alone_and_links_replaced() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir_all(source.join("a")).unwrap();
        fs::write(source.join("a/abc"), b"data").unwrap();
        let farm = tmp.path().join("farm");

        let options = FarmOptions::default();
        build_symlink_farm(&index(), &source, &farm, &options, &SilentReporter).unwrap();
        let again = build_symlink_farm(&index(), &source, &farm, &options, &SilentReporter).unwrap();
        assert_eq!(again.created, 1);

        let link = farm.join("root/a.txt");
        fs::remove_file(&link).unwrap();
        fs::write(&link, b"real").unwrap();
        let third = build_symlink_farm(&index(), &source, &farm, &options, &SilentReporter).unwrap();
        assert_eq!(third.created, 0);
        assert_eq!(third.skipped_real_file, 1);
        assert_eq!(fs::read(&link).unwrap(), b"real");
    }

    #[test]
    fn test_dry_run_creates_nothing() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir_all(source.join("a")).unwrap();
        fs::write(source.join("a/abc"), b"data").unwrap();
        let farm = tmp.path().join("farm");

        let options = FarmOptions {
            dry_run: true,
            ..FarmOptions::default()
        };
        let stats = build_symlink_farm(&index(), &source, &farm, &options, &SilentReporter).unwrap();
        assert_eq!(stats.created, 1);
        assert!(!farm.exists());
    }

    #[test]
    fn test_cancelled_farm_links_nothing() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("source");
        fs::create_dir_all(source.join("a")).unwrap();
        fs::write(source.join("a/abc"), b"data").unwrap();
        let farm = tmp.path().join("farm");

        let options = FarmOptions::default();
        options.cancel.store(true, Ordering::SeqCst);
        let stats = build_symlink_farm(&index(), &source, &farm, &options, &SilentReporter).unwrap();
        assert!(stats.interrupted);
        assert_eq!(stats.created, 0);
        assert!(!farm.join("root/a.txt").exists());
    }
}
