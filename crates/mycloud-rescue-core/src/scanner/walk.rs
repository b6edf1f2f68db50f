use parking_lot::Mutex;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::error;
use walkdir::{DirEntry, WalkDir};

/// Suffix of the hidden sibling a blob is copied into before being renamed
/// into place.
pub const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirSummary {
    pub file_count: u64,
    pub total_bytes: u64,
}

/// Every non-directory entry (regular files and symlinks) below `root`,
/// without following links. In-progress copies are skipped.
pub fn files_under(root: &Path) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter(|entry| match entry {
            Ok(e) => !e.file_type().is_dir() && !is_partial_copy(e.path()),
            Err(_) => true,
        })
}

pub fn is_partial_copy(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(PARTIAL_SUFFIX))
}

/// File count and byte total below `path`, ignoring symlinks and entries
/// that cannot be read. A missing path summarises to zero.
pub fn directory_summary(path: &Path) -> DirSummary {
    let mut summary = DirSummary::default();
    for entry in WalkDir::new(path).follow_links(false).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            summary.file_count += 1;
            summary.total_bytes += metadata.len();
        }
    }
    summary
}

/// Number of non-directory entries below `path`.
pub fn count_files(path: &Path) -> u64 {
    files_under(path).flatten().count() as u64
}

/// Parallel walk of a content store. Returns every regular file, sorted so
/// callers see a stable order across runs.
pub fn collect_source_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let found = Mutex::new(Vec::new());
    visit_dirs(root, &found)?;
    let mut files = found.into_inner();
    files.sort();
    Ok(files)
}

fn visit_dirs(dir: &Path, found: &Mutex<Vec<PathBuf>>) -> io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            if err.kind() == io::ErrorKind::PermissionDenied {
                error!(
                    "Access denied reading directory {}: {}",
                    dir.display(),
                    err
                );
                return Ok(());
            } else {
                return Err(io::Error::new(
                    err.kind(),
                    format!("Error reading directory {}: {}", dir.display(), err),
                ));
            }
        }
    };

    entries.par_bridge().try_for_each(|entry_result| {
        let entry = entry_result.map_err(|err| {
            io::Error::new(
                err.kind(),
                format!("Error reading entry in directory {}: {}", dir.display(), err),
            )
        })?;

        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            visit_dirs(&path, found)?;
        } else if file_type.is_file() {
            found.lock().push(path);
        }
        Ok::<(), io::Error>(())
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_directory_summary_counts_regular_files() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::write(tmp.path().join("one.txt"), b"12345").unwrap();
        fs::write(tmp.path().join("a/b/two.txt"), b"123").unwrap();

        let summary = directory_summary(tmp.path());
        assert_eq!(summary.file_count, 2);
        assert_eq!(summary.total_bytes, 8);
    }

    #[cfg(unix)]
    #[test]
    fn test_directory_summary_skips_symlinks() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("real.txt"), b"abc").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real.txt"), tmp.path().join("link.txt"))
            .unwrap();

        let summary = directory_summary(tmp.path());
        assert_eq!(summary.file_count, 1);
        assert_eq!(summary.total_bytes, 3);
        // symlinks still count as destination entries
        assert_eq!(count_files(tmp.path()), 2);
    }

    #[test]
    fn test_directory_summary_missing_path() {
        let summary = directory_summary(Path::new("/definitely/not/here"));
        assert_eq!(summary, DirSummary::default());
    }

    #[test]
    fn test_collect_source_files_sorted_and_nested() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("b")).unwrap();
        fs::create_dir_all(tmp.path().join("a")).unwrap();
        fs::write(tmp.path().join("b/b1"), b"x").unwrap();
        fs::write(tmp.path().join("a/a1"), b"x").unwrap();
        fs::write(tmp.path().join("flat"), b"x").unwrap();

        let files = collect_source_files(tmp.path()).unwrap();
        assert_eq!(
            files,
            vec![
                tmp.path().join("a/a1"),
                tmp.path().join("b/b1"),
                tmp.path().join("flat"),
            ]
        );
    }

    #[test]
    fn test_partial_copies_are_hidden() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("photo.jpg"), b"x").unwrap();
        fs::write(tmp.path().join(".photo.jpg.partial"), b"x").unwrap();

        assert_eq!(count_files(tmp.path()), 1);
        assert!(is_partial_copy(Path::new("/x/.photo.jpg.partial")));
        assert!(!is_partial_copy(Path::new("/x/photo.partial")));
    }
}
