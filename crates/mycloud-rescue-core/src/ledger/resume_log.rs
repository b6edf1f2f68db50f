use crate::error::Error;
use crate::scanner::walk;
use ahash::AHashSet;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Append-only text log of destination paths, one per completed transfer.
/// Kept alongside the database ledger as a human-readable record.
pub struct ResumeLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

/// In-progress regeneration of a resume log. Lines go to `<log>.tmp`;
/// [`LogRewrite::commit`] renames it over the real log.
pub struct LogRewrite {
    tmp_path: PathBuf,
    final_path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl ResumeLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, dest_path: &Path) -> io::Result<()> {
        let mut guard = self.file.lock();
        if guard.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            *guard = Some(OpenOptions::new().create(true).append(true).open(&self.path)?);
        }
        if let Some(file) = guard.as_mut() {
            writeln!(file, "{}", dest_path.to_string_lossy())?;
            file.flush()?;
        }
        Ok(())
    }

    /// Every line of the log. A missing log reads as empty.
    pub fn entries(&self) -> io::Result<AHashSet<String>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(AHashSet::new()),
            Err(e) => return Err(e),
        };
        let mut entries = AHashSet::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if !line.is_empty() {
                entries.insert(line);
            }
        }
        Ok(entries)
    }

    pub fn begin_rewrite(&self) -> io::Result<LogRewrite> {
        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);
        if let Some(parent) = tmp_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(&tmp_path)?);
        Ok(LogRewrite {
            tmp_path,
            final_path: self.path.clone(),
            writer,
            lines: 0,
        })
    }

    /// Replace the log with every file currently under `dest_root`.
    pub fn rewrite_from_destination(&self, dest_root: &Path) -> Result<usize, Error> {
        let mut rewrite = self.begin_rewrite()?;
        for entry in walk::files_under(dest_root) {
            rewrite.push(entry?.path())?;
        }
        let lines = rewrite.commit(self)?;
        Ok(lines)
    }
}

impl LogRewrite {
    pub fn push(&mut self, dest_path: &Path) -> io::Result<()> {
        writeln!(self.writer, "{}", dest_path.to_string_lossy())?;
        self.lines += 1;
        Ok(())
    }

    /// Throw the partial rewrite away, leaving the current log as it was.
    pub fn discard(self) {
        let LogRewrite {
            tmp_path, writer, ..
        } = self;
        drop(writer);
        if let Err(e) = fs::remove_file(&tmp_path) {
            debug!("Could not remove {}: {}", tmp_path.display(), e);
        }
    }

    /// Flush and atomically move the new log into place. Any handle the
    /// log holds for appending is dropped first so later appends target the
    /// new file.
    pub fn commit(mut self, log: &ResumeLog) -> io::Result<usize> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        let mut guard = log.file.lock();
        *guard = None;
        fs::rename(&self.tmp_path, &self.final_path)?;
        debug!(
            "Rewrote resume log {} with {} entries",
            self.final_path.display(),
            self.lines
        );
        Ok(self.lines)
    }
}
