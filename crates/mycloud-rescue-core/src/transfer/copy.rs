use crate::ledger::models::REASON_COPY_ERROR_PREFIX;
use crate::scanner::walk::PARTIAL_SUFFIX;
use filetime::FileTime;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Copy `src` to `dest` through a hidden `.partial` sibling that is renamed
/// into place once complete, so an interrupted copy never leaves a
/// truncated file at `dest`. Parent directories are created as needed and
/// the source's access/modification times are carried over.
///
/// `buffer_size == 0` uses [`fs::copy`]; any other value streams through an
/// explicit buffer of that size.
pub fn copy_blob(src: &Path, dest: &Path, buffer_size: usize) -> io::Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = partial_path(dest)?;
    let result = copy_into_place(src, &partial, dest, buffer_size);
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn copy_into_place(src: &Path, partial: &Path, dest: &Path, buffer_size: usize) -> io::Result<u64> {
    let bytes = if buffer_size > 0 {
        buffered_copy(src, partial, buffer_size)?
    } else {
        fs::copy(src, partial)?
    };
    preserve_times(src, partial)?;
    fs::rename(partial, dest)?;
    Ok(bytes)
}

fn partial_path(dest: &Path) -> io::Result<PathBuf> {
    let name = dest.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("destination has no file name: {}", dest.display()),
        )
    })?;
    let mut partial_name = std::ffi::OsString::from(".");
    partial_name.push(name);
    partial_name.push(PARTIAL_SUFFIX);
    Ok(dest.with_file_name(partial_name))
}

fn buffered_copy(src: &Path, dest: &Path, buffer_size: usize) -> io::Result<u64> {
    let mut reader = File::open(src)?;
    let mut writer = File::create(dest)?;
    let mut buffer = vec![0u8; buffer_size];
    let mut total = 0u64;
    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }
    writer.flush()?;
    Ok(total)
}

fn preserve_times(src: &Path, dest: &Path) -> io::Result<()> {
    let metadata = fs::metadata(src)?;
    filetime::set_file_times(
        dest,
        FileTime::from_last_access_time(&metadata),
        FileTime::from_last_modification_time(&metadata),
    )
}

/// Set both access and modification time from a millisecond Unix timestamp.
pub fn set_mtime_millis(path: &Path, millis: i64) -> io::Result<()> {
    let time = filetime_from_millis(millis);
    filetime::set_file_times(path, time, time)
}

pub fn filetime_from_millis(millis: i64) -> FileTime {
    let secs = millis.div_euclid(1000);
    let nanos = (millis.rem_euclid(1000) * 1_000_000) as u32;
    FileTime::from_unix_time(secs, nanos)
}

/// Ledger reason for an I/O failure, e.g. `copy_error: PermissionDenied`.
pub fn classify_io_error(err: &io::Error) -> String {
    format!("{}: {:?}", REASON_COPY_ERROR_PREFIX, err.kind())
}

#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
pub fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
