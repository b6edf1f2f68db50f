use rusqlite::ErrorCode;
use std::thread;
use std::time::Duration;
use tracing::trace;

/// Bounded retry for SQLite operations that can hit a busy or locked
/// database. Any other error is returned on the first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn run<T, F>(&self, mut op: F) -> rusqlite::Result<T>
    where
        F: FnMut() -> rusqlite::Result<T>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if is_transient(&e) && attempt < attempts => {
                    trace!("Database busy (attempt {}/{}): {}", attempt, attempts, e);
                    attempt += 1;
                    thread::sleep(self.delay);
                }
                result => return result,
            }
        }
    }
}

pub fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}
