pub mod models;
pub mod queries;
pub mod resume_log;
pub mod retry;
pub mod sqlite;

pub use models::{CompletedEntry, FailedEntry, LedgerSummary};
pub use resume_log::{LogRewrite, ResumeLog};
pub use retry::RetryPolicy;
pub use sqlite::{Ledger, LedgerReader};
