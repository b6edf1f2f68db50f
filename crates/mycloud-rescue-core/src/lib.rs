pub mod config;
pub mod error;
pub mod farm;
pub mod index;
pub mod ledger;
pub mod locator;
pub mod mtime;
pub mod progress;
pub mod reconcile;
pub mod resolver;
pub mod scanner;
pub mod transfer;

pub use config::AppConfig;
pub use error::Error;
pub use index::{FileRecord, MetadataIndex};
pub use ledger::{Ledger, ResumeLog};
pub use progress::{ProgressReporter, SilentReporter};
pub use resolver::{PathResolver, RootStrip};
pub use transfer::{Outcome, TransferEngine, TransferOptions, TransferStats, WalkMode};
