use clap::{Args, Parser, Subcommand, ValueEnum};
use mycloud_rescue_core::{AppConfig, WalkMode};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "mycloud-rescue")]
#[command(about = "Recover files from a MyCloud appliance database", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Copy every pending file from the content store to the destination
    Copy {
        #[command(flatten)]
        run: RunArgs,
        /// Where candidates come from
        #[arg(long, value_enum, default_value_t = Walk::Database)]
        walk: Walk,
    },
    /// Rebuild the ledger from the destination, then copy what is left
    Resume {
        #[command(flatten)]
        run: RunArgs,
        /// Skip the destination scan and trust the existing ledger
        #[arg(long)]
        no_regen: bool,
    },
    /// Rebuild the ledger and resume log from the destination tree
    RegenLog {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Build a symlink farm under --dest for an external `rsync -avL`
    Farm {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Set destination mtimes from database timestamps
    SyncMtime {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Show ledger and destination totals
    Summary {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Remove failure entries so the next run attempts them again
    ClearFailures {
        #[command(flatten)]
        run: RunArgs,
        /// Reason prefix to clear, e.g. `copy_error` or `source_missing`
        #[arg(long)]
        reason: String,
    },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Walk {
    /// Un-ledgered records straight from the database
    Database,
    /// Every blob under the source root
    SourceTree,
}

impl From<Walk> for WalkMode {
    fn from(walk: Walk) -> Self {
        match walk {
            Walk::Database => WalkMode::Database,
            Walk::SourceTree => WalkMode::SourceTree,
        }
    }
}

/// Flags shared by every run command. Anything left unset falls back to
/// `Config.toml` / `RESCUE_*` values.
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Appliance SQLite database
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// Content store root
    #[arg(long)]
    pub source: Option<PathBuf>,
    /// Destination root
    #[arg(long)]
    pub dest: Option<PathBuf>,
    /// Plain-text resume log
    #[arg(long = "log-file")]
    pub resume_log: Option<PathBuf>,
    /// Report what would happen without writing anything
    #[arg(long)]
    pub dry_run: bool,
    /// Replace `|` with `-` in destination paths
    #[arg(long)]
    pub sanitize_pipes: bool,
    /// Leave copied files with the source blob's mtime
    #[arg(long)]
    pub no_preserve_mtime: bool,
    /// Also set mtimes on files already at the destination
    #[arg(long)]
    pub refresh_mtime_existing: bool,
    /// Stop after this many records
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub workers: Option<usize>,
    /// Skip timestamp columns when loading the database
    #[arg(long)]
    pub low_memory: bool,
    /// Strip this directory name instead of detecting the auth root
    #[arg(long)]
    pub root_to_strip: Option<String>,
    /// Keep the auth root in reconstructed paths
    #[arg(long, conflicts_with = "root_to_strip")]
    pub no_strip_root: bool,
    #[arg(long)]
    pub io_buffer_size: Option<usize>,
    #[arg(long)]
    pub io_max_concurrency: Option<usize>,
}

impl RunArgs {
    /// Overlay the flags that were given onto `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(db) = &self.db {
            config.db_path = Some(db.clone());
        }
        if let Some(source) = &self.source {
            config.source_root = Some(source.clone());
        }
        if let Some(dest) = &self.dest {
            config.dest_root = Some(dest.clone());
        }
        if let Some(log) = &self.resume_log {
            config.resume_log = Some(log.clone());
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(size) = self.io_buffer_size {
            config.io_buffer_size = size;
        }
        if let Some(n) = self.io_max_concurrency {
            config.io_max_concurrency = n;
        }
        if let Some(root) = &self.root_to_strip {
            config.root_to_strip = Some(root.clone());
        }
        if self.no_strip_root {
            config.root_to_strip = None;
            config.detect_auth_root = false;
        }
        config.sanitize_pipes |= self.sanitize_pipes;
        config.refresh_mtime_existing |= self.refresh_mtime_existing;
        config.low_memory |= self.low_memory;
        if self.no_preserve_mtime {
            config.preserve_mtime = false;
        }
    }
}
