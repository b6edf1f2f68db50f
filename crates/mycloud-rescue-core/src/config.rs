use crate::index::LoadOptions;
use crate::resolver::RootStrip;
use crate::transfer::TransferOptions;
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_workers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// Settings for a recovery run. Every field has a default so a partial
/// `Config.toml` (or none at all) is valid; CLI flags are applied on top.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default)]
    pub source_root: Option<PathBuf>,
    #[serde(default)]
    pub dest_root: Option<PathBuf>,
    #[serde(default)]
    pub resume_log: Option<PathBuf>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// 0 keeps the default copy path.
    #[serde(default)]
    pub io_buffer_size: usize,
    /// 0 disables the disk semaphore.
    #[serde(default)]
    pub io_max_concurrency: usize,
    #[serde(default)]
    pub sanitize_pipes: bool,
    #[serde(default = "default_true")]
    pub preserve_mtime: bool,
    #[serde(default)]
    pub refresh_mtime_existing: bool,
    #[serde(default)]
    pub low_memory: bool,
    /// Explicit auth-root name; takes precedence over detection.
    #[serde(default)]
    pub root_to_strip: Option<String>,
    #[serde(default = "default_true")]
    pub detect_auth_root: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            source_root: None,
            dest_root: None,
            resume_log: None,
            workers: default_workers(),
            io_buffer_size: 0,
            io_max_concurrency: 0,
            sanitize_pipes: false,
            preserve_mtime: true,
            refresh_mtime_existing: false,
            low_memory: false,
            root_to_strip: None,
            detect_auth_root: true,
        }
    }
}

/// `Config.toml` in the working directory (optional) overlaid with
/// `RESCUE_*` environment variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(Environment::with_prefix("RESCUE").try_parsing(true))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

impl AppConfig {
    pub fn root_strip(&self) -> RootStrip {
        match &self.root_to_strip {
            Some(name) if !name.is_empty() => RootStrip::Explicit(name.clone()),
            _ if self.detect_auth_root => RootStrip::Detect,
            _ => RootStrip::Disabled,
        }
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            low_memory: self.low_memory,
        }
    }

    /// Low-memory indexes carry no timestamps, so both mtime options are
    /// forced off there.
    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            sanitize_pipes: self.sanitize_pipes,
            preserve_mtime: self.preserve_mtime && !self.low_memory,
            refresh_mtime_existing: self.refresh_mtime_existing && !self.low_memory,
            workers: self.workers.max(1),
            io_buffer_size: self.io_buffer_size,
            io_max_concurrency: self.io_max_concurrency,
            root_strip: self.root_strip(),
            ..TransferOptions::default()
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// True when one directory contains the other (or they are the same).
/// Copying into a destination that lives inside the source store would
/// feed the run its own output.
pub fn roots_overlap(a: &Path, b: &Path) -> bool {
    let a = a.canonicalize().unwrap_or_else(|_| a.to_path_buf());
    let b = b.canonicalize().unwrap_or_else(|_| b.to_path_buf());
    a.starts_with(&b) || b.starts_with(&a)
}
