mod commands;
mod logging;
mod progress;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands, RunArgs};
use dotenv::dotenv;
use indicatif::{HumanBytes, HumanDuration};
use mycloud_rescue_core::config::{load_configuration, roots_overlap};
use mycloud_rescue_core::farm::{build_symlink_farm, FarmOptions};
use mycloud_rescue_core::mtime::{sync_mtimes, MtimeSyncOptions};
use mycloud_rescue_core::reconcile::{rebuild_from_destination, ReconcileOptions};
use mycloud_rescue_core::scanner::{count_files, directory_summary};
use mycloud_rescue_core::{
    AppConfig, Ledger, MetadataIndex, ResumeLog, TransferEngine, TransferStats, WalkMode,
};
use progress::CliReporter;
use tracing::{error, info, warn};

const EXIT_INTERRUPTED: i32 = 130;

fn main() {
    let code = run();
    process::exit(code);
}

/// Everything that needs the log guard alive lives here so buffered log
/// lines are flushed before the process exits.
fn run() -> i32 {
    dotenv().ok();

    let _guard = logging::init_logger();

    let mut config = match load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            return 1;
        }
    };

    let args = Cli::parse();

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        if let Err(e) = ctrlc::set_handler(move || {
            cancel.store(true, Ordering::SeqCst);
        }) {
            warn!("Could not install interrupt handler: {}", e);
        }
    }

    let result = match args.command {
        Some(Commands::Copy { run, walk }) => {
            run.apply(&mut config);
            run_copy(&config, &run, walk.into(), &cancel)
        }
        Some(Commands::Resume { run, no_regen }) => {
            run.apply(&mut config);
            run_resume(&config, &run, no_regen, &cancel)
        }
        Some(Commands::RegenLog { run }) => {
            run.apply(&mut config);
            run_regen_log(&config, &cancel)
        }
        Some(Commands::Farm { run }) => {
            run.apply(&mut config);
            run_farm(&config, &run, &cancel)
        }
        Some(Commands::SyncMtime { run }) => {
            run.apply(&mut config);
            run_sync_mtime(&config, &run, &cancel)
        }
        Some(Commands::Summary { run }) => {
            run.apply(&mut config);
            run_summary(&config).map(|_| 0)
        }
        Some(Commands::ClearFailures { run, reason }) => {
            run.apply(&mut config);
            run_clear_failures(&config, &reason).map(|_| 0)
        }
        Some(Commands::PrintConfig) => config
            .to_toml()
            .map(|toml| {
                println!("{}", toml);
                0
            })
            .map_err(anyhow::Error::from),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(0)
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!("Error: {:#}", err);
            1
        }
    }
}

fn require<'c>(value: &'c Option<PathBuf>, flag: &str) -> Result<&'c Path> {
    match value {
        Some(path) => Ok(path.as_path()),
        None => bail!("{} is required (flag, Config.toml or RESCUE_ environment)", flag),
    }
}

fn open_database(config: &AppConfig) -> Result<(MetadataIndex, Ledger)> {
    let db_path = require(&config.db_path, "--db")?;
    let reporter = CliReporter::new();
    let index = MetadataIndex::load_with_reporter(db_path, config.load_options(), &reporter)
        .with_context(|| format!("cannot load {}", db_path.display()))?;
    let ledger = Ledger::open(db_path)
        .with_context(|| format!("cannot open ledger in {}", db_path.display()))?;
    Ok((index, ledger))
}

fn resume_log(config: &AppConfig) -> Option<ResumeLog> {
    config.resume_log.as_ref().map(ResumeLog::new)
}

fn prepare_roots<'c>(config: &'c AppConfig, dry_run: bool) -> Result<(&'c Path, &'c Path)> {
    let source = require(&config.source_root, "--source")?;
    let dest = require(&config.dest_root, "--dest")?;
    if roots_overlap(source, dest) {
        bail!(
            "source {} and destination {} overlap",
            source.display(),
            dest.display()
        );
    }
    if !dry_run {
        fs::create_dir_all(dest).with_context(|| format!("cannot create {}", dest.display()))?;
    }
    Ok((source, dest))
}

fn run_copy(
    config: &AppConfig,
    run: &RunArgs,
    mode: WalkMode,
    cancel: &Arc<AtomicBool>,
) -> Result<i32> {
    prepare_roots(config, run.dry_run)?;
    let (index, ledger) = open_database(config)?;
    transfer(config, run, mode, cancel, &index, &ledger)
}

fn run_resume(
    config: &AppConfig,
    run: &RunArgs,
    no_regen: bool,
    cancel: &Arc<AtomicBool>,
) -> Result<i32> {
    prepare_roots(config, run.dry_run)?;
    let (index, ledger) = open_database(config)?;
    if no_regen {
        info!("Skipping destination scan; using the existing ledger");
    } else if run.dry_run {
        info!("Dry run: skipping destination scan so the ledger is left untouched");
    } else if !regenerate(config, &index, &ledger, cancel)? {
        return Ok(interrupted("Destination scan"));
    }
    transfer(config, run, WalkMode::Database, cancel, &index, &ledger)
}

fn run_regen_log(config: &AppConfig, cancel: &Arc<AtomicBool>) -> Result<i32> {
    let (index, ledger) = open_database(config)?;
    if regenerate(config, &index, &ledger, cancel)? {
        Ok(0)
    } else {
        Ok(interrupted("Destination scan"))
    }
}

fn transfer(
    config: &AppConfig,
    run: &RunArgs,
    mode: WalkMode,
    cancel: &Arc<AtomicBool>,
    index: &MetadataIndex,
    ledger: &Ledger,
) -> Result<i32> {
    let source = require(&config.source_root, "--source")?;
    let dest = require(&config.dest_root, "--dest")?;
    let log = resume_log(config);
    print_destination("Destination before run", dest);

    let mut options = config.transfer_options();
    options.dry_run = run.dry_run;
    options.limit = run.limit;

    let mut engine = TransferEngine::new(index, ledger, source, dest, options)
        .with_cancel_token(Arc::clone(cancel));
    if let Some(log) = log.as_ref() {
        engine = engine.with_resume_log(log);
    }
    if let Some(root) = engine.resolver().root_to_strip() {
        info!("Stripping root directory: {}", root);
    }
    if !config.sanitize_pipes && index.has_pipe_names() {
        warn!("Some names contain '|'; pass --sanitize-pipes if the destination filesystem rejects it");
    }

    info!(
        "Run started at {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    let reporter = CliReporter::new();
    let stats = engine.materialize_all(mode, &reporter)?;

    print_transfer_stats(&stats, run.dry_run);
    print_destination("Destination after run", dest);

    if stats.interrupted {
        return Ok(interrupted("Copy"));
    }
    Ok(0)
}

fn interrupted(phase: &str) -> i32 {
    warn!(
        "{}",
        format!("{} interrupted; completed work is kept", phase).yellow()
    );
    EXIT_INTERRUPTED
}

/// Returns `false` when the scan was interrupted.
fn regenerate(
    config: &AppConfig,
    index: &MetadataIndex,
    ledger: &Ledger,
    cancel: &Arc<AtomicBool>,
) -> Result<bool> {
    let dest = require(&config.dest_root, "--dest")?;
    let log = resume_log(config);
    let reporter = CliReporter::new();
    let options = ReconcileOptions {
        root_strip: config.root_strip(),
        cancel: Arc::clone(cancel),
    };
    let stats = rebuild_from_destination(
        index,
        ledger,
        dest,
        &options,
        log.as_ref(),
        &reporter,
    )?;

    info!(
        "{} destination files: {} matched ({} new ledger entries), {} unmatched",
        format!("{}", stats.scanned).cyan(),
        format!("{}", stats.matched).green(),
        format!("{}", stats.newly_recorded).green(),
        format!("{}", stats.unmatched).yellow(),
    );
    if let (Some(lines), Some(log)) = (stats.log_entries, log.as_ref()) {
        info!("Resume log {} rewritten with {} entries", log.path().display(), lines);
    }
    Ok(!stats.interrupted)
}

fn run_farm(config: &AppConfig, run: &RunArgs, cancel: &Arc<AtomicBool>) -> Result<i32> {
    let source = require(&config.source_root, "--source")?;
    let farm = require(&config.dest_root, "--dest")?;
    if roots_overlap(source, farm) {
        bail!("source {} and farm {} overlap", source.display(), farm.display());
    }
    let (index, _ledger) = open_database(config)?;
    let options = FarmOptions {
        dry_run: run.dry_run,
        sanitize_pipes: config.sanitize_pipes,
        root_strip: config.root_strip(),
        cancel: Arc::clone(cancel),
    };
    let stats = build_symlink_farm(&index, source, farm, &options, &CliReporter::new())?;

    info!(
        "{} links, {} directories skipped, {} without source, {} real files kept, {} errors",
        format!("{}", stats.created).green(),
        stats.skipped_directories,
        format!("{}", stats.skipped_no_source).yellow(),
        stats.skipped_real_file,
        format!("{}", stats.errors).red(),
    );
    if !run.dry_run && stats.created > 0 {
        info!(
            "Farm holds {} entries. Finish with: rsync -avL {}/ <destination>/",
            count_files(farm),
            farm.display()
        );
    }
    if stats.interrupted {
        return Ok(interrupted("Symlink farm"));
    }
    Ok(0)
}

fn run_sync_mtime(config: &AppConfig, run: &RunArgs, cancel: &Arc<AtomicBool>) -> Result<i32> {
    if config.low_memory {
        bail!("mtime sync needs timestamps; run without --low-memory");
    }
    let dest = require(&config.dest_root, "--dest")?;
    let (index, ledger) = open_database(config)?;
    let options = MtimeSyncOptions {
        dry_run: run.dry_run,
        sanitize_pipes: config.sanitize_pipes,
        root_strip: config.root_strip(),
        cancel: Arc::clone(cancel),
    };
    let stats = sync_mtimes(&index, &ledger, dest, &options, &CliReporter::new())?;

    info!(
        "{} updated, {} already correct, {} without timestamp, {} not found, {} errors",
        format!("{}", stats.updated).green(),
        stats.no_change_needed,
        format!("{}", stats.skipped_no_timestamp).yellow(),
        format!("{}", stats.skipped_not_found).yellow(),
        format!("{}", stats.errors).red(),
    );
    if stats.interrupted {
        return Ok(interrupted("Mtime sync"));
    }
    Ok(0)
}

fn run_summary(config: &AppConfig) -> Result<()> {
    let db_path = require(&config.db_path, "--db")?;
    let ledger = Ledger::open(db_path)?;
    let summary = ledger.summary()?;
    info!(
        "Ledger: {} completed ({} with refreshed mtime), {} failed",
        format!("{}", summary.completed).green(),
        summary.mtime_refreshed,
        format!("{}", summary.failed).red(),
    );

    let mut by_reason: BTreeMap<String, usize> = BTreeMap::new();
    for entry in ledger.failed_entries()? {
        *by_reason.entry(entry.reason).or_insert(0) += 1;
    }
    for (reason, count) in by_reason {
        info!("  {:>10}  {}", count, reason);
    }

    if let Some(dest) = config.dest_root.as_deref() {
        print_destination("Destination", dest);
    }
    Ok(())
}

fn run_clear_failures(config: &AppConfig, reason: &str) -> Result<()> {
    let db_path = require(&config.db_path, "--db")?;
    let ledger = Ledger::open(db_path)?;
    let cleared = ledger.clear_failures(reason)?;
    info!(
        "Cleared {} failure entries with reason '{}*'",
        format!("{}", cleared).green(),
        reason
    );
    Ok(())
}

fn print_destination(label: &str, dest: &Path) {
    let summary = directory_summary(dest);
    info!(
        "{}: {} files, {}",
        label,
        format!("{}", summary.file_count).cyan(),
        HumanBytes(summary.total_bytes)
    );
}

fn print_transfer_stats(stats: &TransferStats, dry_run: bool) {
    println!();
    if dry_run {
        info!("{} would be copied", format!("{}", stats.would_copy).green());
    } else {
        info!(
            "{} copied ({})",
            format!("{}", stats.copied).green(),
            HumanBytes(stats.bytes_copied)
        );
    }
    info!(
        "{} already completed, {} already at destination, {} previously failed",
        stats.already_completed, stats.already_at_destination, stats.previously_failed,
    );
    info!(
        "{} source missing, {} not in database, {} unresolvable, {} errors",
        format!("{}", stats.source_missing).yellow(),
        format!("{}", stats.not_in_database).yellow(),
        stats.unresolvable,
        format!("{}", stats.errors).red(),
    );
    for (reason, count) in &stats.failure_reasons {
        info!("  {:>10}  {}", count, reason);
    }
    info!("Elapsed: {}", HumanDuration(stats.duration));
}
