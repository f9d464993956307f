//! file-tracker - Command-line front end for the tracking engine.
//!
//! Resolves settings, installs logging, runs one command against the ledger
//! and maps the outcome to an exit code:
//! 0 success, 1 failed files or discrepancies, 2 configuration or engine
//! error, 3 batch aborted because the target disk is full.

mod logging;
mod settings;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use engine::{
    progress::BatchObserver, BatchResult, EngineError, FileCandidate, FileOutcome, IntegrityOptions,
    LedgerError, LedgerStore, ProcessedFilter,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::settings::{Overrides, Settings, SettingsError};

const EXIT_OK: i32 = 0;
const EXIT_FAILURES: i32 = 1;
const EXIT_ERROR: i32 = 2;
const EXIT_ABORTED: i32 = 3;

/// file-tracker - Batch copy media files exactly once
#[derive(Parser, Debug)]
#[command(name = "file-tracker")]
#[command(version)]
#[command(about = "Copy files into a processing directory in batches, never twice")]
struct Args {
    /// YAML configuration file (default: config/config.yaml if present)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Per-file progress on stderr and debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Args, Debug, Default)]
struct OverrideArgs {
    /// Source directory
    #[arg(long, value_name = "PATH", global = true)]
    source_dir: Option<PathBuf>,

    /// Target (processing) directory
    #[arg(long, value_name = "PATH", global = true)]
    target_dir: Option<PathBuf>,

    /// Ledger database file
    #[arg(long, value_name = "PATH", global = true)]
    database: Option<PathBuf>,

    /// Number of files to process in this batch
    #[arg(long, value_name = "N", global = true)]
    batch_size: Option<usize>,

    /// Show what would be done without doing it
    #[arg(long, global = true)]
    dry_run: bool,

    /// Hash copied bytes and store the digest
    #[arg(long, global = true)]
    compute_hash: bool,

    /// Hash algorithm: xxhash, sha256, blake3, md5
    #[arg(long, value_name = "ALGORITHM", global = true)]
    hash_algorithm: Option<String>,

    /// Only walk the top level of the source directory
    #[arg(long, global = true)]
    no_recursive: bool,

    /// Extra exclude pattern (repeatable)
    #[arg(long, value_name = "GLOB", global = true)]
    exclude: Vec<String>,

    /// Extra include pattern (repeatable)
    #[arg(long, value_name = "GLOB", global = true)]
    include: Vec<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,
}

impl OverrideArgs {
    fn to_overrides(&self) -> Overrides {
        Overrides {
            source_dir: self.source_dir.clone(),
            target_dir: self.target_dir.clone(),
            database: self.database.clone(),
            batch_size: self.batch_size,
            dry_run: self.dry_run,
            compute_hash: self.compute_hash,
            hash_algorithm: self.hash_algorithm.clone(),
            no_recursive: self.no_recursive,
            exclude: self.exclude.clone(),
            include: self.include.clone(),
            log_level: self.log_level.clone(),
            log_file: self.log_file.clone(),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Copy the next batch (default)
    Run,

    /// Ledger statistics
    Stats,

    /// List processed files, oldest first
    ListProcessed {
        /// Maximum number of records
        #[arg(long, default_value_t = 100)]
        limit: usize,

        /// Filename glob, e.g. '*.mp4'
        #[arg(long, value_name = "GLOB")]
        pattern: Option<String>,

        /// Only files copied at or after this RFC 3339 instant
        #[arg(long, value_name = "TIME")]
        since: Option<DateTime<Utc>>,

        /// Only files copied before this RFC 3339 instant
        #[arg(long, value_name = "TIME")]
        until: Option<DateTime<Utc>>,
    },

    /// Compare the ledger with the target directory
    CheckIntegrity {
        /// Also report records whose source file is gone
        #[arg(long)]
        stale_sources: bool,
    },

    /// Files in the target directory the ledger does not know
    FindOrphans {
        /// Delete the orphans found (needs --yes)
        #[arg(long)]
        delete: bool,

        /// Confirm deletion
        #[arg(long, requires = "delete")]
        yes: bool,
    },

    /// Most recent transfer errors
    Errors {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Failed to encode JSON output: {0}")]
    Json(#[from] serde_json::Error),
}

/// Console observer for `--verbose` runs
struct CliProgress;

impl CliProgress {
    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }
}

impl BatchObserver for CliProgress {
    fn on_batch_started(&self, run_id: Uuid, candidates: &[FileCandidate]) {
        let total: u64 = candidates.iter().map(|c| c.size).sum();
        eprintln!("Run {}", run_id);
        eprintln!(
            "  {} candidate(s), {}",
            candidates.len(),
            Self::format_bytes(total)
        );
    }

    fn on_file_started(&self, index: usize, candidate: &FileCandidate) {
        eprintln!("[{:3}] Starting: {}", index, candidate.relative_path.display());
    }

    fn on_file_completed(&self, index: usize, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Copied(c) => {
                eprintln!("[{:3}] Copied: {} ({})", index, c.filename, Self::format_bytes(c.size))
            }
            FileOutcome::Skipped(s) => eprintln!("[{:3}] Skipped: {} ({})", index, s.filename, s.reason),
            FileOutcome::Failed(f) => {
                eprintln!("[{:3}] Failed: {} [{}] {}", index, f.filename, f.error_type, f.message)
            }
        }
    }

    fn on_batch_completed(&self, result: &BatchResult) {
        let elapsed = result
            .finished_at
            .map(|end| (end - result.started_at).to_std().unwrap_or_default())
            .unwrap_or_default();
        eprintln!("Elapsed: {}", Self::format_duration(elapsed));
    }
}

fn main() {
    let args = Args::parse();
    let env: HashMap<String, String> = std::env::vars().collect();

    let settings = match load_settings(&args, &env) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(EXIT_ERROR);
        }
    };

    if let Err(e) = logging::init(&settings.logging, args.verbose) {
        eprintln!("Error: failed to set up logging: {}", e);
        std::process::exit(EXIT_ERROR);
    }

    let exit_code = match execute(&args, &settings) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            EXIT_ERROR
        }
    };

    std::process::exit(exit_code);
}

fn load_settings(args: &Args, env: &HashMap<String, String>) -> Result<Settings, SettingsError> {
    settings::load(args.config.as_deref(), env, &args.overrides.to_overrides())
}

/// Resolve settings and run the command without installing logging
#[cfg(test)]
fn run_cli(args: &Args, env: &HashMap<String, String>) -> Result<i32, CliError> {
    let settings = load_settings(args, env)?;
    execute(args, &settings)
}

fn execute(args: &Args, settings: &Settings) -> Result<i32, CliError> {
    let command = args.command.clone().unwrap_or(Command::Run);
    let open_ledger = || LedgerStore::open(&settings.database.path);

    match command {
        Command::Run => {
            // Validate before touching the ledger file.
            let config = settings.engine_config()?;
            let ledger = open_ledger()?;
            let progress = CliProgress;
            let observer: Option<&dyn BatchObserver> = if args.verbose && !args.json {
                Some(&progress)
            } else {
                None
            };
            let result = engine::run_batch(&ledger, &config, observer)?;
            print_batch(&result, args.json)?;
            Ok(if result.aborted.is_some() {
                EXIT_ABORTED
            } else if !result.failed.is_empty() {
                EXIT_FAILURES
            } else {
                EXIT_OK
            })
        }

        Command::Stats => {
            let ledger = open_ledger()?;
            let summary = ledger.stats()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Processed files: {}", summary.processed_count);
                println!("Total size: {}", CliProgress::format_bytes(summary.total_bytes));
                println!("Logged errors: {}", summary.error_count);
                if let (Some(first), Some(last)) = (summary.first_copy, summary.last_copy) {
                    println!("First copy: {}", first.to_rfc3339());
                    println!("Last copy: {}", last.to_rfc3339());
                }
                if summary.malformed_dates > 0 {
                    println!("Unreadable copy dates: {}", summary.malformed_dates);
                }
            }
            Ok(EXIT_OK)
        }

        Command::ListProcessed {
            limit,
            pattern,
            since,
            until,
        } => {
            let filter = ProcessedFilter {
                filename_glob: pattern,
                since,
                until,
                limit: Some(limit),
            };
            let ledger = open_ledger()?;
            let mut records = Vec::new();
            let mut unreadable = 0usize;
            for record in ledger.list_processed(filter) {
                match record {
                    Ok(record) => records.push(record),
                    Err(LedgerError::CorruptRecord { id, filename, reason }) => {
                        tracing::warn!(id, filename = %filename, reason = %reason, "Skipping undecodable record");
                        unreadable += 1;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if args.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                for r in &records {
                    println!(
                        "{}  {:>10}  {}",
                        r.copy_date.to_rfc3339(),
                        CliProgress::format_bytes(r.size),
                        r.filename
                    );
                }
                println!("{} file(s)", records.len());
                if unreadable > 0 {
                    println!("{} unreadable record(s) skipped; run check-integrity", unreadable);
                }
            }
            Ok(EXIT_OK)
        }

        Command::CheckIntegrity { stale_sources } => {
            let options = IntegrityOptions {
                flag_stale_sources: stale_sources || settings.integrity.flag_stale_sources,
            };
            let ledger = open_ledger()?;
            let report = engine::check_integrity(&ledger, options)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("SQLite integrity: {}", report.sqlite_status);
                println!("Discrepancies: {}", report.discrepancies.len());
                for d in &report.discrepancies {
                    println!("  {}: {:?}", d.filename, d.kind);
                }
            }
            Ok(if report.is_clean() { EXIT_OK } else { EXIT_FAILURES })
        }

        Command::FindOrphans { delete, yes } => {
            let target_dir = settings.target_dir()?;
            let ledger = open_ledger()?;
            let orphans = engine::find_orphans(&ledger, target_dir)?;
            let deletion = if delete {
                Some(engine::delete_orphans(
                    &ledger,
                    &orphans,
                    yes,
                    settings.execution.dry_run,
                )?)
            } else {
                None
            };

            if args.json {
                let out = json!({ "orphans": orphans, "deletion": deletion });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                for path in &orphans {
                    println!("{}", path.display());
                }
                println!("{} orphan(s)", orphans.len());
                if let Some(d) = &deletion {
                    println!(
                        "Deleted: {}, kept: {}, failed: {}",
                        d.deleted.len(),
                        d.kept.len(),
                        d.failed.len()
                    );
                }
            }
            let failed = deletion.map_or(false, |d| !d.failed.is_empty());
            Ok(if failed { EXIT_FAILURES } else { EXIT_OK })
        }

        Command::Errors { limit } => {
            let ledger = open_ledger()?;
            let errors = ledger.list_errors(limit)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&errors)?);
            } else {
                for e in &errors {
                    println!(
                        "{}  {:<14}  {}: {}",
                        e.timestamp.to_rfc3339(),
                        e.error_type,
                        e.filename,
                        e.error_message
                    );
                }
                println!("{} error(s)", errors.len());
            }
            Ok(EXIT_OK)
        }
    }
}

fn print_batch(result: &BatchResult, json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    if result.dry_run {
        println!("=== DRY-RUN: nothing was copied ===");
    }
    println!(
        "Summary: {} copied, {} skipped, {} failed ({})",
        result.succeeded.len(),
        result.skipped.len(),
        result.failed.len(),
        CliProgress::format_bytes(result.bytes_copied)
    );
    if !result.failed.is_empty() {
        println!();
        println!("Failed files:");
        for f in &result.failed {
            println!("  {} [{}]: {}", f.filename, f.error_type, f.message);
        }
    }
    if let Some(reason) = &result.aborted {
        println!();
        println!("Batch aborted: {}", reason);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Dirs {
        _root: TempDir,
        src: PathBuf,
        dst: PathBuf,
        db: PathBuf,
    }

    fn dirs() -> Dirs {
        let root = TempDir::new().expect("Failed to create temp dir");
        let src = root.path().join("in");
        let dst = root.path().join("out");
        let db = root.path().join("ledger.db");
        std::fs::create_dir(&src).expect("Failed to create source dir");
        Dirs {
            _root: root,
            src,
            dst,
            db,
        }
    }

    fn args(d: &Dirs, command: Option<Command>) -> Args {
        Args {
            config: None,
            json: false,
            verbose: false,
            overrides: OverrideArgs {
                source_dir: Some(d.src.clone()),
                target_dir: Some(d.dst.clone()),
                database: Some(d.db.clone()),
                ..OverrideArgs::default()
            },
            command,
        }
    }

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let parsed = Args::try_parse_from([
            "file-tracker",
            "--json",
            "list-processed",
            "--limit",
            "5",
            "--pattern",
            "*.mp4",
        ])
        .unwrap();
        assert!(parsed.json);
        assert!(matches!(
            parsed.command,
            Some(Command::ListProcessed { limit: 5, pattern: Some(ref p), .. }) if p == "*.mp4"
        ));

        let parsed = Args::try_parse_from(["file-tracker", "--batch-size", "3"]).unwrap();
        assert!(parsed.command.is_none());
        assert_eq!(parsed.overrides.batch_size, Some(3));

        assert!(Args::try_parse_from(["file-tracker", "find-orphans", "--yes"]).is_err());
    }

    #[test]
    fn test_cli_run_copies_files() {
        let d = dirs();
        std::fs::write(d.src.join("clip.mp4"), "hello").expect("Failed to write file");

        let code = run_cli(&args(&d, None), &no_env()).expect("run should succeed");
        assert_eq!(code, EXIT_OK);
        assert!(d.dst.join("clip.mp4").exists());

        let again = run_cli(&args(&d, Some(Command::Run)), &no_env()).unwrap();
        assert_eq!(again, EXIT_OK);
    }

    #[test]
    fn test_cli_run_requires_source() {
        let d = dirs();
        let mut a = args(&d, None);
        a.overrides.source_dir = None;
        let err = run_cli(&a, &no_env()).unwrap_err();
        assert!(matches!(err, CliError::Settings(SettingsError::Missing("source_dir"))));
        assert!(!d.db.exists(), "ledger not created on configuration errors");
    }

    #[test]
    fn test_cli_run_rejects_missing_source_dir() {
        let d = dirs();
        let mut a = args(&d, None);
        a.overrides.source_dir = Some(d.src.join("nope"));
        assert!(matches!(
            run_cli(&a, &no_env()),
            Err(CliError::Engine(EngineError::SourceNotFound { .. }))
        ));
    }

    #[test]
    fn test_cli_env_supplies_directories() {
        let d = dirs();
        std::fs::write(d.src.join("a.jpg"), "x").unwrap();
        let mut a = args(&d, None);
        a.overrides.source_dir = None;
        let env: HashMap<String, String> =
            [("SOURCE_DIR".to_string(), d.src.to_string_lossy().into_owned())].into();

        assert_eq!(run_cli(&a, &env).unwrap(), EXIT_OK);
        assert!(d.dst.join("a.jpg").exists());
    }

    #[test]
    fn test_cli_integrity_exit_code() {
        let d = dirs();
        std::fs::write(d.src.join("a.mp4"), "12345").unwrap();
        run_cli(&args(&d, None), &no_env()).unwrap();

        let check = Some(Command::CheckIntegrity { stale_sources: false });
        assert_eq!(run_cli(&args(&d, check.clone()), &no_env()).unwrap(), EXIT_OK);

        std::fs::write(d.dst.join("a.mp4"), "1").unwrap();
        assert_eq!(run_cli(&args(&d, check), &no_env()).unwrap(), EXIT_FAILURES);
    }

    #[test]
    fn test_cli_orphan_deletion_needs_confirmation() {
        let d = dirs();
        std::fs::create_dir(&d.dst).unwrap();
        std::fs::write(d.dst.join("stray.mp4"), "?").unwrap();

        let report = Some(Command::FindOrphans { delete: false, yes: false });
        assert_eq!(run_cli(&args(&d, report), &no_env()).unwrap(), EXIT_OK);

        let unconfirmed = Some(Command::FindOrphans { delete: true, yes: false });
        assert!(matches!(
            run_cli(&args(&d, unconfirmed), &no_env()),
            Err(CliError::Engine(EngineError::ConfirmationRequired { .. }))
        ));
        assert!(d.dst.join("stray.mp4").exists());

        let confirmed = Some(Command::FindOrphans { delete: true, yes: true });
        assert_eq!(run_cli(&args(&d, confirmed), &no_env()).unwrap(), EXIT_OK);
        assert!(!d.dst.join("stray.mp4").exists());
    }

    #[test]
    fn test_cli_reporting_commands() {
        let d = dirs();
        std::fs::write(d.src.join("a.mp4"), "x").unwrap();
        run_cli(&args(&d, None), &no_env()).unwrap();

        for command in [
            Command::Stats,
            Command::ListProcessed {
                limit: 10,
                pattern: None,
                since: None,
                until: None,
            },
            Command::Errors { limit: 10 },
        ] {
            let mut a = args(&d, Some(command));
            a.json = true;
            assert_eq!(run_cli(&a, &no_env()).unwrap(), EXIT_OK);
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(CliProgress::format_bytes(512), "512.00 B");
        assert_eq!(CliProgress::format_bytes(5_242_880), "5.00 MB");
    }
}
