//! SQLite-backed ledger of processed files and transfer errors.
//!
//! Two append-only tables:
//! - `processed_files`: one row per successfully transferred filename. The
//!   `filename` column carries a UNIQUE constraint, which is the line of
//!   defense against double recording; the lookup pre-check is only a fast
//!   path.
//! - `errors`: one row per failed transfer attempt.
//!
//! Every write is its own transaction so a crash between two files leaves
//! the ledger consistent with exactly the files that were published.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::{debug, info, warn};

use crate::checksums::{compute_file_checksum, ChecksumValue};
use crate::error::{ErrorType, LedgerError};
use crate::model::{
    Discrepancy, DiscrepancyKind, ErrorRecord, IntegrityOptions, NewProcessedFile,
    ProcessedFileRecord, ProcessedFilter, Summary,
};

/// Rows fetched per round trip when listing processed files.
const PAGE_SIZE: usize = 256;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS processed_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        filename TEXT UNIQUE NOT NULL,
        source_path TEXT NOT NULL,
        target_path TEXT NOT NULL,
        size INTEGER NOT NULL,
        copy_date TEXT NOT NULL,
        hash TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS idx_filename ON processed_files (filename);
    CREATE INDEX IF NOT EXISTS idx_copy_date ON processed_files (copy_date);
    CREATE TABLE IF NOT EXISTS errors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        filename TEXT NOT NULL,
        error_type TEXT NOT NULL,
        error_message TEXT NOT NULL,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );
    CREATE INDEX IF NOT EXISTS idx_errors_timestamp ON errors (timestamp);
";

const RECORD_COLUMNS: &str = "id, filename, source_path, target_path, size, copy_date, hash";

/// Fixed-width UTC form so that text ordering equals chronological ordering.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ProcessedFileRecord> {
    let source_path: String = row.get(2)?;
    let target_path: String = row.get(3)?;
    let size: i64 = row.get(4)?;
    let copy_date: String = row.get(5)?;
    Ok(ProcessedFileRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        source_path: PathBuf::from(source_path),
        target_path: PathBuf::from(target_path),
        size: size.max(0) as u64,
        copy_date: parse_timestamp(5, &copy_date)?,
        hash: row.get(6)?,
    })
}

fn row_to_error(row: &Row<'_>) -> rusqlite::Result<ErrorRecord> {
    let timestamp: String = row.get(1)?;
    Ok(ErrorRecord {
        id: row.get(0)?,
        timestamp: parse_timestamp(1, &timestamp)?,
        filename: row.get(2)?,
        error_type: row.get(3)?,
        error_message: row.get(4)?,
    })
}

fn decode_reason(err: &rusqlite::Error) -> String {
    match err {
        rusqlite::Error::FromSqlConversionFailure(idx, _, cause) => format!("column {}: {}", idx, cause),
        rusqlite::Error::InvalidColumnType(idx, name, ty) => {
            format!("column {} ({}): unexpected {}", idx, name, ty)
        }
        other => other.to_string(),
    }
}

fn decode_error(err: rusqlite::Error) -> LedgerError {
    match err {
        rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..) => {
            LedgerError::Corrupt {
                reason: decode_reason(&err),
            }
        }
        other => LedgerError::Sqlite(other),
    }
}

/// A fetched row: the raw sort key plus the decoded record, or why it
/// could not be decoded.
struct PageRow {
    id: i64,
    copy_date: Value,
    record: Result<ProcessedFileRecord, LedgerError>,
}

fn row_to_page_row(row: &Row<'_>) -> rusqlite::Result<PageRow> {
    let id: i64 = row.get(0)?;
    let copy_date: Value = row.get(5)?;
    let record = row_to_record(row).map_err(|e| LedgerError::CorruptRecord {
        id,
        filename: row.get::<_, String>(1).unwrap_or_default(),
        reason: decode_reason(&e),
    });
    Ok(PageRow { id, copy_date, record })
}

/// Shape of the timestamps this store writes (`2024-01-31T12:00:00.000000Z`).
const TIMESTAMP_GLOB: &str = "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T*Z";

fn map_insert_error(err: rusqlite::Error, filename: &str) -> LedgerError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
                && e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            LedgerError::DuplicateFilename {
                filename: filename.to_string(),
            }
        }
        _ => LedgerError::Sqlite(err),
    }
}

/// Handle to the ledger database.
///
/// Passed explicitly to every component that needs it; there is no
/// process-wide instance.
pub struct LedgerStore {
    pub(crate) conn: Connection,
}

impl LedgerStore {
    /// Open (creating if needed) the ledger at `path`.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| LedgerError::Open {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "Ledger opened");
        Ok(store)
    }

    /// Open a throwaway in-memory ledger.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// True iff a processed record exists for `filename`.
    pub fn lookup(&self, filename: &str) -> Result<bool, LedgerError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT EXISTS(SELECT 1 FROM processed_files WHERE filename = ?1)")?;
        let exists: bool = stmt.query_row(params![filename], |row| row.get(0))?;
        Ok(exists)
    }

    /// Insert a processed record in its own transaction.
    pub fn record_success(&self, record: &NewProcessedFile) -> Result<ProcessedFileRecord, LedgerError> {
        self.record_success_with(record, || Ok(()))
    }

    /// Insert a processed record and run `publish` before committing.
    ///
    /// The insert happens first so a duplicate filename is rejected before
    /// anything becomes visible at the final path. If `publish` fails the
    /// insert is rolled back. If the commit itself fails after `publish`
    /// succeeded, the caller owns undoing whatever `publish` did.
    pub fn record_success_with<F>(
        &self,
        record: &NewProcessedFile,
        publish: F,
    ) -> Result<ProcessedFileRecord, LedgerError>
    where
        F: FnOnce() -> io::Result<()>,
    {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO processed_files (filename, source_path, target_path, size, copy_date, hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.filename,
                record.source_path.to_string_lossy(),
                record.target_path.to_string_lossy(),
                record.size as i64,
                format_timestamp(&record.copy_date),
                record.hash,
            ],
        )
        .map_err(|e| map_insert_error(e, &record.filename))?;
        let id = tx.last_insert_rowid();

        publish().map_err(LedgerError::Publish)?;
        tx.commit()?;

        info!(filename = %record.filename, id, size = record.size, "File registered in ledger");
        Ok(ProcessedFileRecord {
            id,
            filename: record.filename.clone(),
            source_path: record.source_path.clone(),
            target_path: record.target_path.clone(),
            size: record.size,
            copy_date: record.copy_date,
            hash: record.hash.clone(),
        })
    }

    /// Append an error record. Independent of any success-path transaction.
    pub fn record_error(
        &self,
        filename: &str,
        error_type: ErrorType,
        message: &str,
    ) -> Result<ErrorRecord, LedgerError> {
        let timestamp = Utc::now();
        self.conn.execute(
            "INSERT INTO errors (timestamp, filename, error_type, error_message)
             VALUES (?1, ?2, ?3, ?4)",
            params![format_timestamp(&timestamp), filename, error_type.as_str(), message],
        )?;
        let id = self.conn.last_insert_rowid();
        warn!(filename, error_type = %error_type, id, "Error logged in ledger");
        Ok(ErrorRecord {
            id,
            timestamp,
            filename: filename.to_string(),
            error_type: error_type.as_str().to_string(),
            error_message: message.to_string(),
        })
    }

    /// Lazily iterate processed records, oldest copy first.
    pub fn list_processed(&self, filter: ProcessedFilter) -> ProcessedRecords<'_> {
        ProcessedRecords {
            store: self,
            filter,
            cursor: None,
            page: VecDeque::new(),
            yielded: 0,
            exhausted: false,
        }
    }

    /// Most recent error records first.
    pub fn list_errors(&self, limit: usize) -> Result<Vec<ErrorRecord>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, filename, error_type, error_message FROM errors
             ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_error)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(decode_error)
    }

    /// Aggregate counts, bytes and copy-date range.
    pub fn stats(&self) -> Result<Summary, LedgerError> {
        // Dates that do not look like ours are counted, not used for the range.
        let (processed_count, total_bytes, first, last, malformed): (
            i64,
            i64,
            Option<String>,
            Option<String>,
            i64,
        ) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0),
                    MIN(CASE WHEN typeof(copy_date) = 'text' AND copy_date GLOB ?1 THEN copy_date END),
                    MAX(CASE WHEN typeof(copy_date) = 'text' AND copy_date GLOB ?1 THEN copy_date END),
                    COALESCE(SUM(typeof(copy_date) != 'text' OR copy_date NOT GLOB ?1), 0)
             FROM processed_files",
            params![TIMESTAMP_GLOB],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
        )?;
        let error_count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM errors", [], |row| row.get(0))?;

        let mut malformed_dates = malformed.max(0) as u64;
        let mut bound = |raw: Option<String>| {
            let raw = raw?;
            match parse_timestamp(0, &raw) {
                Ok(ts) => Some(ts),
                Err(e) => {
                    warn!(copy_date = %raw, error = %decode_reason(&e), "Unreadable copy_date in ledger");
                    malformed_dates += 1;
                    None
                }
            }
        };
        let first_copy = bound(first);
        let last_copy = bound(last);
        if malformed_dates > 0 {
            warn!(malformed_dates, "Ledger holds records with unreadable copy dates");
        }

        Ok(Summary {
            processed_count: processed_count as u64,
            error_count: error_count as u64,
            total_bytes: total_bytes.max(0) as u64,
            first_copy,
            last_copy,
            malformed_dates,
        })
    }

    /// Compare every record against the filesystem.
    ///
    /// A missing target is expected (the downstream consumer deletes what it
    /// has processed) and is not reported. A present target whose size or
    /// digest disagrees with the record is.
    pub fn check_integrity(&self, options: IntegrityOptions) -> Result<Vec<Discrepancy>, LedgerError> {
        let mut discrepancies = Vec::new();
        let mut checked = 0usize;

        for record in self.list_processed(ProcessedFilter::default()) {
            let record = match record {
                Ok(record) => record,
                Err(LedgerError::CorruptRecord { id, filename, reason }) => {
                    warn!(id, filename = %filename, reason = %reason, "Undecodable ledger record");
                    discrepancies.push(Discrepancy {
                        filename,
                        target_path: None,
                        kind: DiscrepancyKind::CorruptRecord { id, reason },
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };
            checked += 1;
            if let Some(kind) = check_target(&record) {
                discrepancies.push(Discrepancy {
                    filename: record.filename.clone(),
                    target_path: Some(record.target_path.clone()),
                    kind,
                });
            }
            if options.flag_stale_sources && !matches!(record.source_path.try_exists(), Ok(true)) {
                discrepancies.push(Discrepancy {
                    filename: record.filename.clone(),
                    target_path: Some(record.target_path.clone()),
                    kind: DiscrepancyKind::StaleSource {
                        source_path: record.source_path.clone(),
                    },
                });
            }
        }

        info!(checked, found = discrepancies.len(), "Ledger integrity check complete");
        Ok(discrepancies)
    }

    /// Filenames carried by more than one record.
    ///
    /// Always empty while the UNIQUE constraint holds; a hand-edited or
    /// rebuilt database may have lost it.
    pub fn duplicate_filenames(&self) -> Result<Vec<(String, u64)>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT filename, COUNT(*) FROM processed_files
             GROUP BY filename HAVING COUNT(*) > 1 ORDER BY filename",
        )?;
        let rows = stmt.query_map([], |row| {
            let count: i64 = row.get(1)?;
            Ok((row.get::<_, String>(0)?, count as u64))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Output of SQLite's `PRAGMA integrity_check` (`"ok"` when healthy).
    pub fn sqlite_integrity_check(&self) -> Result<String, LedgerError> {
        let mut stmt = self.conn.prepare("PRAGMA integrity_check")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let lines = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(lines.join("; "))
    }

    fn fetch_page(
        &self,
        filter: &ProcessedFilter,
        cursor: Option<&(Value, i64)>,
        page_size: usize,
    ) -> Result<Vec<PageRow>, LedgerError> {
        let mut sql = format!("SELECT {} FROM processed_files WHERE 1 = 1", RECORD_COLUMNS);
        let mut args: Vec<Value> = Vec::new();

        if let Some(glob) = &filter.filename_glob {
            sql.push_str(" AND filename GLOB ?");
            args.push(Value::Text(glob.clone()));
        }
        if let Some(since) = &filter.since {
            sql.push_str(" AND copy_date >= ?");
            args.push(Value::Text(format_timestamp(since)));
        }
        if let Some(until) = &filter.until {
            sql.push_str(" AND copy_date < ?");
            args.push(Value::Text(format_timestamp(until)));
        }
        if let Some((date, id)) = cursor {
            sql.push_str(" AND (copy_date > ? OR (copy_date = ? AND id > ?))");
            args.push(date.clone());
            args.push(date.clone());
            args.push(Value::Integer(*id));
        }
        sql.push_str(" ORDER BY copy_date ASC, id ASC LIMIT ?");
        args.push(Value::Integer(page_size as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), row_to_page_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(decode_error)
    }
}

fn check_target(record: &ProcessedFileRecord) -> Option<DiscrepancyKind> {
    let metadata = match fs::metadata(&record.target_path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(filename = %record.filename, "Target already consumed");
            return None;
        }
        Err(e) => {
            return Some(DiscrepancyKind::Unverifiable {
                reason: format!("cannot stat target: {}", e),
            })
        }
    };

    if metadata.len() != record.size {
        return Some(DiscrepancyKind::SizeMismatch {
            recorded: record.size,
            on_disk: metadata.len(),
        });
    }

    let stored = record.hash.as_deref()?;
    let Some(expected) = ChecksumValue::parse_tagged(stored) else {
        return Some(DiscrepancyKind::Unverifiable {
            reason: format!("unrecognized stored digest '{}'", stored),
        });
    };
    match compute_file_checksum(&record.target_path, expected.algorithm()) {
        Ok(actual) if actual.hex() == expected.hex() => None,
        Ok(actual) => Some(DiscrepancyKind::HashMismatch {
            recorded: expected.to_string_with_algo(),
            on_disk: actual.to_string_with_algo(),
        }),
        Err(e) => Some(DiscrepancyKind::Unverifiable {
            reason: format!("cannot hash target: {}", e),
        }),
    }
}

/// Lazy, finite, restartable sequence of processed records.
///
/// Pages through the table by the stored `(copy_date, id)` so memory stays
/// bounded no matter how large the ledger grows. A row that cannot be decoded
/// is yielded as `LedgerError::CorruptRecord` and iteration carries on.
pub struct ProcessedRecords<'a> {
    store: &'a LedgerStore,
    filter: ProcessedFilter,
    cursor: Option<(Value, i64)>,
    page: VecDeque<Result<ProcessedFileRecord, LedgerError>>,
    yielded: usize,
    exhausted: bool,
}

impl ProcessedRecords<'_> {
    /// Rewind to the first record.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.page.clear();
        self.yielded = 0;
        self.exhausted = false;
    }

    fn remaining(&self) -> Option<usize> {
        self.filter.limit.map(|limit| limit.saturating_sub(self.yielded))
    }
}

impl Iterator for ProcessedRecords<'_> {
    type Item = Result<ProcessedFileRecord, LedgerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining() == Some(0) {
            return None;
        }

        if self.page.is_empty() && !self.exhausted {
            let page_size = self.remaining().map_or(PAGE_SIZE, |r| r.min(PAGE_SIZE));
            match self.store.fetch_page(&self.filter, self.cursor.as_ref(), page_size) {
                Ok(rows) => {
                    if rows.len() < page_size {
                        self.exhausted = true;
                    }
                    if let Some(last) = rows.last() {
                        self.cursor = Some((last.copy_date.clone(), last.id));
                    }
                    self.page.extend(rows.into_iter().map(|row| row.record));
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        let record = self.page.pop_front()?;
        self.yielded += 1;
        Some(record)
    }
}
