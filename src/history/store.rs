// src/history/store.rs

//! The on-disk history store.
//!
//! Two directory trees share one filename scheme:
//!
//! ```text
//! baseDir/
//!   index/<normalized-id>/<id>.<YYYYMMDD.HH:MM:SS.mmm>.<reqIDPrefix>.dat
//!   status/<YYYY>/<MM>/<DD>/<id>.<YYYYMMDD.HH:MM:SS.mmm>.<reqIDPrefix>.dat
//! ```
//!
//! The index file is empty; listing `index/<id>/` sorted descending by name
//! enumerates a workflow's executions newest-first without walking the
//! date-partitioned status tree. The status file holds the JSON-line log.
//! Compaction rewrites a finished log to a single-line `_c.dat` sibling.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate};
use regex::Regex;
use tracing::{error, warn};

use crate::fileutil::{normalized_id, trunc_string};
use crate::history::cache::FileCache;
use crate::history::status::Status;
use crate::history::writer::{parse_status_file, StatusWriter};
use crate::history::StoreError;
use crate::timeutil;

const DEFAULT_CACHE_CAPACITY: usize = 300;
const CACHE_TTL: Duration = Duration::from_secs(3 * 60 * 60);

/// Request IDs are truncated to this many characters inside filenames; the
/// full ID lives in the JSON.
pub const REQUEST_ID_LEN_SAFE: usize = 8;

const EXT_DAT: &str = ".dat";
const COMPACTED_SUFFIX: &str = "_c.dat";

const FILE_TIME_FORMAT: &str = "%Y%m%d.%H:%M:%S%.3f";
const DATE_FORMAT: &str = "%Y%m%d";

/// A status file path together with its parsed latest status.
#[derive(Debug, Clone)]
pub struct StatusFile {
    pub file: PathBuf,
    pub status: Status,
}

/// Append-only execution history with indexed lookup, compaction and
/// retention. One open writer at a time, process-wide.
#[derive(Debug)]
pub struct HistoryStore {
    base_dir: PathBuf,
    writer: Mutex<Option<StatusWriter>>,
    cache: FileCache,
    /// When set, `read_status_today` only accepts an execution started
    /// today; otherwise it falls back to the most recent one.
    latest_status_today: bool,
}

impl HistoryStore {
    pub fn new(base_dir: impl Into<PathBuf>, latest_status_today: bool) -> Self {
        Self {
            base_dir: base_dir.into(),
            writer: Mutex::new(None),
            cache: FileCache::new(DEFAULT_CACHE_CAPACITY, CACHE_TTL),
            latest_status_today,
        }
    }

    /// Start the cache's background eviction loop.
    pub fn start_cache_eviction(&self) {
        self.cache.start_eviction();
    }

    /// Begin a new execution record: create the index file and the status
    /// file, and install the writer. Fails with [`StoreError::WriterOpen`]
    /// while a previous writer has not been closed.
    pub fn open(
        &self,
        dag_id: &str,
        started_at: DateTime<Local>,
        request_id: &str,
    ) -> Result<(), StoreError> {
        let mut writer = self.lock_writer();
        if writer.is_some() {
            return Err(StoreError::WriterOpen);
        }

        let filename = craft_status_filename(dag_id, request_id, started_at);

        let index_file = self.index_dir(dag_id).join(&filename);
        if let Some(parent) = index_file.parent() {
            fs::create_dir_all(parent)?;
        }
        if !index_file.exists() {
            fs::File::create(&index_file)?;
        }

        let status_file = self.status_dir(started_at).join(&filename);
        if let Some(parent) = status_file.parent() {
            fs::create_dir_all(parent)?;
        }

        *writer = Some(StatusWriter::open(&status_file)?);
        Ok(())
    }

    /// Append one snapshot through the open writer.
    pub fn write(&self, status: &Status) -> Result<(), StoreError> {
        let mut writer = self.lock_writer();
        writer.as_mut().ok_or(StoreError::NotOpen)?.write(status)
    }

    /// Finalize the current execution record: invalidate the cache entry,
    /// close the writer, compact the file. Idempotent; a compaction failure
    /// is logged and does not fail the close.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut guard = self.lock_writer();
        let Some(writer) = guard.take() else {
            return Ok(());
        };

        let status_file = writer.path().to_path_buf();
        self.cache.invalidate(&status_file);

        if let Err(e) = writer.close() {
            error!(file = ?status_file, error = %e, "failed to close status writer");
        }
        if let Err(e) = self.compact(&status_file) {
            error!(file = ?status_file, error = %e, "failed to compact status file");
        }

        Ok(())
    }

    /// Rewrite the status of a past execution found by request ID: append a
    /// corrected snapshot through a writer scoped to that file.
    pub fn update(&self, dag_id: &str, request_id: &str, status: &Status) -> Result<(), StoreError> {
        let found = self.find_by_request_id(dag_id, request_id)?;

        let mut writer = StatusWriter::open(&found.file)?;
        let result = writer.write(status);
        self.cache.invalidate(&found.file);
        if let Err(e) = writer.close() {
            warn!(file = ?found.file, error = %e, "failed to close update writer");
        }
        result
    }

    /// Replace a finished multi-line status file with a single-line sibling
    /// carrying the compacted suffix, then remove the original.
    pub fn compact(&self, status_file: &Path) -> Result<(), StoreError> {
        let status = match parse_status_file(status_file) {
            Ok(status) => status,
            // Nothing was ever written; nothing to compact.
            Err(StoreError::Empty(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        let compacted_file = craft_compacted_filename(status_file)?;

        let mut writer = StatusWriter::open(&compacted_file)?;
        if let Err(e) = writer.write(&status) {
            // Roll back the partial compacted file.
            if let Err(remove_err) = fs::remove_file(&compacted_file) {
                warn!(file = ?compacted_file, error = %remove_err, "failed to remove partial compacted file");
            }
            return Err(e);
        }
        writer.close()?;

        fs::remove_file(status_file)?;
        Ok(())
    }

    /// The `n` most recent executions, newest first. A workflow with no
    /// history yields an empty list, not an error; unreadable entries are
    /// logged and skipped.
    pub fn read_status_recent(&self, dag_id: &str, n: usize) -> Vec<StatusFile> {
        let index_dir = self.index_dir(dag_id);
        if !index_dir.exists() {
            return Vec::new();
        }

        let index_files = match list_files_sorted_desc(&index_dir) {
            Ok(files) => files,
            Err(e) => {
                error!(dir = ?index_dir, error = %e, "failed to list index directory");
                return Vec::new();
            }
        };

        let mut ret = Vec::new();
        for index_file in index_files.into_iter().take(n) {
            match self.resolve_index_file(&index_file) {
                Ok(Some(status_file)) => {
                    match self.load_cached(&status_file) {
                        Ok(status) => ret.push(StatusFile {
                            file: status_file,
                            status,
                        }),
                        Err(e) => error!(file = ?status_file, error = %e, "failed to parse status file"),
                    }
                }
                Ok(None) => error!(file = ?index_file, "no status files found for index entry"),
                Err(e) => error!(file = ?index_file, error = %e, "failed to resolve index entry"),
            }
        }

        ret
    }

    /// The latest status. In strict-today mode only an execution whose
    /// filename carries today's date qualifies.
    pub fn read_status_today(&self, dag_id: &str) -> Result<Status, StoreError> {
        let file = self.latest_today(dag_id, timeutil::now())?;
        self.load_cached(&file)
    }

    /// All executions of one date, sorted by `StartedAt` descending.
    pub fn read_status_for_date(
        &self,
        dag_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<StatusFile>, StoreError> {
        let index_dir = self.index_dir(dag_id);
        let date_str = date.format(DATE_FORMAT).to_string();

        let mut ret = Vec::new();
        for index_file in list_files_sorted_desc(&index_dir).unwrap_or_default() {
            if !file_name(&index_file).contains(&date_str) {
                continue;
            }
            let (status_dir, prefix) = match index_to_status_pattern(&self.base_dir, &index_file) {
                Ok(pattern) => pattern,
                Err(e) => {
                    error!(file = ?index_file, error = %e, "failed to resolve index entry");
                    continue;
                }
            };
            for status_file in glob_status_files(&status_dir, &prefix) {
                match self.load_cached(&status_file) {
                    Ok(status) => ret.push(StatusFile {
                        file: status_file,
                        status,
                    }),
                    Err(e) => error!(file = ?status_file, error = %e, "failed to parse status file"),
                }
            }
        }

        ret.sort_by(|a, b| b.status.started_at.cmp(&a.status.started_at));
        Ok(ret)
    }

    /// Find one execution by its full request ID.
    ///
    /// The filename only carries a truncated prefix, so candidates are
    /// globbed by prefix and confirmed against the `RequestId` stored in the
    /// JSON, parsed uncached.
    pub fn find_by_request_id(
        &self,
        dag_id: &str,
        request_id: &str,
    ) -> Result<StatusFile, StoreError> {
        if request_id.is_empty() {
            return Err(StoreError::RequestIdNotFound(String::new()));
        }

        let index_dir = self.index_dir(dag_id);
        let safe_req_id = trunc_string(request_id, REQUEST_ID_LEN_SAFE);

        let mut matches: Vec<PathBuf> = list_files_sorted_desc(&index_dir)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| file_name(p).contains(safe_req_id))
            .collect();
        matches.sort_by(|a, b| b.cmp(a));

        for index_file in matches {
            let (status_dir, prefix) = match index_to_status_pattern(&self.base_dir, &index_file) {
                Ok(pattern) => pattern,
                Err(e) => {
                    warn!(file = ?index_file, error = %e, "failed to resolve index entry");
                    continue;
                }
            };
            for status_file in glob_status_files(&status_dir, &prefix) {
                match parse_status_file(&status_file) {
                    Ok(status) if status.request_id == request_id => {
                        return Ok(StatusFile {
                            file: status_file,
                            status,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => warn!(file = ?status_file, error = %e, "parsing failed"),
                }
            }
        }

        Err(StoreError::RequestIdNotFound(request_id.to_string()))
    }

    /// Remove the entire history of a workflow.
    pub fn remove_all(&self, dag_id: &str) -> Result<(), StoreError> {
        self.remove_old(dag_id, 0)
    }

    /// Remove executions whose latest status file is older than the
    /// retention window. Negative retention disables removal. Errors are
    /// logged per file; the last one is returned, but the pass continues.
    pub fn remove_old(&self, dag_id: &str, retention_days: i32) -> Result<(), StoreError> {
        if retention_days < 0 {
            return Ok(());
        }

        let index_dir = self.index_dir(dag_id);
        let expiry = timeutil::now() - ChronoDuration::days(i64::from(retention_days));

        let mut last_err: Option<StoreError> = None;
        for index_file in list_files_sorted_desc(&index_dir).unwrap_or_default() {
            let (status_dir, prefix) = match index_to_status_pattern(&self.base_dir, &index_file) {
                Ok(pattern) => pattern,
                Err(e) => {
                    warn!(file = ?index_file, error = %e, "failed to resolve index entry");
                    continue;
                }
            };
            let status_files = glob_status_files(&status_dir, &prefix);
            let Some(latest) = status_files.first() else {
                warn!(file = ?index_file, "no status files found for index entry");
                continue;
            };

            let mtime = match fs::metadata(latest).and_then(|m| m.modified()) {
                Ok(mtime) => DateTime::<Local>::from(mtime),
                Err(e) => {
                    warn!(file = ?latest, error = %e, "failed to stat status file");
                    continue;
                }
            };
            if mtime > expiry {
                continue;
            }

            if let Err(e) = fs::remove_file(&index_file) {
                warn!(file = ?index_file, error = %e, "failed to remove index file");
                last_err = Some(e.into());
            }
            for status_file in &status_files {
                self.cache.invalidate(status_file);
                if let Err(e) = fs::remove_file(status_file) {
                    warn!(file = ?status_file, error = %e, "failed to remove status file");
                    last_err = Some(e.into());
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Change a workflow's history ID by renaming its index directory.
    ///
    /// The date-partitioned status files are left untouched; their filenames
    /// keep the old ID, and resolution keeps working through the index.
    pub fn rename(&self, old_id: &str, new_id: &str) -> Result<(), StoreError> {
        if old_id == new_id {
            return Ok(());
        }

        let old_dir = self.index_dir(old_id);
        if !old_dir.exists() {
            return Ok(());
        }

        let new_dir = self.index_dir(new_id);
        if new_dir.exists() {
            return Err(StoreError::Conflict(new_id.to_string()));
        }

        fs::rename(&old_dir, &new_dir)?;
        Ok(())
    }

    fn index_dir(&self, dag_id: &str) -> PathBuf {
        self.base_dir.join("index").join(normalized_id(dag_id))
    }

    fn status_dir(&self, t: DateTime<Local>) -> PathBuf {
        self.base_dir
            .join("status")
            .join(t.format("%Y").to_string())
            .join(t.format("%m").to_string())
            .join(t.format("%d").to_string())
    }

    /// Latest index entry resolved to its status file; strict mode narrows
    /// the candidates to today's date.
    fn latest_today(&self, dag_id: &str, day: DateTime<Local>) -> Result<PathBuf, StoreError> {
        let index_dir = self.index_dir(dag_id);
        let id = normalized_id(dag_id);
        let date_str = day.format(DATE_FORMAT).to_string();

        let matches: Vec<PathBuf> = list_files_sorted_desc(&index_dir)
            .unwrap_or_default()
            .into_iter()
            .filter(|p| {
                let name = file_name(p);
                name.starts_with(&id) && (!self.latest_status_today || name.contains(&date_str))
            })
            .collect();

        let Some(latest) = matches.first() else {
            return Err(if self.latest_status_today {
                StoreError::NoStatusDataToday
            } else {
                StoreError::NoStatusData
            });
        };

        self.resolve_index_file(latest)?
            .ok_or(StoreError::NoStatusData)
    }

    /// Expand an index entry to its newest status file, if any.
    fn resolve_index_file(&self, index_file: &Path) -> Result<Option<PathBuf>, StoreError> {
        let (status_dir, prefix) = index_to_status_pattern(&self.base_dir, index_file)?;
        Ok(glob_status_files(&status_dir, &prefix).into_iter().next())
    }

    fn load_cached(&self, status_file: &Path) -> Result<Status, StoreError> {
        self.cache
            .load_latest(status_file, || parse_status_file(status_file))
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<StatusWriter>> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// `<normalizedID>.<timestamp>.<reqIDPrefix>.dat`
fn craft_status_filename(dag_id: &str, request_id: &str, t: DateTime<Local>) -> String {
    format!(
        "{}.{}.{}{}",
        normalized_id(dag_id),
        t.format(FILE_TIME_FORMAT),
        trunc_string(request_id, REQUEST_ID_LEN_SAFE),
        EXT_DAT,
    )
}

/// Sibling filename with the compacted suffix. Compacted input is refused.
fn craft_compacted_filename(status_file: &Path) -> Result<PathBuf, StoreError> {
    let name = file_name(status_file);
    if name.ends_with(COMPACTED_SUFFIX) {
        return Err(StoreError::AlreadyCompacted(status_file.to_path_buf()));
    }
    let stem = name.strip_suffix(EXT_DAT).unwrap_or(&name);
    Ok(status_file.with_file_name(format!("{stem}{COMPACTED_SUFFIX}")))
}

fn index_file_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d{4})(\d{2})(\d{2})\.\d{2}:\d{2}:\d{2}\.\d{3}\.[^.]+\.dat$")
            .unwrap_or_else(|e| panic!("index filename pattern: {e}"))
    })
}

/// Derive the status-directory and filename prefix an index entry points at.
///
/// The prefix expands to both the plain and the compacted variant of the
/// status file.
fn index_to_status_pattern(
    base_dir: &Path,
    index_file: &Path,
) -> Result<(PathBuf, String), StoreError> {
    let name = file_name(index_file);
    let caps = index_file_pattern()
        .captures(&name)
        .ok_or_else(|| StoreError::InvalidIndexFile(index_file.to_path_buf()))?;

    let status_dir = base_dir
        .join("status")
        .join(&caps[1])
        .join(&caps[2])
        .join(&caps[3]);
    let prefix = name.strip_suffix(EXT_DAT).unwrap_or(&name).to_string();
    Ok((status_dir, prefix))
}

/// Status files in `dir` whose name starts with `prefix`, newest first.
fn glob_status_files(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                let name = file_name(p);
                p.is_file() && name.starts_with(prefix) && name.ends_with(EXT_DAT)
            })
            .collect(),
        Err(_) => return Vec::new(),
    };
    files.sort_by(|a, b| b.cmp(a));
    files
}

/// `.dat` files in a directory, sorted descending by name (newest first,
/// thanks to the embedded timestamp).
fn list_files_sorted_desc(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && file_name(p).ends_with(EXT_DAT))
        .collect();
    files.sort_by(|a, b| b.cmp(a));
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn status_filename_embeds_time_and_request_prefix() {
        let t = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let name = craft_status_filename("Hello World", "abcd1234efgh5678", t);
        assert_eq!(name, "hello_world.20240102.03:04:05.000.abcd1234.dat");
    }

    #[test]
    fn compacted_filename_swaps_suffix() {
        let path = Path::new("/data/status/2024/01/02/wf.20240102.03:04:05.000.abcd1234.dat");
        let compacted = craft_compacted_filename(path).unwrap();
        assert_eq!(
            file_name(&compacted),
            "wf.20240102.03:04:05.000.abcd1234_c.dat"
        );
    }

    #[test]
    fn compacted_input_is_refused() {
        let path = Path::new("/data/status/2024/01/02/wf.20240102.03:04:05.000.abcd1234_c.dat");
        let err = craft_compacted_filename(path).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyCompacted(_)), "got {err:?}");
    }

    #[test]
    fn index_pattern_round_trips_with_status_path() {
        let base = Path::new("/data");
        let t = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let name = craft_status_filename("wf", "abcd1234", t);
        let index_file = base.join("index").join("wf").join(&name);

        let (dir, prefix) = index_to_status_pattern(base, &index_file).unwrap();
        assert_eq!(dir, base.join("status").join("2024").join("01").join("02"));
        assert_eq!(prefix, "wf.20240102.03:04:05.000.abcd1234");
    }

    #[test]
    fn malformed_index_name_is_rejected() {
        let err =
            index_to_status_pattern(Path::new("/data"), Path::new("/data/index/wf/bogus.dat"))
                .unwrap_err();
        assert!(matches!(err, StoreError::InvalidIndexFile(_)), "got {err:?}");
    }
}
