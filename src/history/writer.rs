// src/history/writer.rs

//! Append-only status file writer and its inverse, the line-fold parser.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::history::status::Status;
use crate::history::StoreError;

/// Appends status snapshots to a file, one JSON document per line.
#[derive(Debug)]
pub struct StatusWriter {
    path: PathBuf,
    file: BufWriter<File>,
}

impl StatusWriter {
    /// Open the file for appending, creating it when absent. The parent
    /// directory must already exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize the status and append it as one line. Each write is flushed
    /// so readers observe complete lines promptly.
    pub fn write(&mut self, status: &Status) -> Result<(), StoreError> {
        let line = status
            .to_json()
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        Ok(())
    }

    /// Flush and close.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.file.flush()?;
        debug!(path = ?self.path, "status writer closed");
        Ok(())
    }
}

/// Parse a status file: the value of the log is the fold of its lines with
/// "use the latest decodable line" as the combiner.
///
/// Lines that fail to decode are skipped, which tolerates a torn trailing
/// write after a crash as well as concurrent appends. A file with no
/// decodable line at all fails with [`StoreError::Empty`].
pub fn parse_status_file(path: &Path) -> Result<Status, StoreError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut latest: Option<Status> = None;
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match Status::from_json(&line) {
            Ok(status) => latest = Some(status),
            Err(e) => debug!(path = ?path, error = %e, "skipping undecodable status line"),
        }
    }

    latest.ok_or_else(|| StoreError::Empty(path.to_path_buf()))
}
