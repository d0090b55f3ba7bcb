// src/history/mod.rs

//! Execution history on the local filesystem.
//!
//! Responsibilities:
//! - Model one execution snapshot (`status.rs`).
//! - Append snapshots to a JSON-line log and fold it back (`writer.rs`).
//! - Cache parsed status files keyed on modification time (`cache.rs`).
//! - The store itself: lifecycle, queries, compaction, retention, rename
//!   (`store.rs`).

pub mod cache;
pub mod status;
pub mod store;
pub mod writer;

pub use cache::FileCache;
pub use status::{Node, RunStatus, Status};
pub use store::{HistoryStore, StatusFile};
pub use writer::{parse_status_file, StatusWriter};

use std::path::PathBuf;

use thiserror::Error;

/// Classified history-store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `open` called while a writer is already installed.
    #[error("a status writer is already open")]
    WriterOpen,

    /// `write` called with no open writer.
    #[error("no status writer is open")]
    NotOpen,

    /// No execution matches the request ID.
    #[error("request ID not found: {0}")]
    RequestIdNotFound(String),

    /// No execution recorded today (strict-today mode).
    #[error("no status data for today")]
    NoStatusDataToday,

    /// No execution recorded at all.
    #[error("no status data")]
    NoStatusData,

    /// Rename target already exists.
    #[error("history already exists for: {0}")]
    Conflict(String),

    /// Compaction requested on an already compacted file.
    #[error("file is already compacted: {0:?}")]
    AlreadyCompacted(PathBuf),

    /// A status file with zero decodable lines.
    #[error("no decodable status lines in: {0:?}")]
    Empty(PathBuf),

    /// An index filename that does not follow the expected format.
    #[error("invalid index file: {0:?}")]
    InvalidIndexFile(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
