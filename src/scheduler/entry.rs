// src/scheduler/entry.rs

//! Scheduler entries and the reader that produces them.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local};
use tracing::warn;

use crate::dag::{CronSpec, Dag, Loader};

/// The action an entry triggers when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Start,
    Stop,
    Restart,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Start => write!(f, "start"),
            EntryKind::Stop => write!(f, "stop"),
            EntryKind::Restart => write!(f, "restart"),
        }
    }
}

/// A scheduler-visible unit: one workflow, one action, one fire time.
#[derive(Debug, Clone)]
pub struct Entry {
    pub dag: Arc<Dag>,
    pub kind: EntryKind,
    /// The next time this entry is due, computed from the workflow's
    /// schedule relative to the reader's base instant.
    pub next: DateTime<Local>,
}

/// Produces the entries whose next fire time falls after a base instant.
pub trait EntryReader: Send + Sync {
    fn read(&self, base: DateTime<Local>) -> Result<Vec<Entry>>;
}

/// Entry reader over a directory of workflow files.
///
/// Each tick re-reads the directory, so adding or editing a workflow file
/// takes effect on the next minute without a restart. A file that fails to
/// load is logged and skipped; it cannot take down the tick.
pub struct DirEntryReader {
    dags_dir: PathBuf,
    loader: Loader,
}

impl DirEntryReader {
    pub fn new(dags_dir: impl Into<PathBuf>, loader: Loader) -> Self {
        Self {
            dags_dir: dags_dir.into(),
            loader,
        }
    }
}

impl EntryReader for DirEntryReader {
    fn read(&self, base: DateTime<Local>) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();

        for dir_entry in std::fs::read_dir(&self.dags_dir)? {
            let path = match dir_entry {
                Ok(e) => e.path(),
                Err(e) => {
                    warn!(error = %e, "failed to read workflow directory entry");
                    continue;
                }
            };
            if !matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            ) {
                continue;
            }
            let Some(path_str) = path.to_str() else {
                continue;
            };

            let dag = match self.loader.load(path_str, "") {
                Ok(dag) => Arc::new(dag),
                Err(e) => {
                    warn!(file = ?path, error = %e, "failed to load workflow; skipping");
                    continue;
                }
            };

            for (kind, crons) in [
                (EntryKind::Start, &dag.schedule.start),
                (EntryKind::Stop, &dag.schedule.stop),
                (EntryKind::Restart, &dag.schedule.restart),
            ] {
                entries.extend(crons.iter().filter_map(|cron| {
                    next_fire(cron, base).map(|next| Entry {
                        dag: Arc::clone(&dag),
                        kind,
                        next,
                    })
                }));
            }
        }

        Ok(entries)
    }
}

/// First fire time strictly after `base`, or `None` for a schedule that
/// never fires again.
fn next_fire(cron: &CronSpec, base: DateTime<Local>) -> Option<DateTime<Local>> {
    cron.schedule.after(&base).next()
}
