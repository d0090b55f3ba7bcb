// src/exec/mod.rs

//! In-process workflow invocation.
//!
//! - [`runner`] executes one invocation end to end.
//! - [`DagInvoker`] is the [`Invoker`] the scheduler dispatches through: it
//!   keeps a registry of running workflows so `Start` is idempotent while a
//!   run is active, `Stop` cancels it, and `Restart` does both.

pub mod runner;

pub use runner::run_dag;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dag::Dag;
use crate::history::{HistoryStore, RunStatus};
use crate::report::Reporter;
use crate::scheduler::{Entry, EntryKind, Invoker};

type RunningMap = HashMap<String, watch::Sender<bool>>;

/// Dispatches scheduler entries onto detached tasks.
///
/// Each invocation gets its own [`HistoryStore`] over the shared base
/// directory, so concurrent workflows never contend for the store's single
/// writer slot.
#[derive(Clone)]
pub struct DagInvoker {
    history_dir: PathBuf,
    reporter: Arc<Reporter>,
    running: Arc<Mutex<RunningMap>>,
}

impl DagInvoker {
    pub fn new(history_dir: impl Into<PathBuf>, reporter: Arc<Reporter>) -> Self {
        Self {
            history_dir: history_dir.into(),
            reporter,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_running(&self, dag_id: &str) -> bool {
        self.lock_running().contains_key(dag_id)
    }

    fn start(&self, dag: Arc<Dag>) {
        let mut running = self.lock_running();
        if running.contains_key(&dag.id) {
            warn!(dag = %dag.id, "workflow already running; skipping start");
            return;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        running.insert(dag.id.clone(), cancel_tx);
        drop(running);

        let store = Arc::new(HistoryStore::new(&self.history_dir, true));
        let reporter = Arc::clone(&self.reporter);
        let registry = Arc::clone(&self.running);

        info!(dag = %dag.id, "starting workflow");
        tokio::spawn(async move {
            match run_dag(Arc::clone(&dag), store, reporter, cancel_rx).await {
                Ok(status) if status.status == RunStatus::Error => {
                    warn!(dag = %dag.id, "workflow finished with errors");
                }
                Ok(_) => {}
                Err(e) => error!(dag = %dag.id, error = %e, "workflow invocation failed"),
            }
            registry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&dag.id);
        });
    }

    fn stop(&self, dag_id: &str) {
        match self.lock_running().get(dag_id) {
            Some(cancel_tx) => {
                info!(dag = %dag_id, "stopping workflow");
                let _ = cancel_tx.send(true);
            }
            None => debug!(dag = %dag_id, "stop requested but workflow is not running"),
        }
    }

    fn restart(&self, dag: Arc<Dag>) {
        self.stop(&dag.id);

        let invoker = self.clone();
        tokio::spawn(async move {
            // Give the cancelled run a bounded window to unwind before the
            // fresh start; if it lingers, start() skips and logs.
            for _ in 0..100 {
                if !invoker.is_running(&dag.id) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            invoker.start(dag);
        });
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, RunningMap> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Invoker for DagInvoker {
    fn invoke(&self, entry: Entry) {
        match entry.kind {
            EntryKind::Start => self.start(entry.dag),
            EntryKind::Stop => self.stop(&entry.dag.id),
            EntryKind::Restart => self.restart(entry.dag),
        }
    }
}
