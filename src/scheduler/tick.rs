// src/scheduler/tick.rs

//! The minute-aligned tick loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Local};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::scheduler::entry::{Entry, EntryReader};
use crate::scheduler::Invoker;
use crate::timeutil;

/// Handle for requesting a stop from outside the loop.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: mpsc::Sender<()>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Single long-lived loop that wakes at every minute boundary and dispatches
/// due entries.
///
/// Tick alignment is best-effort: if one pass overruns the minute, the next
/// tick fires immediately and the loop skews. Ticks missed across process
/// restarts are not replayed.
pub struct SchedulerLoop {
    entry_reader: Arc<dyn EntryReader>,
    invoker: Arc<dyn Invoker>,
    stop_tx: mpsc::Sender<()>,
    stop_rx: mpsc::Receiver<()>,
}

impl SchedulerLoop {
    pub fn new(entry_reader: Arc<dyn EntryReader>, invoker: Arc<dyn Invoker>) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        Self {
            entry_reader,
            invoker,
            stop_tx,
            stop_rx,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Run until a stop is requested. Termination signals route to stop; the
    /// loop never cancels invocations already in flight.
    pub async fn start(&mut self) -> Result<()> {
        spawn_signal_listener(self.stop_handle());

        info!("scheduler started");
        let mut tick = timeutil::truncate_to_minute(timeutil::now());

        loop {
            let wait = (tick - timeutil::now())
                .to_std()
                .unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.run(tick);
                    tick = next_tick(tick);
                }
                _ = self.stop_rx.recv() => {
                    info!("scheduler stopping");
                    break;
                }
            }
        }

        Ok(())
    }

    /// One pass: collect entries due since just before the previous tick and
    /// dispatch every entry whose fire time has arrived, in fire-time order.
    ///
    /// The one-second back-off on the read window absorbs clock drift
    /// between the tick instant and schedule computation.
    pub fn run(&self, now: DateTime<Local>) {
        let base = now - ChronoDuration::seconds(1);
        let mut entries: Vec<Entry> = match self.entry_reader.read(base) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to read entries");
                return;
            }
        };

        entries.sort_by_key(|e| e.next);

        for entry in entries {
            if entry.next > now {
                break;
            }
            debug!(
                dag = %entry.dag.id,
                kind = %entry.kind,
                next = %entry.next,
                "dispatching entry"
            );
            self.invoker.invoke(entry);
        }
    }
}

fn next_tick(tick: DateTime<Local>) -> DateTime<Local> {
    timeutil::truncate_to_minute(tick + ChronoDuration::minutes(1))
}

/// Route termination signals to the stop handle.
#[cfg(unix)]
fn spawn_signal_listener(handle: StopHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    for kind in [
        SignalKind::hangup(),
        SignalKind::interrupt(),
        SignalKind::terminate(),
        SignalKind::quit(),
    ] {
        match signal(kind) {
            Ok(mut stream) => {
                let handle = handle.clone();
                tokio::spawn(async move {
                    if stream.recv().await.is_some() {
                        handle.stop();
                    }
                });
            }
            Err(e) => warn!(error = %e, "failed to install signal handler"),
        }
    }
}

#[cfg(not(unix))]
fn spawn_signal_listener(handle: StopHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.stop();
        }
    });
}
