// src/scheduler/mod.rs

//! Wall-clock scheduling.
//!
//! - [`entry`] turns loaded workflows into `(dag, action, next-fire-time)`
//!   entries.
//! - [`tick`] is the minute-aligned loop that dispatches due entries.

pub mod entry;
pub mod tick;

pub use entry::{DirEntryReader, Entry, EntryKind, EntryReader};
pub use tick::SchedulerLoop;

use std::sync::Arc;

/// Seam between the tick loop and execution. Implementations dispatch the
/// entry on their own task and never block the loop; failures are theirs to
/// log.
pub trait Invoker: Send + Sync {
    fn invoke(&self, entry: Entry);
}

/// Invoker backed by a closure. Used by tests and small embeddings.
pub struct FnInvoker<F: Fn(Entry) + Send + Sync>(pub F);

impl<F: Fn(Entry) + Send + Sync> Invoker for FnInvoker<F> {
    fn invoke(&self, entry: Entry) {
        (self.0)(entry)
    }
}

/// Convenience for wrapping a closure as a shared invoker.
pub fn invoker_fn<F: Fn(Entry) + Send + Sync + 'static>(f: F) -> Arc<dyn Invoker> {
    Arc::new(FnInvoker(f))
}
