// src/lib.rs

pub mod cli;
pub mod dag;
pub mod errors;
pub mod exec;
pub mod fileutil;
pub mod history;
pub mod logging;
pub mod report;
pub mod scheduler;
pub mod timeutil;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::CliArgs;
use crate::dag::Loader;
use crate::exec::DagInvoker;
use crate::history::HistoryStore;
use crate::report::{LogSender, Reporter};
use crate::scheduler::{DirEntryReader, SchedulerLoop};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - the workflow loader (with optional base config)
/// - the history store under `--data-dir`
/// - the entry reader over `--dags`
/// - the invoker and the minute tick loop
/// - signal handling (installed by the loop itself)
pub async fn run(args: CliArgs) -> Result<()> {
    let loader = Loader::new(args.base_config.as_ref().map(PathBuf::from));

    if args.dry_run {
        print_dry_run(&args.dags, &loader)?;
        return Ok(());
    }

    let dags_dir = PathBuf::from(&args.dags);
    if !dags_dir.is_dir() {
        anyhow::bail!("workflow directory not found: {}", dags_dir.display());
    }

    // Long-lived store for the cache eviction loop; invocations open their
    // own writers over the same base directory.
    let store = HistoryStore::new(&args.data_dir, true);
    store.start_cache_eviction();

    let reporter = Arc::new(Reporter::new(Box::new(LogSender)));
    let invoker = Arc::new(DagInvoker::new(&args.data_dir, reporter));
    let entry_reader = Arc::new(DirEntryReader::new(dags_dir, loader));

    info!(dags = %args.dags, data_dir = %args.data_dir, "dagrun starting");

    let mut scheduler = SchedulerLoop::new(entry_reader, invoker);
    scheduler.start().await
}

/// Load every workflow and print its schedule and steps, without executing.
fn print_dry_run(dags_dir: &str, loader: &Loader) -> Result<()> {
    println!("dagrun dry-run");

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dags_dir)
        .with_context(|| format!("reading workflow directory {dags_dir:?}"))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            )
        })
        .collect();
    paths.sort();

    for path in paths {
        let Some(path_str) = path.to_str() else {
            continue;
        };
        match loader.load_without_eval(path_str) {
            Ok(dag) => {
                println!("  - {} ({})", dag.name, dag.id);
                for cron in &dag.schedule.start {
                    println!("      start: {}", cron.expression);
                }
                for cron in &dag.schedule.stop {
                    println!("      stop: {}", cron.expression);
                }
                for cron in &dag.schedule.restart {
                    println!("      restart: {}", cron.expression);
                }
                for step in &dag.steps {
                    if step.depends.is_empty() {
                        println!("      step: {} -> {}", step.name, step.command);
                    } else {
                        println!(
                            "      step: {} -> {} (after {:?})",
                            step.name, step.command, step.depends
                        );
                    }
                }
            }
            Err(e) => println!("  - {path_str}: failed to load: {e}"),
        }
    }

    Ok(())
}
