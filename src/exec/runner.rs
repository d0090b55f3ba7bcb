// src/exec/runner.rs

//! Run one workflow invocation: execute steps in dependency order, append a
//! status snapshot after every state change, compact on close.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dag::builder::assign_values;
use crate::dag::{Dag, Step};
use crate::history::{HistoryStore, RunStatus, Status};
use crate::report::Reporter;
use crate::timeutil;

/// Execute a workflow to completion (or cancellation) and record it.
///
/// The returned status carries the final state; an `Err` means the history
/// store itself failed, not the workflow. Step failures end up as
/// `RunStatus::Error` in the status, are mailed per the workflow's mail
/// configuration, and trigger a retention pass.
pub async fn run_dag(
    dag: Arc<Dag>,
    store: Arc<HistoryStore>,
    reporter: Arc<Reporter>,
    cancel: watch::Receiver<bool>,
) -> Result<Status> {
    let request_id = Uuid::new_v4().to_string();
    let started_at = timeutil::now();

    store
        .open(&dag.id, started_at, &request_id)
        .with_context(|| format!("opening history for workflow '{}'", dag.id))?;

    let mut status = Status::initial(&dag, &request_id);
    status.pid = std::process::id() as i32;
    status.set_status(RunStatus::Running);
    status.set_started_at(started_at);
    persist(&store, &status);

    let outcome = execute_nodes(&dag, &store, &mut status, cancel).await;
    let first_error = outcome.first_error;

    status.set_status(final_state(&status, first_error.is_some(), outcome.cancelled));
    status.set_finished_at(timeutil::now());
    persist(&store, &status);

    if let Err(e) = store.close() {
        error!(dag = %dag.id, error = %e, "failed to close history record");
    }

    info!(
        dag = %dag.id,
        request_id = %request_id,
        status = %status.status_text,
        "workflow finished"
    );

    if let Err(e) = reporter.report(&dag, &status, first_error.as_deref()) {
        warn!(dag = %dag.id, error = %e, "failed to send report");
    }

    if let Err(e) = store.remove_old(&dag.id, dag.retention_days()) {
        warn!(dag = %dag.id, error = %e, "history retention pass failed");
    }

    Ok(status)
}

/// Overall state of a finished invocation.
///
/// An external cancellation wins; otherwise any step failure makes the run
/// an error even when dependents were cancelled because of it.
fn final_state(status: &Status, errored: bool, cancelled: bool) -> RunStatus {
    if cancelled {
        RunStatus::Cancelled
    } else if errored || status.nodes.iter().any(|n| n.status == RunStatus::Error) {
        RunStatus::Error
    } else if status
        .nodes
        .iter()
        .any(|n| n.status == RunStatus::Cancelled)
    {
        RunStatus::Cancelled
    } else {
        RunStatus::Success
    }
}

/// How a node's dependencies currently constrain it.
enum DepState {
    /// All dependencies passed; the node may start.
    Ready,
    /// At least one dependency has not finished yet.
    Waiting,
    /// A dependency ended in a state the node may not proceed past.
    Blocked(RunStatus),
}

fn classify_deps(status: &Status, idx: usize) -> DepState {
    let mut waiting = false;

    for dep_name in &status.nodes[idx].step.depends {
        // Dependencies are validated at build time; a missing name here
        // would be a logic error, so it is ignored rather than trusted.
        let Some(dep) = status.nodes.iter().find(|n| &n.step.name == dep_name) else {
            continue;
        };
        match dep.status {
            RunStatus::Success => {}
            RunStatus::Error if dep.step.continue_on.failure => {}
            RunStatus::Skipped if dep.step.continue_on.skipped => {}
            RunStatus::None | RunStatus::Running => waiting = true,
            RunStatus::Error | RunStatus::Cancelled => {
                return DepState::Blocked(RunStatus::Cancelled)
            }
            RunStatus::Skipped => return DepState::Blocked(RunStatus::Skipped),
        }
    }

    if waiting {
        DepState::Waiting
    } else {
        DepState::Ready
    }
}

struct NodeResult {
    status: RunStatus,
    error: Option<String>,
    stdout: String,
    retry_count: u32,
}

struct ExecOutcome {
    first_error: Option<String>,
    cancelled: bool,
}

/// Drive all nodes to a terminal state.
async fn execute_nodes(
    dag: &Dag,
    store: &HistoryStore,
    status: &mut Status,
    cancel: watch::Receiver<bool>,
) -> ExecOutcome {
    let mut output_vars: BTreeMap<String, String> = BTreeMap::new();
    let mut join_set: JoinSet<(usize, NodeResult)> = JoinSet::new();
    let mut first_error: Option<String> = None;

    loop {
        // Propagate terminal outcomes to blocked nodes until nothing moves.
        loop {
            let mut changed = false;
            for idx in 0..status.nodes.len() {
                if status.nodes[idx].status != RunStatus::None {
                    continue;
                }
                if let DepState::Blocked(state) = classify_deps(status, idx) {
                    debug!(step = %status.nodes[idx].step.name, ?state, "blocked by dependency outcome");
                    status.nodes[idx].set_status(state);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        // Start every node whose dependencies are satisfied.
        let ready: Vec<usize> = (0..status.nodes.len())
            .filter(|&idx| {
                status.nodes[idx].status == RunStatus::None
                    && matches!(classify_deps(status, idx), DepState::Ready)
            })
            .collect();

        let mut started = false;
        for idx in ready {
            if *cancel.borrow() {
                break;
            }
            let node = &mut status.nodes[idx];
            node.set_status(RunStatus::Running);
            node.started_at = timeutil::format_time(Some(timeutil::now()));

            let step = node.step.clone();
            let command = assign_values(&step.command, &output_vars);
            let env = step_env(dag, &step);
            let cancel_rx = cancel.clone();

            debug!(step = %step.name, command = %command, "starting step");
            join_set.spawn(async move { (idx, run_step(step, command, env, cancel_rx).await) });
            started = true;
        }
        if started {
            persist(store, status);
        }

        if join_set.is_empty() {
            break;
        }

        match join_set.join_next().await {
            Some(Ok((idx, result))) => {
                let node = &mut status.nodes[idx];
                node.retry_count = result.retry_count;
                node.finished_at = timeutil::format_time(Some(timeutil::now()));
                node.set_status(result.status);
                if let Some(err) = result.error {
                    node.error = err.clone();
                    first_error.get_or_insert(err);
                }
                if result.status == RunStatus::Success {
                    if let Some(var) = &node.step.output {
                        output_vars.insert(var.clone(), result.stdout.trim().to_string());
                    }
                }
                persist(store, status);
            }
            Some(Err(join_err)) => {
                error!(error = %join_err, "step task panicked");
                first_error.get_or_insert_with(|| join_err.to_string());
            }
            None => break,
        }
    }

    // A cancellation leaves never-started nodes behind; they are cancelled,
    // not failed.
    let cancelled = *cancel.borrow();
    if cancelled {
        let mut changed = false;
        for node in &mut status.nodes {
            if !node.status.is_terminal() {
                node.set_status(RunStatus::Cancelled);
                changed = true;
            }
        }
        if changed {
            persist(store, status);
        }
    }

    ExecOutcome {
        first_error,
        cancelled,
    }
}

/// Environment for one step: workflow env with step overrides on top.
fn step_env(dag: &Dag, step: &Step) -> Vec<(String, String)> {
    let mut env = dag.env.clone();
    for (key, value) in &step.env {
        if let Some(existing) = env.iter_mut().find(|(k, _)| k == key) {
            existing.1 = value.clone();
        } else {
            env.push((key.clone(), value.clone()));
        }
    }
    env
}

enum StepRun {
    Completed {
        success: bool,
        code: i32,
        stdout: String,
        stderr: String,
    },
    Cancelled,
}

/// Run one step's command, retrying per its policy.
async fn run_step(
    step: Step,
    command: String,
    env: Vec<(String, String)>,
    mut cancel: watch::Receiver<bool>,
) -> NodeResult {
    let mut retry_count = 0;

    loop {
        if *cancel.borrow() {
            return NodeResult {
                status: RunStatus::Cancelled,
                error: None,
                stdout: String::new(),
                retry_count,
            };
        }

        match spawn_and_wait(&step, &command, &env, &mut cancel).await {
            StepRun::Cancelled => {
                info!(step = %step.name, "step cancelled");
                return NodeResult {
                    status: RunStatus::Cancelled,
                    error: None,
                    stdout: String::new(),
                    retry_count,
                };
            }
            StepRun::Completed {
                success: true,
                stdout,
                ..
            } => {
                return NodeResult {
                    status: RunStatus::Success,
                    error: None,
                    stdout,
                    retry_count,
                };
            }
            StepRun::Completed { code, stderr, .. } => {
                if let Some(policy) = &step.retry_policy {
                    if retry_count < policy.limit {
                        retry_count += 1;
                        info!(
                            step = %step.name,
                            retry_count,
                            limit = policy.limit,
                            "step failed; retrying"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(policy.interval()) => continue,
                            _ = cancel.changed() => {
                                return NodeResult {
                                    status: RunStatus::Cancelled,
                                    error: None,
                                    stdout: String::new(),
                                    retry_count,
                                };
                            }
                        }
                    }
                }

                let error = if stderr.is_empty() {
                    format!("step '{}' failed with exit code {code}", step.name)
                } else {
                    format!(
                        "step '{}' failed with exit code {code}: {}",
                        step.name,
                        stderr.trim()
                    )
                };
                return NodeResult {
                    status: RunStatus::Error,
                    error: Some(error),
                    stdout: String::new(),
                    retry_count,
                };
            }
        }
    }
}

/// Spawn `sh -c <command>` and wait for it, killing the child when the
/// invocation is cancelled.
async fn spawn_and_wait(
    step: &Step,
    command: &str,
    env: &[(String, String)],
    cancel: &mut watch::Receiver<bool>,
) -> StepRun {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &step.dir {
        cmd.current_dir(dir);
    }
    cmd.envs(env.iter().cloned());

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return StepRun::Completed {
                success: false,
                code: -1,
                stdout: String::new(),
                stderr: format!("failed to spawn process: {e}"),
            };
        }
    };

    tokio::select! {
        output = child.wait_with_output() => match output {
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                if !stderr.is_empty() {
                    debug!(step = %step.name, "stderr: {}", stderr.trim_end());
                }
                StepRun::Completed {
                    success: output.status.success(),
                    code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr,
                }
            }
            Err(e) => StepRun::Completed {
                success: false,
                code: -1,
                stdout: String::new(),
                stderr: format!("failed to wait for process: {e}"),
            },
        },
        // Dropping the in-flight wait drops the child, and kill_on_drop
        // takes it down with it.
        _ = cancel.changed() => StepRun::Cancelled,
    }
}

fn persist(store: &HistoryStore, status: &Status) {
    if let Err(e) = store.write(status) {
        error!(error = %e, "failed to append status snapshot");
    }
}
