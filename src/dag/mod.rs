// src/dag/mod.rs

//! Workflow definitions and loading.
//!
//! Responsibilities:
//! - Define the YAML-backed raw schema (`definition.rs`).
//! - Build an executable [`Dag`] from a decoded definition (`builder.rs`).
//! - Load a workflow file from disk, merging with an optional base
//!   configuration (`loader.rs`).

pub mod builder;
pub mod definition;
pub mod loader;

pub use builder::BuildOptions;
pub use loader::{LoadError, Loader};

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// An executable workflow: an acyclic graph of shell steps plus scheduling
/// and reporting configuration. Immutable after loading.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    /// Stable identity, derived from the source file stem. History written
    /// under this ID survives renames of the source file.
    pub id: String,
    /// Display name.
    pub name: String,
    pub description: String,
    pub schedule: Schedules,
    pub steps: Vec<Step>,
    /// Default parameter string, already split into words.
    pub params: Vec<String>,
    /// Evaluated `KEY=VALUE` environment, in declaration order.
    pub env: Vec<(String, String)>,
    pub log_dir: Option<PathBuf>,
    /// Days of history to keep; `None` means the default retention applies.
    pub hist_retention_days: Option<i32>,
    pub mail_on: Option<MailOn>,
    pub error_mail: Option<MailConfig>,
    pub info_mail: Option<MailConfig>,
    /// Absolute path of the file this DAG was loaded from.
    pub location: PathBuf,
}

/// Default history retention, applied when a DAG does not set its own.
pub const DEFAULT_HIST_RETENTION_DAYS: i32 = 30;

impl Dag {
    /// Effective retention in days.
    pub fn retention_days(&self) -> i32 {
        self.hist_retention_days.unwrap_or(DEFAULT_HIST_RETENTION_DAYS)
    }
}

/// When to send mail about a finished execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailOn {
    pub success: bool,
    pub failure: bool,
}

/// Mail routing for one kind of report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailConfig {
    pub from: String,
    pub to: Vec<String>,
    pub prefix: String,
}

/// Parsed cron schedules, split by the action they trigger.
#[derive(Debug, Clone, Default)]
pub struct Schedules {
    pub start: Vec<CronSpec>,
    pub stop: Vec<CronSpec>,
    pub restart: Vec<CronSpec>,
}

impl Schedules {
    pub fn is_empty(&self) -> bool {
        self.start.is_empty() && self.stop.is_empty() && self.restart.is_empty()
    }
}

/// One cron expression together with its parsed schedule.
#[derive(Debug, Clone)]
pub struct CronSpec {
    /// The expression as written in the workflow file.
    pub expression: String,
    pub schedule: cron::Schedule,
}

/// An executable node of the workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Step {
    pub name: String,
    /// The command after parameter substitution, as passed to the shell.
    pub command: String,
    /// First word of the command.
    pub program: String,
    pub args: Vec<String>,
    /// Names of steps that must finish before this one starts.
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    #[serde(default)]
    pub continue_on: ContinueOn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// Variable name that captures this step's stdout for later steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Per-step environment overrides, applied on top of the DAG's.
    #[serde(default)]
    pub env: Vec<(String, String)>,
}

/// Whether dependents may proceed past a non-success outcome of this step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContinueOn {
    #[serde(default)]
    pub failure: bool,
    #[serde(default)]
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub limit: u32,
    /// Seconds to wait between attempts.
    pub interval_sec: u64,
}

impl RetryPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }
}

/// Split a string into whitespace-separated words, with single and double
/// quotes grouping words (quotes are stripped).
pub fn split_words(input: &str) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// Split a command string into a program and its arguments.
///
/// Execution goes through the shell regardless, so this split only feeds the
/// data model and display output.
pub fn split_command(cmd: &str) -> (String, Vec<String>) {
    let mut iter = split_words(cmd).into_iter();
    let program = iter.next().unwrap_or_default();
    (program, iter.collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_command_plain() {
        let (program, args) = split_command("echo hello world");
        assert_eq!(program, "echo");
        assert_eq!(args, vec!["hello", "world"]);
    }

    #[test]
    fn split_command_quoted() {
        let (program, args) = split_command(r#"grep -e "a b" file.txt"#);
        assert_eq!(program, "grep");
        assert_eq!(args, vec!["-e", "a b", "file.txt"]);
    }

    #[test]
    fn split_command_empty() {
        let (program, args) = split_command("");
        assert_eq!(program, "");
        assert!(args.is_empty());
    }
}
