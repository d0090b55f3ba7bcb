// src/history/status.rs

//! One execution snapshot.
//!
//! A status file holds many of these, one JSON document per line; the last
//! decodable line is the authoritative state of the execution.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::dag::{Dag, Step};
use crate::timeutil;

/// Overall or per-node execution state. Serialized as its integer value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RunStatus {
    #[default]
    None = 0,
    Running = 1,
    Error = 2,
    Cancelled = 3,
    Success = 4,
    Skipped = 5,
}

impl RunStatus {
    /// Human-readable label, mirrored into the `StatusText` field.
    pub fn text(self) -> &'static str {
        match self {
            RunStatus::None => "not started",
            RunStatus::Running => "running",
            RunStatus::Error => "failed",
            RunStatus::Cancelled => "canceled",
            RunStatus::Success => "finished",
            RunStatus::Skipped => "skipped",
        }
    }

    /// Whether the state is final.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::None | RunStatus::Running)
    }
}

impl From<RunStatus> for u8 {
    fn from(value: RunStatus) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for RunStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(RunStatus::None),
            1 => Ok(RunStatus::Running),
            2 => Ok(RunStatus::Error),
            3 => Ok(RunStatus::Cancelled),
            4 => Ok(RunStatus::Success),
            5 => Ok(RunStatus::Skipped),
            other => Err(format!("invalid status value: {other}")),
        }
    }
}

/// Runtime state of one step within an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    pub step: Step,
    pub status: RunStatus,
    pub status_text: String,
    pub started_at: String,
    pub finished_at: String,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub error: String,
}

impl Node {
    pub fn from_step(step: Step) -> Self {
        Self {
            step,
            status: RunStatus::None,
            status_text: RunStatus::None.text().to_string(),
            started_at: timeutil::TIME_EMPTY.to_string(),
            finished_at: timeutil::TIME_EMPTY.to_string(),
            retry_count: 0,
            error: String::new(),
        }
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.status = status;
        self.status_text = status.text().to_string();
    }
}

/// Snapshot of one execution of a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Status {
    pub name: String,
    pub request_id: String,
    pub status: RunStatus,
    pub status_text: String,
    #[serde(default)]
    pub pid: i32,
    pub started_at: String,
    pub finished_at: String,
    #[serde(default)]
    pub log: String,
    #[serde(default)]
    pub params: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Status {
    /// Fresh snapshot for a new execution: all nodes untouched, timestamps
    /// unset.
    pub fn initial(dag: &Dag, request_id: &str) -> Self {
        Self {
            name: dag.name.clone(),
            request_id: request_id.to_string(),
            status: RunStatus::None,
            status_text: RunStatus::None.text().to_string(),
            pid: 0,
            started_at: timeutil::TIME_EMPTY.to_string(),
            finished_at: timeutil::TIME_EMPTY.to_string(),
            log: String::new(),
            params: dag.params.join(" "),
            nodes: dag.steps.iter().cloned().map(Node::from_step).collect(),
        }
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.status = status;
        self.status_text = status.text().to_string();
    }

    pub fn set_started_at(&mut self, t: DateTime<Local>) {
        self.started_at = timeutil::format_time(Some(t));
    }

    pub fn set_finished_at(&mut self, t: DateTime<Local>) {
        self.finished_at = timeutil::format_time(Some(t));
    }

    pub fn from_json(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
