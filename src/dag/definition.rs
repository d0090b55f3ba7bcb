// src/dag/definition.rs

//! Raw YAML schema for workflow files.
//!
//! This is the shape of the document on disk, before any evaluation or
//! merging. Every struct rejects unknown keys, so a typo in a workflow file
//! fails the load instead of being silently ignored.
//!
//! ```yaml
//! name: nightly-batch
//! schedule: "0 2 * * *"
//! params: "dataset=core"
//! env:
//!   - DATA_ROOT: /var/lib/batch
//! steps:
//!   - name: extract
//!     command: ./extract.sh $dataset
//!   - name: load
//!     command: ./load.sh
//!     depends:
//!       - extract
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

/// Top-level workflow document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct DagDefinition {
    pub name: Option<String>,
    pub description: Option<String>,
    pub schedule: Option<ScheduleDef>,
    /// Default parameter string, e.g. `"foo bar BAZ=qux"`.
    pub params: Option<String>,
    pub env: Option<EnvDef>,
    pub log_dir: Option<String>,
    pub hist_retention_days: Option<i32>,
    pub mail_on: Option<MailOnDef>,
    pub error_mail: Option<MailConfigDef>,
    pub info_mail: Option<MailConfigDef>,
    #[serde(default)]
    pub steps: Vec<StepDef>,
}

/// `schedule:` accepts a single cron expression, a list of them, or a map
/// keyed by the action to trigger.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ScheduleDef {
    Single(String),
    Multiple(Vec<String>),
    Detailed(DetailedScheduleDef),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetailedScheduleDef {
    pub start: Option<StringOrList>,
    pub stop: Option<StringOrList>,
    pub restart: Option<StringOrList>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    Single(String),
    Multiple(Vec<String>),
}

impl StringOrList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::Single(s) => vec![s],
            StringOrList::Multiple(v) => v,
        }
    }
}

/// `env:` accepts a map or a list of single-pair maps (the list form
/// preserves declaration order, which matters when entries reference each
/// other).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EnvDef {
    Map(BTreeMap<String, String>),
    List(Vec<BTreeMap<String, String>>),
}

impl EnvDef {
    /// Flatten to ordered `KEY=VALUE` pairs.
    pub fn pairs(&self) -> Vec<(String, String)> {
        match self {
            EnvDef::Map(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            EnvDef::List(list) => list
                .iter()
                .flat_map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailOnDef {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub failure: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MailConfigDef {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: StringOrListDefault,
    #[serde(default)]
    pub prefix: String,
}

/// Like [`StringOrList`] but defaults to an empty list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StringOrListDefault {
    Single(String),
    Multiple(Vec<String>),
}

impl Default for StringOrListDefault {
    fn default() -> Self {
        StringOrListDefault::Multiple(Vec::new())
    }
}

impl StringOrListDefault {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StringOrListDefault::Single(s) => vec![s],
            StringOrListDefault::Multiple(v) => v,
        }
    }
}

/// One step of the workflow.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct StepDef {
    pub name: String,
    pub command: String,
    /// Extra arguments appended after the command's own words.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub depends: Vec<String>,
    pub continue_on: Option<ContinueOnDef>,
    pub retry_policy: Option<RetryPolicyDef>,
    pub output: Option<String>,
    pub dir: Option<String>,
    pub env: Option<EnvDef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContinueOnDef {
    #[serde(default)]
    pub failure: bool,
    #[serde(default)]
    pub skipped: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RetryPolicyDef {
    pub limit: u32,
    #[serde(default)]
    pub interval_sec: u64,
}
