// src/dag/loader.rs

//! Load workflow files from disk.
//!
//! A load resolves the path, decodes the YAML strictly, builds the DAG, and
//! merges it over an optional base configuration shared by all workflows.
//! Three modes exist:
//!
//! | Mode      | Evaluates env/params | Includes steps | Use                  |
//! |-----------|----------------------|----------------|----------------------|
//! | Full      | yes                  | yes            | execution            |
//! | NoEval    | no                   | yes            | editing / validation |
//! | HeadOnly  | no                   | no             | listings             |

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::dag::builder::{build, BuildOptions};
use crate::dag::definition::DagDefinition;
use crate::dag::Dag;

/// Classified load failures.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The workflow file does not exist.
    #[error("workflow not found: {0:?}")]
    NotFound(PathBuf),

    /// The path was empty or could not be resolved.
    #[error("invalid workflow path: {0}")]
    InvalidPath(String),

    /// YAML decode failure or schema violation (including unknown keys).
    #[error("invalid workflow definition: {0}")]
    InvalidDefinition(String),

    /// The definition decoded but cannot be turned into a runnable DAG.
    #[error("failed to build workflow: {0}")]
    BuildFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
struct LoadOptions {
    parameters: String,
    head_only: bool,
    no_eval: bool,
    no_setenv: bool,
}

/// Workflow loader with an optional shared base configuration.
#[derive(Debug, Clone, Default)]
pub struct Loader {
    /// Base configuration merged underneath every loaded workflow.
    pub base_config: Option<PathBuf>,
}

impl Loader {
    pub fn new(base_config: Option<PathBuf>) -> Self {
        Self { base_config }
    }

    /// Load for execution: env and params evaluated, steps included,
    /// post-load setup (env export, log dir creation) performed.
    pub fn load(&self, file: &str, params: &str) -> Result<Dag, LoadError> {
        self.load_with_options(
            file,
            LoadOptions {
                parameters: params.to_string(),
                ..LoadOptions::default()
            },
        )
    }

    /// Load without evaluating env or params. For editing and validation.
    pub fn load_without_eval(&self, file: &str) -> Result<Dag, LoadError> {
        self.load_with_options(
            file,
            LoadOptions {
                no_eval: true,
                no_setenv: true,
                ..LoadOptions::default()
            },
        )
    }

    /// Load only the head fields (no steps). For listings.
    pub fn load_head_only(&self, file: &str) -> Result<Dag, LoadError> {
        self.load_with_options(
            file,
            LoadOptions {
                head_only: true,
                no_eval: true,
                no_setenv: true,
                ..LoadOptions::default()
            },
        )
    }

    fn load_with_options(&self, file: &str, opts: LoadOptions) -> Result<Dag, LoadError> {
        let path = prepare_filepath(file)?;
        let stem = file_stem(&path);

        let mut dag = self.base_template(&stem, &opts)?;

        let def = decode_file(&path)?;
        let built = build(
            &def,
            &BuildOptions {
                parameters: opts.parameters.clone(),
                head_only: opts.head_only,
                no_eval: opts.no_eval,
                default_env: Vec::new(),
            },
        )?;

        merge(&mut dag, built);

        dag.id = crate::fileutil::normalized_id(&stem);
        if dag.name.is_empty() {
            dag.name = stem;
        }
        dag.location = path;

        if !opts.no_setenv {
            setup(&dag)?;
        }

        debug!(id = %dag.id, location = ?dag.location, steps = dag.steps.len(), "workflow loaded");
        Ok(dag)
    }

    /// Build the merge destination: the decoded base configuration, or an
    /// empty template when none is configured (or the mode skips it).
    fn base_template(&self, stem: &str, opts: &LoadOptions) -> Result<Dag, LoadError> {
        if opts.head_only {
            return Ok(named_template(stem));
        }
        let Some(base) = &self.base_config else {
            return Ok(named_template(stem));
        };
        if !base.exists() {
            return Ok(named_template(stem));
        }

        let def = decode_file(base)?;
        build(
            &def,
            &BuildOptions {
                parameters: opts.parameters.clone(),
                head_only: false,
                no_eval: opts.no_eval,
                default_env: default_env(),
            },
        )
    }
}

fn named_template(stem: &str) -> Dag {
    Dag {
        name: stem.to_string(),
        ..Dag::default()
    }
}

/// Environment injected underneath base-config env entries.
fn default_env() -> Vec<(String, String)> {
    ["HOME", "PATH"]
        .iter()
        .filter_map(|key| std::env::var(key).ok().map(|v| (key.to_string(), v)))
        .collect()
}

/// Resolve the user-supplied path: append `.yaml` when no YAML suffix is
/// present, require existence, and make it absolute.
fn prepare_filepath(file: &str) -> Result<PathBuf, LoadError> {
    if file.is_empty() {
        return Err(LoadError::InvalidPath(
            "workflow file was not specified".to_string(),
        ));
    }

    let mut path = PathBuf::from(file);
    let has_yaml_ext = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if !has_yaml_ext {
        path = PathBuf::from(format!("{file}.yaml"));
    }

    if !path.exists() {
        return Err(LoadError::NotFound(path));
    }

    fs::canonicalize(&path).map_err(|e| LoadError::InvalidPath(format!("{}: {e}", path.display())))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Decode a workflow file: YAML into an untyped document first, then
/// strictly into the schema so unknown keys are rejected with a useful
/// message.
fn decode_file(path: &Path) -> Result<DagDefinition, LoadError> {
    let data = fs::read_to_string(path)?;
    let raw: serde_yaml::Value = serde_yaml::from_str(&data)
        .map_err(|e| LoadError::InvalidDefinition(format!("{}: {e}", path.display())))?;
    serde_yaml::from_value(raw)
        .map_err(|e| LoadError::InvalidDefinition(format!("{}: {e}", path.display())))
}

/// Merge a freshly built DAG (source) over the base template (destination).
/// Source fields override the destination when set.
///
/// `mail_on` is assigned wholesale: a workflow that sets `mailOn` replaces
/// the base's flags entirely instead of field-merging with them, so partial
/// mail configuration is never silently combined across layers.
fn merge(dst: &mut Dag, src: Dag) {
    if !src.name.is_empty() {
        dst.name = src.name;
    }
    if !src.description.is_empty() {
        dst.description = src.description;
    }
    if !src.schedule.is_empty() {
        dst.schedule = src.schedule;
    }
    if !src.steps.is_empty() {
        dst.steps = src.steps;
    }
    if !src.params.is_empty() {
        dst.params = src.params;
    }
    if !src.env.is_empty() {
        dst.env = src.env;
    }
    if src.log_dir.is_some() {
        dst.log_dir = src.log_dir;
    }
    if src.hist_retention_days.is_some() {
        dst.hist_retention_days = src.hist_retention_days;
    }
    if src.mail_on.is_some() {
        dst.mail_on = src.mail_on;
    }
    if src.error_mail.is_some() {
        dst.error_mail = src.error_mail;
    }
    if src.info_mail.is_some() {
        dst.info_mail = src.info_mail;
    }
}

/// Post-load setup: export the DAG's environment into the process and make
/// sure the log directory exists.
fn setup(dag: &Dag) -> Result<(), LoadError> {
    for (key, value) in &dag.env {
        std::env::set_var(key, value);
    }
    if let Some(dir) = &dag.log_dir {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}
