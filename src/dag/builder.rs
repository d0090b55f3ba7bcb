// src/dag/builder.rs

//! Turn a decoded [`DagDefinition`] into an executable [`Dag`].
//!
//! The builder applies parameter substitution to step commands, evaluates
//! environment entries (unless suppressed), parses cron expressions, and
//! validates the dependency graph.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use regex::Regex;

use crate::dag::definition::{
    DagDefinition, EnvDef, ScheduleDef, StepDef, StringOrList,
};
use crate::dag::loader::LoadError;
use crate::dag::{
    split_command, split_words, ContinueOn, CronSpec, Dag, MailConfig, MailOn, RetryPolicy,
    Schedules, Step,
};

/// Options controlling how a definition is built.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Caller-supplied parameter string; overrides the definition's default
    /// `params` when non-empty.
    pub parameters: String,
    /// Skip steps entirely (listings only need the head fields).
    pub head_only: bool,
    /// Skip `$VAR` expansion of env and param values.
    pub no_eval: bool,
    /// Environment injected underneath the definition's own entries.
    pub default_env: Vec<(String, String)>,
}

/// Build a [`Dag`] from a decoded definition.
pub fn build(def: &DagDefinition, opts: &BuildOptions) -> Result<Dag, LoadError> {
    let mut dag = Dag {
        name: def.name.clone().unwrap_or_default(),
        description: def.description.clone().unwrap_or_default(),
        schedule: build_schedules(def.schedule.as_ref())?,
        hist_retention_days: def.hist_retention_days,
        mail_on: def.mail_on.as_ref().map(|m| MailOn {
            success: m.success,
            failure: m.failure,
        }),
        error_mail: def.error_mail.clone().map(|m| MailConfig {
            from: m.from,
            to: m.to.into_vec(),
            prefix: m.prefix,
        }),
        info_mail: def.info_mail.clone().map(|m| MailConfig {
            from: m.from,
            to: m.to.into_vec(),
            prefix: m.prefix,
        }),
        ..Dag::default()
    };

    dag.env = build_env(opts.default_env.clone(), def.env.as_ref(), opts.no_eval);

    let raw_params = if opts.parameters.is_empty() {
        def.params.clone().unwrap_or_default()
    } else {
        opts.parameters.clone()
    };
    let (params, param_values) = parse_params(&raw_params, opts.no_eval);
    dag.params = params;

    if let Some(dir) = &def.log_dir {
        let dir = if opts.no_eval { dir.clone() } else { expand_env(dir) };
        dag.log_dir = Some(PathBuf::from(dir));
    }

    if !opts.head_only {
        dag.steps = build_steps(&def.steps, &param_values, opts.no_eval)?;
        validate_dependencies(&dag.steps)?;
    }

    Ok(dag)
}

fn build_schedules(def: Option<&ScheduleDef>) -> Result<Schedules, LoadError> {
    let mut schedules = Schedules::default();
    let Some(def) = def else {
        return Ok(schedules);
    };

    match def {
        ScheduleDef::Single(expr) => schedules.start.push(parse_cron(expr)?),
        ScheduleDef::Multiple(exprs) => {
            for expr in exprs {
                schedules.start.push(parse_cron(expr)?);
            }
        }
        ScheduleDef::Detailed(detailed) => {
            for (target, source) in [
                (&mut schedules.start, detailed.start.clone()),
                (&mut schedules.stop, detailed.stop.clone()),
                (&mut schedules.restart, detailed.restart.clone()),
            ] {
                for expr in source.map(StringOrList::into_vec).unwrap_or_default() {
                    target.push(parse_cron(&expr)?);
                }
            }
        }
    }

    Ok(schedules)
}

/// Parse one cron expression. Five-field expressions get a seconds field
/// prepended; six and seven fields pass through.
fn parse_cron(expr: &str) -> Result<CronSpec, LoadError> {
    let trimmed = expr.trim();
    let normalized = match trimmed.split_whitespace().count() {
        5 => format!("0 {trimmed}"),
        6 | 7 => trimmed.to_string(),
        n => {
            return Err(LoadError::BuildFailed(format!(
                "invalid cron expression {trimmed:?}: expected 5-7 fields, got {n}"
            )))
        }
    };

    let schedule = normalized
        .parse::<cron::Schedule>()
        .map_err(|e| LoadError::BuildFailed(format!("invalid cron expression {trimmed:?}: {e}")))?;

    Ok(CronSpec {
        expression: trimmed.to_string(),
        schedule,
    })
}

fn build_env(
    default_env: Vec<(String, String)>,
    def: Option<&EnvDef>,
    no_eval: bool,
) -> Vec<(String, String)> {
    let mut env = default_env;
    for (key, value) in def.map(EnvDef::pairs).unwrap_or_default() {
        let value = if no_eval { value } else { expand_env(&value) };
        if let Some(existing) = env.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            env.push((key, value));
        }
    }
    env
}

/// Parse a parameter string into its word list and the substitution map.
///
/// Each word becomes a positional parameter (`$1`, `$2`, ...); `KEY=VALUE`
/// words additionally define a named parameter.
fn parse_params(raw: &str, no_eval: bool) -> (Vec<String>, BTreeMap<String, String>) {
    let mut words = Vec::new();
    let mut values = BTreeMap::new();

    for (idx, word) in split_words(raw).into_iter().enumerate() {
        let word = if no_eval { word } else { expand_env(&word) };
        values.insert((idx + 1).to_string(), word.clone());
        if let Some((key, value)) = word.split_once('=') {
            if !key.is_empty() {
                values.insert(key.to_string(), value.to_string());
            }
        }
        words.push(word);
    }

    (words, values)
}

fn build_steps(
    defs: &[StepDef],
    param_values: &BTreeMap<String, String>,
    no_eval: bool,
) -> Result<Vec<Step>, LoadError> {
    let mut steps = Vec::with_capacity(defs.len());

    for def in defs {
        if def.name.is_empty() {
            return Err(LoadError::BuildFailed("step without a name".to_string()));
        }
        if def.command.is_empty() {
            return Err(LoadError::BuildFailed(format!(
                "step '{}' has no command",
                def.name
            )));
        }

        let command = assign_values(&def.command, param_values);
        let (program, mut args) = split_command(&command);
        args.extend(def.args.iter().cloned());

        steps.push(Step {
            name: def.name.clone(),
            command,
            program,
            args,
            depends: def.depends.clone(),
            dir: def.dir.as_ref().map(|d| {
                PathBuf::from(if no_eval { d.clone() } else { expand_env(d) })
            }),
            continue_on: def
                .continue_on
                .as_ref()
                .map(|c| ContinueOn {
                    failure: c.failure,
                    skipped: c.skipped,
                })
                .unwrap_or_default(),
            retry_policy: def.retry_policy.as_ref().map(|r| RetryPolicy {
                limit: r.limit,
                interval_sec: r.interval_sec,
            }),
            output: def.output.clone(),
            env: build_env(Vec::new(), def.env.as_ref(), no_eval),
        });
    }

    Ok(steps)
}

/// Check that every dependency names an existing step and the graph is
/// acyclic.
///
/// Edge direction: dep -> step, so a topological sort failure pinpoints a
/// node on a cycle.
fn validate_dependencies(steps: &[Step]) -> Result<(), LoadError> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for step in steps {
        graph.add_node(step.name.as_str());
    }

    for step in steps {
        for dep in &step.depends {
            if dep == &step.name {
                return Err(LoadError::BuildFailed(format!(
                    "step '{}' cannot depend on itself",
                    step.name
                )));
            }
            if !graph.contains_node(dep.as_str()) {
                return Err(LoadError::BuildFailed(format!(
                    "step '{}' has unknown dependency '{}'",
                    step.name, dep
                )));
            }
            graph.add_edge(dep.as_str(), step.name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(LoadError::BuildFailed(format!(
            "cycle detected in step dependencies involving '{}'",
            cycle.node_id()
        ))),
    }
}

fn env_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .unwrap_or_else(|e| panic!("env pattern: {e}"))
    })
}

/// Expand `$VAR` and `${VAR}` references from the process environment.
/// Undefined variables expand to the empty string.
pub fn expand_env(input: &str) -> String {
    env_pattern()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or("");
            std::env::var(name).unwrap_or_default()
        })
        .into_owned()
}

/// Substitute `$name` references in a command with parameter values.
/// Longer names are substituted first so `$10` is not clobbered by `$1`.
pub(crate) fn assign_values(command: &str, values: &BTreeMap<String, String>) -> String {
    let mut keys: Vec<&String> = values.keys().collect();
    keys.sort_by_key(|k| std::cmp::Reverse(k.len()));

    let mut out = command.to_string();
    for key in keys {
        out = out.replace(&format!("${key}"), &values[key]);
    }
    out
}
