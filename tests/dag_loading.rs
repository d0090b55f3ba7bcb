use std::error::Error;
use std::io::Write;
use std::path::{Path, PathBuf};

use dagrun::dag::{LoadError, Loader, MailOn};

type TestResult = Result<(), Box<dyn Error>>;

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

const HELLO: &str = "\
description: say hello
schedule: '0 2 * * *'
steps:
  - name: hello
    command: echo hi
";

#[test]
fn full_load_produces_an_executable_dag() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "hello.yaml", HELLO);

    let loader = Loader::default();
    let dag = loader.load(path.to_str().unwrap(), "")?;

    assert_eq!(dag.id, "hello");
    assert_eq!(dag.name, "hello");
    assert_eq!(dag.description, "say hello");
    assert_eq!(dag.schedule.start.len(), 1);
    assert_eq!(dag.steps.len(), 1);
    assert_eq!(dag.steps[0].program, "echo");
    assert_eq!(dag.steps[0].args, vec!["hi"]);
    assert!(dag.location.is_absolute());
    Ok(())
}

#[test]
fn loading_is_deterministic() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "hello.yaml", HELLO);

    let loader = Loader::default();
    let first = loader.load_without_eval(path.to_str().unwrap())?;
    let second = loader.load_without_eval(path.to_str().unwrap())?;

    assert_eq!(first.id, second.id);
    assert_eq!(first.steps.len(), second.steps.len());
    assert_eq!(first.steps[0].command, second.steps[0].command);
    assert_eq!(
        first.schedule.start[0].expression,
        second.schedule.start[0].expression
    );
    Ok(())
}

#[test]
fn base_config_supplies_defaults_without_masking() -> TestResult {
    let dir = tempfile::tempdir()?;
    let base = write_file(
        dir.path(),
        "base.yaml",
        "histRetentionDays: 14\nmailOn:\n  success: true\n  failure: true\ninfoMail:\n  from: noreply@example.test\n  to: ops@example.test\n  prefix: 'Info: '\n",
    );
    let wf = write_file(
        dir.path(),
        "wf.yaml",
        "mailOn:\n  failure: true\nsteps:\n  - name: a\n    command: 'true'\n",
    );

    let loader = Loader::new(Some(base));
    let dag = loader.load_without_eval(wf.to_str().unwrap())?;

    // Base fields the workflow does not mention survive.
    assert_eq!(dag.hist_retention_days, Some(14));
    assert_eq!(dag.info_mail.as_ref().unwrap().to, vec!["ops@example.test"]);

    // mailOn is replaced wholesale, not merged flag-by-flag.
    assert_eq!(
        dag.mail_on,
        Some(MailOn {
            success: false,
            failure: true
        })
    );
    Ok(())
}

#[test]
fn unknown_step_key_is_rejected() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_file(
        dir.path(),
        "bad.yaml",
        "steps:\n  - name: a\n    command: 'true'\n    retires: 3\n",
    );

    let loader = Loader::default();
    let err = loader.load_without_eval(path.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, LoadError::InvalidDefinition(_)), "got {err:?}");
    Ok(())
}

#[test]
fn circular_dependency_is_a_build_failure() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_file(
        dir.path(),
        "cycle.yaml",
        "steps:\n  - name: a\n    command: 'true'\n    depends: [c]\n  - name: b\n    command: 'true'\n    depends: [a]\n  - name: c\n    command: 'true'\n    depends: [b]\n",
    );

    let loader = Loader::default();
    let err = loader.load_without_eval(path.to_str().unwrap()).unwrap_err();
    assert!(matches!(err, LoadError::BuildFailed(_)), "got {err:?}");
    Ok(())
}

#[test]
fn missing_workflow_is_not_found() -> TestResult {
    let dir = tempfile::tempdir()?;
    let loader = Loader::default();
    let path = dir.path().join("absent");
    let err = loader.load(path.to_str().unwrap(), "").unwrap_err();
    assert!(matches!(err, LoadError::NotFound(_)), "got {err:?}");
    Ok(())
}

#[test]
fn head_only_load_lists_without_steps() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = write_file(dir.path(), "hello.yaml", HELLO);

    let loader = Loader::default();
    let dag = loader.load_head_only(path.to_str().unwrap())?;

    assert_eq!(dag.description, "say hello");
    assert_eq!(dag.schedule.start.len(), 1);
    assert!(dag.steps.is_empty());
    Ok(())
}
