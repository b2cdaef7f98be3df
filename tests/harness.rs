use anyhow::{Context, Result, bail, ensure};
use std::path::Path;

use coil::{BufferHost, Engine, EngineConfig, EngineError, run_to_completion};
use test_support::{Case, CaseClass, load_cases, normalize_output, run_python_case, run_python_startup};

fn parity_required() -> bool {
    std::env::var("PYTHON_PARITY_REQUIRED")
        .map(|value| value == "1")
        .unwrap_or(false)
}

fn detect_python_interpreter() -> Result<Option<String>> {
    if let Ok(python) = std::env::var("PYTHON")
        && run_python_startup(&python).is_ok()
    {
        return Ok(Some(python));
    }

    for candidate in ["python3", "python"] {
        if run_python_startup(candidate).is_ok() {
            return Ok(Some(candidate.to_string()));
        }
    }

    if parity_required() {
        bail!("CPython parity required but no interpreter found. Set PYTHON or install python3.");
    }

    eprintln!("Skipping CPython parity test: no PYTHON env or python3 interpreter found.");
    Ok(None)
}

/// What one run of a case produced.
struct Outcome {
    stdout: String,
    result: Result<(), EngineError>,
}

fn run_case(case: &Case, config: EngineConfig) -> Result<Outcome> {
    let mut host = BufferHost::new().with_input(case.input_lines()?);
    for module in &case.spec.modules {
        host = host.with_file(module, &case.read_text(module)?);
    }
    let output = host.output();
    let mut engine = Engine::new(config, Box::new(host));
    engine.seed(1234);
    let source = case.program()?;
    let result = engine
        .run_source(&source, "program.py")
        .and_then(|completion| run_to_completion(&mut engine, completion))
        .map(|_| ());
    let stdout = output.borrow().clone();
    Ok(Outcome { stdout, result })
}

fn check_case(case: &Case, outcome: Outcome, label: &str) -> Result<()> {
    match case.spec.class {
        CaseClass::RuntimeSuccess => {
            if let Err(error) = outcome.result {
                bail!("{label}: case {} failed:\n{}", case.name, error.report());
            }
            let expected = case.expected_stdout()?;
            pretty_assertions::assert_eq!(
                normalize_output(&outcome.stdout),
                normalize_output(&expected),
                "{label}: stdout mismatch for {}",
                case.name
            );
        }
        CaseClass::CompileError => {
            let expected = case.expected_error()?;
            match outcome.result {
                Err(EngineError::Compile(error)) => {
                    let actual = error.to_string();
                    ensure!(
                        actual.contains(&expected),
                        "{label}: expected compile error containing '{expected}' in {}, got '{actual}'",
                        case.name
                    );
                }
                Err(other) => bail!("{label}: expected a compile error in {}, got {other}", case.name),
                Ok(()) => bail!("{label}: expected a compile error in {}, but it ran", case.name),
            }
        }
        CaseClass::RuntimeError => {
            let expected = case.expected_error()?;
            let Err(error) = outcome.result else {
                bail!("{label}: expected a runtime error in {}, but it finished", case.name);
            };
            ensure!(
                matches!(error, EngineError::Exception(_)),
                "{label}: expected an exception in {}, got {error}",
                case.name
            );
            let report = error.report();
            ensure!(
                report.contains(&expected),
                "{label}: expected error containing '{expected}' in {}, got '{report}'",
                case.name
            );
            if let Some(stdout_file) = &case.spec.expected.stdout_file {
                let expected = case.read_text(stdout_file)?;
                pretty_assertions::assert_eq!(
                    normalize_output(&outcome.stdout),
                    normalize_output(&expected),
                    "{label}: stdout mismatch for {}",
                    case.name
                );
            }
        }
    }
    Ok(())
}

#[test]
fn runs_programs() -> Result<()> {
    for case in load_cases(Path::new("tests/programs"))? {
        if case.spec.bench.enabled {
            ensure!(
                !case.spec.bench.tags.is_empty(),
                "Case {} has bench enabled but no tags",
                case.name
            );
        }
        let outcome = run_case(&case, EngineConfig::without_time_slicing())?;
        check_case(&case, outcome, "uninterrupted")?;
    }
    Ok(())
}

#[test]
fn suspending_at_every_check_point_changes_nothing() -> Result<()> {
    let config = EngineConfig {
        yield_interval_ms: Some(0),
        ..EngineConfig::default()
    };
    for case in load_cases(Path::new("tests/programs"))? {
        let outcome = run_case(&case, config.clone())?;
        check_case(&case, outcome, "time-sliced")?;
    }
    Ok(())
}

#[test]
fn runs_programs_cpython_parity() -> Result<()> {
    let Some(interpreter) = detect_python_interpreter()? else {
        return Ok(());
    };
    for case in load_cases(Path::new("tests/programs"))? {
        if !case.spec.parity || case.spec.class != CaseClass::RuntimeSuccess {
            continue;
        }
        let actual = run_python_case(&interpreter, &case)
            .with_context(|| format!("Running CPython for {}", case.name))?;
        let expected = case.expected_stdout()?;
        pretty_assertions::assert_eq!(
            normalize_output(&actual),
            normalize_output(&expected),
            "CPython mismatch for {}",
            case.name
        );
    }
    Ok(())
}
