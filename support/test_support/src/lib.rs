use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseClass {
    RuntimeSuccess,
    CompileError,
    RuntimeError,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BenchConfig {
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExpectedOutcome {
    pub exit_code: i32,
    pub stdout_file: Option<String>,
    pub stderr_contains_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaseSpec {
    pub class: CaseClass,
    /// Whether a reference `python3` must print the same stdout.
    #[serde(default)]
    pub parity: bool,
    /// Lines fed to `input()`, one per line of the named file.
    pub stdin_file: Option<String>,
    /// Extra modules importable by the program, relative to the case dir.
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub bench: BenchConfig,
    pub expected: ExpectedOutcome,
}

#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub dir: PathBuf,
    pub program_path: PathBuf,
    pub spec: CaseSpec,
}

impl Case {
    pub fn read_text(&self, relative_path: &str) -> Result<String> {
        fs::read_to_string(self.dir.join(relative_path))
            .with_context(|| format!("Reading {} fixture file {}", self.name, relative_path))
    }

    pub fn program(&self) -> Result<String> {
        fs::read_to_string(&self.program_path).with_context(|| format!("Reading {}", self.name))
    }

    pub fn input_lines(&self) -> Result<Vec<String>> {
        match &self.spec.stdin_file {
            Some(file) => Ok(self.read_text(file)?.lines().map(str::to_string).collect()),
            None => Ok(Vec::new()),
        }
    }

    /// The expected error fragment for failing cases.
    pub fn expected_error(&self) -> Result<String> {
        let file = self
            .spec
            .expected
            .stderr_contains_file
            .as_deref()
            .with_context(|| format!("Missing stderr_contains_file in {}", self.name))?;
        Ok(self.read_text(file)?.trim().to_string())
    }

    pub fn expected_stdout(&self) -> Result<String> {
        let file = self
            .spec
            .expected
            .stdout_file
            .as_deref()
            .with_context(|| format!("Missing stdout_file in {}", self.name))?;
        self.read_text(file)
    }
}

pub fn load_cases(programs_dir: &Path) -> Result<Vec<Case>> {
    let mut cases = Vec::new();

    for entry in
        fs::read_dir(programs_dir).with_context(|| format!("Reading {}", programs_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }

        let case_path = path.join("case.yaml");
        if !case_path.exists() {
            continue;
        }

        let program_path = path.join("program.py");
        ensure!(
            program_path.exists(),
            "Missing program.py for case {}",
            path.display()
        );

        let case_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .with_context(|| format!("Invalid case directory name {}", path.display()))?;
        let case_raw = fs::read_to_string(&case_path)
            .with_context(|| format!("Reading {}", case_path.display()))?;
        let spec: CaseSpec = serde_yaml::from_str(&case_raw)
            .with_context(|| format!("Parsing {}", case_path.display()))?;
        let expected_exit = match spec.class {
            CaseClass::RuntimeSuccess => 0,
            CaseClass::CompileError | CaseClass::RuntimeError => 1,
        };
        ensure!(
            spec.expected.exit_code == expected_exit,
            "Case {case_name} expected exit code must be {expected_exit} for {:?}",
            spec.class
        );

        cases.push(Case {
            name: case_name,
            dir: path,
            program_path,
            spec,
        });
    }

    ensure!(
        !cases.is_empty(),
        "No test cases found in {}",
        programs_dir.display()
    );
    cases.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(cases)
}

pub fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim_end().to_string()
}

pub fn run_python_startup(interpreter: &str) -> Result<()> {
    let status = Command::new(interpreter)
        .arg("-c")
        .arg("pass")
        .stdout(Stdio::null())
        .status()
        .with_context(|| format!("Running '{interpreter} -c pass'"))?;
    ensure!(status.success(), "python startup command failed");
    Ok(())
}

/// Runs a case under a reference interpreter, feeding its input lines.
pub fn run_python_case(interpreter: &str, case: &Case) -> Result<String> {
    let mut child = Command::new(interpreter)
        .arg("program.py")
        .current_dir(&case.dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Running python for {}", case.name))?;
    if let Some(mut stdin) = child.stdin.take() {
        for line in case.input_lines()? {
            writeln!(stdin, "{line}")?;
        }
    }
    let output = child.wait_with_output()?;
    ensure!(
        output.status.success(),
        "python failed for {}: {}",
        case.name,
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
