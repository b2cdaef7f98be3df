use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use log::{LevelFilter, debug};

use coil::{Engine, EngineConfig, EngineError, ExceptionKind, StdHost, Value, run_to_completion};

static USAGE: &str = r#"
usage: coil [--verbose] [--config engine.yaml] [-c COMMAND | FILE | -]

Runs FILE, the COMMAND string, or standard input.
"#;

enum Input {
    File(String),
    Command(String),
    Stdin,
}

struct Options {
    verbose: u8,
    config: Option<PathBuf>,
    input: Input,
}

fn parse_args() -> Result<Options> {
    let mut args = std::env::args().skip(1);
    let mut options = Options {
        verbose: 0,
        config: None,
        input: Input::Stdin,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--verbose" | "-v" => options.verbose += 1,
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow!("Missing configuration path after {arg}"))?;
                options.config = Some(PathBuf::from(path));
            }
            "-c" => {
                let command = args.next().ok_or_else(|| anyhow!("Missing command after -c"))?;
                options.input = Input::Command(command);
                break;
            }
            "--help" | "-h" => {
                print!("{USAGE}");
                std::process::exit(0);
            }
            "-" => break,
            other if other.starts_with('-') => bail!("Unknown option '{other}'\n{USAGE}"),
            _ => {
                options.input = Input::File(arg);
                break;
            }
        }
    }
    Ok(options)
}

/// The process status for `SystemExit(code)`.
fn exit_status(code: Option<&Value>) -> u8 {
    match code {
        None | Some(Value::None) => 0,
        Some(Value::Int(status)) => (*status & 0xff) as u8,
        Some(other) => {
            eprintln!("{}", other.basic_str());
            1
        }
    }
}

fn main() -> Result<ExitCode> {
    let options = parse_args()?;
    let level = match options.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .env()
        .init()
        .context("Installing the logger")?;

    let config = match &options.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    debug!("engine configuration: {config:?}");

    let mut engine = Engine::new(config, Box::new(StdHost));
    let started = match &options.input {
        Input::File(path) => engine.run_file(path),
        Input::Command(source) => engine.run_source(&format!("{source}\n"), "<string>"),
        Input::Stdin => {
            let mut source = String::new();
            io::stdin().read_to_string(&mut source).context("Reading stdin")?;
            engine.run_source(&source, "<stdin>")
        }
    };
    let result = started.and_then(|completion| run_to_completion(&mut engine, completion));
    match result {
        Ok(_) => Ok(ExitCode::SUCCESS),
        Err(EngineError::Exception(exception)) if exception.is(ExceptionKind::SystemExit) => {
            Ok(ExitCode::from(exit_status(exception.args().first())))
        }
        Err(error) => {
            eprint!("{}", error.report());
            Ok(ExitCode::from(1))
        }
    }
}
