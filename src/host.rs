//! The embedder interface: where source comes from and where output goes.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufRead, Write};
use std::rc::Rc;
use std::time::Duration;

use rustc_hash::FxHashMap;

/// Everything the engine needs from the outside world.
pub trait Host {
    /// Contents of `path`, or `None` when it does not exist.
    fn read_source(&self, path: &str) -> Option<String>;

    fn write_output(&mut self, text: &str) -> io::Result<()>;

    /// One line of interactive input without its line terminator.
    fn read_input(&mut self, prompt: &str) -> io::Result<String>;

    fn sleep(&mut self, duration: Duration);
}

/// Filesystem, stdout and stdin.
#[derive(Debug, Default)]
pub struct StdHost;

impl Host for StdHost {
    fn read_source(&self, path: &str) -> Option<String> {
        fs::read_to_string(path).ok()
    }

    fn write_output(&mut self, text: &str) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()
    }

    fn read_input(&mut self, prompt: &str) -> io::Result<String> {
        self.write_output(prompt)?;
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "EOF when reading a line"));
        }
        Ok(trim_line_end(line))
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

fn trim_line_end(mut line: String) -> String {
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    line
}

/// Output captured by a [`BufferHost`], readable after the host has been
/// handed to an engine.
pub type SharedOutput = Rc<RefCell<String>>;

/// In-memory files, captured output and scripted input.
#[derive(Debug, Default)]
pub struct BufferHost {
    files: FxHashMap<String, String>,
    output: SharedOutput,
    input: VecDeque<String>,
    slept: Rc<RefCell<Duration>>,
}

impl BufferHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, source: &str) -> Self {
        self.files.insert(path.to_string(), source.to_string());
        self
    }

    pub fn with_input<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input.extend(lines.into_iter().map(Into::into));
        self
    }

    pub fn output(&self) -> SharedOutput {
        self.output.clone()
    }

    /// Total time scripts asked to sleep; nothing actually sleeps.
    pub fn slept(&self) -> Rc<RefCell<Duration>> {
        self.slept.clone()
    }
}

impl Host for BufferHost {
    fn read_source(&self, path: &str) -> Option<String> {
        let path = path.strip_prefix("./").unwrap_or(path);
        self.files.get(path).cloned()
    }

    fn write_output(&mut self, text: &str) -> io::Result<()> {
        self.output.borrow_mut().push_str(text);
        Ok(())
    }

    fn read_input(&mut self, prompt: &str) -> io::Result<String> {
        self.output.borrow_mut().push_str(prompt);
        self.input
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "EOF when reading a line"))
    }

    fn sleep(&mut self, duration: Duration) {
        *self.slept.borrow_mut() += duration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_host_serves_files_and_scripted_input() {
        let mut host = BufferHost::new()
            .with_file("pkg/mod.py", "x = 1\n")
            .with_input(["first"]);
        let output = host.output();
        assert_eq!(host.read_source("./pkg/mod.py").as_deref(), Some("x = 1\n"));
        assert!(host.read_source("missing.py").is_none());
        assert_eq!(host.read_input("> ").unwrap(), "first");
        let err = host.read_input("> ").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        host.write_output("done\n").unwrap();
        assert_eq!(*output.borrow(), "> > done\n");
    }

    #[test]
    fn trims_only_the_line_terminator() {
        assert_eq!(trim_line_end("a b \r\n".to_string()), "a b ");
        assert_eq!(trim_line_end("tail".to_string()), "tail");
    }
}
