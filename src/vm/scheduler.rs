//! Suspension and resumption of a whole frame stack.

use std::time::Duration;

use log::{debug, trace};

use crate::runtime::value::Value;
use crate::vm::frame::Frame;
use crate::vm::{Engine, EngineError};

/// Why a script stopped before finishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// The time slice ran out; resume with [`Reply::Continue`].
    TimeSlice,
    /// `input(prompt)`; resume with [`Reply::Input`].
    Input { prompt: String },
    /// `time.sleep(duration)`; resume with [`Reply::Continue`] once it elapsed.
    Sleep(Duration),
}

/// The embedder's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Continue,
    Input(String),
}

/// A paused script: the preserved frames and what it is waiting for.
///
/// Dropping it cancels the script.
#[derive(Debug)]
pub struct Suspension {
    pub(crate) frames: Vec<Frame>,
    pub request: Request,
}

impl Suspension {
    /// Number of preserved frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

#[derive(Debug)]
pub enum Completion {
    /// The script ran to its end; the value is the module result (the
    /// expression value in eval mode, `None` otherwise).
    Done(Value),
    Suspended(Suspension),
}

impl Completion {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Drives a script to its end, serving every request through the host.
pub fn run_to_completion(
    engine: &mut Engine,
    mut completion: Completion,
) -> Result<Value, EngineError> {
    let mut resumptions = 0usize;
    loop {
        let suspension = match completion {
            Completion::Done(value) => {
                debug!("script finished after {resumptions} resumptions");
                return Ok(value);
            }
            Completion::Suspended(suspension) => suspension,
        };
        trace!("serving {:?} at depth {}", suspension.request, suspension.depth());
        let reply = match &suspension.request {
            Request::TimeSlice => Reply::Continue,
            Request::Input { prompt } => match engine.host_mut().read_input(prompt) {
                Ok(line) => Reply::Input(line),
                Err(error) => {
                    completion = engine.resume_with_error(suspension, error)?;
                    resumptions += 1;
                    continue;
                }
            },
            Request::Sleep(duration) => {
                engine.host_mut().sleep(*duration);
                Reply::Continue
            }
        };
        completion = engine.resume(suspension, reply)?;
        resumptions += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::EngineConfig;
    use crate::host::{BufferHost, SharedOutput};

    fn engine(config: EngineConfig) -> (Engine, SharedOutput) {
        let host = BufferHost::new();
        let output = host.output();
        (Engine::new(config, Box::new(host)), output)
    }

    const GREETER: &str = indoc! {"
        name = input('who? ')
        print('hello', name)
    "};

    #[test]
    fn input_suspends_until_the_embedder_replies() {
        let (mut engine, output) = engine(EngineConfig::without_time_slicing());
        let completion = engine.run_source(GREETER, "<test>").unwrap();
        let Completion::Suspended(suspension) = completion else {
            panic!("expected a suspension");
        };
        assert_eq!(
            suspension.request,
            Request::Input {
                prompt: "who? ".to_string()
            }
        );
        assert_eq!(suspension.depth(), 1);
        assert_eq!(&*output.borrow(), "");

        let completion = engine.resume(suspension, Reply::Input("ada".to_string())).unwrap();
        assert!(completion.is_done());
        assert_eq!(&*output.borrow(), "hello ada\n");
    }

    #[test]
    fn host_errors_resume_as_exceptions() {
        let (mut engine, output) = engine(EngineConfig::without_time_slicing());
        let source = indoc! {"
            try:
                input()
            except EOFError as e:
                print('eof:', e)
        "};
        let Completion::Suspended(suspension) = engine.run_source(source, "<test>").unwrap() else {
            panic!("expected a suspension");
        };
        let error = io::Error::new(io::ErrorKind::UnexpectedEof, "closed");
        let completion = engine.resume_with_error(suspension, error).unwrap();
        assert!(completion.is_done());
        assert_eq!(&*output.borrow(), "eof: EOF when reading a line\n");
    }

    #[test]
    fn dropping_a_suspension_cancels_the_script() {
        let (mut engine, output) = engine(EngineConfig::without_time_slicing());
        let completion = engine.run_source(GREETER, "<test>").unwrap();
        drop(completion);
        let completion = engine.run_source("print('fresh')\n", "<test>").unwrap();
        run_to_completion(&mut engine, completion).unwrap();
        assert_eq!(&*output.borrow(), "fresh\n");
    }

    #[test]
    fn a_zero_time_slice_suspends_often_without_changing_results() {
        let source = indoc! {"
            def f():
                x = 1
                yield x
                yield x + 1
            total = 0
            for i in range(50):
                total += sum(f())
            print(total, list(f()))
        "};
        let config = EngineConfig {
            yield_interval_ms: Some(0),
            ..EngineConfig::default()
        };
        let (mut engine, output) = engine(config);
        let mut completion = engine.run_source(source, "<test>").unwrap();
        let mut slices = 0;
        while let Completion::Suspended(suspension) = completion {
            assert_eq!(suspension.request, Request::TimeSlice);
            slices += 1;
            completion = engine.resume(suspension, Reply::Continue).unwrap();
        }
        assert!(slices > 50);
        assert_eq!(&*output.borrow(), "150 [1, 2]\n");
    }

    #[test]
    fn sleep_is_served_by_the_host() {
        let host = BufferHost::new();
        let slept = host.slept();
        let mut engine = Engine::new(EngineConfig::without_time_slicing(), Box::new(host));
        let completion = engine
            .run_source("import time\ntime.sleep(0.25)\ntime.sleep(0.5)\n", "<test>")
            .unwrap();
        let Completion::Suspended(suspension) = &completion else {
            panic!("expected a suspension");
        };
        assert_eq!(suspension.request, Request::Sleep(Duration::from_millis(250)));
        run_to_completion(&mut engine, completion).unwrap();
        assert_eq!(*slept.borrow(), Duration::from_millis(750));
    }

    #[test]
    fn nested_runs_serve_requests_synchronously() {
        let host = BufferHost::new().with_input(["3", "4"]);
        let output = host.output();
        let mut engine = Engine::new(EngineConfig::without_time_slicing(), Box::new(host));
        let source = indoc! {"
            values = sorted([1, 2], key=lambda x: int(input()) * x)
            print(values)
        "};
        let completion = engine.run_source(source, "<test>").unwrap();
        // `input` inside a key function cannot suspend the outer script.
        assert!(completion.is_done());
        assert_eq!(&*output.borrow(), "[1, 2]\n");
    }
}
