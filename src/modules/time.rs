use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::runtime::callable::{BuiltinFunction, NativeFn};
use crate::runtime::error::{check_arity, reject_kwargs};
use crate::runtime::exception::{PyException, PyResult};
use crate::runtime::module::ModuleObject;
use crate::runtime::object::CallContext;
use crate::runtime::value::{Kwargs, Value};
use crate::vm::{CallOutcome, Engine, Request};

const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("monotonic", monotonic),
    ("perf_counter", monotonic),
    ("time", time),
];

pub(super) fn module() -> ModuleObject {
    let mut members: Vec<(&str, Value)> = FUNCTIONS
        .iter()
        .map(|(name, function)| (*name, BuiltinFunction::native(name, *function)))
        .collect();
    members.push(("sleep", BuiltinFunction::intrinsic("sleep", sleep)));
    ModuleObject::with_members("time", members)
}

/// Seconds since the Unix epoch.
fn time(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("time", &kwargs)?;
    check_arity("time", args.len(), 0, 0)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|error| PyException::runtime_error(error.to_string()))?;
    Ok(Value::Float(now.as_secs_f64()))
}

/// Seconds since the engine started.
fn monotonic(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("monotonic", &kwargs)?;
    check_arity("monotonic", args.len(), 0, 0)?;
    Ok(Value::Float(cx.elapsed().as_secs_f64()))
}

/// `sleep(seconds)` is a blocking request: the outermost run suspends and
/// the host does the waiting.
fn sleep(_engine: &mut Engine, args: Vec<Value>, kwargs: Kwargs) -> PyResult<CallOutcome> {
    reject_kwargs("sleep", &kwargs)?;
    check_arity("sleep", args.len(), 1, 1)?;
    let seconds = args[0].to_f64().ok_or_else(|| {
        PyException::type_error(format!(
            "'{}' object cannot be interpreted as a number",
            args[0].type_name()
        ))
    })?;
    if seconds.is_nan() {
        return Err(PyException::value_error("Invalid value NaN (not a number)"));
    }
    if seconds < 0.0 {
        return Err(PyException::value_error("sleep length must be non-negative"));
    }
    let duration = Duration::try_from_secs_f64(seconds)
        .map_err(|_| PyException::overflow("sleep length is too large"))?;
    Ok(CallOutcome::Block(Request::Sleep(duration)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use indoc::indoc;

    use crate::config::EngineConfig;
    use crate::host::BufferHost;
    use crate::vm::{Completion, Engine, Request, run_to_completion};

    #[test]
    fn sleep_suspends_with_the_requested_duration() {
        let host = BufferHost::new();
        let slept = host.slept();
        let mut engine = Engine::new(EngineConfig::without_time_slicing(), Box::new(host));
        let completion = engine
            .run_source(
                indoc! {"
                    import time
                    time.sleep(0.25)
                    print('awake')
                "},
                "<test>",
            )
            .unwrap();
        let Completion::Suspended(suspension) = &completion else {
            panic!("expected a suspension");
        };
        assert_eq!(suspension.request, Request::Sleep(Duration::from_millis(250)));
        run_to_completion(&mut engine, completion).unwrap();
        assert_eq!(*slept.borrow(), Duration::from_millis(250));
    }

    #[test]
    fn negative_sleep_is_rejected() {
        let mut engine = Engine::new(EngineConfig::without_time_slicing(), Box::new(BufferHost::new()));
        let err = engine.run_source("import time\ntime.sleep(-1)\n", "<test>").unwrap_err();
        assert_eq!(err.to_string(), "ValueError: sleep length must be non-negative");
    }
}
