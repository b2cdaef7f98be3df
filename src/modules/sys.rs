use crate::runtime::callable::BuiltinFunction;
use crate::runtime::error::{check_arity, reject_kwargs};
use crate::runtime::exception::{ExceptionKind, PyException, PyResult};
use crate::runtime::module::ModuleObject;
use crate::runtime::object::CallContext;
use crate::runtime::value::{Kwargs, Value};

pub(super) fn module(cx: &dyn CallContext) -> ModuleObject {
    let path = cx.search_paths().into_iter().map(Value::from).collect();
    let builtin_names = super::NAMES.iter().map(|&name| Value::from(name)).collect();
    ModuleObject::with_members(
        "sys",
        vec![
            ("modules", Value::Dict(cx.modules())),
            ("path", Value::list(path)),
            ("builtin_module_names", Value::tuple(builtin_names)),
            ("version", Value::from(concat!("coil ", env!("CARGO_PKG_VERSION")))),
            ("maxsize", Value::Int(i64::MAX)),
            ("exit", BuiltinFunction::native("exit", exit)),
            ("getrecursionlimit", BuiltinFunction::native("getrecursionlimit", getrecursionlimit)),
            ("setrecursionlimit", BuiltinFunction::native("setrecursionlimit", setrecursionlimit)),
        ],
    )
}

/// Raises `SystemExit` carrying the optional status.
fn exit(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("exit", &kwargs)?;
    check_arity("exit", args.len(), 0, 1)?;
    Err(PyException::with_args(ExceptionKind::SystemExit, args))
}

fn getrecursionlimit(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("getrecursionlimit", &kwargs)?;
    check_arity("getrecursionlimit", args.len(), 0, 0)?;
    Ok(Value::from(cx.recursion_limit()))
}

fn setrecursionlimit(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("setrecursionlimit", &kwargs)?;
    check_arity("setrecursionlimit", args.len(), 1, 1)?;
    let Some(limit) = args[0].as_i64() else {
        return Err(PyException::type_error("an integer is required"));
    };
    if limit < 1 {
        return Err(PyException::value_error("recursion limit must be greater or equal than 1"));
    }
    cx.set_recursion_limit(limit as usize);
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use crate::config::EngineConfig;
    use crate::host::BufferHost;
    use crate::runtime::ExceptionKind;
    use crate::vm::{Engine, EngineError, run_to_completion};

    #[test]
    fn exposes_registry_paths_and_limits() {
        let host = BufferHost::new();
        let output = host.output();
        let mut engine = Engine::new(EngineConfig::without_time_slicing(), Box::new(host));
        let completion = engine
            .run_source(
                indoc! {"
                    import sys
                    import math
                    print('math' in sys.modules, sys.path)
                    sys.setrecursionlimit(50)
                    print(sys.getrecursionlimit())
                "},
                "<test>",
            )
            .unwrap();
        run_to_completion(&mut engine, completion).unwrap();
        assert_eq!(*output.borrow(), "True ['.']\n50\n");
    }

    #[test]
    fn exit_raises_system_exit() {
        let mut engine = Engine::new(EngineConfig::without_time_slicing(), Box::new(BufferHost::new()));
        let err = engine.run_source("import sys\nsys.exit(3)\n", "<test>").unwrap_err();
        let EngineError::Exception(exception) = err else {
            panic!("expected an exception");
        };
        assert!(exception.is(ExceptionKind::SystemExit));
        assert_eq!(exception.args()[0].basic_repr(), "3");
    }
}
