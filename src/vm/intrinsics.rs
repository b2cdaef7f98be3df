//! Built-ins that need the engine itself rather than a [`CallContext`]:
//! generator resumption, `next`, `input`, zero-argument `super` and friends.

use std::cell::RefCell;
use std::rc::Rc;

use crate::runtime::callable::{IntrinsicFn, SuperObject};
use crate::runtime::class::TypeObject;
use crate::runtime::dict::new_dict;
use crate::runtime::error::{check_arity, check_method_arity, reject_kwargs};
use crate::runtime::exception::{ExceptionKind, PyException, PyResult};
use crate::runtime::iter::GeneratorObject;
use crate::runtime::object::{CallContext, Iterable, is_instance, str_of};
use crate::runtime::value::{CellRef, Kwargs, Value};
use crate::vm::frame::GenMode;
use crate::vm::{CallOutcome, Engine, Request, Resumed};

pub(crate) const GENERATOR_METHODS: &[(&str, IntrinsicFn)] = &[
    ("__iter__", generator_iter),
    ("__next__", generator_next),
    ("send", generator_send),
    ("throw", generator_throw),
    ("close", generator_close),
];

fn receiver<'a>(name: &str, args: &'a [Value]) -> PyResult<&'a Rc<RefCell<GeneratorObject>>> {
    match args.first() {
        Some(Value::Generator(generator)) => Ok(generator),
        _ => Err(PyException::type_error(format!(
            "descriptor '{name}' requires a 'generator' object"
        ))),
    }
}

fn generator_iter(_engine: &mut Engine, args: Vec<Value>, kwargs: Kwargs) -> PyResult<CallOutcome> {
    reject_kwargs("__iter__", &kwargs)?;
    receiver("__iter__", &args)?;
    Ok(CallOutcome::Value(args[0].clone()))
}

fn generator_next(engine: &mut Engine, args: Vec<Value>, kwargs: Kwargs) -> PyResult<CallOutcome> {
    reject_kwargs("__next__", &kwargs)?;
    check_method_arity("__next__", &args, 0, 0)?;
    let generator = receiver("__next__", &args)?;
    resume(engine, generator, Value::None, None, GenMode::Next { default: None })
}

fn generator_send(engine: &mut Engine, mut args: Vec<Value>, kwargs: Kwargs) -> PyResult<CallOutcome> {
    reject_kwargs("send", &kwargs)?;
    check_method_arity("send", &args, 1, 1)?;
    let sent = args.pop().unwrap_or(Value::None);
    let generator = receiver("send", &args)?;
    resume(engine, generator, sent, None, GenMode::Next { default: None })
}

/// `g.throw(type[, value])` or `g.throw(instance)`.
fn generator_throw(engine: &mut Engine, args: Vec<Value>, kwargs: Kwargs) -> PyResult<CallOutcome> {
    reject_kwargs("throw", &kwargs)?;
    check_method_arity("throw", &args, 1, 2)?;
    let generator = receiver("throw", &args)?.clone();
    let exception = match (&args[1], args.get(2)) {
        (Value::Type(class), value) if class.exception_kind().is_some() => {
            let call_args = match value {
                Some(Value::None) | None => Vec::new(),
                Some(Value::Tuple(items)) => items.to_vec(),
                Some(other) => vec![other.clone()],
            };
            engine.call(&args[1], call_args, Vec::new())?
        }
        (Value::Instance(instance), None) if instance.class.exception_kind().is_some() => args[1].clone(),
        (Value::Instance(_), Some(_)) => {
            return Err(PyException::type_error("instance exception may not have a separate value"));
        }
        (other, _) => {
            return Err(PyException::type_error(format!(
                "exceptions must be classes or instances deriving from BaseException, not {}",
                other.type_name()
            )));
        }
    };
    let exception = PyException::from_value(exception);
    resume(engine, &generator, Value::None, Some(exception), GenMode::Next { default: None })
}

fn generator_close(engine: &mut Engine, args: Vec<Value>, kwargs: Kwargs) -> PyResult<CallOutcome> {
    reject_kwargs("close", &kwargs)?;
    check_method_arity("close", &args, 0, 0)?;
    let generator = receiver("close", &args)?;
    let exit = PyException::new(ExceptionKind::GeneratorExit, "");
    match engine.resume_generator(generator, Value::None, Some(exit), GenMode::Close)? {
        Resumed::Running => Ok(CallOutcome::Frame),
        Resumed::Finished => Ok(CallOutcome::Value(Value::None)),
    }
}

fn resume(
    engine: &mut Engine,
    generator: &Rc<RefCell<GeneratorObject>>,
    sent: Value,
    throw: Option<PyException>,
    mode: GenMode,
) -> PyResult<CallOutcome> {
    let default = match &mode {
        GenMode::Next { default } => default.clone(),
        _ => None,
    };
    match engine.resume_generator(generator, sent, throw, mode)? {
        Resumed::Running => Ok(CallOutcome::Frame),
        Resumed::Finished => match default {
            Some(default) => Ok(CallOutcome::Value(default)),
            None => Err(PyException::stop_iteration(Value::None)),
        },
    }
}

/// `next(iterator[, default])`.
pub(crate) fn next(engine: &mut Engine, mut args: Vec<Value>, kwargs: Kwargs) -> PyResult<CallOutcome> {
    reject_kwargs("next", &kwargs)?;
    check_arity("next", args.len(), 1, 2)?;
    let default = if args.len() == 2 { args.pop() } else { None };
    let iterator = args.swap_remove(0);
    if let Value::Generator(generator) = &iterator {
        return resume(engine, generator, Value::None, None, GenMode::Next { default });
    }
    match iterator.next(engine)? {
        Some(value) => Ok(CallOutcome::Value(value)),
        None => match default {
            Some(default) => Ok(CallOutcome::Value(default)),
            None => Err(PyException::stop_iteration(Value::None)),
        },
    }
}

/// `input([prompt])` asks the host for a line; the outermost run suspends.
pub(crate) fn input(engine: &mut Engine, args: Vec<Value>, kwargs: Kwargs) -> PyResult<CallOutcome> {
    reject_kwargs("input", &kwargs)?;
    check_arity("input", args.len(), 0, 1)?;
    let prompt = match args.first() {
        Some(prompt) => str_of(engine, prompt)?,
        None => String::new(),
    };
    Ok(CallOutcome::Block(Request::Input { prompt }))
}

pub(crate) fn globals(engine: &mut Engine, args: Vec<Value>, kwargs: Kwargs) -> PyResult<CallOutcome> {
    reject_kwargs("globals", &kwargs)?;
    check_arity("globals", args.len(), 0, 0)?;
    Ok(CallOutcome::Value(Value::Dict(engine.current_globals())))
}

/// `locals()`: the namespace of a module or class body, a snapshot of the
/// bound fast locals in a function.
pub(crate) fn locals(engine: &mut Engine, args: Vec<Value>, kwargs: Kwargs) -> PyResult<CallOutcome> {
    reject_kwargs("locals", &kwargs)?;
    check_arity("locals", args.len(), 0, 0)?;
    let Some(frame) = engine.current_frame() else {
        return Ok(CallOutcome::Value(Value::Dict(engine.current_globals())));
    };
    if let Some(namespace) = &frame.namespace {
        return Ok(CallOutcome::Value(Value::Dict(namespace.clone())));
    }
    let snapshot = new_dict();
    {
        let mut dict = snapshot.borrow_mut();
        for (name, value) in frame.code.varnames.iter().zip(&frame.fast) {
            if let Some(value) = value {
                dict.set_str(name, value.clone());
            }
        }
        for (name, cell) in frame.code.cellvars.iter().chain(&frame.code.freevars).zip(&frame.cells) {
            if let Some(value) = cell.borrow().clone() {
                dict.set_str(name, value);
            }
        }
    }
    Ok(CallOutcome::Value(Value::Dict(snapshot)))
}

/// `super()` and `super(class, receiver)`.
pub(crate) fn super_new(engine: &mut Engine, args: Vec<Value>, kwargs: Kwargs) -> PyResult<CallOutcome> {
    reject_kwargs("super", &kwargs)?;
    check_arity("super", args.len(), 0, 2)?;
    let (start, receiver) = match args.as_slice() {
        [] => implicit_super_args(engine)?,
        [Value::Type(start), receiver] => (start.clone(), receiver.clone()),
        [Value::Type(_)] => {
            return Err(PyException::type_error("unbound super objects are not supported"));
        }
        [other, ..] => {
            return Err(PyException::type_error(format!(
                "super() argument 1 must be a type, not {}",
                other.type_name()
            )));
        }
    };
    let types = engine.types();
    let receiver_type = match &receiver {
        Value::Type(class) if class.is_subtype(&start) => class.clone(),
        _ if is_instance(&types, &receiver, &start) => types.type_of(&receiver),
        _ => {
            return Err(PyException::type_error(
                "super(type, obj): obj must be an instance or subtype of type",
            ));
        }
    };
    Ok(CallOutcome::Value(Value::Super(Rc::new(SuperObject {
        start,
        receiver,
        receiver_type,
    }))))
}

/// The enclosing class from the `__class__` cell and the first argument of
/// the calling function.
fn implicit_super_args(engine: &Engine) -> PyResult<(Rc<TypeObject>, Value)> {
    let Some(frame) = engine.current_frame() else {
        return Err(PyException::runtime_error("super(): no current frame"));
    };
    let code = &frame.code;
    let class = code
        .cell_index("__class__")
        .and_then(|slot| frame.cells.get(slot))
        .and_then(|cell| cell.borrow().clone());
    let Some(Value::Type(class)) = class else {
        return Err(PyException::runtime_error("super(): __class__ cell not found"));
    };
    if code.argcount == 0 {
        return Err(PyException::runtime_error("super(): no arguments"));
    }
    let captured = code
        .cell_params
        .iter()
        .find(|&&(_, slot)| slot == 0)
        .and_then(|&(cell, _)| cell_value(frame.cells.get(cell)));
    let receiver = captured.or_else(|| frame.fast.first().cloned().flatten());
    match receiver {
        Some(receiver) => Ok((class, receiver)),
        None => Err(PyException::runtime_error("super(): arg[0] deleted")),
    }
}

fn cell_value(cell: Option<&CellRef>) -> Option<Value> {
    cell.and_then(|cell| cell.borrow().clone())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::config::EngineConfig;
    use crate::host::BufferHost;
    use crate::vm::{Engine, run_to_completion};

    fn run(source: &str) -> String {
        let host = BufferHost::new();
        let output = host.output();
        let mut engine = Engine::new(EngineConfig::without_time_slicing(), Box::new(host));
        let completion = engine.run_source(source, "<test>").unwrap();
        run_to_completion(&mut engine, completion).unwrap();
        let text = output.borrow().clone();
        text
    }

    #[test]
    fn send_and_throw_drive_a_generator() {
        let output = run(indoc! {"
            def echo():
                total = 0
                while True:
                    try:
                        value = yield total
                    except ValueError:
                        value = 100
                    total += value

            g = echo()
            print(next(g))
            print(g.send(5))
            print(g.throw(ValueError))
            g.close()
            print(next(g, 'done'))
        "});
        assert_eq!(output, "0\n5\n105\ndone\n");
    }

    #[test]
    fn zero_argument_super_finds_the_enclosing_class() {
        let output = run(indoc! {"
            class Base:
                def greet(self):
                    return 'base'

            class Child(Base):
                def greet(self):
                    return 'child+' + super().greet()

            print(Child().greet())
        "});
        assert_eq!(output, "child+base\n");
    }

    #[test]
    fn locals_snapshots_function_bindings() {
        let output = run(indoc! {"
            def f(a):
                b = a * 2
                return sorted(locals().items())
            print(f(3))
        "});
        assert_eq!(output, "[('a', 3), ('b', 6)]\n");
    }
}
