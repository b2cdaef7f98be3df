//! Function objects, built-ins, bound methods and descriptors.
use std::rc::Rc;

use crate::compiler::CodeObject;
use crate::runtime::class::TypeObject;
use crate::runtime::dict::new_dict;
use crate::runtime::error::{check_method_arity, reject_kwargs, take_kwarg, finish_kwargs, check_arity};
use crate::runtime::exception::{PyException, PyResult};
use crate::runtime::object::CallContext;
use crate::runtime::value::{CellRef, DictRef, Kwargs, Value};
use crate::vm::{CallOutcome, Engine};

/// Native code that never suspends and never needs the frame stack.
pub type NativeFn = fn(&mut dyn CallContext, Vec<Value>, Kwargs) -> PyResult<Value>;

/// Built-ins that drive the engine directly: they may push frames
/// (`next(generator)`) or return a blocking request (`input()`).
pub type IntrinsicFn = fn(&mut Engine, Vec<Value>, Kwargs) -> PyResult<CallOutcome>;

#[derive(Clone, Copy)]
pub enum BuiltinKind {
    Native(NativeFn),
    Intrinsic(IntrinsicFn),
}

pub struct BuiltinFunction {
    pub name: Rc<str>,
    pub kind: BuiltinKind,
    /// Installed in a type dict: binds its receiver like a function does.
    pub method: bool,
    /// Owning type name, for reprs of unbound methods.
    pub owner: Option<Rc<str>>,
}

impl BuiltinFunction {
    pub fn native(name: &str, function: NativeFn) -> Value {
        Value::Builtin(Rc::new(Self {
            name: Rc::from(name),
            kind: BuiltinKind::Native(function),
            method: false,
            owner: None,
        }))
    }

    pub fn intrinsic(name: &str, function: IntrinsicFn) -> Value {
        Value::Builtin(Rc::new(Self {
            name: Rc::from(name),
            kind: BuiltinKind::Intrinsic(function),
            method: false,
            owner: None,
        }))
    }

    pub fn method(owner: &str, name: &str, kind: BuiltinKind) -> Value {
        Value::Builtin(Rc::new(Self {
            name: Rc::from(name),
            kind,
            method: true,
            owner: Some(Rc::from(owner)),
        }))
    }

    /// Calls a native built-in. Intrinsics need the engine and are refused.
    pub fn call_native(&self, cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
        match self.kind {
            BuiltinKind::Native(function) => function(cx, args, kwargs),
            BuiltinKind::Intrinsic(_) => Err(PyException::runtime_error(format!(
                "{}() cannot be called from native code",
                self.name
            ))),
        }
    }
}

impl std::fmt::Debug for BuiltinFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<built-in function {}>", self.name)
    }
}

pub struct FunctionObject {
    pub code: Rc<CodeObject>,
    pub globals: DictRef,
    pub defaults: Vec<Value>,
    pub kwdefaults: Vec<(Rc<str>, Value)>,
    pub closure: Vec<CellRef>,
    pub name: Rc<str>,
    pub qualname: Rc<str>,
    pub module: Rc<str>,
    /// Arbitrary attributes assigned to the function.
    pub dict: DictRef,
}

impl std::fmt::Debug for FunctionObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<function {}>", self.qualname)
    }
}

impl FunctionObject {
    pub fn new(code: Rc<CodeObject>, globals: DictRef) -> Self {
        let module = match globals.borrow().get_str("__name__") {
            Some(Value::Str(name)) => name,
            _ => Rc::from("__main__"),
        };
        Self {
            name: code.name.clone(),
            qualname: code.qualname.clone(),
            code,
            globals,
            defaults: Vec::new(),
            kwdefaults: Vec::new(),
            closure: Vec::new(),
            module,
            dict: new_dict(),
        }
    }

    /// Maps a call's arguments onto the fast-local slots.
    pub fn bind_arguments(&self, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Vec<Option<Value>>> {
        let code = &self.code;
        let name = &self.qualname;
        let argcount = code.argcount;
        let named = argcount + code.kwonlyargcount;
        let mut fast: Vec<Option<Value>> = vec![None; code.varnames.len()];

        let given = args.len();
        let mut args = args.into_iter();
        for slot in fast.iter_mut().take(argcount.min(given)) {
            *slot = args.next();
        }
        let extra: Vec<Value> = args.collect();
        if code.has_varargs {
            fast[named] = Some(Value::tuple(extra));
        } else if !extra.is_empty() {
            let expected = if self.defaults.is_empty() {
                format!("{argcount}")
            } else {
                format!("from {} to {argcount}", argcount - self.defaults.len())
            };
            return Err(PyException::type_error(format!(
                "{name}() takes {expected} positional argument{} but {given} {} given",
                if argcount == 1 { "" } else { "s" },
                if given == 1 { "was" } else { "were" },
            )));
        }

        let varkw = code.has_varkeywords.then(new_dict);
        for (keyword, value) in kwargs {
            match code.varnames[..named].iter().position(|param| *param == keyword) {
                Some(index) if fast[index].is_some() => {
                    return Err(PyException::type_error(format!(
                        "{name}() got multiple values for argument '{keyword}'"
                    )));
                }
                Some(index) => fast[index] = Some(value),
                None => match &varkw {
                    Some(dict) => dict.borrow_mut().set_str(&keyword, value),
                    None => {
                        return Err(PyException::type_error(format!(
                            "{name}() got an unexpected keyword argument '{keyword}'"
                        )));
                    }
                },
            }
        }

        let first_default = argcount.saturating_sub(self.defaults.len());
        for (index, default) in (first_default..argcount).zip(&self.defaults) {
            if fast[index].is_none() {
                fast[index] = Some(default.clone());
            }
        }
        let missing: Vec<String> = (0..argcount)
            .filter(|&index| fast[index].is_none())
            .map(|index| format!("'{}'", code.varnames[index]))
            .collect();
        if !missing.is_empty() {
            return Err(missing_arguments(name, "positional", &missing));
        }

        for index in argcount..named {
            if fast[index].is_none() {
                let param = &code.varnames[index];
                fast[index] = self
                    .kwdefaults
                    .iter()
                    .find(|(name, _)| name == param)
                    .map(|(_, value)| value.clone());
            }
        }
        let missing: Vec<String> = (argcount..named)
            .filter(|&index| fast[index].is_none())
            .map(|index| format!("'{}'", code.varnames[index]))
            .collect();
        if !missing.is_empty() {
            return Err(missing_arguments(name, "keyword-only", &missing));
        }

        if let Some(dict) = varkw {
            fast[named + usize::from(code.has_varargs)] = Some(Value::Dict(dict));
        }
        Ok(fast)
    }
}

fn missing_arguments(name: &str, kind: &str, missing: &[String]) -> PyException {
    let listed = match missing {
        [single] => single.clone(),
        [init @ .., last] if init.len() == 1 => format!("{} and {last}", init[0]),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
        [] => String::new(),
    };
    PyException::type_error(format!(
        "{name}() missing {} required {kind} argument{}: {listed}",
        missing.len(),
        if missing.len() == 1 { "" } else { "s" }
    ))
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub function: Value,
}

#[derive(Debug, Clone, Default)]
pub struct PropertyObject {
    pub fget: Option<Value>,
    pub fset: Option<Value>,
    pub fdel: Option<Value>,
    pub doc: Option<Value>,
}

/// `super(class, receiver)`: lookup resumes after `start` in the MRO of
/// `receiver_type`.
#[derive(Debug)]
pub struct SuperObject {
    pub start: Rc<TypeObject>,
    pub receiver: Value,
    pub receiver_type: Rc<TypeObject>,
}

fn some(value: Option<Value>) -> Option<Value> {
    value.filter(|value| !value.is_none())
}

/// `property(fget=None, fset=None, fdel=None, doc=None)`.
pub fn property_new(_cx: &mut dyn CallContext, args: Vec<Value>, mut kwargs: Kwargs) -> PyResult<Value> {
    check_arity("property", args.len(), 0, 4)?;
    let mut args = args.into_iter();
    let property = PropertyObject {
        fget: some(args.next().or_else(|| take_kwarg(&mut kwargs, "fget"))),
        fset: some(args.next().or_else(|| take_kwarg(&mut kwargs, "fset"))),
        fdel: some(args.next().or_else(|| take_kwarg(&mut kwargs, "fdel"))),
        doc: some(args.next().or_else(|| take_kwarg(&mut kwargs, "doc"))),
    };
    finish_kwargs("property", kwargs)?;
    Ok(Value::Property(Rc::new(property)))
}

fn property_receiver(args: &[Value], method: &str) -> PyResult<PropertyObject> {
    check_method_arity(method, args, 1, 1)?;
    match &args[0] {
        Value::Property(property) => Ok((**property).clone()),
        other => Err(PyException::type_error(format!(
            "descriptor '{method}' requires a 'property' object but received a '{}'",
            other.type_name()
        ))),
    }
}

fn getter(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("getter", &kwargs)?;
    let mut property = property_receiver(&args, "getter")?;
    property.fget = some(Some(args[1].clone()));
    Ok(Value::Property(Rc::new(property)))
}

fn setter(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("setter", &kwargs)?;
    let mut property = property_receiver(&args, "setter")?;
    property.fset = some(Some(args[1].clone()));
    Ok(Value::Property(Rc::new(property)))
}

fn deleter(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("deleter", &kwargs)?;
    let mut property = property_receiver(&args, "deleter")?;
    property.fdel = some(Some(args[1].clone()));
    Ok(Value::Property(Rc::new(property)))
}

pub(crate) const PROPERTY_METHODS: &[(&str, NativeFn)] =
    &[("getter", getter), ("setter", setter), ("deleter", deleter)];

pub fn classmethod_new(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("classmethod", &kwargs)?;
    check_arity("classmethod", args.len(), 1, 1)?;
    Ok(Value::ClassMethod(Rc::new(args[0].clone())))
}

pub fn staticmethod_new(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("staticmethod", &kwargs)?;
    check_arity("staticmethod", args.len(), 1, 1)?;
    Ok(Value::StaticMethod(Rc::new(args[0].clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_source;
    use crate::compiler::Instruction;
    use crate::parser::Mode;

    fn function(source: &str) -> FunctionObject {
        let module = compile_source(source, "<test>", Mode::Exec).expect("compiles");
        let code = module
            .blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .find_map(|instruction| match instruction {
                Instruction::MakeFunction { code, .. } => Some(code.clone()),
                _ => None,
            })
            .expect("a function");
        FunctionObject::new(code, new_dict())
    }

    fn render(fast: &[Option<Value>]) -> Vec<String> {
        fast.iter()
            .map(|slot| slot.as_ref().map_or("-".to_string(), Value::basic_repr))
            .collect()
    }

    #[test]
    fn binds_positional_varargs_and_keywords() {
        let mut f = function("def f(a, b=2, *rest, c, **kw): pass\n");
        f.defaults = vec![Value::Int(2)];
        let fast = f
            .bind_arguments(
                vec![Value::Int(1), Value::Int(5), Value::Int(6)],
                vec![("c".into(), Value::Int(3)), ("z".into(), Value::Int(9))],
            )
            .expect("binds");
        assert_eq!(render(&fast), ["1", "5", "3", "(6,)", "{'z': 9}"]);
    }

    #[test]
    fn reports_python_style_errors() {
        let mut f = function("def f(a, b, c=0): pass\n");
        f.defaults = vec![Value::Int(0)];
        let err = f.bind_arguments(vec![], vec![]).unwrap_err();
        assert_eq!(err.summary(), "TypeError: f() missing 2 required positional arguments: 'a' and 'b'");
        let err = f
            .bind_arguments(vec![Value::Int(1); 4], vec![])
            .unwrap_err();
        assert_eq!(
            err.summary(),
            "TypeError: f() takes from 2 to 3 positional arguments but 4 were given"
        );
        let err = f
            .bind_arguments(vec![Value::Int(1)], vec![("a".into(), Value::Int(2))])
            .unwrap_err();
        assert_eq!(err.summary(), "TypeError: f() got multiple values for argument 'a'");
    }
}
