//! Raised exceptions and the built-in exception hierarchy.
//!
//! Runtime code raises `PyException::new(kind, message)` without touching the
//! object model; the VM turns it into an instance of the built-in class only
//! when a handler or `except ... as e` actually needs a value.

use std::fmt;
use std::rc::Rc;

use crate::runtime::types::BuiltinTypes;
use crate::runtime::value::Value;

pub type PyResult<T> = Result<T, PyException>;

macro_rules! exception_kinds {
    ($($kind:ident => $parent:expr),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum ExceptionKind {
            $($kind),*
        }

        impl ExceptionKind {
            pub const ALL: &'static [ExceptionKind] = &[$(ExceptionKind::$kind),*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$kind => stringify!($kind)),*
                }
            }

            pub fn parent(self) -> Option<ExceptionKind> {
                match self {
                    $(Self::$kind => $parent),*
                }
            }
        }
    };
}

exception_kinds! {
    BaseException => None,
    Exception => Some(ExceptionKind::BaseException),
    GeneratorExit => Some(ExceptionKind::BaseException),
    KeyboardInterrupt => Some(ExceptionKind::BaseException),
    SystemExit => Some(ExceptionKind::BaseException),
    StopIteration => Some(ExceptionKind::Exception),
    ArithmeticError => Some(ExceptionKind::Exception),
    ZeroDivisionError => Some(ExceptionKind::ArithmeticError),
    OverflowError => Some(ExceptionKind::ArithmeticError),
    AssertionError => Some(ExceptionKind::Exception),
    AttributeError => Some(ExceptionKind::Exception),
    LookupError => Some(ExceptionKind::Exception),
    IndexError => Some(ExceptionKind::LookupError),
    KeyError => Some(ExceptionKind::LookupError),
    NameError => Some(ExceptionKind::Exception),
    UnboundLocalError => Some(ExceptionKind::NameError),
    TypeError => Some(ExceptionKind::Exception),
    ValueError => Some(ExceptionKind::Exception),
    RuntimeError => Some(ExceptionKind::Exception),
    NotImplementedError => Some(ExceptionKind::RuntimeError),
    ImportError => Some(ExceptionKind::Exception),
    EOFError => Some(ExceptionKind::Exception),
    SyntaxError => Some(ExceptionKind::Exception),
    IndentationError => Some(ExceptionKind::SyntaxError),
    TokenError => Some(ExceptionKind::Exception),
}

impl ExceptionKind {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_subclass_of(self, ancestor: ExceptionKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == ancestor {
                return true;
            }
            current = kind.parent();
        }
        false
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }
}

/// One traceback line: where a frame was when the exception left it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub filename: Rc<str>,
    pub line: usize,
    pub scope: Rc<str>,
}

#[derive(Debug, Clone)]
enum Payload {
    Native { kind: ExceptionKind, args: Vec<Value> },
    Object(Value),
}

#[derive(Debug, Clone)]
pub struct PyException {
    payload: Payload,
    pub traceback: Vec<TraceEntry>,
    /// Stack depth of the frame that recorded the last traceback entry.
    pub(crate) recorded_depth: Option<usize>,
}

impl PyException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let args = if message.is_empty() {
            Vec::new()
        } else {
            vec![Value::string(message)]
        };
        Self::with_args(kind, args)
    }

    pub fn with_args(kind: ExceptionKind, args: Vec<Value>) -> Self {
        Self {
            payload: Payload::Native { kind, args },
            traceback: Vec::new(),
            recorded_depth: None,
        }
    }

    /// Wraps an already constructed exception instance.
    pub fn from_value(value: Value) -> Self {
        Self {
            payload: Payload::Object(value),
            traceback: Vec::new(),
            recorded_depth: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ValueError, message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::AttributeError, message)
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::NameError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::IndexError, message)
    }

    pub fn key_error(key: Value) -> Self {
        Self::with_args(ExceptionKind::KeyError, vec![key])
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::RuntimeError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ZeroDivisionError, message)
    }

    pub fn overflow(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::OverflowError, message)
    }

    pub fn import_error(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::ImportError, message)
    }

    pub fn stop_iteration(value: Value) -> Self {
        let args = if value.is_none() { Vec::new() } else { vec![value] };
        Self::with_args(ExceptionKind::StopIteration, args)
    }

    pub fn native_kind(&self) -> Option<ExceptionKind> {
        match &self.payload {
            Payload::Native { kind, .. } => Some(*kind),
            Payload::Object(_) => None,
        }
    }

    /// The built-in class this exception is an instance of, or the nearest
    /// built-in ancestor of a user-defined class.
    pub fn kind(&self) -> ExceptionKind {
        match &self.payload {
            Payload::Native { kind, .. } => *kind,
            Payload::Object(value) => match value {
                Value::Instance(instance) => instance
                    .class
                    .exception_kind()
                    .unwrap_or(ExceptionKind::BaseException),
                _ => ExceptionKind::BaseException,
            },
        }
    }

    pub fn is(&self, kind: ExceptionKind) -> bool {
        self.kind().is_subclass_of(kind)
    }

    pub fn args(&self) -> Vec<Value> {
        match &self.payload {
            Payload::Native { args, .. } => args.clone(),
            Payload::Object(value) => exception_args(value),
        }
    }

    /// The value carried by a `StopIteration`, `None` when absent.
    pub fn stop_value(&self) -> Value {
        self.args().into_iter().next().unwrap_or(Value::None)
    }

    pub fn type_name(&self) -> String {
        match &self.payload {
            Payload::Native { kind, .. } => kind.name().to_string(),
            Payload::Object(value) => value.type_name(),
        }
    }

    /// `str(exc)` computed without running user code.
    pub fn message(&self) -> String {
        let args = self.args();
        match args.as_slice() {
            [] => String::new(),
            [single] if self.is(ExceptionKind::KeyError) => single.basic_repr(),
            [single] => single.basic_str(),
            many => Value::tuple(many.to_vec()).basic_repr(),
        }
    }

    /// The exception as a runtime value, materializing native exceptions.
    pub fn to_value(&self, types: &BuiltinTypes) -> Value {
        match &self.payload {
            Payload::Object(value) => value.clone(),
            Payload::Native { kind, args } => {
                types.new_exception(&types.exception(*kind), args.clone())
            }
        }
    }

    /// Replaces a native payload with its materialized value so later
    /// handlers observe the same instance.
    pub fn materialize(&mut self, types: &BuiltinTypes) -> Value {
        let value = self.to_value(types);
        self.payload = Payload::Object(value.clone());
        value
    }

    pub fn summary(&self) -> String {
        let message = self.message();
        if message.is_empty() {
            self.type_name()
        } else {
            format!("{}: {message}", self.type_name())
        }
    }

    /// Full traceback in the usual `Traceback (most recent call last)` form.
    pub fn format_traceback(&self) -> String {
        let mut out = String::new();
        if !self.traceback.is_empty() {
            out.push_str("Traceback (most recent call last):\n");
            for entry in self.traceback.iter().rev() {
                out.push_str(&format!(
                    "  File \"{}\", line {}, in {}\n",
                    entry.filename, entry.line, entry.scope
                ));
            }
        }
        out.push_str(&self.summary());
        out.push('\n');
        out
    }
}

impl fmt::Display for PyException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Reads `args` off an exception instance.
pub fn exception_args(value: &Value) -> Vec<Value> {
    let Value::Instance(instance) = value else {
        return Vec::new();
    };
    match instance.dict.borrow().get_str("args") {
        Some(Value::Tuple(items)) => items.to_vec(),
        Some(other) => vec![other],
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hierarchy_follows_parents() {
        assert!(ExceptionKind::ZeroDivisionError.is_subclass_of(ExceptionKind::ArithmeticError));
        assert!(ExceptionKind::KeyError.is_subclass_of(ExceptionKind::Exception));
        assert!(ExceptionKind::IndentationError.is_subclass_of(ExceptionKind::SyntaxError));
        assert!(!ExceptionKind::SystemExit.is_subclass_of(ExceptionKind::Exception));
        assert_eq!(ExceptionKind::from_name("TokenError"), Some(ExceptionKind::TokenError));
    }

    #[test]
    fn native_messages_and_traceback() {
        let mut exc = PyException::zero_division("division by zero");
        exc.traceback.push(TraceEntry {
            filename: Rc::from("m.py"),
            line: 4,
            scope: Rc::from("f"),
        });
        exc.traceback.push(TraceEntry {
            filename: Rc::from("m.py"),
            line: 7,
            scope: Rc::from("<module>"),
        });
        assert_eq!(
            exc.format_traceback(),
            "Traceback (most recent call last):\n  File \"m.py\", line 7, in <module>\n  File \"m.py\", line 4, in f\nZeroDivisionError: division by zero\n"
        );
        assert_eq!(PyException::key_error(Value::string("k".to_string())).summary(), "KeyError: 'k'");
        assert_eq!(PyException::stop_iteration(Value::None).summary(), "StopIteration");
    }
}
