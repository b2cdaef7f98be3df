pub mod ast;
pub mod builtins;
pub mod compiler;
pub mod config;
pub mod error;
pub mod grammar;
pub mod host;
pub mod lexer;
pub mod modules;
pub mod num;
pub mod parser;
pub mod runtime;
pub mod symtable;
pub mod vm;

pub use config::{DivisionPolicy, EngineConfig};
pub use error::{CompileError, CompileErrorKind};
pub use host::{BufferHost, Host, StdHost};
pub use runtime::{ExceptionKind, PyException, Value};
pub use vm::{Completion, Engine, EngineError, Reply, Request, Suspension, run_to_completion};
