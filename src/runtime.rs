//! The object model the engine executes against.
//!
//! Values, type objects with C3 linearization, attribute resolution,
//! comparison and arithmetic dispatch, the built-in types and their methods.
//! Nothing here owns a frame stack; native code calls back into Python
//! through [`object::CallContext`].
pub(crate) mod callable;
pub(crate) mod class;
pub(crate) mod compare;
pub(crate) mod dict;
pub(crate) mod error;
pub mod exception;
pub(crate) mod format;
pub(crate) mod int;
pub(crate) mod iter;
pub(crate) mod list;
pub(crate) mod module;
pub mod object;
pub(crate) mod set;
pub(crate) mod string;
pub mod types;
pub mod value;

pub use class::{InstanceObject, TypeObject};
pub use exception::{ExceptionKind, PyException, PyResult, TraceEntry};
pub use object::CallContext;
pub use types::BuiltinTypes;
pub use value::{Kwargs, Value};
