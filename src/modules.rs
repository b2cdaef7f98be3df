//! Modules that exist without a source file.

use crate::runtime::object::CallContext;
use crate::runtime::value::Value;

mod math;
mod random;
mod sys;
mod time;

/// `Some(module)` when `name` is a built-in module.
pub(crate) fn load(cx: &dyn CallContext, name: &str) -> Option<Value> {
    let module = match name {
        "math" => math::module(),
        "random" => random::module(),
        "sys" => sys::module(cx),
        "time" => time::module(),
        _ => return None,
    };
    Some(module.into_value())
}

/// Names importable without touching the host.
pub(crate) const NAMES: &[&str] = &["math", "random", "sys", "time"];
