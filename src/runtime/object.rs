//! Object protocols shared by every runtime value.
//!
//! Native code reaches back into the interpreter only through
//! [`CallContext`]; the capability traits (`HasAttr`, `Callable`, `Iterable`,
//! `Sequence`) dispatch on the `Value` tag and fall back to dunder methods for
//! instances of user classes.

use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::time::Duration;

use rand::rngs::StdRng;
use rustc_hash::FxHasher;

use crate::config::DivisionPolicy;
use crate::num::BigInt;
use crate::runtime::class;
use crate::runtime::compare::{self, CompareOp};
use crate::runtime::dict::{dict_contains, dict_get_item, dict_remove, dict_set};
use crate::runtime::exception::{ExceptionKind, PyException, PyResult};
use crate::runtime::format;
use crate::runtime::iter::{self, IteratorObject};
use crate::runtime::list;
use crate::runtime::string;
use crate::runtime::types::BuiltinTypes;
use crate::runtime::value::{DictRef, Kwargs, Value};

/// The interpreter services native code may use.
pub trait CallContext {
    fn types(&self) -> Rc<BuiltinTypes>;

    /// Calls any callable and runs it to completion. Blocking requests made
    /// underneath are served synchronously.
    fn call(&mut self, callee: &Value, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value>;

    fn division(&self) -> DivisionPolicy;

    fn write_output(&mut self, text: &str) -> PyResult<()>;

    fn rng(&mut self) -> &mut StdRng;

    fn recursion_limit(&self) -> usize;

    fn set_recursion_limit(&mut self, limit: usize);

    /// Time since the engine was created.
    fn elapsed(&self) -> Duration;

    /// The module registry, exposed to scripts as `sys.modules`.
    fn modules(&self) -> DictRef;

    fn search_paths(&self) -> Vec<String>;
}

pub trait HasAttr {
    fn get_attr(&self, cx: &mut dyn CallContext, name: &str) -> PyResult<Value>;

    /// Like `get_attr`, but a missing attribute is `Ok(None)`.
    fn lookup_attr(&self, cx: &mut dyn CallContext, name: &str) -> PyResult<Option<Value>> {
        match self.get_attr(cx, name) {
            Ok(value) => Ok(Some(value)),
            Err(error) if error.is(ExceptionKind::AttributeError) => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn set_attr(&self, cx: &mut dyn CallContext, name: &str, value: Value) -> PyResult<()>;

    fn del_attr(&self, cx: &mut dyn CallContext, name: &str) -> PyResult<()>;
}

pub trait Callable {
    fn is_callable(&self) -> bool;

    fn call(&self, cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value>;
}

pub trait Iterable {
    /// `iter(x)`.
    fn iter(&self, cx: &mut dyn CallContext) -> PyResult<Value>;

    /// Advances an iterator; `None` once exhausted.
    fn next(&self, cx: &mut dyn CallContext) -> PyResult<Option<Value>>;

    /// Drains `iter(x)` into a vector.
    fn collect(&self, cx: &mut dyn CallContext) -> PyResult<Vec<Value>>;
}

pub trait Sequence {
    fn len(&self, cx: &mut dyn CallContext) -> PyResult<usize>;

    fn get_item(&self, cx: &mut dyn CallContext, key: &Value) -> PyResult<Value>;

    fn set_item(&self, cx: &mut dyn CallContext, key: Value, value: Value) -> PyResult<()>;

    fn del_item(&self, cx: &mut dyn CallContext, key: &Value) -> PyResult<()>;

    fn contains(&self, cx: &mut dyn CallContext, item: &Value) -> PyResult<bool>;
}

impl HasAttr for Value {
    fn get_attr(&self, cx: &mut dyn CallContext, name: &str) -> PyResult<Value> {
        class::get_attribute(cx, self, name)
    }

    fn set_attr(&self, cx: &mut dyn CallContext, name: &str, value: Value) -> PyResult<()> {
        class::set_attribute(cx, self, name, Some(value))
    }

    fn del_attr(&self, cx: &mut dyn CallContext, name: &str) -> PyResult<()> {
        class::set_attribute(cx, self, name, None)
    }
}

impl Callable for Value {
    fn is_callable(&self) -> bool {
        match self {
            Value::Function(_)
            | Value::Builtin(_)
            | Value::Method(_)
            | Value::Type(_)
            | Value::ClassMethod(_)
            | Value::StaticMethod(_) => true,
            Value::Instance(instance) => instance.class.lookup("__call__").is_some(),
            _ => false,
        }
    }

    fn call(&self, cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
        cx.call(self, args, kwargs)
    }
}

impl Iterable for Value {
    fn iter(&self, cx: &mut dyn CallContext) -> PyResult<Value> {
        let kind = match self {
            Value::Generator(_) | Value::Iterator(_) => return Ok(self.clone()),
            Value::List(items) => iter::IterKind::List {
                items: items.clone(),
                index: 0,
            },
            Value::Tuple(items) => iter::IterKind::Tuple {
                items: items.clone(),
                index: 0,
            },
            Value::Str(text) => iter::IterKind::Str {
                text: text.clone(),
                offset: 0,
            },
            Value::Range(range) => iter::IterKind::Range {
                range: **range,
                index: 0,
            },
            Value::Dict(dict) => iter::IterKind::Dict {
                dict: dict.clone(),
                kind: crate::runtime::dict::ViewKind::Keys,
                slot: 0,
                len: dict.borrow().len(),
            },
            Value::DictView(view) => iter::IterKind::Dict {
                dict: view.dict.clone(),
                kind: view.kind,
                slot: 0,
                len: view.len(),
            },
            Value::Set(set) => iter::IterKind::Snapshot {
                items: set.borrow().items().into(),
                index: 0,
                name: "set_iterator",
            },
            Value::FrozenSet(set) => iter::IterKind::Snapshot {
                items: set.items().into(),
                index: 0,
                name: "set_iterator",
            },
            Value::Instance(_) => {
                if let Some(iterator) = call_method(cx, self, "__iter__", Vec::new())? {
                    return Ok(iterator);
                }
                if class::lookup_special(self, "__getitem__").is_some() {
                    iter::IterKind::GetItem {
                        target: self.clone(),
                        index: 0,
                    }
                } else {
                    return Err(not_iterable(self));
                }
            }
            other => return Err(not_iterable(other)),
        };
        Ok(IteratorObject::new(kind).into_value())
    }

    fn next(&self, cx: &mut dyn CallContext) -> PyResult<Option<Value>> {
        match self {
            Value::Iterator(iterator) => IteratorObject::advance(iterator, cx),
            Value::Generator(_) => {
                let next = generator_next(cx, self)?;
                match cx.call(&next, Vec::new(), Vec::new()) {
                    Ok(value) => Ok(Some(value)),
                    Err(error) if error.is(ExceptionKind::StopIteration) => Ok(None),
                    Err(error) => Err(error),
                }
            }
            Value::Instance(_) => match call_method(cx, self, "__next__", Vec::new()) {
                Ok(Some(value)) => Ok(Some(value)),
                Ok(None) => Err(PyException::type_error(format!(
                    "'{}' object is not an iterator",
                    self.type_name()
                ))),
                Err(error) if error.is(ExceptionKind::StopIteration) => Ok(None),
                Err(error) => Err(error),
            },
            other => Err(PyException::type_error(format!(
                "'{}' object is not an iterator",
                other.type_name()
            ))),
        }
    }

    fn collect(&self, cx: &mut dyn CallContext) -> PyResult<Vec<Value>> {
        match self {
            Value::List(items) => return Ok(items.borrow().clone()),
            Value::Tuple(items) => return Ok(items.to_vec()),
            _ => {}
        }
        let iterator = self.iter(cx)?;
        let mut items = Vec::new();
        while let Some(item) = iterator.next(cx)? {
            items.push(item);
        }
        Ok(items)
    }
}

fn generator_next(cx: &mut dyn CallContext, generator: &Value) -> PyResult<Value> {
    generator.get_attr(cx, "__next__")
}

fn not_iterable(value: &Value) -> PyException {
    PyException::type_error(format!("'{}' object is not iterable", value.type_name()))
}

impl Sequence for Value {
    fn len(&self, cx: &mut dyn CallContext) -> PyResult<usize> {
        Ok(match self {
            Value::Str(text) => text.chars().count(),
            Value::List(items) => items.borrow().len(),
            Value::Tuple(items) => items.len(),
            Value::Dict(dict) => dict.borrow().len(),
            Value::Set(set) => set.borrow().len(),
            Value::FrozenSet(set) => set.len(),
            Value::Range(range) => range.len(),
            Value::DictView(view) => view.len(),
            Value::Instance(_) => {
                let Some(result) = call_method(cx, self, "__len__", Vec::new())? else {
                    return Err(no_len(self));
                };
                match result.as_i64() {
                    Some(len) if len >= 0 => len as usize,
                    Some(_) => return Err(PyException::value_error("__len__() should return >= 0")),
                    None => {
                        return Err(PyException::type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            result.type_name()
                        )));
                    }
                }
            }
            other => return Err(no_len(other)),
        })
    }

    fn get_item(&self, cx: &mut dyn CallContext, key: &Value) -> PyResult<Value> {
        match self {
            Value::List(items) => list::get_item(&items.borrow(), key, "list", Value::list),
            Value::Tuple(items) => list::get_item(items, key, "tuple", Value::tuple),
            Value::Str(text) => string::get_item(text, key),
            Value::Range(range) => list::range_get_item(range, key),
            Value::Dict(dict) => dict_get_item(cx, dict, key),
            Value::Instance(_) => call_method(cx, self, "__getitem__", vec![key.clone()])?
                .ok_or_else(|| not_subscriptable(self)),
            other => Err(not_subscriptable(other)),
        }
    }

    fn set_item(&self, cx: &mut dyn CallContext, key: Value, value: Value) -> PyResult<()> {
        match self {
            Value::List(items) => list::set_item(cx, items, &key, value),
            Value::Dict(dict) => dict_set(cx, dict, key, value),
            Value::Instance(_) => call_method(cx, self, "__setitem__", vec![key, value])?
                .map(drop)
                .ok_or_else(|| no_item_assignment(self)),
            other => Err(no_item_assignment(other)),
        }
    }

    fn del_item(&self, cx: &mut dyn CallContext, key: &Value) -> PyResult<()> {
        match self {
            Value::List(items) => list::del_item(items, key),
            Value::Dict(dict) => dict_remove(cx, dict, key)?
                .map(drop)
                .ok_or_else(|| PyException::key_error(key.clone())),
            Value::Instance(_) => call_method(cx, self, "__delitem__", vec![key.clone()])?
                .map(drop)
                .ok_or_else(|| {
                    PyException::type_error(format!(
                        "'{}' object doesn't support item deletion",
                        self.type_name()
                    ))
                }),
            other => Err(PyException::type_error(format!(
                "'{}' object doesn't support item deletion",
                other.type_name()
            ))),
        }
    }

    fn contains(&self, cx: &mut dyn CallContext, item: &Value) -> PyResult<bool> {
        match self {
            Value::Str(text) => match item {
                Value::Str(needle) => Ok(text.contains(&**needle)),
                other => Err(PyException::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ))),
            },
            Value::Dict(dict) => dict_contains(cx, dict, item),
            Value::DictView(view) if view.kind == crate::runtime::dict::ViewKind::Keys => {
                dict_contains(cx, &view.dict, item)
            }
            Value::Set(set) => crate::runtime::set::set_contains(cx, set, item),
            Value::FrozenSet(set) => set.contains(cx, item),
            Value::Range(range) => Ok(match item {
                Value::Int(_) | Value::Bool(_) => range.contains(item.as_i64().unwrap_or_default()),
                _ => false,
            }),
            Value::Instance(_) => {
                if let Some(result) = call_method(cx, self, "__contains__", vec![item.clone()])? {
                    return truthy(cx, &result);
                }
                contains_by_iteration(cx, self, item)
            }
            _ => contains_by_iteration(cx, self, item),
        }
    }
}

fn contains_by_iteration(cx: &mut dyn CallContext, container: &Value, item: &Value) -> PyResult<bool> {
    let iterator = container.iter(cx)?;
    while let Some(candidate) = iterator.next(cx)? {
        if candidate.is(item) || values_equal(cx, &candidate, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn no_len(value: &Value) -> PyException {
    PyException::type_error(format!("object of type '{}' has no len()", value.type_name()))
}

fn not_subscriptable(value: &Value) -> PyException {
    PyException::type_error(format!("'{}' object is not subscriptable", value.type_name()))
}

fn no_item_assignment(value: &Value) -> PyException {
    PyException::type_error(format!(
        "'{}' object does not support item assignment",
        value.type_name()
    ))
}

/// Looks `name` up on the value's class (not the instance), binds it and
/// calls it. `Ok(None)` when the class does not define it.
pub fn call_method(
    cx: &mut dyn CallContext,
    receiver: &Value,
    name: &str,
    args: Vec<Value>,
) -> PyResult<Option<Value>> {
    let Some(method) = class::lookup_special(receiver, name) else {
        return Ok(None);
    };
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push(receiver.clone());
    full.extend(args);
    match method {
        Value::StaticMethod(inner) => cx.call(&inner, full.split_off(1), Vec::new()).map(Some),
        Value::None => Ok(None),
        method => cx.call(&method, full, Vec::new()).map(Some),
    }
}

pub fn truthy(cx: &mut dyn CallContext, value: &Value) -> PyResult<bool> {
    if let Some(result) = value.native_truthy() {
        return Ok(result);
    }
    if let Some(result) = call_method(cx, value, "__bool__", Vec::new())? {
        return match result {
            Value::Bool(flag) => Ok(flag),
            other => Err(PyException::type_error(format!(
                "__bool__ should return bool, returned {}",
                other.type_name()
            ))),
        };
    }
    if class::lookup_special(value, "__len__").is_some() {
        return Ok(value.len(cx)? != 0);
    }
    Ok(true)
}

pub fn repr(cx: &mut dyn CallContext, value: &Value) -> PyResult<String> {
    format::repr(Some(cx), value)
}

/// `str(x)`.
pub fn str_of(cx: &mut dyn CallContext, value: &Value) -> PyResult<String> {
    match value {
        Value::Str(text) => Ok(text.to_string()),
        Value::Instance(_) => match call_method(cx, value, "__str__", Vec::new())? {
            Some(Value::Str(text)) => Ok(text.to_string()),
            Some(other) => Err(PyException::type_error(format!(
                "__str__ returned non-string (type {})",
                other.type_name()
            ))),
            None => repr(cx, value),
        },
        other => repr(cx, other),
    }
}

pub fn str_hash(text: &str) -> i64 {
    let mut hasher = FxHasher::default();
    text.hash(&mut hasher);
    hasher.finish() as i64
}

fn big_hash(value: &BigInt) -> i64 {
    str_hash(&value.to_str_radix(16))
}

/// Hash of values that never run user code. `Ok(None)` means the value
/// needs `__hash__`.
pub fn native_hash(value: &Value) -> PyResult<Option<i64>> {
    Ok(Some(match value {
        Value::None => 0x10,
        Value::Bool(flag) => *flag as i64,
        Value::Int(int) => *int,
        Value::Big(big) => big_hash(big),
        Value::Float(float) => {
            if float.fract() == 0.0 && float.is_finite() {
                if *float >= i64::MIN as f64 && *float < i64::MAX as f64 {
                    *float as i64
                } else {
                    BigInt::from_f64(*float).map_or(0, |big| big_hash(&big))
                }
            } else {
                float.to_bits() as i64
            }
        }
        Value::Str(text) => str_hash(text),
        Value::Tuple(items) => {
            let mut hasher = FxHasher::default();
            items.len().hash(&mut hasher);
            for item in items.iter() {
                match native_hash(item)? {
                    Some(hash) => hash.hash(&mut hasher),
                    None => return Ok(None),
                }
            }
            hasher.finish() as i64
        }
        Value::FrozenSet(set) => set.order_independent_hash()?,
        Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::DictView(_) | Value::Slice(_) => {
            return Err(unhashable(value));
        }
        Value::Instance(_) => return Ok(None),
        other => other.identity() as i64,
    }))
}

pub fn unhashable(value: &Value) -> PyException {
    PyException::type_error(format!("unhashable type: '{}'", value.type_name()))
}

pub fn hash_value(cx: &mut dyn CallContext, value: &Value) -> PyResult<i64> {
    if let Some(hash) = native_hash(value)? {
        return Ok(hash);
    }
    if let Value::Tuple(items) = value {
        let mut hasher = FxHasher::default();
        items.len().hash(&mut hasher);
        for item in items.iter() {
            hash_value(cx, item)?.hash(&mut hasher);
        }
        return Ok(hasher.finish() as i64);
    }
    match class::lookup_special(value, "__hash__") {
        Some(Value::None) => Err(unhashable(value)),
        Some(_) => match call_method(cx, value, "__hash__", Vec::new())? {
            Some(Value::Int(hash)) => Ok(hash),
            Some(Value::Bool(flag)) => Ok(flag as i64),
            Some(Value::Big(big)) => Ok(big_hash(&big)),
            _ => Err(PyException::type_error("__hash__ method should return an integer")),
        },
        None => Ok(value.identity() as i64),
    }
}

/// Equality of values that never run user code. `None` means the answer
/// needs the full comparison protocol.
pub fn native_eq(a: &Value, b: &Value) -> Option<bool> {
    if let Some(result) = compare::numeric_eq(a, b) {
        return Some(result);
    }
    match (a, b) {
        (Value::Str(a), Value::Str(b)) => Some(a == b),
        (Value::Tuple(a), Value::Tuple(b)) => sequence_eq(a, b),
        (Value::List(a), Value::List(b)) => {
            if Rc::ptr_eq(a, b) {
                return Some(true);
            }
            sequence_eq(&a.borrow(), &b.borrow())
        }
        (Value::Instance(_), _) | (_, Value::Instance(_)) => None,
        (Value::Dict(_), Value::Dict(_))
        | (Value::Set(_) | Value::FrozenSet(_), Value::Set(_) | Value::FrozenSet(_))
        | (Value::DictView(_), Value::DictView(_)) => None,
        (Value::Range(a), Value::Range(b)) => Some(a.len() == b.len() && (a.is_empty() || (a.start == b.start && (a.len() == 1 || a.step == b.step)))),
        _ => Some(a.is(b)),
    }
}

fn sequence_eq(a: &[Value], b: &[Value]) -> Option<bool> {
    if a.len() != b.len() {
        return Some(false);
    }
    for (left, right) in a.iter().zip(b) {
        if left.is(right) {
            continue;
        }
        if !native_eq(left, right)? {
            return Some(false);
        }
    }
    Some(true)
}

/// `a == b`, with identity short-circuiting as containers do.
pub fn values_equal(cx: &mut dyn CallContext, a: &Value, b: &Value) -> PyResult<bool> {
    if let Some(result) = native_eq(a, b) {
        return Ok(result);
    }
    let result = compare::compare(cx, a, b, CompareOp::Eq)?;
    truthy(cx, &result)
}

/// `isinstance(value, class)` for a single class.
pub fn is_instance(types: &BuiltinTypes, value: &Value, class: &Rc<class::TypeObject>) -> bool {
    types.type_of(value).is_subtype(class)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Instant;

    use rand::SeedableRng;

    use super::*;
    use crate::runtime::dict::new_dict;

    /// A context for native-only tests; any call back into Python panics.
    pub(crate) struct NoCalls {
        types: Rc<BuiltinTypes>,
        rng: StdRng,
        started: Instant,
        pub(crate) output: String,
    }

    impl NoCalls {
        pub(crate) fn new() -> Self {
            Self {
                types: Rc::new(BuiltinTypes::new()),
                rng: StdRng::seed_from_u64(7),
                started: Instant::now(),
                output: String::new(),
            }
        }
    }

    impl CallContext for NoCalls {
        fn types(&self) -> Rc<BuiltinTypes> {
            self.types.clone()
        }

        fn call(&mut self, callee: &Value, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
            match callee {
                Value::Builtin(builtin) => builtin.call_native(self, args, kwargs),
                other => panic!("unexpected call to {other:?} in native test"),
            }
        }

        fn division(&self) -> DivisionPolicy {
            DivisionPolicy::True
        }

        fn write_output(&mut self, text: &str) -> PyResult<()> {
            self.output.push_str(text);
            Ok(())
        }

        fn rng(&mut self) -> &mut StdRng {
            &mut self.rng
        }

        fn recursion_limit(&self) -> usize {
            1000
        }

        fn set_recursion_limit(&mut self, _limit: usize) {}

        fn elapsed(&self) -> Duration {
            self.started.elapsed()
        }

        fn modules(&self) -> DictRef {
            new_dict()
        }

        fn search_paths(&self) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn numeric_hashes_agree_across_types() {
        let one = native_hash(&Value::Int(1)).unwrap();
        assert_eq!(native_hash(&Value::Bool(true)).unwrap(), one);
        assert_eq!(native_hash(&Value::Float(1.0)).unwrap(), one);
        let big = Value::from_i128(1 << 80);
        assert_eq!(
            native_hash(&big).unwrap(),
            native_hash(&Value::Float((1u128 << 80) as f64)).unwrap()
        );
    }

    #[test]
    fn equality_and_truthiness() {
        let mut cx = NoCalls::new();
        let a = Value::tuple(vec![Value::Int(1), Value::from("x")]);
        let b = Value::tuple(vec![Value::Float(1.0), Value::from("x")]);
        assert!(values_equal(&mut cx, &a, &b).unwrap());
        assert!(!truthy(&mut cx, &Value::list(vec![])).unwrap());
        assert!(truthy(&mut cx, &Value::from("0")).unwrap());
    }

    #[test]
    fn sequence_protocol_on_builtins() {
        let mut cx = NoCalls::new();
        let items = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(items.len(&mut cx).unwrap(), 3);
        assert!(items.contains(&mut cx, &Value::Int(2)).unwrap());
        assert_eq!(items.get_item(&mut cx, &Value::Int(-1)).unwrap().basic_repr(), "3");
        let err = Value::Int(5).get_item(&mut cx, &Value::Int(0)).unwrap_err();
        assert_eq!(err.summary(), "TypeError: 'int' object is not subscriptable");
        let collected = Value::from("héllo").collect(&mut cx).unwrap();
        assert_eq!(collected.len(), 5);
    }
}
