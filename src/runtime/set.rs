//! `set` and `frozenset`, stored as a dict table with `None` values.
use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::Operator;
use crate::runtime::dict::{DictObject, find_candidate};
use crate::runtime::error::{check_arity, check_method_arity, reject_kwargs};
use crate::runtime::exception::{ExceptionKind, PyException, PyResult};
use crate::runtime::object::{CallContext, Iterable, hash_value};
use crate::runtime::value::{Kwargs, Value};

#[derive(Debug, Clone, Default)]
pub struct SetObject {
    table: DictObject,
}

impl SetObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a fresh set; nothing else can observe it while it fills.
    pub fn from_values(cx: &mut dyn CallContext, values: Vec<Value>) -> PyResult<Self> {
        let mut set = Self::new();
        for value in values {
            set.insert(cx, value)?;
        }
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn items(&self) -> Vec<Value> {
        self.table.keys()
    }

    fn find(&self, cx: &mut dyn CallContext, item: &Value) -> PyResult<(i64, Option<usize>)> {
        let hash = hash_value(cx, item)?;
        let index = find_candidate(cx, self.table.candidates(hash), item)?;
        Ok((hash, index))
    }

    pub fn contains(&self, cx: &mut dyn CallContext, item: &Value) -> PyResult<bool> {
        Ok(self.find(cx, item)?.1.is_some())
    }

    pub fn insert(&mut self, cx: &mut dyn CallContext, item: Value) -> PyResult<()> {
        if let (hash, None) = self.find(cx, &item)? {
            self.table.insert_new(hash, item, Value::None);
        }
        Ok(())
    }

    /// XOR of member hashes, so equal sets hash alike regardless of order.
    pub fn order_independent_hash(&self) -> PyResult<i64> {
        Ok(self
            .table
            .hashes()
            .fold(self.len() as i64 * 0x9e37_79b9, |acc, hash| acc ^ hash.rotate_left(17)))
    }
}

pub fn set_contains(cx: &mut dyn CallContext, set: &RefCell<SetObject>, item: &Value) -> PyResult<bool> {
    let hash = hash_value(cx, item)?;
    let candidates = set.borrow().table.candidates(hash);
    Ok(find_candidate(cx, candidates, item)?.is_some())
}

pub fn set_add(cx: &mut dyn CallContext, set: &RefCell<SetObject>, item: Value) -> PyResult<()> {
    let hash = hash_value(cx, &item)?;
    let candidates = set.borrow().table.candidates(hash);
    if find_candidate(cx, candidates, &item)?.is_none() {
        set.borrow_mut().table.insert_new(hash, item, Value::None);
    }
    Ok(())
}

pub fn set_discard(cx: &mut dyn CallContext, set: &RefCell<SetObject>, item: &Value) -> PyResult<bool> {
    let hash = hash_value(cx, item)?;
    let candidates = set.borrow().table.candidates(hash);
    match find_candidate(cx, candidates, item)? {
        Some(index) => Ok(set.borrow_mut().table.remove_at(index).is_some()),
        None => Ok(false),
    }
}

fn snapshot(value: &Value) -> Option<SetObject> {
    match value {
        Value::Set(set) => Some(set.borrow().clone()),
        Value::FrozenSet(set) => Some((**set).clone()),
        _ => None,
    }
}

/// Wraps a result in the receiver's own flavor.
fn same_kind(template: &Value, set: SetObject) -> Value {
    match template {
        Value::FrozenSet(_) => Value::FrozenSet(Rc::new(set)),
        _ => Value::set(set),
    }
}

fn union(cx: &mut dyn CallContext, base: &SetObject, other: Vec<Value>) -> PyResult<SetObject> {
    let mut result = base.clone();
    for item in other {
        result.insert(cx, item)?;
    }
    Ok(result)
}

fn intersection(cx: &mut dyn CallContext, base: &SetObject, other: &SetObject) -> PyResult<SetObject> {
    let mut result = SetObject::new();
    for item in base.items() {
        if other.contains(cx, &item)? {
            result.insert(cx, item)?;
        }
    }
    Ok(result)
}

fn difference(cx: &mut dyn CallContext, base: &SetObject, other: &SetObject) -> PyResult<SetObject> {
    let mut result = SetObject::new();
    for item in base.items() {
        if !other.contains(cx, &item)? {
            result.insert(cx, item)?;
        }
    }
    Ok(result)
}

pub fn is_subset(cx: &mut dyn CallContext, a: &SetObject, b: &SetObject) -> PyResult<bool> {
    if a.len() > b.len() {
        return Ok(false);
    }
    for item in a.items() {
        if !b.contains(cx, &item)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// `|`, `&`, `-`, `^` between set-like operands; `None` when not applicable.
pub fn binary_op(
    cx: &mut dyn CallContext,
    op: Operator,
    left: &Value,
    right: &Value,
) -> PyResult<Option<Value>> {
    let (Some(a), Some(b)) = (snapshot(left), snapshot(right)) else {
        return Ok(None);
    };
    let result = match op {
        Operator::BitOr => union(cx, &a, b.items())?,
        Operator::BitAnd => intersection(cx, &a, &b)?,
        Operator::Sub => difference(cx, &a, &b)?,
        Operator::BitXor => {
            let left_only = difference(cx, &a, &b)?;
            let right_only = difference(cx, &b, &a)?;
            union(cx, &left_only, right_only.items())?
        }
        _ => return Ok(None),
    };
    Ok(Some(same_kind(left, result)))
}

/// Set equality; `None` when either side is not set-like.
pub fn set_eq(cx: &mut dyn CallContext, left: &Value, right: &Value) -> PyResult<Option<bool>> {
    let (Some(a), Some(b)) = (snapshot(left), snapshot(right)) else {
        return Ok(None);
    };
    Ok(Some(a.len() == b.len() && is_subset(cx, &a, &b)?))
}

/// `<=`-family comparisons as subset tests.
pub fn set_compare(
    cx: &mut dyn CallContext,
    left: &Value,
    right: &Value,
    strict: bool,
    reversed: bool,
) -> PyResult<Option<bool>> {
    let (Some(mut a), Some(mut b)) = (snapshot(left), snapshot(right)) else {
        return Ok(None);
    };
    if reversed {
        std::mem::swap(&mut a, &mut b);
    }
    let subset = is_subset(cx, &a, &b)?;
    Ok(Some(subset && (!strict || a.len() < b.len())))
}

fn receiver(args: &[Value], method: &str) -> PyResult<Value> {
    match args.first() {
        Some(value @ (Value::Set(_) | Value::FrozenSet(_))) => Ok(value.clone()),
        Some(other) => Err(PyException::type_error(format!(
            "descriptor '{method}' requires a 'set' object but received a '{}'",
            other.type_name()
        ))),
        None => Err(PyException::type_error(format!(
            "descriptor '{method}' of 'set' object needs an argument"
        ))),
    }
}

fn mutable_receiver(args: &[Value], method: &str) -> PyResult<Rc<RefCell<SetObject>>> {
    match receiver(args, method)? {
        Value::Set(set) => Ok(set),
        other => Err(PyException::attribute_error(format!(
            "'{}' object has no attribute '{method}'",
            other.type_name()
        ))),
    }
}

/// An operand of `union()` and friends: any iterable.
fn operand(cx: &mut dyn CallContext, value: &Value) -> PyResult<SetObject> {
    match snapshot(value) {
        Some(set) => Ok(set),
        None => {
            let items = value.collect(cx)?;
            SetObject::from_values(cx, items)
        }
    }
}

fn add(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("add", &kwargs)?;
    check_method_arity("add", &args, 1, 1)?;
    let set = mutable_receiver(&args, "add")?;
    set_add(cx, &set, args[1].clone())?;
    Ok(Value::None)
}

fn remove(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("remove", &kwargs)?;
    check_method_arity("remove", &args, 1, 1)?;
    let set = mutable_receiver(&args, "remove")?;
    if !set_discard(cx, &set, &args[1])? {
        return Err(PyException::key_error(args[1].clone()));
    }
    Ok(Value::None)
}

fn discard(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("discard", &kwargs)?;
    check_method_arity("discard", &args, 1, 1)?;
    let set = mutable_receiver(&args, "discard")?;
    set_discard(cx, &set, &args[1])?;
    Ok(Value::None)
}

fn pop(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("pop", &kwargs)?;
    check_method_arity("pop", &args, 0, 0)?;
    let set = mutable_receiver(&args, "pop")?;
    let popped = set.borrow_mut().table.pop_last();
    popped
        .map(|(item, _)| item)
        .ok_or_else(|| PyException::new(ExceptionKind::KeyError, "pop from an empty set"))
}

fn union_method(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("union", &kwargs)?;
    let this = receiver(&args, "union")?;
    let mut result = snapshot(&this).unwrap_or_default();
    for other in &args[1..] {
        let items = operand(cx, other)?.items();
        result = union(cx, &result, items)?;
    }
    Ok(same_kind(&this, result))
}

fn intersection_method(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("intersection", &kwargs)?;
    let this = receiver(&args, "intersection")?;
    let mut result = snapshot(&this).unwrap_or_default();
    for other in &args[1..] {
        let other = operand(cx, other)?;
        result = intersection(cx, &result, &other)?;
    }
    Ok(same_kind(&this, result))
}

fn difference_method(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("difference", &kwargs)?;
    let this = receiver(&args, "difference")?;
    let mut result = snapshot(&this).unwrap_or_default();
    for other in &args[1..] {
        let other = operand(cx, other)?;
        result = difference(cx, &result, &other)?;
    }
    Ok(same_kind(&this, result))
}

fn symmetric_difference(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("symmetric_difference", &kwargs)?;
    check_method_arity("symmetric_difference", &args, 1, 1)?;
    let this = receiver(&args, "symmetric_difference")?;
    let other = Value::set(operand(cx, &args[1])?);
    Ok(binary_op(cx, Operator::BitXor, &this, &other)?.unwrap_or(Value::None))
}

fn issubset(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("issubset", &kwargs)?;
    check_method_arity("issubset", &args, 1, 1)?;
    let this = snapshot(&receiver(&args, "issubset")?).unwrap_or_default();
    let other = operand(cx, &args[1])?;
    Ok(Value::Bool(is_subset(cx, &this, &other)?))
}

fn issuperset(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("issuperset", &kwargs)?;
    check_method_arity("issuperset", &args, 1, 1)?;
    let this = snapshot(&receiver(&args, "issuperset")?).unwrap_or_default();
    let other = operand(cx, &args[1])?;
    Ok(Value::Bool(is_subset(cx, &other, &this)?))
}

fn update(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("update", &kwargs)?;
    let set = mutable_receiver(&args, "update")?;
    for other in &args[1..] {
        for item in other.collect(cx)? {
            set_add(cx, &set, item)?;
        }
    }
    Ok(Value::None)
}

fn copy(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("copy", &kwargs)?;
    check_method_arity("copy", &args, 0, 0)?;
    let this = receiver(&args, "copy")?;
    Ok(same_kind(&this, snapshot(&this).unwrap_or_default()))
}

fn clear(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("clear", &kwargs)?;
    check_method_arity("clear", &args, 0, 0)?;
    mutable_receiver(&args, "clear")?.borrow_mut().table.clear();
    Ok(Value::None)
}

/// `set(iterable=())`.
pub fn set_new(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("set", &kwargs)?;
    check_arity("set", args.len(), 0, 1)?;
    let items = match args.first() {
        Some(iterable) => iterable.collect(cx)?,
        None => Vec::new(),
    };
    Ok(Value::set(SetObject::from_values(cx, items)?))
}

/// `frozenset(iterable=())`.
pub fn frozenset_new(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("frozenset", &kwargs)?;
    check_arity("frozenset", args.len(), 0, 1)?;
    match args.first() {
        Some(frozen @ Value::FrozenSet(_)) => Ok(frozen.clone()),
        Some(iterable) => {
            let items = iterable.collect(cx)?;
            Ok(Value::FrozenSet(Rc::new(SetObject::from_values(cx, items)?)))
        }
        None => Ok(Value::FrozenSet(Rc::new(SetObject::new()))),
    }
}

pub(crate) const METHODS: &[(&str, crate::runtime::callable::NativeFn)] = &[
    ("add", add),
    ("remove", remove),
    ("discard", discard),
    ("pop", pop),
    ("union", union_method),
    ("intersection", intersection_method),
    ("difference", difference_method),
    ("symmetric_difference", symmetric_difference),
    ("issubset", issubset),
    ("issuperset", issuperset),
    ("update", update),
    ("copy", copy),
    ("clear", clear),
];

/// The read-only subset shared with `frozenset`.
pub(crate) const FROZEN_METHODS: &[&str] = &[
    "union",
    "intersection",
    "difference",
    "symmetric_difference",
    "issubset",
    "issuperset",
    "copy",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::tests::NoCalls;

    fn ints(cx: &mut NoCalls, values: &[i64]) -> Value {
        let items = values.iter().map(|&v| Value::Int(v)).collect();
        Value::set(SetObject::from_values(cx, items).expect("set"))
    }

    #[test]
    fn deduplicates_across_numeric_types() {
        let mut cx = NoCalls::new();
        let set = SetObject::from_values(
            &mut cx,
            vec![Value::Int(1), Value::Bool(true), Value::Float(1.0), Value::Int(2)],
        )
        .expect("set");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn operators_follow_set_algebra() {
        let mut cx = NoCalls::new();
        let a = ints(&mut cx, &[1, 2, 3]);
        let b = ints(&mut cx, &[2, 3, 4]);
        let render = |value: Option<Value>| value.expect("applies").basic_repr();
        assert_eq!(render(binary_op(&mut cx, Operator::BitOr, &a, &b).unwrap()), "{1, 2, 3, 4}");
        assert_eq!(render(binary_op(&mut cx, Operator::BitAnd, &a, &b).unwrap()), "{2, 3}");
        assert_eq!(render(binary_op(&mut cx, Operator::Sub, &a, &b).unwrap()), "{1}");
        assert_eq!(render(binary_op(&mut cx, Operator::BitXor, &a, &b).unwrap()), "{1, 4}");
        let two = ints(&mut cx, &[2]);
        assert_eq!(set_compare(&mut cx, &two, &a, true, false).unwrap(), Some(true));
    }

    #[test]
    fn remove_missing_is_key_error() {
        let mut cx = NoCalls::new();
        let set = ints(&mut cx, &[1]);
        let err = remove(&mut cx, vec![set.clone(), Value::Int(5)], Vec::new()).unwrap_err();
        assert_eq!(err.summary(), "KeyError: 5");
        discard(&mut cx, vec![set.clone(), Value::Int(1)], Vec::new()).unwrap();
        assert_eq!(set.basic_repr(), "set()");
    }
}
