//! Lists, tuples and ranges: indexing, slicing and their methods.

use std::rc::Rc;

use crate::runtime::callable::NativeFn;
use crate::runtime::compare::less_than;
use crate::runtime::error::{check_arity, check_method_arity, finish_kwargs, reject_kwargs, take_kwarg};
use crate::runtime::exception::{PyException, PyResult};
use crate::runtime::object::{CallContext, Iterable, truthy, values_equal};
use crate::runtime::value::{Kwargs, ListRef, RangeObject, SliceObject, Value};

/// Maps a possibly negative index into `0..len`.
pub fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    (0..len as i64).contains(&resolved).then_some(resolved as usize)
}

fn slice_bound(value: &Value) -> PyResult<Option<i64>> {
    match value {
        Value::None => Ok(None),
        Value::Bool(_) | Value::Int(_) => Ok(value.as_i64()),
        Value::Big(big) => Ok(Some(if big.is_negative() { i64::MIN } else { i64::MAX })),
        _ => Err(PyException::type_error(
            "slice indices must be integers or None or have an __index__ method",
        )),
    }
}

/// Resolves a slice against a sequence length into `(start, stop, step)`.
pub fn slice_indices(slice: &SliceObject, len: usize) -> PyResult<(i64, i64, i64)> {
    let step = slice_bound(&slice.step)?.unwrap_or(1);
    if step == 0 {
        return Err(PyException::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let clamp = |bound: Option<i64>, default: i64| -> i64 {
        match bound {
            None => default,
            Some(value) if value < 0 => {
                let shifted = value.saturating_add(len);
                if shifted < 0 {
                    if step < 0 { -1 } else { 0 }
                } else {
                    shifted
                }
            }
            Some(value) if value >= len => {
                if step < 0 {
                    len - 1
                } else {
                    len
                }
            }
            Some(value) => value,
        }
    };
    let (default_start, default_stop) = if step < 0 { (len - 1, -1) } else { (0, len) };
    Ok((
        clamp(slice_bound(&slice.start)?, default_start),
        clamp(slice_bound(&slice.stop)?, default_stop),
        step,
    ))
}

/// The indices a resolved slice visits, in order.
pub fn slice_positions(start: i64, stop: i64, step: i64) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut at = start;
    while (step > 0 && at < stop) || (step < 0 && at > stop) {
        positions.push(at as usize);
        at += step;
    }
    positions
}

pub fn get_item(items: &[Value], key: &Value, name: &str, build: fn(Vec<Value>) -> Value) -> PyResult<Value> {
    if let Value::Slice(slice) = key {
        let (start, stop, step) = slice_indices(slice, items.len())?;
        let picked = slice_positions(start, stop, step)
            .into_iter()
            .map(|index| items[index].clone())
            .collect();
        return Ok(build(picked));
    }
    let index = key.expect_index(&format!("{name} indices"))?;
    normalize_index(index, items.len())
        .map(|index| items[index].clone())
        .ok_or_else(|| PyException::index_error(format!("{name} index out of range")))
}

pub fn range_get_item(range: &RangeObject, key: &Value) -> PyResult<Value> {
    if let Value::Slice(slice) = key {
        let (start, stop, step) = slice_indices(slice, range.len())?;
        return Ok(Value::range(
            range.start + start * range.step,
            range.start + stop * range.step,
            range.step * step,
        ));
    }
    let index = key.expect_index("range indices")?;
    normalize_index(index, range.len())
        .and_then(|index| range.get(index))
        .map(Value::Int)
        .ok_or_else(|| PyException::index_error("range object index out of range"))
}

pub fn set_item(cx: &mut dyn CallContext, items: &ListRef, key: &Value, value: Value) -> PyResult<()> {
    let Value::Slice(slice) = key else {
        let index = key.expect_index("list indices")?;
        let len = items.borrow().len();
        let index = normalize_index(index, len)
            .ok_or_else(|| PyException::index_error("list assignment index out of range"))?;
        items.borrow_mut()[index] = value;
        return Ok(());
    };
    let replacement = value.collect(cx)?;
    let len = items.borrow().len();
    let (start, stop, step) = slice_indices(slice, len)?;
    if step == 1 {
        let start = start as usize;
        let stop = (stop.max(start as i64)) as usize;
        items.borrow_mut().splice(start..stop, replacement);
        return Ok(());
    }
    let positions = slice_positions(start, stop, step);
    if positions.len() != replacement.len() {
        return Err(PyException::value_error(format!(
            "attempt to assign sequence of size {} to extended slice of size {}",
            replacement.len(),
            positions.len()
        )));
    }
    let mut items = items.borrow_mut();
    for (index, item) in positions.into_iter().zip(replacement) {
        items[index] = item;
    }
    Ok(())
}

pub fn del_item(items: &ListRef, key: &Value) -> PyResult<()> {
    let Value::Slice(slice) = key else {
        let index = key.expect_index("list indices")?;
        let len = items.borrow().len();
        let index = normalize_index(index, len)
            .ok_or_else(|| PyException::index_error("list assignment index out of range"))?;
        items.borrow_mut().remove(index);
        return Ok(());
    };
    let len = items.borrow().len();
    let (start, stop, step) = slice_indices(slice, len)?;
    let mut positions = slice_positions(start, stop, step);
    positions.sort_unstable();
    let mut items = items.borrow_mut();
    for index in positions.into_iter().rev() {
        items.remove(index);
    }
    Ok(())
}

/// Stable merge sort whose comparisons may run user code.
pub fn sort_values(
    cx: &mut dyn CallContext,
    values: Vec<Value>,
    key: Option<&Value>,
    reverse: bool,
) -> PyResult<Vec<Value>> {
    let mut keyed = Vec::with_capacity(values.len());
    for value in values {
        let sort_key = match key {
            Some(function) if !function.is_none() => cx.call(function, vec![value.clone()], Vec::new())?,
            _ => value.clone(),
        };
        keyed.push((sort_key, value));
    }
    let sorted = merge_sort(cx, keyed, reverse)?;
    Ok(sorted.into_iter().map(|(_, value)| value).collect())
}

fn merge_sort(cx: &mut dyn CallContext, mut items: Vec<(Value, Value)>, reverse: bool) -> PyResult<Vec<(Value, Value)>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(cx, items, reverse)?;
    let right = merge_sort(cx, right, reverse)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    while let (Some(a), Some(b)) = (left.peek(), right.peek()) {
        let take_right = if reverse {
            less_than(cx, &a.0, &b.0)?
        } else {
            less_than(cx, &b.0, &a.0)?
        };
        let next = if take_right { right.next() } else { left.next() };
        merged.extend(next);
    }
    merged.extend(left);
    merged.extend(right);
    Ok(merged)
}

fn receiver_list(args: &[Value], method: &str) -> PyResult<ListRef> {
    match args.first() {
        Some(Value::List(items)) => Ok(items.clone()),
        other => Err(PyException::type_error(format!(
            "descriptor '{method}' requires a 'list' object but received a '{}'",
            other.map(Value::type_name).unwrap_or_else(|| "nothing".to_string())
        ))),
    }
}

fn receiver_items(args: &[Value], method: &str) -> PyResult<Vec<Value>> {
    match args.first() {
        Some(Value::List(items)) => Ok(items.borrow().clone()),
        Some(Value::Tuple(items)) => Ok(items.to_vec()),
        other => Err(PyException::type_error(format!(
            "descriptor '{method}' requires a sequence but received a '{}'",
            other.map(Value::type_name).unwrap_or_else(|| "nothing".to_string())
        ))),
    }
}

fn append(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("append", &kwargs)?;
    check_method_arity("append", &args, 1, 1)?;
    receiver_list(&args, "append")?.borrow_mut().push(args[1].clone());
    Ok(Value::None)
}

fn extend(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("extend", &kwargs)?;
    check_method_arity("extend", &args, 1, 1)?;
    let items = receiver_list(&args, "extend")?;
    let extra = args[1].collect(cx)?;
    items.borrow_mut().extend(extra);
    Ok(Value::None)
}

fn insert(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("insert", &kwargs)?;
    check_method_arity("insert", &args, 2, 2)?;
    let items = receiver_list(&args, "insert")?;
    let index = args[1].expect_index("list indices")?;
    let mut items = items.borrow_mut();
    let len = items.len() as i64;
    let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
    items.insert(at as usize, args[2].clone());
    Ok(Value::None)
}

fn pop(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("pop", &kwargs)?;
    check_method_arity("pop", &args, 0, 1)?;
    let items = receiver_list(&args, "pop")?;
    let mut items = items.borrow_mut();
    if items.is_empty() {
        return Err(PyException::index_error("pop from empty list"));
    }
    let index = match args.get(1) {
        Some(index) => index.expect_index("list indices")?,
        None => -1,
    };
    let index = normalize_index(index, items.len())
        .ok_or_else(|| PyException::index_error("pop index out of range"))?;
    Ok(items.remove(index))
}

fn position(cx: &mut dyn CallContext, items: &[Value], target: &Value) -> PyResult<Option<usize>> {
    for (index, item) in items.iter().enumerate() {
        if item.is(target) || values_equal(cx, item, target)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn remove(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("remove", &kwargs)?;
    check_method_arity("remove", &args, 1, 1)?;
    let items = receiver_list(&args, "remove")?;
    let snapshot = items.borrow().clone();
    match position(cx, &snapshot, &args[1])? {
        Some(index) => {
            items.borrow_mut().remove(index);
            Ok(Value::None)
        }
        None => Err(PyException::value_error("list.remove(x): x not in list")),
    }
}

fn index(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("index", &kwargs)?;
    check_method_arity("index", &args, 1, 3)?;
    let items = receiver_items(&args, "index")?;
    let len = items.len() as i64;
    let bound = |value: Option<&Value>, default: i64| -> PyResult<i64> {
        let raw = match value {
            Some(value) => value.expect_index("slice indices")?,
            None => default,
        };
        Ok(if raw < 0 { (raw + len).max(0) } else { raw.min(len) })
    };
    let start = bound(args.get(2), 0)? as usize;
    let stop = bound(args.get(3), len)? as usize;
    let window = items.get(start..stop.max(start)).unwrap_or(&[]);
    match position(cx, window, &args[1])? {
        Some(found) => Ok(Value::from(start + found)),
        None => Err(PyException::value_error(match &args[0] {
            Value::Tuple(_) => "tuple.index(x): x not in tuple".to_string(),
            _ => format!("{} is not in list", args[1].basic_repr()),
        })),
    }
}

fn count(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("count", &kwargs)?;
    check_method_arity("count", &args, 1, 1)?;
    let items = receiver_items(&args, "count")?;
    let mut total = 0;
    for item in &items {
        if item.is(&args[1]) || values_equal(cx, item, &args[1])? {
            total += 1;
        }
    }
    Ok(Value::Int(total))
}

fn reverse(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("reverse", &kwargs)?;
    check_method_arity("reverse", &args, 0, 0)?;
    receiver_list(&args, "reverse")?.borrow_mut().reverse();
    Ok(Value::None)
}

fn sort(cx: &mut dyn CallContext, args: Vec<Value>, mut kwargs: Kwargs) -> PyResult<Value> {
    let key = take_kwarg(&mut kwargs, "key");
    let reverse = take_kwarg(&mut kwargs, "reverse");
    finish_kwargs("sort", kwargs)?;
    check_method_arity("sort", &args, 0, 0)?;
    let items = receiver_list(&args, "sort")?;
    let reverse = match reverse {
        Some(flag) => truthy(cx, &flag)?,
        None => false,
    };
    let values = std::mem::take(&mut *items.borrow_mut());
    let sorted = sort_values(cx, values.clone(), key.as_ref(), reverse);
    let mut items = items.borrow_mut();
    match sorted {
        Ok(sorted) => {
            *items = sorted;
            Ok(Value::None)
        }
        Err(error) => {
            *items = values;
            Err(error)
        }
    }
}

fn copy(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("copy", &kwargs)?;
    check_method_arity("copy", &args, 0, 0)?;
    Ok(Value::list(receiver_list(&args, "copy")?.borrow().clone()))
}

fn clear(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("clear", &kwargs)?;
    check_method_arity("clear", &args, 0, 0)?;
    receiver_list(&args, "clear")?.borrow_mut().clear();
    Ok(Value::None)
}

pub(crate) const LIST_METHODS: &[(&str, NativeFn)] = &[
    ("append", append),
    ("extend", extend),
    ("insert", insert),
    ("pop", pop),
    ("remove", remove),
    ("index", index),
    ("count", count),
    ("reverse", reverse),
    ("sort", sort),
    ("copy", copy),
    ("clear", clear),
];

pub(crate) const TUPLE_METHODS: &[(&str, NativeFn)] = &[("index", index), ("count", count)];

/// `list(iterable=())`.
pub fn list_new(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("list", &kwargs)?;
    check_arity("list", args.len(), 0, 1)?;
    match args.first() {
        Some(iterable) => Ok(Value::list(iterable.collect(cx)?)),
        None => Ok(Value::list(Vec::new())),
    }
}

/// `tuple(iterable=())`.
pub fn tuple_new(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("tuple", &kwargs)?;
    check_arity("tuple", args.len(), 0, 1)?;
    match args.first() {
        Some(tuple @ Value::Tuple(_)) => Ok(tuple.clone()),
        Some(iterable) => Ok(Value::tuple(iterable.collect(cx)?)),
        None => Ok(Value::empty_tuple()),
    }
}

/// `range(stop)` / `range(start, stop[, step])`.
pub fn range_new(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("range", &kwargs)?;
    check_arity("range", args.len(), 1, 3)?;
    let mut bounds = Vec::with_capacity(3);
    for arg in &args {
        bounds.push(match arg {
            Value::Bool(_) | Value::Int(_) => arg.as_i64().unwrap_or_default(),
            Value::Big(_) => return Err(PyException::overflow("Python int too large to convert to C ssize_t")),
            other => {
                return Err(PyException::type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    other.type_name()
                )));
            }
        });
    }
    let (start, stop, step) = match bounds[..] {
        [stop] => (0, stop, 1),
        [start, stop] => (start, stop, 1),
        [start, stop, step] => (start, stop, step),
        _ => unreachable!("arity checked"),
    };
    if step == 0 {
        return Err(PyException::value_error("range() arg 3 must not be zero"));
    }
    Ok(Value::Range(Rc::new(RangeObject { start, stop, step })))
}

/// `slice(stop)` / `slice(start, stop[, step])`.
pub fn slice_new(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("slice", &kwargs)?;
    check_arity("slice", args.len(), 1, 3)?;
    let mut args = args.into_iter();
    let first = args.next().unwrap_or(Value::None);
    let (start, stop) = match args.next() {
        Some(stop) => (first, stop),
        None => (Value::None, first),
    };
    let step = args.next().unwrap_or(Value::None);
    Ok(Value::Slice(Rc::new(SliceObject { start, stop, step })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::Sequence;
    use crate::runtime::object::tests::NoCalls;

    fn slice(start: Value, stop: Value, step: Value) -> Value {
        Value::Slice(Rc::new(SliceObject { start, stop, step }))
    }

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().copied().map(Value::Int).collect())
    }

    #[test]
    fn slicing_matches_python() {
        let mut cx = NoCalls::new();
        let items = ints(&[0, 1, 2, 3, 4, 5]);
        let picked = items.get_item(&mut cx, &slice(Value::Int(1), Value::Int(-1), Value::Int(2))).unwrap();
        assert_eq!(picked.basic_repr(), "[1, 3]");
        let reversed = items.get_item(&mut cx, &slice(Value::None, Value::None, Value::Int(-1))).unwrap();
        assert_eq!(reversed.basic_repr(), "[5, 4, 3, 2, 1, 0]");
        let error = items.get_item(&mut cx, &Value::Int(6)).unwrap_err();
        assert_eq!(error.summary(), "IndexError: list index out of range");
        let error = items.get_item(&mut cx, &Value::from("a")).unwrap_err();
        assert_eq!(error.summary(), "TypeError: list indices must be integers or slices, not str");
    }

    #[test]
    fn slice_assignment_and_deletion() {
        let mut cx = NoCalls::new();
        let items = ints(&[0, 1, 2, 3]);
        items.set_item(&mut cx, slice(Value::Int(1), Value::Int(3), Value::None), ints(&[9])).unwrap();
        assert_eq!(items.basic_repr(), "[0, 9, 3]");
        items.del_item(&mut cx, &Value::Int(-1)).unwrap();
        assert_eq!(items.basic_repr(), "[0, 9]");
        let error = items
            .set_item(&mut cx, slice(Value::None, Value::None, Value::Int(2)), ints(&[1, 2]))
            .unwrap_err();
        assert_eq!(
            error.summary(),
            "ValueError: attempt to assign sequence of size 2 to extended slice of size 1"
        );
    }

    #[test]
    fn sort_is_stable_and_reversible() {
        let mut cx = NoCalls::new();
        let values = vec![
            Value::tuple(vec![Value::Int(2), Value::from("a")]),
            Value::tuple(vec![Value::Int(1), Value::from("b")]),
            Value::tuple(vec![Value::Int(2), Value::from("c")]),
        ];
        let sorted = sort_values(&mut cx, values.clone(), None, false).unwrap();
        assert_eq!(Value::list(sorted).basic_repr(), "[(1, 'b'), (2, 'a'), (2, 'c')]");
        let sorted = sort_values(&mut cx, vec![Value::Int(3), Value::Int(1), Value::Int(2)], None, true).unwrap();
        assert_eq!(Value::list(sorted).basic_repr(), "[3, 2, 1]");
        let error = sort_values(&mut cx, vec![Value::Int(1), Value::from("x")], None, false).unwrap_err();
        assert_eq!(
            error.summary(),
            "TypeError: '<' not supported between instances of 'str' and 'int'"
        );
    }

    #[test]
    fn ranges_index_and_slice() {
        let range = RangeObject { start: 0, stop: 10, step: 2 };
        assert_eq!(range_get_item(&range, &Value::Int(-1)).unwrap().basic_repr(), "8");
        let sliced = range_get_item(&range, &slice(Value::Int(1), Value::None, Value::None)).unwrap();
        assert_eq!(sliced.basic_repr(), "range(2, 10, 2)");
    }
}
