//! Native iterators and generator objects.

use std::cell::RefCell;
use std::rc::Rc;

use crate::runtime::callable::NativeFn;
use crate::runtime::class::lookup_special;
use crate::runtime::dict::{DictView, ViewKind};
use crate::runtime::error::{check_arity, check_method_arity, finish_kwargs, reject_kwargs, take_kwarg};
use crate::runtime::exception::{ExceptionKind, PyException, PyResult};
use crate::runtime::object::{CallContext, Iterable, Sequence, call_method, truthy, values_equal};
use crate::runtime::value::{DictRef, Kwargs, ListRef, RangeObject, Value};
use crate::vm::frame::Frame;

pub enum IterKind {
    List { items: ListRef, index: usize },
    Tuple { items: Rc<[Value]>, index: usize },
    Str { text: Rc<str>, offset: usize },
    Range { range: RangeObject, index: usize },
    Dict { dict: DictRef, kind: ViewKind, slot: usize, len: usize },
    /// A fixed sequence of values (sets, `reversed()`).
    Snapshot { items: Rc<[Value]>, index: usize, name: &'static str },
    /// The legacy protocol: `__getitem__` with 0, 1, 2, ... until `IndexError`.
    GetItem { target: Value, index: i64 },
    /// `iter(callable, sentinel)`.
    Callable { function: Value, sentinel: Value },
    Enumerate { inner: Value, count: i64 },
    Zip { inners: Vec<Value> },
    Map { function: Value, inners: Vec<Value> },
    Filter { function: Value, inner: Value },
}

pub struct IteratorObject {
    kind: IterKind,
    exhausted: bool,
}

/// Every native iterator type name, for the type registry.
pub(crate) const TYPE_NAMES: &[&str] = &[
    "list_iterator",
    "tuple_iterator",
    "str_iterator",
    "range_iterator",
    "dict_keyiterator",
    "dict_valueiterator",
    "dict_itemiterator",
    "set_iterator",
    "list_reverseiterator",
    "iterator",
    "callable_iterator",
    "enumerate",
    "zip",
    "map",
    "filter",
];

/// What one step of a native iterator needs, cloned out of the cell so that
/// no borrow is held while user code runs.
enum Step {
    Ready(Option<Value>),
    GetItem(Value, i64),
    Callable(Value, Value),
    Enumerate(Value, i64),
    Zip(Vec<Value>),
    Map(Value, Vec<Value>),
    Filter(Value, Value),
}

impl IteratorObject {
    pub fn new(kind: IterKind) -> Self {
        Self { kind, exhausted: false }
    }

    pub fn into_value(self) -> Value {
        Value::Iterator(Rc::new(RefCell::new(self)))
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            IterKind::List { .. } => "list_iterator",
            IterKind::Tuple { .. } => "tuple_iterator",
            IterKind::Str { .. } => "str_iterator",
            IterKind::Range { .. } => "range_iterator",
            IterKind::Dict { kind: ViewKind::Keys, .. } => "dict_keyiterator",
            IterKind::Dict { kind: ViewKind::Values, .. } => "dict_valueiterator",
            IterKind::Dict { kind: ViewKind::Items, .. } => "dict_itemiterator",
            IterKind::Snapshot { name, .. } => *name,
            IterKind::GetItem { .. } => "iterator",
            IterKind::Callable { .. } => "callable_iterator",
            IterKind::Enumerate { .. } => "enumerate",
            IterKind::Zip { .. } => "zip",
            IterKind::Map { .. } => "map",
            IterKind::Filter { .. } => "filter",
        }
    }

    fn step(&mut self) -> PyResult<Step> {
        if self.exhausted {
            return Ok(Step::Ready(None));
        }
        Ok(match &mut self.kind {
            IterKind::List { items, index } => {
                let item = items.borrow().get(*index).cloned();
                *index += 1;
                Step::Ready(item)
            }
            IterKind::Tuple { items, index } | IterKind::Snapshot { items, index, .. } => {
                let item = items.get(*index).cloned();
                *index += 1;
                Step::Ready(item)
            }
            IterKind::Str { text, offset } => {
                let item = text[*offset..].chars().next();
                if let Some(ch) = item {
                    *offset += ch.len_utf8();
                }
                Step::Ready(item.map(|ch| Value::from(ch.to_string())))
            }
            IterKind::Range { range, index } => {
                let item = range.get(*index).map(Value::Int);
                *index += 1;
                Step::Ready(item)
            }
            IterKind::Dict { dict, kind, slot, len } => {
                let dict = dict.borrow();
                if dict.len() != *len {
                    self.exhausted = true;
                    return Err(PyException::runtime_error(
                        "dictionary changed size during iteration",
                    ));
                }
                match dict.entry_from(*slot) {
                    Some((found, key, value)) => {
                        *slot = found + 1;
                        Step::Ready(Some(DictView::project(*kind, key, value)))
                    }
                    None => Step::Ready(None),
                }
            }
            IterKind::GetItem { target, index } => {
                *index += 1;
                Step::GetItem(target.clone(), *index - 1)
            }
            IterKind::Callable { function, sentinel } => Step::Callable(function.clone(), sentinel.clone()),
            IterKind::Enumerate { inner, count } => {
                *count += 1;
                Step::Enumerate(inner.clone(), *count - 1)
            }
            IterKind::Zip { inners } => Step::Zip(inners.clone()),
            IterKind::Map { function, inners } => Step::Map(function.clone(), inners.clone()),
            IterKind::Filter { function, inner } => Step::Filter(function.clone(), inner.clone()),
        })
    }

    /// Produces the next item; `None` once exhausted, and forever after.
    pub fn advance(iterator: &Rc<RefCell<IteratorObject>>, cx: &mut dyn CallContext) -> PyResult<Option<Value>> {
        let step = iterator.borrow_mut().step()?;
        let item = match step {
            Step::Ready(item) => item,
            Step::GetItem(target, index) => match target.get_item(cx, &Value::Int(index)) {
                Ok(item) => Some(item),
                Err(error) if error.is(ExceptionKind::IndexError) || error.is(ExceptionKind::StopIteration) => None,
                Err(error) => return Err(error),
            },
            Step::Callable(function, sentinel) => {
                let item = cx.call(&function, Vec::new(), Vec::new())?;
                if item.is(&sentinel) || values_equal(cx, &item, &sentinel)? {
                    None
                } else {
                    Some(item)
                }
            }
            Step::Enumerate(inner, count) => inner
                .next(cx)?
                .map(|item| Value::tuple(vec![Value::Int(count), item])),
            Step::Zip(inners) => {
                let mut row = Vec::with_capacity(inners.len());
                for inner in &inners {
                    match inner.next(cx)? {
                        Some(item) => row.push(item),
                        None => break,
                    }
                }
                (row.len() == inners.len() && !inners.is_empty()).then(|| Value::tuple(row))
            }
            Step::Map(function, inners) => {
                let mut args = Vec::with_capacity(inners.len());
                for inner in &inners {
                    match inner.next(cx)? {
                        Some(item) => args.push(item),
                        None => break,
                    }
                }
                if args.len() == inners.len() {
                    Some(cx.call(&function, args, Vec::new())?)
                } else {
                    None
                }
            }
            Step::Filter(function, inner) => loop {
                let Some(item) = inner.next(cx)? else {
                    break None;
                };
                let keep = if function.is_none() {
                    truthy(cx, &item)?
                } else {
                    let verdict = cx.call(&function, vec![item.clone()], Vec::new())?;
                    truthy(cx, &verdict)?
                };
                if keep {
                    break Some(item);
                }
            },
        };
        if item.is_none() {
            iterator.borrow_mut().exhausted = true;
        }
        Ok(item)
    }

    /// Items left, when cheaply known (`len(reversed(...))`-style hints).
    pub fn remaining(&self) -> Option<usize> {
        if self.exhausted {
            return Some(0);
        }
        match &self.kind {
            IterKind::List { items, index } => Some(items.borrow().len().saturating_sub(*index)),
            IterKind::Tuple { items, index } | IterKind::Snapshot { items, index, .. } => {
                Some(items.len().saturating_sub(*index))
            }
            IterKind::Range { range, index } => Some(range.len().saturating_sub(*index)),
            _ => None,
        }
    }
}

/// A suspended generator: the frame it resumes, plus its run state.
pub struct GeneratorObject {
    pub name: Rc<str>,
    pub qualname: Rc<str>,
    /// `None` while the frame is on the engine's stack or after it finished.
    pub frame: Option<Frame>,
    pub running: bool,
    pub started: bool,
    pub finished: bool,
}

impl std::fmt::Debug for GeneratorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorObject")
            .field("qualname", &self.qualname)
            .field("running", &self.running)
            .field("started", &self.started)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl GeneratorObject {
    pub fn new(frame: Frame) -> Self {
        Self {
            name: frame.code.name.clone(),
            qualname: frame.code.qualname.clone(),
            frame: Some(frame),
            running: false,
            started: false,
            finished: false,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Generator(Rc::new(RefCell::new(self)))
    }
}

/// `enumerate(iterable, start=0)`.
pub fn enumerate_new(cx: &mut dyn CallContext, args: Vec<Value>, mut kwargs: Kwargs) -> PyResult<Value> {
    let start = take_kwarg(&mut kwargs, "start");
    finish_kwargs("enumerate", kwargs)?;
    check_arity("enumerate", args.len(), 1, 2)?;
    let count = match args.get(1).or(start.as_ref()) {
        Some(start) => start.expect_index("enumerate start")?,
        None => 0,
    };
    let inner = args[0].iter(cx)?;
    Ok(IteratorObject::new(IterKind::Enumerate { inner, count }).into_value())
}

/// `zip(*iterables)`.
pub fn zip_new(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("zip", &kwargs)?;
    let mut inners = Vec::with_capacity(args.len());
    for arg in &args {
        inners.push(arg.iter(cx)?);
    }
    Ok(IteratorObject::new(IterKind::Zip { inners }).into_value())
}

/// `map(function, *iterables)`.
pub fn map_new(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("map", &kwargs)?;
    if args.len() < 2 {
        return Err(PyException::type_error("map() must have at least two arguments."));
    }
    let mut args = args.into_iter();
    let function = args.next().unwrap_or(Value::None);
    let mut inners = Vec::new();
    for arg in args {
        inners.push(arg.iter(cx)?);
    }
    Ok(IteratorObject::new(IterKind::Map { function, inners }).into_value())
}

/// `filter(function or None, iterable)`.
pub fn filter_new(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("filter", &kwargs)?;
    check_arity("filter", args.len(), 2, 2)?;
    let inner = args[1].iter(cx)?;
    Ok(IteratorObject::new(IterKind::Filter {
        function: args[0].clone(),
        inner,
    })
    .into_value())
}

/// `reversed(sequence)`.
pub fn reversed_new(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("reversed", &kwargs)?;
    check_arity("reversed", args.len(), 1, 1)?;
    let target = &args[0];
    let mut items = match target {
        Value::List(items) => items.borrow().clone(),
        Value::Tuple(items) => items.to_vec(),
        Value::Str(_) | Value::Range(_) => target.collect(cx)?,
        Value::Dict(dict) => dict.borrow().keys(),
        Value::Instance(_) => {
            if let Some(result) = call_method(cx, target, "__reversed__", Vec::new())? {
                return Ok(result);
            }
            if lookup_special(target, "__len__").is_none() || lookup_special(target, "__getitem__").is_none() {
                return Err(not_reversible(target));
            }
            let len = target.len(cx)?;
            let mut items = Vec::with_capacity(len);
            for index in 0..len {
                items.push(target.get_item(cx, &Value::from(index))?);
            }
            items
        }
        other => return Err(not_reversible(other)),
    };
    items.reverse();
    Ok(IteratorObject::new(IterKind::Snapshot {
        items: items.into(),
        index: 0,
        name: "list_reverseiterator",
    })
    .into_value())
}

fn not_reversible(value: &Value) -> PyException {
    PyException::type_error(format!("'{}' object is not reversible", value.type_name()))
}

/// `iter(iterable)` / `iter(callable, sentinel)`.
pub fn iter_new(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("iter", &kwargs)?;
    check_arity("iter", args.len(), 1, 2)?;
    match &args[..] {
        [iterable] => iterable.iter(cx),
        [function, sentinel] => Ok(IteratorObject::new(IterKind::Callable {
            function: function.clone(),
            sentinel: sentinel.clone(),
        })
        .into_value()),
        _ => unreachable!("arity checked"),
    }
}

fn iterator_iter(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("__iter__", &kwargs)?;
    check_method_arity("__iter__", &args, 0, 0)?;
    Ok(args[0].clone())
}

fn iterator_next(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("__next__", &kwargs)?;
    check_method_arity("__next__", &args, 0, 0)?;
    args[0]
        .next(cx)?
        .ok_or_else(|| PyException::stop_iteration(Value::None))
}

fn length_hint(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("__length_hint__", &kwargs)?;
    check_method_arity("__length_hint__", &args, 0, 0)?;
    match &args[0] {
        Value::Iterator(iterator) => Ok(iterator.borrow().remaining().map_or(Value::NotImplemented, Value::from)),
        _ => Ok(Value::NotImplemented),
    }
}

pub(crate) const METHODS: &[(&str, NativeFn)] = &[
    ("__iter__", iterator_iter),
    ("__next__", iterator_next),
    ("__length_hint__", length_hint),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::tests::NoCalls;

    fn drain(cx: &mut NoCalls, iterator: &Value) -> String {
        let mut items = Vec::new();
        while let Some(item) = iterator.next(cx).unwrap() {
            items.push(item);
        }
        Value::list(items).basic_repr()
    }

    #[test]
    fn builtin_iterators() {
        let mut cx = NoCalls::new();
        let text = Value::from("hé!").iter(&mut cx).unwrap();
        assert_eq!(drain(&mut cx, &text), "['h', 'é', '!']");
        assert!(text.next(&mut cx).unwrap().is_none());
        let range = Value::range(5, 0, -2).iter(&mut cx).unwrap();
        assert_eq!(drain(&mut cx, &range), "[5, 3, 1]");
    }

    #[test]
    fn enumerate_zip_and_filter() {
        let mut cx = NoCalls::new();
        let letters = Value::from("ab");
        let numbered = enumerate_new(&mut cx, vec![letters.clone(), Value::Int(1)], Vec::new()).unwrap();
        assert_eq!(drain(&mut cx, &numbered), "[(1, 'a'), (2, 'b')]");
        let zipped = zip_new(&mut cx, vec![letters, Value::range(0, 10, 1)], Vec::new()).unwrap();
        assert_eq!(drain(&mut cx, &zipped), "[('a', 0), ('b', 1)]");
        let values = Value::list(vec![Value::Int(0), Value::Int(2), Value::None, Value::from("x")]);
        let kept = filter_new(&mut cx, vec![Value::None, values], Vec::new()).unwrap();
        assert_eq!(drain(&mut cx, &kept), "[2, 'x']");
    }

    #[test]
    fn dict_iteration_detects_resizing() {
        let mut cx = NoCalls::new();
        let dict = crate::runtime::dict::new_dict();
        dict.borrow_mut().set_str("a", Value::Int(1));
        let iterator = Value::Dict(dict.clone()).iter(&mut cx).unwrap();
        dict.borrow_mut().set_str("b", Value::Int(2));
        let error = iterator.next(&mut cx).unwrap_err();
        assert_eq!(error.summary(), "RuntimeError: dictionary changed size during iteration");
    }

    #[test]
    fn reversed_snapshots() {
        let mut cx = NoCalls::new();
        let items = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let backwards = reversed_new(&mut cx, vec![items], Vec::new()).unwrap();
        assert_eq!(backwards.type_name(), "list_reverseiterator");
        assert_eq!(drain(&mut cx, &backwards), "[3, 2, 1]");
    }
}
