//! Runtime dictionary object with Python-like key semantics.
//!
//! Storage preserves insertion order (`entries`) while `buckets` accelerates
//! lookup by hash. Bucket collisions are resolved by checking key equality.
//! Removal leaves a hole that is compacted once holes outnumber live entries.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::runtime::error::{check_arity, check_method_arity, reject_kwargs};
use crate::runtime::exception::{PyException, PyResult};
use crate::runtime::object::{CallContext, Iterable, hash_value, str_hash, values_equal};
use crate::runtime::value::{DictRef, Kwargs, Value};

#[derive(Debug, Clone)]
struct DictEntry {
    hash: i64,
    key: Value,
    value: Value,
}

#[derive(Debug, Clone, Default)]
pub struct DictObject {
    entries: Vec<Option<DictEntry>>,
    buckets: FxHashMap<i64, Vec<usize>>,
    len: usize,
}

impl DictObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries
            .iter()
            .flatten()
            .map(|entry| (&entry.key, &entry.value))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.iter().map(|(_, value)| value.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// The first live entry at or after raw slot `slot`, with its slot.
    pub fn entry_from(&self, slot: usize) -> Option<(usize, Value, Value)> {
        self.entries
            .iter()
            .enumerate()
            .skip(slot)
            .find_map(|(index, entry)| {
                entry
                    .as_ref()
                    .map(|entry| (index, entry.key.clone(), entry.value.clone()))
            })
    }

    pub(crate) fn candidates(&self, hash: i64) -> Vec<(usize, Value)> {
        let Some(indices) = self.buckets.get(&hash) else {
            return Vec::new();
        };
        indices
            .iter()
            .filter_map(|&index| {
                self.entries
                    .get(index)
                    .and_then(Option::as_ref)
                    .map(|entry| (index, entry.key.clone()))
            })
            .collect()
    }

    fn str_index(&self, name: &str) -> Option<usize> {
        let indices = self.buckets.get(&str_hash(name))?;
        indices.iter().copied().find(|&index| {
            matches!(
                self.entries.get(index),
                Some(Some(DictEntry { key: Value::Str(key), .. })) if &**key == name
            )
        })
    }

    pub fn get_str(&self, name: &str) -> Option<Value> {
        let index = self.str_index(name)?;
        self.entries[index].as_ref().map(|entry| entry.value.clone())
    }

    pub fn contains_str(&self, name: &str) -> bool {
        self.str_index(name).is_some()
    }

    pub fn set_str(&mut self, name: &str, value: Value) {
        match self.str_index(name) {
            Some(index) => self.replace_at(index, value),
            None => self.insert_new(str_hash(name), Value::string(name), value),
        }
    }

    pub fn remove_str(&mut self, name: &str) -> Option<Value> {
        let index = self.str_index(name)?;
        self.remove_at(index).map(|(_, value)| value)
    }

    pub(crate) fn insert_new(&mut self, hash: i64, key: Value, value: Value) {
        let index = self.entries.len();
        self.entries.push(Some(DictEntry { hash, key, value }));
        self.buckets.entry(hash).or_default().push(index);
        self.len += 1;
    }

    pub(crate) fn replace_at(&mut self, index: usize, value: Value) {
        if let Some(Some(entry)) = self.entries.get_mut(index) {
            entry.value = value;
        }
    }

    pub(crate) fn remove_at(&mut self, index: usize) -> Option<(Value, Value)> {
        let entry = self.entries.get_mut(index)?.take()?;
        if let Some(indices) = self.buckets.get_mut(&entry.hash) {
            indices.retain(|&candidate| candidate != index);
            if indices.is_empty() {
                self.buckets.remove(&entry.hash);
            }
        }
        self.len -= 1;
        if self.entries.len() > 8 && self.entries.len() > self.len * 2 {
            self.compact();
        }
        Some((entry.key, entry.value))
    }

    fn compact(&mut self) {
        let live: Vec<DictEntry> = self.entries.drain(..).flatten().collect();
        self.buckets.clear();
        for (index, entry) in live.iter().enumerate() {
            self.buckets.entry(entry.hash).or_default().push(index);
        }
        self.entries = live.into_iter().map(Some).collect();
    }

    /// Stored hashes of the live entries, in order.
    pub(crate) fn hashes(&self) -> impl Iterator<Item = i64> + '_ {
        self.entries.iter().flatten().map(|entry| entry.hash)
    }

    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        let index = self.entries.iter().rposition(Option::is_some)?;
        self.remove_at(index)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.buckets.clear();
        self.len = 0;
    }
}

/// Picks the slot whose key equals `key` among same-hash candidates.
pub(crate) fn find_candidate(
    cx: &mut dyn CallContext,
    candidates: Vec<(usize, Value)>,
    key: &Value,
) -> PyResult<Option<usize>> {
    for (index, candidate) in candidates {
        if candidate.is(key) || values_equal(cx, &candidate, key)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn find_index(
    cx: &mut dyn CallContext,
    dict: &DictRef,
    hash: i64,
    key: &Value,
) -> PyResult<Option<usize>> {
    // Keys are cloned out first: `__eq__` may touch the dict.
    let candidates = dict.borrow().candidates(hash);
    find_candidate(cx, candidates, key)
}

pub fn dict_get(cx: &mut dyn CallContext, dict: &DictRef, key: &Value) -> PyResult<Option<Value>> {
    if let Value::Str(name) = key {
        return Ok(dict.borrow().get_str(name));
    }
    let hash = hash_value(cx, key)?;
    let index = find_index(cx, dict, hash, key)?;
    Ok(index.and_then(|index| {
        dict.borrow()
            .entries
            .get(index)
            .and_then(Option::as_ref)
            .map(|entry| entry.value.clone())
    }))
}

pub fn dict_get_item(cx: &mut dyn CallContext, dict: &DictRef, key: &Value) -> PyResult<Value> {
    dict_get(cx, dict, key)?.ok_or_else(|| PyException::key_error(key.clone()))
}

pub fn dict_set(cx: &mut dyn CallContext, dict: &DictRef, key: Value, value: Value) -> PyResult<()> {
    if let Value::Str(name) = &key {
        dict.borrow_mut().set_str(name, value);
        return Ok(());
    }
    let hash = hash_value(cx, &key)?;
    match find_index(cx, dict, hash, &key)? {
        Some(index) => dict.borrow_mut().replace_at(index, value),
        None => dict.borrow_mut().insert_new(hash, key, value),
    }
    Ok(())
}

pub fn dict_remove(cx: &mut dyn CallContext, dict: &DictRef, key: &Value) -> PyResult<Option<Value>> {
    if let Value::Str(name) = key {
        return Ok(dict.borrow_mut().remove_str(name));
    }
    let hash = hash_value(cx, key)?;
    let Some(index) = find_index(cx, dict, hash, key)? else {
        return Ok(None);
    };
    Ok(dict.borrow_mut().remove_at(index).map(|(_, value)| value))
}

pub fn dict_contains(cx: &mut dyn CallContext, dict: &DictRef, key: &Value) -> PyResult<bool> {
    Ok(dict_get(cx, dict, key)?.is_some())
}

pub fn new_dict() -> DictRef {
    Rc::new(std::cell::RefCell::new(DictObject::new()))
}

/// Builds a dict from key/value pairs, later keys winning.
pub fn dict_from_pairs(cx: &mut dyn CallContext, pairs: Vec<(Value, Value)>) -> PyResult<DictRef> {
    let dict = new_dict();
    for (key, value) in pairs {
        dict_set(cx, &dict, key, value)?;
    }
    Ok(dict)
}

/// `dict.update` semantics: a mapping, or an iterable of pairs.
pub fn dict_update(cx: &mut dyn CallContext, dict: &DictRef, source: &Value) -> PyResult<()> {
    if let Value::Dict(other) = source {
        let items = other.borrow().items();
        for (key, value) in items {
            dict_set(cx, dict, key, value)?;
        }
        return Ok(());
    }
    if let Value::Instance(_) = source
        && let Ok(keys) = crate::runtime::object::HasAttr::get_attr(source, cx, "keys")
    {
        let keys = cx.call(&keys, Vec::new(), Vec::new())?.collect(cx)?;
        for key in keys {
            let value = crate::runtime::object::Sequence::get_item(source, cx, &key)?;
            dict_set(cx, dict, key, value)?;
        }
        return Ok(());
    }
    for (position, item) in source.collect(cx)?.into_iter().enumerate() {
        let pair = item.collect(cx).map_err(|_| {
            PyException::type_error(format!(
                "cannot convert dictionary update sequence element #{position} to a sequence"
            ))
        })?;
        let [key, value] = <[Value; 2]>::try_from(pair).map_err(|pair| {
            PyException::value_error(format!(
                "dictionary update sequence element #{position} has length {}; 2 is required",
                pair.len()
            ))
        })?;
        dict_set(cx, dict, key, value)?;
    }
    Ok(())
}

/// `dict(mapping_or_pairs=(), **kwargs)`.
pub fn dict_new(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    check_arity("dict", args.len(), 0, 1)?;
    let dict = new_dict();
    if let Some(source) = args.first() {
        dict_update(cx, &dict, source)?;
    }
    for (name, value) in kwargs {
        dict_set(cx, &dict, Value::Str(name), value)?;
    }
    Ok(Value::Dict(dict))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Keys,
    Values,
    Items,
}

/// `dict.keys()` / `values()` / `items()`: a live window onto the dict.
#[derive(Debug, Clone)]
pub struct DictView {
    pub dict: DictRef,
    pub kind: ViewKind,
}

impl DictView {
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ViewKind::Keys => "dict_keys",
            ViewKind::Values => "dict_values",
            ViewKind::Items => "dict_items",
        }
    }

    pub fn len(&self) -> usize {
        self.dict.borrow().len()
    }

    pub fn project(kind: ViewKind, key: Value, value: Value) -> Value {
        match kind {
            ViewKind::Keys => key,
            ViewKind::Values => value,
            ViewKind::Items => Value::tuple(vec![key, value]),
        }
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.dict
            .borrow()
            .iter()
            .map(|(key, value)| Self::project(self.kind, key.clone(), value.clone()))
            .collect()
    }
}

fn receiver(args: &[Value], method: &str) -> PyResult<DictRef> {
    match args.first() {
        Some(Value::Dict(dict)) => Ok(dict.clone()),
        Some(other) => Err(PyException::type_error(format!(
            "descriptor '{method}' requires a 'dict' object but received a '{}'",
            other.type_name()
        ))),
        None => Err(PyException::type_error(format!(
            "descriptor '{method}' of 'dict' object needs an argument"
        ))),
    }
}

fn view(args: Vec<Value>, kwargs: Kwargs, method: &str, kind: ViewKind) -> PyResult<Value> {
    reject_kwargs(method, &kwargs)?;
    check_method_arity(method, &args, 0, 0)?;
    let dict = receiver(&args, method)?;
    Ok(Value::DictView(Rc::new(DictView { dict, kind })))
}

fn keys(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    view(args, kwargs, "keys", ViewKind::Keys)
}

fn values(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    view(args, kwargs, "values", ViewKind::Values)
}

fn items(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    view(args, kwargs, "items", ViewKind::Items)
}

fn get(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("get", &kwargs)?;
    check_method_arity("get", &args, 1, 2)?;
    let dict = receiver(&args, "get")?;
    let default = args.get(2).cloned().unwrap_or(Value::None);
    Ok(dict_get(cx, &dict, &args[1])?.unwrap_or(default))
}

fn pop(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("pop", &kwargs)?;
    check_method_arity("pop", &args, 1, 2)?;
    let dict = receiver(&args, "pop")?;
    match dict_remove(cx, &dict, &args[1])? {
        Some(value) => Ok(value),
        None => args
            .get(2)
            .cloned()
            .ok_or_else(|| PyException::key_error(args[1].clone())),
    }
}

fn popitem(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("popitem", &kwargs)?;
    check_method_arity("popitem", &args, 0, 0)?;
    let dict = receiver(&args, "popitem")?;
    let entry = dict.borrow_mut().pop_last();
    match entry {
        Some((key, value)) => Ok(Value::tuple(vec![key, value])),
        None => Err(PyException::new(
            crate::runtime::exception::ExceptionKind::KeyError,
            "popitem(): dictionary is empty",
        )),
    }
}

fn setdefault(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("setdefault", &kwargs)?;
    check_method_arity("setdefault", &args, 1, 2)?;
    let dict = receiver(&args, "setdefault")?;
    if let Some(existing) = dict_get(cx, &dict, &args[1])? {
        return Ok(existing);
    }
    let default = args.get(2).cloned().unwrap_or(Value::None);
    dict_set(cx, &dict, args[1].clone(), default.clone())?;
    Ok(default)
}

fn update(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    check_method_arity("update", &args, 0, 1)?;
    let dict = receiver(&args, "update")?;
    if let Some(source) = args.get(1) {
        dict_update(cx, &dict, source)?;
    }
    for (name, value) in kwargs {
        dict.borrow_mut().set_str(&name, value);
    }
    Ok(Value::None)
}

fn copy(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("copy", &kwargs)?;
    check_method_arity("copy", &args, 0, 0)?;
    let dict = receiver(&args, "copy")?;
    let copied = dict.borrow().clone();
    Ok(Value::dict(copied))
}

fn clear(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("clear", &kwargs)?;
    check_method_arity("clear", &args, 0, 0)?;
    receiver(&args, "clear")?.borrow_mut().clear();
    Ok(Value::None)
}

pub(crate) const METHODS: &[(&str, crate::runtime::callable::NativeFn)] = &[
    ("keys", keys),
    ("values", values),
    ("items", items),
    ("get", get),
    ("pop", pop),
    ("popitem", popitem),
    ("setdefault", setdefault),
    ("update", update),
    ("copy", copy),
    ("clear", clear),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::tests::NoCalls;

    fn int(value: i64) -> Value {
        Value::Int(value)
    }

    #[test]
    fn supports_len_get_set_and_order() {
        let mut cx = NoCalls::new();
        let dict = dict_from_pairs(
            &mut cx,
            vec![(Value::from("a"), int(1)), (Value::from("b"), int(2))],
        )
        .expect("dict should build");
        dict_set(&mut cx, &dict, Value::from("a"), int(7)).expect("set should work");
        dict_set(&mut cx, &dict, int(3), int(9)).expect("set should work");
        assert_eq!(dict.borrow().len(), 3);
        assert_eq!(Value::Dict(dict.clone()).basic_repr(), "{'a': 7, 'b': 2, 3: 9}");
        assert_eq!(dict.borrow().get_str("a").map(|v| v.basic_repr()), Some("7".into()));
    }

    #[test]
    fn bool_int_and_float_keys_alias() {
        let mut cx = NoCalls::new();
        let dict = dict_from_pairs(&mut cx, vec![(Value::Bool(true), int(1))]).expect("dict");
        dict_set(&mut cx, &dict, int(1), int(9)).expect("set");
        dict_set(&mut cx, &dict, Value::Float(1.0), int(10)).expect("set");
        assert_eq!(dict.borrow().len(), 1);
        assert_eq!(Value::Dict(dict).basic_repr(), "{True: 10}");
    }

    #[test]
    fn removal_keeps_insertion_order() {
        let mut cx = NoCalls::new();
        let dict = new_dict();
        for i in 0..20 {
            dict_set(&mut cx, &dict, int(i), int(i * i)).expect("set");
        }
        for i in 0..15 {
            assert!(dict_remove(&mut cx, &dict, &int(i)).expect("remove").is_some());
        }
        assert_eq!(dict.borrow().keys().iter().map(Value::basic_repr).collect::<Vec<_>>(), ["15", "16", "17", "18", "19"]);
        assert_eq!(dict_get(&mut cx, &dict, &int(17)).expect("get").map(|v| v.basic_repr()), Some("289".into()));
        assert!(dict_get(&mut cx, &dict, &int(3)).expect("get").is_none());
    }

    #[test]
    fn reports_missing_key_and_unhashable_type() {
        let mut cx = NoCalls::new();
        let dict = new_dict();
        let missing = dict_get_item(&mut cx, &dict, &Value::from("k")).expect_err("missing key");
        assert_eq!(missing.summary(), "KeyError: 'k'");
        let unhashable = dict_set(&mut cx, &dict, Value::list(vec![]), int(1)).expect_err("unhashable");
        assert_eq!(unhashable.summary(), "TypeError: unhashable type: 'list'");
    }
}
