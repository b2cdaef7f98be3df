//! `str` indexing and methods. Indices count characters, not bytes.

use std::rc::Rc;

use crate::runtime::callable::NativeFn;
use crate::runtime::error::{check_arity, check_method_arity, finish_kwargs, reject_kwargs, take_kwarg};
use crate::runtime::exception::{PyException, PyResult};
use crate::runtime::format;
use crate::runtime::list::{normalize_index, slice_indices, slice_positions};
use crate::runtime::object::{CallContext, Iterable, str_of};
use crate::runtime::value::{Kwargs, Value};

pub fn get_item(text: &Rc<str>, key: &Value) -> PyResult<Value> {
    if let Value::Slice(slice) = key {
        let chars: Vec<char> = text.chars().collect();
        let (start, stop, step) = slice_indices(slice, chars.len())?;
        let picked: String = slice_positions(start, stop, step)
            .into_iter()
            .map(|index| chars[index])
            .collect();
        return Ok(Value::from(picked));
    }
    let index = key.expect_index("string indices")?;
    let len = if text.is_ascii() { text.len() } else { text.chars().count() };
    normalize_index(index, len)
        .and_then(|index| text.chars().nth(index))
        .map(|ch| Value::from(ch.to_string()))
        .ok_or_else(|| PyException::index_error("string index out of range"))
}

/// `str(object='')`.
pub fn str_new(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("str", &kwargs)?;
    check_arity("str", args.len(), 0, 1)?;
    match args.first() {
        Some(Value::Str(text)) => Ok(Value::Str(text.clone())),
        Some(value) => Ok(Value::from(str_of(cx, value)?)),
        None => Ok(Value::from("")),
    }
}

fn receiver(args: &[Value], method: &str) -> PyResult<Rc<str>> {
    match args.first() {
        Some(Value::Str(text)) => Ok(text.clone()),
        other => Err(PyException::type_error(format!(
            "descriptor '{method}' requires a 'str' object but received a '{}'",
            other.map(Value::type_name).unwrap_or_else(|| "nothing".to_string())
        ))),
    }
}

fn str_arg<'a>(value: &'a Value, method: &str) -> PyResult<&'a str> {
    value.as_str().ok_or_else(|| {
        PyException::type_error(format!(
            "{method}() argument must be str, not {}",
            value.type_name()
        ))
    })
}

fn char_count(text: &str) -> usize {
    if text.is_ascii() { text.len() } else { text.chars().count() }
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map_or(text.len(), |(offset, _)| offset)
}

/// Resolves optional `start`/`end` arguments into a byte range of `text`.
fn window(text: &str, start: Option<&Value>, end: Option<&Value>) -> PyResult<(usize, usize)> {
    let len = char_count(text) as i64;
    let bound = |value: Option<&Value>, default: i64| -> PyResult<i64> {
        let raw = match value {
            None | Some(Value::None) => default,
            Some(value) => value.expect_index("slice indices")?,
        };
        Ok(if raw < 0 { (raw + len).max(0) } else { raw.min(len) })
    };
    let start = bound(start, 0)?;
    let end = bound(end, len)?.max(start);
    Ok((byte_offset(text, start as usize), byte_offset(text, end as usize)))
}

macro_rules! simple_transform {
    ($name:ident, $label:literal, $transform:expr) => {
        fn $name(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
            reject_kwargs($label, &kwargs)?;
            check_method_arity($label, &args, 0, 0)?;
            let text = receiver(&args, $label)?;
            let transform: fn(&str) -> String = $transform;
            Ok(Value::from(transform(&text)))
        }
    };
}

macro_rules! predicate {
    ($name:ident, $label:literal, $test:expr) => {
        fn $name(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
            reject_kwargs($label, &kwargs)?;
            check_method_arity($label, &args, 0, 0)?;
            let text = receiver(&args, $label)?;
            let test: fn(char) -> bool = $test;
            Ok(Value::Bool(!text.is_empty() && text.chars().all(test)))
        }
    };
}

simple_transform!(upper, "upper", str::to_uppercase);
simple_transform!(lower, "lower", str::to_lowercase);
simple_transform!(swapcase, "swapcase", |text| {
    text.chars()
        .flat_map(|ch| {
            if ch.is_uppercase() {
                ch.to_lowercase().collect::<Vec<_>>()
            } else {
                ch.to_uppercase().collect::<Vec<_>>()
            }
        })
        .collect()
});
simple_transform!(title, "title", |text| {
    let mut out = String::with_capacity(text.len());
    let mut previous_cased = false;
    for ch in text.chars() {
        if previous_cased {
            out.extend(ch.to_lowercase());
        } else {
            out.extend(ch.to_uppercase());
        }
        previous_cased = ch.is_alphabetic();
    }
    out
});
simple_transform!(capitalize, "capitalize", |text| {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
});

predicate!(isdigit, "isdigit", |ch| ch.is_ascii_digit());
predicate!(isalpha, "isalpha", char::is_alphabetic);
predicate!(isalnum, "isalnum", char::is_alphanumeric);
predicate!(isspace, "isspace", char::is_whitespace);

fn isupper(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("isupper", &kwargs)?;
    check_method_arity("isupper", &args, 0, 0)?;
    let text = receiver(&args, "isupper")?;
    let cased = text.chars().any(char::is_alphabetic);
    Ok(Value::Bool(cased && !text.chars().any(char::is_lowercase)))
}

fn islower(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("islower", &kwargs)?;
    check_method_arity("islower", &args, 0, 0)?;
    let text = receiver(&args, "islower")?;
    let cased = text.chars().any(char::is_alphabetic);
    Ok(Value::Bool(cased && !text.chars().any(char::is_uppercase)))
}

#[derive(Clone, Copy)]
enum Side {
    Both,
    Left,
    Right,
}

fn strip_with(args: Vec<Value>, kwargs: Kwargs, name: &str, side: Side) -> PyResult<Value> {
    reject_kwargs(name, &kwargs)?;
    check_method_arity(name, &args, 0, 1)?;
    let text = receiver(&args, name)?;
    let chars: Option<Vec<char>> = match args.get(1) {
        None | Some(Value::None) => None,
        Some(value) => Some(str_arg(value, name)?.chars().collect()),
    };
    let matches = |ch: char| match &chars {
        Some(set) => set.contains(&ch),
        None => ch.is_whitespace(),
    };
    let stripped = match side {
        Side::Both => text.trim_matches(matches),
        Side::Left => text.trim_start_matches(matches),
        Side::Right => text.trim_end_matches(matches),
    };
    Ok(Value::from(stripped))
}

fn strip(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    strip_with(args, kwargs, "strip", Side::Both)
}

fn lstrip(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    strip_with(args, kwargs, "lstrip", Side::Left)
}

fn rstrip(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    strip_with(args, kwargs, "rstrip", Side::Right)
}

fn split_arguments(args: &[Value], kwargs: &mut Kwargs, name: &str) -> PyResult<(Option<String>, i64)> {
    let sep = take_kwarg(kwargs, "sep").or_else(|| args.get(1).cloned());
    let limit = take_kwarg(kwargs, "maxsplit").or_else(|| args.get(2).cloned());
    finish_kwargs(name, std::mem::take(kwargs))?;
    check_method_arity(name, args, 0, 2)?;
    let sep = match sep {
        None | Some(Value::None) => None,
        Some(value) => {
            let sep = str_arg(&value, name)?;
            if sep.is_empty() {
                return Err(PyException::value_error("empty separator"));
            }
            Some(sep.to_string())
        }
    };
    let limit = match limit {
        Some(value) => value.expect_index("maxsplit")?,
        None => -1,
    };
    Ok((sep, limit))
}

fn split(_cx: &mut dyn CallContext, args: Vec<Value>, mut kwargs: Kwargs) -> PyResult<Value> {
    let (sep, limit) = split_arguments(&args, &mut kwargs, "split")?;
    let text = receiver(&args, "split")?;
    let limit = if limit < 0 { usize::MAX } else { limit as usize };
    let parts: Vec<Value> = match sep {
        Some(sep) => text
            .splitn(limit.saturating_add(1), sep.as_str())
            .map(Value::from)
            .collect(),
        None => {
            let mut parts = Vec::new();
            let mut rest = text.trim_start();
            while !rest.is_empty() {
                if parts.len() == limit {
                    parts.push(Value::from(rest));
                    break;
                }
                let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
                parts.push(Value::from(&rest[..end]));
                rest = rest[end..].trim_start();
            }
            parts
        }
    };
    Ok(Value::list(parts))
}

fn rsplit(_cx: &mut dyn CallContext, args: Vec<Value>, mut kwargs: Kwargs) -> PyResult<Value> {
    let (sep, limit) = split_arguments(&args, &mut kwargs, "rsplit")?;
    let text = receiver(&args, "rsplit")?;
    let limit = if limit < 0 { usize::MAX } else { limit as usize };
    let mut parts: Vec<Value> = match sep {
        Some(sep) => text
            .rsplitn(limit.saturating_add(1), sep.as_str())
            .map(Value::from)
            .collect(),
        None => {
            let mut parts = Vec::new();
            let mut rest = text.trim_end();
            while !rest.is_empty() {
                if parts.len() == limit {
                    parts.push(Value::from(rest));
                    break;
                }
                let start = rest.rfind(char::is_whitespace).map_or(0, |at| at + 1);
                parts.push(Value::from(&rest[start..]));
                rest = rest[..start].trim_end();
            }
            parts
        }
    };
    parts.reverse();
    Ok(Value::list(parts))
}

fn splitlines(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("splitlines", &kwargs)?;
    check_method_arity("splitlines", &args, 0, 0)?;
    let text = receiver(&args, "splitlines")?;
    Ok(Value::list(text.lines().map(Value::from).collect()))
}

fn join(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("join", &kwargs)?;
    check_method_arity("join", &args, 1, 1)?;
    let separator = receiver(&args, "join")?;
    let items = args[1].collect(cx)?;
    let mut out = String::new();
    for (index, item) in items.iter().enumerate() {
        let Value::Str(part) = item else {
            return Err(PyException::type_error(format!(
                "sequence item {index}: expected str instance, {} found",
                item.type_name()
            )));
        };
        if index > 0 {
            out.push_str(&separator);
        }
        out.push_str(part);
    }
    Ok(Value::from(out))
}

fn replace(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("replace", &kwargs)?;
    check_method_arity("replace", &args, 2, 3)?;
    let text = receiver(&args, "replace")?;
    let old = str_arg(&args[1], "replace")?;
    let new = str_arg(&args[2], "replace")?;
    let replaced = match args.get(3) {
        Some(count) => {
            let count = count.expect_index("count")?;
            if count < 0 {
                text.replace(old, new)
            } else {
                text.replacen(old, new, count as usize)
            }
        }
        None => text.replace(old, new),
    };
    Ok(Value::from(replaced))
}

/// Shared body of `find`, `rfind`, `index` and `rindex`: a char index.
fn search(args: &[Value], kwargs: &Kwargs, name: &str, from_right: bool) -> PyResult<Option<usize>> {
    reject_kwargs(name, kwargs)?;
    check_method_arity(name, args, 1, 3)?;
    let text = receiver(args, name)?;
    let needle = str_arg(&args[1], name)?;
    let (start, end) = window(&text, args.get(2), args.get(3))?;
    let haystack = &text[start..end];
    let found = if from_right { haystack.rfind(needle) } else { haystack.find(needle) };
    Ok(found.map(|offset| char_count(&text[..start + offset])))
}

fn find(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let found = search(&args, &kwargs, "find", false)?;
    Ok(Value::Int(found.map_or(-1, |at| at as i64)))
}

fn rfind(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let found = search(&args, &kwargs, "rfind", true)?;
    Ok(Value::Int(found.map_or(-1, |at| at as i64)))
}

fn index(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    search(&args, &kwargs, "index", false)?
        .map(Value::from)
        .ok_or_else(|| PyException::value_error("substring not found"))
}

fn rindex(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    search(&args, &kwargs, "rindex", true)?
        .map(Value::from)
        .ok_or_else(|| PyException::value_error("substring not found"))
}

fn count(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("count", &kwargs)?;
    check_method_arity("count", &args, 1, 3)?;
    let text = receiver(&args, "count")?;
    let needle = str_arg(&args[1], "count")?;
    let (start, end) = window(&text, args.get(2), args.get(3))?;
    let haystack = &text[start..end];
    let total = if needle.is_empty() {
        char_count(haystack) + 1
    } else {
        haystack.matches(needle).count()
    };
    Ok(Value::from(total))
}

fn affix_test(args: Vec<Value>, kwargs: Kwargs, name: &str, test: fn(&str, &str) -> bool) -> PyResult<Value> {
    reject_kwargs(name, &kwargs)?;
    check_method_arity(name, &args, 1, 3)?;
    let text = receiver(&args, name)?;
    let (start, end) = window(&text, args.get(2), args.get(3))?;
    let haystack = &text[start..end];
    let candidates = match &args[1] {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    for candidate in &candidates {
        let affix = candidate.as_str().ok_or_else(|| {
            PyException::type_error(format!(
                "{name} first arg must be str or a tuple of str, not {}",
                candidate.type_name()
            ))
        })?;
        if test(haystack, affix) {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn startswith(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    affix_test(args, kwargs, "startswith", |text, affix| text.starts_with(affix))
}

fn endswith(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    affix_test(args, kwargs, "endswith", |text, affix| text.ends_with(affix))
}

fn format_method(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let template = receiver(&args, "format")?;
    Ok(Value::from(format::format_string(cx, &template, &args[1..], &kwargs)?))
}

fn justify(args: Vec<Value>, kwargs: Kwargs, name: &str) -> PyResult<Value> {
    reject_kwargs(name, &kwargs)?;
    check_method_arity(name, &args, 1, 2)?;
    let text = receiver(&args, name)?;
    let width = args[1].expect_index("width")?.max(0) as usize;
    let fill = match args.get(2) {
        Some(value) => {
            let fill = str_arg(value, name)?;
            let mut chars = fill.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => ch,
                _ => {
                    return Err(PyException::type_error(
                        "The fill character must be exactly one character long",
                    ));
                }
            }
        }
        None => ' ',
    };
    let len = char_count(&text);
    if len >= width {
        return Ok(Value::Str(text));
    }
    let padding = width - len;
    let run = |count: usize| fill.to_string().repeat(count);
    let padded = match name {
        "ljust" => format!("{text}{}", run(padding)),
        "rjust" => format!("{}{text}", run(padding)),
        _ => {
            let left = padding / 2 + (padding & width & 1);
            format!("{}{text}{}", run(left), run(padding - left))
        }
    };
    Ok(Value::from(padded))
}

fn center(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    justify(args, kwargs, "center")
}

fn ljust(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    justify(args, kwargs, "ljust")
}

fn rjust(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    justify(args, kwargs, "rjust")
}

fn zfill(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("zfill", &kwargs)?;
    check_method_arity("zfill", &args, 1, 1)?;
    let text = receiver(&args, "zfill")?;
    let width = args[1].expect_index("width")?.max(0) as usize;
    let len = char_count(&text);
    if len >= width {
        return Ok(Value::Str(text));
    }
    let zeros = "0".repeat(width - len);
    let filled = match text.strip_prefix(['+', '-']) {
        Some(rest) => format!("{}{zeros}{rest}", &text[..1]),
        None => format!("{zeros}{text}"),
    };
    Ok(Value::from(filled))
}

fn partition(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("partition", &kwargs)?;
    check_method_arity("partition", &args, 1, 1)?;
    let text = receiver(&args, "partition")?;
    let sep = str_arg(&args[1], "partition")?;
    if sep.is_empty() {
        return Err(PyException::value_error("empty separator"));
    }
    let parts = match text.split_once(sep) {
        Some((head, tail)) => [Value::from(head), args[1].clone(), Value::from(tail)],
        None => [Value::Str(text.clone()), Value::from(""), Value::from("")],
    };
    Ok(Value::tuple(parts.to_vec()))
}

pub(crate) const METHODS: &[(&str, NativeFn)] = &[
    ("upper", upper),
    ("lower", lower),
    ("swapcase", swapcase),
    ("title", title),
    ("capitalize", capitalize),
    ("isdigit", isdigit),
    ("isalpha", isalpha),
    ("isalnum", isalnum),
    ("isspace", isspace),
    ("isupper", isupper),
    ("islower", islower),
    ("strip", strip),
    ("lstrip", lstrip),
    ("rstrip", rstrip),
    ("split", split),
    ("rsplit", rsplit),
    ("splitlines", splitlines),
    ("join", join),
    ("replace", replace),
    ("find", find),
    ("rfind", rfind),
    ("index", index),
    ("rindex", rindex),
    ("count", count),
    ("startswith", startswith),
    ("endswith", endswith),
    ("format", format_method),
    ("center", center),
    ("ljust", ljust),
    ("rjust", rjust),
    ("zfill", zfill),
    ("partition", partition),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::tests::NoCalls;

    fn call(method: NativeFn, receiver: &str, args: &[Value]) -> String {
        let mut cx = NoCalls::new();
        let mut full = vec![Value::from(receiver)];
        full.extend_from_slice(args);
        match method(&mut cx, full, Vec::new()) {
            Ok(value) => value.basic_repr(),
            Err(error) => error.summary(),
        }
    }

    #[test]
    fn split_and_join() {
        assert_eq!(call(split, "  a b  c ", &[]), "['a', 'b', 'c']");
        assert_eq!(call(split, "a,b,,c", &[Value::from(",")]), "['a', 'b', '', 'c']");
        assert_eq!(call(split, "a b c", &[Value::None, Value::Int(1)]), "['a', 'b c']");
        assert_eq!(call(rsplit, "a b c", &[Value::None, Value::Int(1)]), "['a b', 'c']");
        let parts = Value::list(vec![Value::from("x"), Value::from("y")]);
        assert_eq!(call(join, "-", &[parts]), "'x-y'");
        assert_eq!(
            call(join, "-", &[Value::list(vec![Value::Int(1)])]),
            "TypeError: sequence item 0: expected str instance, int found"
        );
    }

    #[test]
    fn searching_counts_characters() {
        assert_eq!(call(find, "héllo", &[Value::from("l")]), "2");
        assert_eq!(call(rfind, "héllo", &[Value::from("l")]), "3");
        assert_eq!(call(find, "abc", &[Value::from("z")]), "-1");
        assert_eq!(call(index, "abc", &[Value::from("z")]), "ValueError: substring not found");
        assert_eq!(call(count, "banana", &[Value::from("an")]), "2");
        assert_eq!(call(startswith, "banana", &[Value::from("na"), Value::Int(2)]), "True");
    }

    #[test]
    fn case_and_padding() {
        assert_eq!(call(title, "hello wORLD", &[]), "'Hello World'");
        assert_eq!(call(capitalize, "hELLO", &[]), "'Hello'");
        assert_eq!(call(center, "ab", &[Value::Int(6), Value::from("*")]), "'**ab**'");
        assert_eq!(call(zfill, "-42", &[Value::Int(5)]), "'-0042'");
        assert_eq!(call(strip, "xxhixx", &[Value::from("x")]), "'hi'");
        assert_eq!(call(isdigit, "", &[]), "False");
    }

    #[test]
    fn indexing_by_character() {
        let text: Rc<str> = Rc::from("héllo");
        assert_eq!(get_item(&text, &Value::Int(1)).unwrap().basic_repr(), "'é'");
        assert_eq!(get_item(&text, &Value::Int(-1)).unwrap().basic_repr(), "'o'");
        assert_eq!(
            get_item(&text, &Value::Int(9)).unwrap_err().summary(),
            "IndexError: string index out of range"
        );
    }
}
