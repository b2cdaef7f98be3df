//! `repr()`, `str.format`, `%` formatting and format specs.

use std::cell::RefCell;
use std::fmt::Write as _;

use crate::num::BigInt;
use crate::runtime::class::lookup_special;
use crate::runtime::exception::{PyException, PyResult, exception_args};
use crate::runtime::object::{CallContext, HasAttr, Sequence, call_method, str_of};
use crate::runtime::value::{Kwargs, Value};

thread_local! {
    /// Containers whose repr is in progress, for `[...]` on cycles.
    static ACTIVE: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

struct ReprGuard(usize);

impl ReprGuard {
    fn enter(value: &Value) -> Option<Self> {
        let id = value.identity();
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if active.contains(&id) {
                None
            } else {
                active.push(id);
                Some(Self(id))
            }
        })
    }
}

impl Drop for ReprGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.borrow_mut().retain(|id| *id != self.0));
    }
}

/// Python-style `repr` of a float.
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    // Shortest round-tripping digits, then Python's choice of notation.
    let scientific = format!("{value:e}");
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if (-4..16).contains(&exponent) {
        if exponent < 0 {
            out.push_str("0.");
            out.push_str(&"0".repeat((-exponent - 1) as usize));
            out.push_str(&digits);
        } else {
            let point = exponent as usize + 1;
            if digits.len() <= point {
                out.push_str(&digits);
                out.push_str(&"0".repeat(point - digits.len()));
                out.push_str(".0");
            } else {
                out.push_str(&digits[..point]);
                out.push('.');
                out.push_str(&digits[point..]);
            }
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        let _ = write!(out, "e{}{:02}", if exponent < 0 { '-' } else { '+' }, exponent.abs());
    }
    out
}

pub fn str_repr(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch == quote => {
                out.push('\\');
                out.push(ch);
            }
            ch if (ch as u32) < 0x20 || ch as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", ch as u32);
            }
            ch => out.push(ch),
        }
    }
    out.push(quote);
    out
}

fn address(value: &Value) -> String {
    format!("0x{:x}", value.identity())
}

struct Printer<'a> {
    cx: Option<&'a mut dyn CallContext>,
}

impl Printer<'_> {
    fn join(&mut self, items: &[Value]) -> PyResult<String> {
        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            parts.push(self.repr(item)?);
        }
        Ok(parts.join(", "))
    }

    fn instance(&mut self, value: &Value) -> PyResult<String> {
        if let Some(cx) = self.cx.as_deref_mut() {
            return match call_method(cx, value, "__repr__", Vec::new())? {
                Some(Value::Str(text)) => Ok(text.to_string()),
                Some(other) => Err(PyException::type_error(format!(
                    "__repr__ returned non-string (type {})",
                    other.type_name()
                ))),
                None => Ok(default_object_repr(value)),
            };
        }
        if let Value::Instance(instance) = value
            && instance.class.exception_kind().is_some()
        {
            return Ok(exception_repr(&instance.class.name, &exception_args(value)));
        }
        Ok(default_object_repr(value))
    }

    fn repr(&mut self, value: &Value) -> PyResult<String> {
        Ok(match value {
            Value::None => "None".to_string(),
            Value::NotImplemented => "NotImplemented".to_string(),
            Value::Ellipsis => "Ellipsis".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(number) => number.to_string(),
            Value::Big(number) => number.to_string(),
            Value::Float(number) => float_repr(*number),
            Value::Str(text) => str_repr(text),
            Value::List(items) => {
                let Some(_guard) = ReprGuard::enter(value) else {
                    return Ok("[...]".to_string());
                };
                let items = items.borrow().clone();
                format!("[{}]", self.join(&items)?)
            }
            Value::Tuple(items) if items.len() == 1 => format!("({},)", self.repr(&items[0])?),
            Value::Tuple(items) => format!("({})", self.join(items)?),
            Value::Dict(dict) => {
                let Some(_guard) = ReprGuard::enter(value) else {
                    return Ok("{...}".to_string());
                };
                let pairs = dict.borrow().items();
                let mut parts = Vec::with_capacity(pairs.len());
                for (key, item) in &pairs {
                    parts.push(format!("{}: {}", self.repr(key)?, self.repr(item)?));
                }
                format!("{{{}}}", parts.join(", "))
            }
            Value::Set(set) => {
                let items = set.borrow().items();
                if items.is_empty() {
                    "set()".to_string()
                } else {
                    format!("{{{}}}", self.join(&items)?)
                }
            }
            Value::FrozenSet(set) => {
                let items = set.items();
                if items.is_empty() {
                    "frozenset()".to_string()
                } else {
                    format!("frozenset({{{}}})", self.join(&items)?)
                }
            }
            Value::Range(range) if range.step == 1 => format!("range({}, {})", range.start, range.stop),
            Value::Range(range) => format!("range({}, {}, {})", range.start, range.stop, range.step),
            Value::Slice(slice) => format!(
                "slice({}, {}, {})",
                self.repr(&slice.start)?,
                self.repr(&slice.stop)?,
                self.repr(&slice.step)?
            ),
            Value::Function(function) => format!("<function {} at {}>", function.qualname, address(value)),
            Value::Builtin(builtin) => match &builtin.owner {
                Some(owner) => format!("<method '{}' of '{owner}' objects>", builtin.name),
                None => format!("<built-in function {}>", builtin.name),
            },
            Value::Method(method) => {
                let name = match &method.function {
                    Value::Function(function) => function.qualname.to_string(),
                    Value::Builtin(builtin) => builtin.name.to_string(),
                    other => other.type_name(),
                };
                format!("<bound method {name} of {}>", self.repr(&method.receiver)?)
            }
            Value::Generator(generator) => {
                format!("<generator object {} at {}>", generator.borrow().qualname, address(value))
            }
            Value::Iterator(iterator) => {
                format!("<{} object at {}>", iterator.borrow().type_name(), address(value))
            }
            Value::DictView(view) => {
                format!("{}([{}])", view.type_name(), self.join(&view.snapshot())?)
            }
            Value::Type(class) => format!("<class '{}'>", class.display_name()),
            Value::Instance(_) => self.instance(value)?,
            Value::Module(module) => match module.get("__file__") {
                Some(Value::Str(file)) => format!("<module '{}' from '{file}'>", module.name),
                _ => format!("<module '{}' (built-in)>", module.name),
            },
            Value::Property(_) => format!("<property object at {}>", address(value)),
            Value::ClassMethod(_) => format!("<classmethod object at {}>", address(value)),
            Value::StaticMethod(_) => format!("<staticmethod object at {}>", address(value)),
            Value::Super(sup) => format!(
                "<super: <class '{}'>, <{} object>>",
                sup.start.name,
                sup.receiver_type.name
            ),
            Value::Cell(_) => format!("<cell at {}>", address(value)),
        })
    }
}

pub fn default_object_repr(value: &Value) -> String {
    match value {
        Value::Instance(instance) => {
            format!("<{} object at {}>", instance.class.display_name(), address(value))
        }
        other => format!("<{} object at {}>", other.type_name(), address(other)),
    }
}

pub fn exception_repr(name: &str, args: &[Value]) -> String {
    match args {
        [single] => format!("{name}({})", single.basic_repr()),
        many => {
            let parts: Vec<String> = many.iter().map(Value::basic_repr).collect();
            format!("{name}({})", parts.join(", "))
        }
    }
}

/// `repr(value)`. Without a context user `__repr__` methods are not run.
pub fn repr(cx: Option<&mut dyn CallContext>, value: &Value) -> PyResult<String> {
    Printer { cx }.repr(value)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatSpec {
    pub fill: Option<char>,
    pub align: Option<char>,
    pub sign: Option<char>,
    pub alternate: bool,
    pub zero: bool,
    pub width: usize,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub kind: Option<char>,
}

impl FormatSpec {
    /// Parses `[[fill]align][sign][#][0][width][,|_][.precision][type]`.
    pub fn parse(spec: &str) -> PyResult<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let mut parsed = Self::default();
        let mut at = 0;
        let is_align = |ch: char| matches!(ch, '<' | '>' | '^' | '=');
        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = Some(chars[0]);
            parsed.align = Some(chars[1]);
            at = 2;
        } else if chars.first().copied().is_some_and(is_align) {
            parsed.align = Some(chars[0]);
            at = 1;
        }
        if let Some(&sign @ ('+' | '-' | ' ')) = chars.get(at) {
            parsed.sign = Some(sign);
            at += 1;
        }
        if chars.get(at) == Some(&'#') {
            parsed.alternate = true;
            at += 1;
        }
        if chars.get(at) == Some(&'0') {
            parsed.zero = true;
            at += 1;
        }
        let digits = |at: &mut usize| {
            let start = *at;
            while chars.get(*at).is_some_and(char::is_ascii_digit) {
                *at += 1;
            }
            chars[start..*at].iter().collect::<String>().parse::<usize>().ok()
        };
        parsed.width = digits(&mut at).unwrap_or(0);
        if let Some(&group @ (',' | '_')) = chars.get(at) {
            parsed.grouping = Some(group);
            at += 1;
        }
        if chars.get(at) == Some(&'.') {
            at += 1;
            parsed.precision =
                Some(digits(&mut at).ok_or_else(|| PyException::value_error("Format specifier missing precision"))?);
        }
        if let Some(&kind) = chars.get(at) {
            parsed.kind = Some(kind);
            at += 1;
        }
        if at != chars.len() {
            return Err(PyException::value_error("Invalid format specifier"));
        }
        Ok(parsed)
    }

    fn pad(&self, body: String, sign: &str, numeric: bool) -> String {
        let length = body.chars().count() + sign.chars().count();
        if length >= self.width {
            return format!("{sign}{body}");
        }
        let padding = self.width - length;
        let (fill, align) = match (self.fill, self.align) {
            (fill, Some(align)) => (fill.unwrap_or(' '), align),
            (_, None) if self.zero && numeric => ('0', '='),
            (_, None) if numeric => (' ', '>'),
            _ => (' ', '<'),
        };
        let run = |count: usize| fill.to_string().repeat(count);
        match align {
            '<' => format!("{sign}{body}{}", run(padding)),
            '^' => format!("{}{sign}{body}{}", run(padding / 2), run(padding - padding / 2)),
            '=' => format!("{sign}{}{body}", run(padding)),
            _ => format!("{}{sign}{body}", run(padding)),
        }
    }

    fn sign_for(&self, negative: bool) -> &'static str {
        match (negative, self.sign) {
            (true, _) => "-",
            (false, Some('+')) => "+",
            (false, Some(' ')) => " ",
            _ => "",
        }
    }
}

fn group_digits(digits: &str, separator: char, every: usize) -> String {
    let (whole, rest) = match digits.find('.') {
        Some(point) => digits.split_at(point),
        None => (digits, ""),
    };
    let mut out = String::new();
    for (index, ch) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % every == 0 {
            out.push(separator);
        }
        out.push(ch);
    }
    out.push_str(rest);
    out
}

fn format_int(value: &BigInt, spec: &FormatSpec) -> PyResult<String> {
    let magnitude = value.abs();
    let (radix, prefix) = match spec.kind {
        None | Some('d' | 'n') => (10, ""),
        Some('x') => (16, "0x"),
        Some('X') => (16, "0X"),
        Some('o') => (8, "0o"),
        Some('b') => (2, "0b"),
        Some('c') => {
            let code = value
                .to_u64()
                .and_then(|code| u32::try_from(code).ok())
                .and_then(char::from_u32)
                .ok_or_else(|| PyException::overflow("%c arg not in range(0x110000)"))?;
            return Ok(spec.pad(code.to_string(), "", false));
        }
        Some(kind @ ('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%')) => {
            let spec = FormatSpec {
                kind: Some(kind),
                ..spec.clone()
            };
            return format_float(value.to_f64(), &spec);
        }
        Some(kind) => {
            return Err(PyException::value_error(format!(
                "Unknown format code '{kind}' for object of type 'int'"
            )));
        }
    };
    let mut digits = magnitude.to_str_radix(radix);
    if spec.kind == Some('X') {
        digits = digits.to_uppercase();
    }
    if let Some(separator) = spec.grouping {
        digits = group_digits(&digits, separator, if radix == 10 { 3 } else { 4 });
    }
    let sign = spec.sign_for(value.is_negative());
    let sign = if spec.alternate { format!("{sign}{prefix}") } else { sign.to_string() };
    Ok(spec.pad(digits, &sign, true))
}

/// Formats with `precision` significant digits, `%g` style.
fn general(value: f64, precision: usize, upper: bool, alternate: bool) -> String {
    let precision = precision.max(1);
    if value == 0.0 {
        return if alternate { format!("{:.*}", precision - 1, 0.0) } else { "0".to_string() };
    }
    let scientific = format!("{:.*e}", precision - 1, value);
    let exponent: i32 = scientific
        .split_once('e')
        .and_then(|(_, exponent)| exponent.parse().ok())
        .unwrap_or(0);
    let strip = |text: String| {
        if alternate || !text.contains('.') {
            text
        } else {
            text.trim_end_matches('0').trim_end_matches('.').to_string()
        }
    };
    if exponent >= -4 && exponent < precision as i32 {
        strip(format!("{:.*}", (precision as i32 - 1 - exponent) as usize, value))
    } else {
        let (mantissa, _) = scientific.split_once('e').unwrap_or((&scientific, ""));
        let mantissa = strip(mantissa.to_string());
        let marker = if upper { 'E' } else { 'e' };
        format!("{mantissa}{marker}{}{:02}", if exponent < 0 { '-' } else { '+' }, exponent.abs())
    }
}

fn exponent_form(value: f64, precision: usize, upper: bool) -> String {
    let scientific = format!("{:.*e}", precision, value);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let marker = if upper { 'E' } else { 'e' };
    format!("{mantissa}{marker}{}{:02}", if exponent < 0 { '-' } else { '+' }, exponent.abs())
}

fn format_float(value: f64, spec: &FormatSpec) -> PyResult<String> {
    let negative = value.is_sign_negative() && !value.is_nan();
    let magnitude = value.abs();
    let upper = matches!(spec.kind, Some('E' | 'F' | 'G'));
    let mut body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        if upper { text.to_uppercase() } else { text.to_string() }
    } else {
        match spec.kind {
            Some('f' | 'F') => format!("{:.*}", spec.precision.unwrap_or(6), magnitude),
            Some('e' | 'E') => exponent_form(magnitude, spec.precision.unwrap_or(6), upper),
            Some('g' | 'G') => general(magnitude, spec.precision.unwrap_or(6), upper, spec.alternate),
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            None => match spec.precision {
                Some(precision) => general(magnitude, precision, false, spec.alternate),
                None => float_repr(magnitude),
            },
            Some(kind) => {
                return Err(PyException::value_error(format!(
                    "Unknown format code '{kind}' for object of type 'float'"
                )));
            }
        }
    };
    if let Some(separator) = spec.grouping {
        body = group_digits(&body, separator, 3);
    }
    Ok(spec.pad(body, spec.sign_for(negative), true))
}

/// `format(value, spec)`.
pub fn format_value(cx: &mut dyn CallContext, value: &Value, spec: &str) -> PyResult<String> {
    if let Value::Instance(_) = value
        && lookup_special(value, "__format__").is_some()
    {
        return match call_method(cx, value, "__format__", vec![Value::from(spec)])? {
            Some(Value::Str(text)) => Ok(text.to_string()),
            _ => Err(PyException::type_error("__format__ must return a str")),
        };
    }
    if spec.is_empty() {
        return str_of(cx, value);
    }
    let parsed = FormatSpec::parse(spec)?;
    match value {
        Value::Int(_) | Value::Big(_) | Value::Bool(_) => {
            format_int(&value.to_bigint().unwrap_or_default(), &parsed)
        }
        Value::Float(number) => format_float(*number, &parsed),
        Value::Str(text) => {
            if !matches!(parsed.kind, None | Some('s')) {
                return Err(PyException::value_error(format!(
                    "Unknown format code '{}' for object of type 'str'",
                    parsed.kind.unwrap_or('s')
                )));
            }
            let body: String = match parsed.precision {
                Some(precision) => text.chars().take(precision).collect(),
                None => text.to_string(),
            };
            Ok(parsed.pad(body, "", false))
        }
        other => Err(PyException::type_error(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        ))),
    }
}

fn convert(cx: &mut dyn CallContext, value: &Value, conversion: Option<char>) -> PyResult<Value> {
    Ok(match conversion {
        None => value.clone(),
        Some('r' | 'a') => Value::from(repr(Some(cx), value)?),
        Some('s') => Value::from(str_of(cx, value)?),
        Some(other) => {
            return Err(PyException::value_error(format!(
                "Unknown conversion specifier {other}"
            )));
        }
    })
}

/// Resolves `0`, `name`, `name.attr` and `name[key]` field references.
fn resolve_field(
    cx: &mut dyn CallContext,
    field: &str,
    args: &[Value],
    kwargs: &Kwargs,
    auto: &mut Option<usize>,
) -> PyResult<Value> {
    let split = field.find(['.', '[']).unwrap_or(field.len());
    let (head, mut rest) = field.split_at(split);
    let mut value = if head.is_empty() {
        let Some(next) = auto.as_mut() else {
            return Err(PyException::value_error(
                "cannot switch from manual field specification to automatic field numbering",
            ));
        };
        let index = *next;
        *next += 1;
        args.get(index).cloned().ok_or_else(|| {
            PyException::index_error(format!(
                "Replacement index {index} out of range for positional args tuple"
            ))
        })?
    } else if let Ok(index) = head.parse::<usize>() {
        if auto.is_some_and(|next| next > 0) {
            return Err(PyException::value_error(
                "cannot switch from automatic field numbering to manual field specification",
            ));
        }
        *auto = None;
        args.get(index).cloned().ok_or_else(|| {
            PyException::index_error(format!(
                "Replacement index {index} out of range for positional args tuple"
            ))
        })?
    } else {
        kwargs
            .iter()
            .find(|(name, _)| &**name == head)
            .map(|(_, value)| value.clone())
            .ok_or_else(|| PyException::key_error(Value::from(head)))?
    };
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix('.') {
            let end = tail.find(['.', '[']).unwrap_or(tail.len());
            value = value.get_attr(cx, &tail[..end])?;
            rest = &tail[end..];
        } else if let Some(tail) = rest.strip_prefix('[') {
            let end = tail
                .find(']')
                .ok_or_else(|| PyException::value_error("Missing ']' in format string"))?;
            let key = &tail[..end];
            let key = key.parse::<i64>().map(Value::Int).unwrap_or_else(|_| Value::from(key));
            value = value.get_item(cx, &key)?;
            rest = &tail[end + 1..];
        } else {
            return Err(PyException::value_error(
                "Only '.' or '[' may follow ']' in format field specifier",
            ));
        }
    }
    Ok(value)
}

/// `template.format(*args, **kwargs)`.
pub fn format_string(cx: &mut dyn CallContext, template: &str, args: &[Value], kwargs: &Kwargs) -> PyResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut auto = Some(0);
    let mut chars = template.char_indices().peekable();
    while let Some((start, ch)) = chars.next() {
        match ch {
            '{' if chars.peek().map(|&(_, next)| next) == Some('{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek().map(|&(_, next)| next) == Some('}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(PyException::value_error("Single '}' encountered in format string")),
            '{' => {
                let mut depth = 1;
                let mut end = None;
                for (index, inner) in chars.by_ref() {
                    match inner {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                end = Some(index);
                                break;
                            }
                        }
                        _ => {}
                    }
                }
                let end = end.ok_or_else(|| PyException::value_error("Single '{' encountered in format string"))?;
                let body = &template[start + 1..end];
                let (field, spec) = match body.find(':') {
                    Some(colon) => (&body[..colon], &body[colon + 1..]),
                    None => (body, ""),
                };
                let (field, conversion) = match field.split_once('!') {
                    Some((field, conversion)) => {
                        let mut letters = conversion.chars();
                        let letter = letters.next();
                        if letter.is_none() || letters.next().is_some() {
                            return Err(PyException::value_error(
                                "expected ':' after conversion specifier",
                            ));
                        }
                        (field, letter)
                    }
                    None => (field, None),
                };
                let value = resolve_field(cx, field, args, kwargs, &mut auto)?;
                let value = convert(cx, &value, conversion)?;
                let spec = if spec.contains('{') {
                    format_string(cx, spec, args, kwargs)?
                } else {
                    spec.to_string()
                };
                out.push_str(&format_value(cx, &value, &spec)?);
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

enum PercentArgs<'a> {
    Positional(Vec<Value>, usize),
    Mapping(&'a Value),
}

impl PercentArgs<'_> {
    fn next(&mut self) -> PyResult<Value> {
        match self {
            Self::Positional(items, index) => {
                let item = items
                    .get(*index)
                    .cloned()
                    .ok_or_else(|| PyException::type_error("not enough arguments for format string"))?;
                *index += 1;
                Ok(item)
            }
            Self::Mapping(value) => Ok((*value).clone()),
        }
    }
}

fn percent_number(cx: &mut dyn CallContext, value: &Value, kind: char) -> PyResult<Value> {
    if value.is_number() {
        return Ok(value.clone());
    }
    if let Value::Instance(_) = value {
        for hook in ["__index__", "__int__", "__float__"] {
            if let Some(result) = call_method(cx, value, hook, Vec::new())? {
                return Ok(result);
            }
        }
    }
    Err(PyException::type_error(format!(
        "%{kind} format: a real number is required, not {}",
        value.type_name()
    )))
}

/// `template % args`.
pub fn percent_format(cx: &mut dyn CallContext, template: &str, args: &Value) -> PyResult<String> {
    let mut source = match args {
        Value::Tuple(items) => PercentArgs::Positional(items.to_vec(), 0),
        Value::Dict(_) => PercentArgs::Mapping(args),
        single => PercentArgs::Positional(vec![single.clone()], 0),
    };
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut at = 0;
    while at < chars.len() {
        if chars[at] != '%' {
            out.push(chars[at]);
            at += 1;
            continue;
        }
        at += 1;
        let incomplete = || PyException::value_error("incomplete format");
        let mut mapped = None;
        if chars.get(at) == Some(&'(') {
            let close = chars[at..]
                .iter()
                .position(|&ch| ch == ')')
                .ok_or_else(|| PyException::value_error("incomplete format key"))?;
            let key: String = chars[at + 1..at + close].iter().collect();
            let PercentArgs::Mapping(mapping) = &source else {
                return Err(PyException::type_error("format requires a mapping"));
            };
            mapped = Some(mapping.get_item(cx, &Value::from(key))?);
            at += close + 1;
        }
        let mut spec = FormatSpec::default();
        while let Some(&flag @ ('-' | '0' | '+' | ' ' | '#')) = chars.get(at) {
            match flag {
                '-' => spec.align = Some('<'),
                '0' => spec.zero = true,
                '#' => spec.alternate = true,
                sign => spec.sign = Some(sign),
            }
            at += 1;
        }
        if chars.get(at) == Some(&'*') {
            spec.width = source.next()?.expect_index("* wants int")?.max(0) as usize;
            at += 1;
        } else {
            let start = at;
            while chars.get(at).is_some_and(char::is_ascii_digit) {
                at += 1;
            }
            spec.width = chars[start..at].iter().collect::<String>().parse().unwrap_or(0);
        }
        if chars.get(at) == Some(&'.') {
            at += 1;
            let start = at;
            while chars.get(at).is_some_and(char::is_ascii_digit) {
                at += 1;
            }
            spec.precision = Some(chars[start..at].iter().collect::<String>().parse().unwrap_or(0));
        }
        let kind = *chars.get(at).ok_or_else(incomplete)?;
        at += 1;
        if kind == '%' {
            out.push('%');
            continue;
        }
        let value = match mapped.take() {
            Some(value) => value,
            None => source.next()?,
        };
        if spec.align == Some('<') {
            spec.zero = false;
        }
        let text = match kind {
            's' | 'r' | 'a' => {
                let text = if kind == 's' { str_of(cx, &value)? } else { repr(Some(cx), &value)? };
                let text = match spec.precision {
                    Some(precision) => text.chars().take(precision).collect(),
                    None => text,
                };
                spec.zero = false;
                spec.pad(text, "", false)
            }
            'd' | 'i' | 'u' | 'x' | 'X' | 'o' => {
                let number = percent_number(cx, &value, kind)?;
                let integer = match &number {
                    Value::Float(float) => BigInt::from_f64(*float)
                        .ok_or_else(|| PyException::overflow("cannot convert float infinity to integer"))?,
                    other => other.to_bigint().unwrap_or_default(),
                };
                spec.kind = match kind {
                    'x' | 'X' | 'o' => Some(kind),
                    _ => None,
                };
                let mut text = format_int(&integer, &spec)?;
                if let Some(precision) = spec.precision {
                    let digits = integer.abs().to_str_radix(match kind {
                        'x' | 'X' => 16,
                        'o' => 8,
                        _ => 10,
                    });
                    if digits.len() < precision {
                        text = text.replacen(&digits, &format!("{}{digits}", "0".repeat(precision - digits.len())), 1);
                    }
                }
                text
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let number = percent_number(cx, &value, kind)?;
                spec.kind = Some(kind);
                format_float(number.to_f64().unwrap_or_default(), &spec)?
            }
            'c' => match &value {
                Value::Str(text) if text.chars().count() == 1 => spec.pad(text.to_string(), "", false),
                other => {
                    spec.kind = Some('c');
                    format_int(
                        &other
                            .to_bigint()
                            .ok_or_else(|| PyException::type_error("%c requires int or char"))?,
                        &spec,
                    )?
                }
            },
            other => {
                return Err(PyException::value_error(format!(
                    "unsupported format character '{other}' ({:#x}) at index {}",
                    other as u32,
                    at - 1
                )));
            }
        };
        out.push_str(&text);
    }
    if let PercentArgs::Positional(items, used) = &source
        && *used < items.len()
        && !matches!(args, Value::Dict(_))
    {
        return Err(PyException::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::tests::NoCalls;
    use pretty_assertions::assert_eq;

    #[test]
    fn float_reprs_follow_python_notation() {
        assert_eq!(float_repr(1.0), "1.0");
        assert_eq!(float_repr(3.5), "3.5");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(123456789.0), "123456789.0");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(0.00001), "1e-05");
        assert_eq!(float_repr(-2.5e-10), "-2.5e-10");
        assert_eq!(float_repr(f64::INFINITY), "inf");
    }

    #[test]
    fn container_reprs() {
        let items = Value::list(vec![Value::Int(1), Value::from("a'b"), Value::None]);
        assert_eq!(items.basic_repr(), "[1, \"a'b\", None]");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).basic_repr(), "(1,)");
        assert_eq!(Value::range(0, 10, 2).basic_repr(), "range(0, 10, 2)");
        if let Value::List(inner) = &items {
            inner.borrow_mut().push(items.clone());
        }
        assert_eq!(items.basic_repr(), "[1, \"a'b\", None, [...]]");
    }

    #[test]
    fn str_format_fields() {
        let mut cx = NoCalls::new();
        let args = [Value::Int(3), Value::Float(2.5)];
        let kwargs: Kwargs = vec![("name".into(), Value::from("x"))];
        let text = format_string(&mut cx, "{} {:>4} {name!r} {{}}", &args, &kwargs).unwrap();
        assert_eq!(text, "3  2.5 'x' {}");
        let text = format_string(&mut cx, "{1}-{0}:{0:05d}|{1:.2f}", &args, &kwargs).unwrap();
        assert_eq!(text, "2.5-3:00003|2.50");
        let error = format_string(&mut cx, "{} {1}", &args, &kwargs).unwrap_err();
        assert_eq!(
            error.summary(),
            "ValueError: cannot switch from automatic field numbering to manual field specification"
        );
        let grouped = format_string(&mut cx, "{:,}|{:x}|{:#b}", &[Value::Int(1234567), Value::Int(255), Value::Int(5)], &kwargs).unwrap();
        assert_eq!(grouped, "1,234,567|ff|0b101");
    }

    #[test]
    fn percent_directives() {
        let mut cx = NoCalls::new();
        let args = Value::tuple(vec![Value::from("ab"), Value::Int(42), Value::Float(3.14159)]);
        let text = percent_format(&mut cx, "%s|%5d|%-4d|%.2f|%%", &Value::tuple(vec![
            Value::from("ab"),
            Value::Int(42),
            Value::Int(7),
            Value::Float(3.14159),
        ]))
        .unwrap();
        assert_eq!(text, "ab|   42|7   |3.14|%");
        assert_eq!(percent_format(&mut cx, "%x %r", &Value::tuple(vec![Value::Int(255), Value::from("q")])).unwrap(), "ff 'q'");
        let error = percent_format(&mut cx, "%s %s", &Value::Int(1)).unwrap_err();
        assert_eq!(error.summary(), "TypeError: not enough arguments for format string");
        let error = percent_format(&mut cx, "%s", &args).unwrap_err();
        assert_eq!(error.summary(), "TypeError: not all arguments converted during string formatting");
    }
}
