//! The `builtins` namespace every module falls back to.

use std::rc::Rc;

use crate::ast::Operator;
use crate::num::{BigInt, mod_pow};
use crate::runtime::callable::{BuiltinFunction, NativeFn};
use crate::runtime::class::TypeObject;
use crate::runtime::compare::less_than;
use crate::runtime::dict::new_dict;
use crate::runtime::error::{check_arity, finish_kwargs, reject_kwargs, take_kwarg};
use crate::runtime::exception::{PyException, PyResult};
use crate::runtime::format::format_value;
use crate::runtime::int::{binary_op, to_int};
use crate::runtime::iter::{iter_new, reversed_new};
use crate::runtime::list::sort_values;
use crate::runtime::object::{
    CallContext, HasAttr, Iterable, Sequence, call_method, hash_value, is_instance, repr, str_of, truthy,
};
use crate::runtime::types::BuiltinTypes;
use crate::runtime::value::{DictRef, Kwargs, Value};
use crate::vm::intrinsics;

const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("abs", abs),
    ("all", all),
    ("any", any),
    ("bin", bin),
    ("callable", callable),
    ("chr", chr),
    ("delattr", delattr),
    ("divmod", divmod),
    ("format", format),
    ("getattr", getattr),
    ("hasattr", hasattr),
    ("hash", hash),
    ("hex", hex),
    ("id", id),
    ("isinstance", isinstance),
    ("issubclass", issubclass),
    ("iter", iter_new),
    ("len", len),
    ("max", max),
    ("min", min),
    ("oct", oct),
    ("ord", ord),
    ("pow", pow),
    ("print", print),
    ("repr", repr_builtin),
    ("reversed", reversed_new),
    ("round", round),
    ("setattr", setattr),
    ("sorted", sorted),
    ("sum", sum),
];

/// Builds the namespace: functions, built-in classes and exception classes.
pub fn namespace(types: &Rc<BuiltinTypes>) -> DictRef {
    let dict = new_dict();
    {
        let mut namespace = dict.borrow_mut();
        for (name, function) in FUNCTIONS {
            namespace.set_str(name, BuiltinFunction::native(name, *function));
        }
        namespace.set_str("next", BuiltinFunction::intrinsic("next", intrinsics::next));
        namespace.set_str("input", BuiltinFunction::intrinsic("input", intrinsics::input));
        namespace.set_str("globals", BuiltinFunction::intrinsic("globals", intrinsics::globals));
        namespace.set_str("locals", BuiltinFunction::intrinsic("locals", intrinsics::locals));
        for (name, class) in types.named() {
            namespace.set_str(name, Value::Type(class));
        }
        namespace.set_str("NotImplemented", Value::NotImplemented);
        namespace.set_str("Ellipsis", Value::Ellipsis);
        namespace.set_str("__name__", Value::from("builtins"));
    }
    dict
}

fn single(name: &str, args: Vec<Value>, kwargs: &Kwargs) -> PyResult<Value> {
    reject_kwargs(name, kwargs)?;
    check_arity(name, args.len(), 1, 1)?;
    Ok(args.into_iter().next().unwrap_or(Value::None))
}

fn abs(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = single("abs", args, &kwargs)?;
    Ok(match &value {
        Value::Bool(flag) => Value::Int(*flag as i64),
        Value::Int(small) => small
            .checked_abs()
            .map_or_else(|| Value::from_bigint(BigInt::from_i64(*small).abs()), Value::Int),
        Value::Big(big) => Value::from_bigint(big.abs()),
        Value::Float(float) => Value::Float(float.abs()),
        other => call_method(cx, other, "__abs__", Vec::new())?.ok_or_else(|| {
            PyException::type_error(format!("bad operand type for abs(): '{}'", other.type_name()))
        })?,
    })
}

fn any_all(cx: &mut dyn CallContext, iterable: &Value, wanted: bool) -> PyResult<bool> {
    let iterator = iterable.iter(cx)?;
    while let Some(item) = iterator.next(cx)? {
        if truthy(cx, &item)? == wanted {
            return Ok(true);
        }
    }
    Ok(false)
}

fn all(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let iterable = single("all", args, &kwargs)?;
    Ok(Value::Bool(!any_all(cx, &iterable, false)?))
}

fn any(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let iterable = single("any", args, &kwargs)?;
    Ok(Value::Bool(any_all(cx, &iterable, true)?))
}

fn integer_argument(cx: &mut dyn CallContext, value: &Value) -> PyResult<BigInt> {
    if let Some(big) = value.to_bigint() {
        return Ok(big);
    }
    match call_method(cx, value, "__index__", Vec::new())? {
        Some(index) if index.is_int() => Ok(index.to_bigint().unwrap_or_else(BigInt::zero)),
        _ => Err(PyException::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))),
    }
}

fn radix_text(cx: &mut dyn CallContext, name: &str, args: Vec<Value>, kwargs: &Kwargs, radix: u32, prefix: &str) -> PyResult<Value> {
    let value = single(name, args, kwargs)?;
    let number = integer_argument(cx, &value)?;
    let digits = number.abs().to_str_radix(radix);
    let sign = if number.is_negative() { "-" } else { "" };
    Ok(Value::from(format!("{sign}{prefix}{digits}")))
}

fn bin(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    radix_text(cx, "bin", args, &kwargs, 2, "0b")
}

fn oct(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    radix_text(cx, "oct", args, &kwargs, 8, "0o")
}

fn hex(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    radix_text(cx, "hex", args, &kwargs, 16, "0x")
}

fn callable(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = single("callable", args, &kwargs)?;
    Ok(Value::Bool(match &value {
        Value::Function(_) | Value::Builtin(_) | Value::Method(_) | Value::Type(_) | Value::StaticMethod(_) => true,
        Value::Instance(instance) => instance.class.lookup("__call__").is_some(),
        _ => false,
    }))
}

fn chr(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = single("chr", args, &kwargs)?;
    let code = value.expect_index("chr() argument")?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|ch| Value::from(ch.to_string()))
        .ok_or_else(|| PyException::value_error("chr() arg not in range(0x110000)"))
}

fn ord(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = single("ord", args, &kwargs)?;
    let Some(text) = value.as_str() else {
        return Err(PyException::type_error(format!(
            "ord() expected string of length 1, but {} found",
            value.type_name()
        )));
    };
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(Value::Int(ch as i64)),
        _ => Err(PyException::type_error(format!(
            "ord() expected a character, but string of length {} found",
            text.chars().count()
        ))),
    }
}

fn attribute_name<'a>(function: &str, value: &'a Value) -> PyResult<&'a str> {
    value.as_str().ok_or_else(|| {
        PyException::type_error(format!("{function}(): attribute name must be string"))
    })
}

fn getattr(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("getattr", &kwargs)?;
    check_arity("getattr", args.len(), 2, 3)?;
    let name = attribute_name("getattr", &args[1])?;
    match args.get(2) {
        Some(default) => Ok(args[0].lookup_attr(cx, name)?.unwrap_or_else(|| default.clone())),
        None => args[0].get_attr(cx, name),
    }
}

fn hasattr(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("hasattr", &kwargs)?;
    check_arity("hasattr", args.len(), 2, 2)?;
    let name = attribute_name("hasattr", &args[1])?;
    Ok(Value::Bool(args[0].lookup_attr(cx, name)?.is_some()))
}

fn setattr(cx: &mut dyn CallContext, mut args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("setattr", &kwargs)?;
    check_arity("setattr", args.len(), 3, 3)?;
    let value = args.pop().unwrap_or(Value::None);
    let name = attribute_name("setattr", &args[1])?;
    args[0].set_attr(cx, name, value)?;
    Ok(Value::None)
}

fn delattr(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("delattr", &kwargs)?;
    check_arity("delattr", args.len(), 2, 2)?;
    let name = attribute_name("delattr", &args[1])?;
    args[0].del_attr(cx, name)?;
    Ok(Value::None)
}

fn divmod(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("divmod", &kwargs)?;
    check_arity("divmod", args.len(), 2, 2)?;
    if let (Value::Instance(_), _) | (_, Value::Instance(_)) = (&args[0], &args[1])
        && let Some(result) = call_method(cx, &args[0], "__divmod__", vec![args[1].clone()])?
    {
        return Ok(result);
    }
    let quotient = binary_op(cx, Operator::FloorDiv, &args[0], &args[1])?;
    let remainder = binary_op(cx, Operator::Mod, &args[0], &args[1])?;
    Ok(Value::tuple(vec![quotient, remainder]))
}

fn format(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("format", &kwargs)?;
    check_arity("format", args.len(), 1, 2)?;
    let spec = match args.get(1) {
        Some(spec) => spec
            .as_str()
            .ok_or_else(|| PyException::type_error("format() argument 2 must be str"))?
            .to_string(),
        None => String::new(),
    };
    format_value(cx, &args[0], &spec).map(Value::from)
}

fn hash(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = single("hash", args, &kwargs)?;
    hash_value(cx, &value).map(Value::Int)
}

fn id(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = single("id", args, &kwargs)?;
    Ok(Value::from(value.identity()))
}

/// Applies `test` to a class or to each entry of a tuple of classes.
fn class_info(info: &Value, function: &str, test: &mut dyn FnMut(&Rc<TypeObject>) -> bool) -> PyResult<bool> {
    match info {
        Value::Type(class) => Ok(test(class)),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if class_info(class, function, test)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(PyException::type_error(format!(
            "{function}() arg 2 must be a type or tuple of types"
        ))),
    }
}

fn isinstance(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("isinstance", &kwargs)?;
    check_arity("isinstance", args.len(), 2, 2)?;
    let types = cx.types();
    let result = class_info(&args[1], "isinstance", &mut |class| is_instance(&types, &args[0], class))?;
    Ok(Value::Bool(result))
}

fn issubclass(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("issubclass", &kwargs)?;
    check_arity("issubclass", args.len(), 2, 2)?;
    let Value::Type(candidate) = &args[0] else {
        return Err(PyException::type_error("issubclass() arg 1 must be a class"));
    };
    let result = class_info(&args[1], "issubclass", &mut |class| candidate.is_subtype(class))?;
    Ok(Value::Bool(result))
}

fn len(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = single("len", args, &kwargs)?;
    value.len(cx).map(Value::from)
}

/// `min`/`max` over one iterable or several arguments, with `key=` and
/// `default=`.
fn extreme(cx: &mut dyn CallContext, name: &str, args: Vec<Value>, mut kwargs: Kwargs, want_max: bool) -> PyResult<Value> {
    let key = take_kwarg(&mut kwargs, "key").filter(|key| !key.is_none());
    let default = take_kwarg(&mut kwargs, "default");
    finish_kwargs(name, kwargs)?;
    if args.is_empty() {
        return Err(PyException::type_error(format!("{name} expected at least 1 argument, got 0")));
    }
    let candidates = if args.len() == 1 {
        args[0].collect(cx)?
    } else {
        if default.is_some() {
            return Err(PyException::type_error(format!(
                "Cannot specify a default for {name}() with multiple positional arguments"
            )));
        }
        args
    };
    let mut best: Option<(Value, Value)> = None;
    for candidate in candidates {
        let score = match &key {
            Some(key) => cx.call(key, vec![candidate.clone()], Vec::new())?,
            None => candidate.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_score, _)) if want_max => less_than(cx, best_score, &score)?,
            Some((best_score, _)) => less_than(cx, &score, best_score)?,
        };
        if replace {
            best = Some((score, candidate));
        }
    }
    match (best, default) {
        (Some((_, value)), _) => Ok(value),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(PyException::value_error(format!("{name}() arg is an empty sequence"))),
    }
}

fn max(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    extreme(cx, "max", args, kwargs, true)
}

fn min(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    extreme(cx, "min", args, kwargs, false)
}

/// `pow(base, exp[, mod])`; the three-argument form is modular
/// exponentiation over the bignum tower.
fn pow(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("pow", &kwargs)?;
    check_arity("pow", args.len(), 2, 3)?;
    let Some(modulus) = args.get(2).filter(|modulus| !modulus.is_none()) else {
        return binary_op(cx, Operator::Pow, &args[0], &args[1]);
    };
    let (Some(base), Some(exponent), Some(modulus)) =
        (args[0].to_bigint(), args[1].to_bigint(), modulus.to_bigint())
    else {
        return Err(PyException::type_error(
            "pow() 3rd argument not allowed unless all arguments are integers",
        ));
    };
    if modulus.is_zero() {
        return Err(PyException::value_error("pow() 3rd argument cannot be 0"));
    }
    let result = mod_pow(&base, &exponent, &modulus)
        .ok_or_else(|| PyException::value_error("base is not invertible for the given modulus"))?;
    // The result carries the sign of the modulus.
    let result = if modulus.is_negative() && !result.is_zero() {
        &result + &modulus
    } else {
        result
    };
    Ok(Value::from_bigint(result))
}

fn print(cx: &mut dyn CallContext, args: Vec<Value>, mut kwargs: Kwargs) -> PyResult<Value> {
    let separator = take_kwarg(&mut kwargs, "sep");
    let end = take_kwarg(&mut kwargs, "end");
    take_kwarg(&mut kwargs, "flush");
    finish_kwargs("print", kwargs)?;
    let text_option = |value: Option<Value>, default: &str, name: &str| -> PyResult<String> {
        match value {
            None | Some(Value::None) => Ok(default.to_string()),
            Some(Value::Str(text)) => Ok(text.to_string()),
            Some(other) => Err(PyException::type_error(format!(
                "{name} must be None or a string, not {}",
                other.type_name()
            ))),
        }
    };
    let separator = text_option(separator, " ", "sep")?;
    let end = text_option(end, "\n", "end")?;
    let mut line = String::new();
    for (index, value) in args.iter().enumerate() {
        if index > 0 {
            line.push_str(&separator);
        }
        line.push_str(&str_of(cx, value)?);
    }
    line.push_str(&end);
    cx.write_output(&line)?;
    Ok(Value::None)
}

fn repr_builtin(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = single("repr", args, &kwargs)?;
    repr(cx, &value).map(Value::from)
}

/// `round(number[, ndigits])` with round-half-to-even.
/// Fractional digits that hold any `f64` exactly.
const EXACT_FRACTION_DIGITS: usize = 1100;

/// `round(x, digits)` for floats: rounds the exact decimal value of `x`,
/// ties to even, then reads the result back as the nearest float.
fn round_float(value: f64, digits: i64) -> PyResult<f64> {
    if !value.is_finite() || value == 0.0 || digits > 323 {
        return Ok(value);
    }
    let zero = 0f64.copysign(value);
    if digits < -308 {
        return Ok(zero);
    }
    let exact = format!("{:.*}", EXACT_FRACTION_DIGITS, value.abs());
    let point = exact.find('.').unwrap_or(exact.len());
    let all: Vec<u8> = exact.bytes().filter(u8::is_ascii_digit).collect();
    let keep = point as i64 + digits;
    if keep < 0 {
        return Ok(zero);
    }
    let keep = keep as usize;
    let (kept, rest) = all.split_at(keep.min(all.len()));
    let round_up = match rest.first() {
        Some(digit) if *digit > b'5' => true,
        Some(b'5') => {
            rest[1..].iter().any(|digit| *digit != b'0')
                || kept.last().is_some_and(|digit| (digit - b'0') % 2 == 1)
        }
        _ => false,
    };
    let mut kept = kept.to_vec();
    if round_up {
        let mut index = kept.len();
        loop {
            if index == 0 {
                kept.insert(0, b'1');
                break;
            }
            index -= 1;
            if kept[index] == b'9' {
                kept[index] = b'0';
            } else {
                kept[index] += 1;
                break;
            }
        }
    }
    if kept.is_empty() {
        return Ok(zero);
    }
    let text = format!("{}e{}", String::from_utf8_lossy(&kept), -digits);
    let rounded: f64 = text
        .parse()
        .map_err(|_| PyException::value_error(format!("could not round {value}")))?;
    if rounded.is_infinite() {
        return Err(PyException::overflow("rounded value too large to represent"));
    }
    Ok(rounded.copysign(value))
}

fn round(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("round", &kwargs)?;
    check_arity("round", args.len(), 1, 2)?;
    let digits = match args.get(1) {
        None | Some(Value::None) => None,
        Some(digits) => Some(digits.expect_index("round() ndigits")?),
    };
    match (&args[0], digits) {
        (value, None) if value.is_int() => Ok(to_int(value)),
        (value, Some(digits)) if value.is_int() && digits >= 0 => Ok(to_int(value)),
        (value, Some(digits)) if value.is_int() => {
            let scale = BigInt::from_i64(10).pow(digits.unsigned_abs());
            let number = value.to_bigint().unwrap_or_else(BigInt::zero);
            let (quotient, remainder) = number
                .div_mod_floor(&scale)
                .ok_or_else(|| PyException::zero_division("division by zero"))?;
            let twice = &remainder + &remainder;
            let round_up = twice > scale || (twice == scale && quotient.is_odd());
            let quotient = if round_up { &quotient + &BigInt::one() } else { quotient };
            Ok(Value::from_bigint(&quotient * &scale))
        }
        (Value::Float(float), None) => {
            let rounded = float.round_ties_even();
            BigInt::from_f64(rounded)
                .map(Value::from_bigint)
                .ok_or_else(|| PyException::overflow("cannot convert float infinity or NaN to integer"))
        }
        (Value::Float(float), Some(digits)) => round_float(*float, digits).map(Value::Float),
        (other, _) => {
            let extra = args.get(1).cloned().into_iter().collect();
            call_method(cx, other, "__round__", extra)?.ok_or_else(|| {
                PyException::type_error(format!(
                    "type {} doesn't define __round__ method",
                    other.type_name()
                ))
            })
        }
    }
}

fn sorted(cx: &mut dyn CallContext, args: Vec<Value>, mut kwargs: Kwargs) -> PyResult<Value> {
    check_arity("sorted", args.len(), 1, 1)?;
    let key = take_kwarg(&mut kwargs, "key");
    let reverse = match take_kwarg(&mut kwargs, "reverse") {
        Some(flag) => truthy(cx, &flag)?,
        None => false,
    };
    finish_kwargs("sorted", kwargs)?;
    let items = args[0].collect(cx)?;
    sort_values(cx, items, key.as_ref(), reverse).map(Value::list)
}

fn sum(cx: &mut dyn CallContext, args: Vec<Value>, mut kwargs: Kwargs) -> PyResult<Value> {
    check_arity("sum", args.len(), 1, 2)?;
    let start = take_kwarg(&mut kwargs, "start");
    finish_kwargs("sum", kwargs)?;
    let mut total = args.get(1).cloned().or(start).unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return Err(PyException::type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    let iterator = args[0].iter(cx)?;
    while let Some(item) = iterator.next(cx)? {
        total = binary_op(cx, Operator::Add, &total, &item)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::runtime::exception::ExceptionKind;
    use crate::runtime::object::tests::NoCalls;

    fn call(function: NativeFn, args: Vec<Value>) -> String {
        let mut cx = NoCalls::new();
        let value = function(&mut cx, args, Vec::new()).unwrap();
        value.basic_repr()
    }

    #[test]
    fn namespace_exposes_functions_classes_and_exceptions() {
        let types = Rc::new(BuiltinTypes::new());
        let namespace = namespace(&types);
        let namespace = namespace.borrow();
        for name in ["print", "len", "next", "input", "int", "object", "super", "ValueError", "StopIteration"] {
            assert!(namespace.contains_str(name), "missing {name}");
        }
    }

    #[test]
    fn radix_helpers_keep_the_sign_outside_the_prefix() {
        assert_eq!(call(bin, vec![Value::Int(5)]), "'0b101'");
        assert_eq!(call(hex, vec![Value::Int(-255)]), "'-0xff'");
        assert_eq!(call(oct, vec![Value::Int(8)]), "'0o10'");
    }

    #[test]
    fn three_argument_pow_reduces_modulo() {
        assert_eq!(call(pow, vec![Value::Int(4), Value::Int(13), Value::Int(497)]), "445");
        assert_eq!(call(pow, vec![Value::Int(3), Value::Int(-1), Value::Int(7)]), "5");
        let mut cx = NoCalls::new();
        let err = pow(&mut cx, vec![Value::Int(2), Value::Int(3), Value::Int(0)], Vec::new()).unwrap_err();
        assert_eq!(err.message(), "pow() 3rd argument cannot be 0");
    }

    #[test]
    fn round_uses_bankers_rounding() {
        assert_eq!(call(round, vec![Value::Float(2.5)]), "2");
        assert_eq!(call(round, vec![Value::Float(3.5)]), "4");
        assert_eq!(call(round, vec![Value::Int(1250), Value::Int(-2)]), "1200");
        assert_eq!(call(round, vec![Value::Float(0.125), Value::Int(2)]), "0.12");
    }

    #[test]
    fn float_rounding_uses_the_exact_decimal_value() {
        let cases = [
            (2.675, 2, "2.67"),
            (0.375, 2, "0.38"),
            (1.005, 2, "1.0"),
            (-2.5, 0, "-2.0"),
            (-0.04, 1, "-0.0"),
            (1234.5678, -2, "1200.0"),
            (9.995, 2, "9.99"),
            (99.96, 1, "100.0"),
            (5e-324, 400, "5e-324"),
        ];
        for (value, digits, expected) in cases {
            assert_eq!(
                call(round, vec![Value::Float(value), Value::Int(digits)]),
                expected,
                "round({value}, {digits})"
            );
        }
        let mut cx = NoCalls::new();
        let err = round(&mut cx, vec![Value::Float(1.7e308), Value::Int(-308)], Vec::new()).unwrap_err();
        assert!(err.is(ExceptionKind::OverflowError));
    }

    #[test]
    fn min_max_and_sum_over_native_values() {
        let items = Value::list(vec![Value::Int(3), Value::Int(9), Value::Int(-2)]);
        assert_eq!(call(max, vec![items.clone()]), "9");
        assert_eq!(call(min, vec![Value::Int(4), Value::Int(1)]), "1");
        assert_eq!(call(sum, vec![items]), "10");
        let mut cx = NoCalls::new();
        let err = max(&mut cx, vec![Value::list(Vec::new())], Vec::new()).unwrap_err();
        assert_eq!(err.message(), "max() arg is an empty sequence");
    }

    #[test]
    fn print_honors_sep_and_end() {
        let mut cx = NoCalls::new();
        let kwargs = vec![(Rc::from("sep"), Value::from("-")), (Rc::from("end"), Value::from("!"))];
        print(&mut cx, vec![Value::Int(1), Value::from("a")], kwargs).unwrap();
        assert_eq!(cx.output, "1-a!");
    }
}
