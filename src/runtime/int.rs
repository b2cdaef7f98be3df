//! Arithmetic on the numeric tower and the binary/unary operator protocol.
//!
//! `int` values stay `i64` until an operation overflows, then continue as
//! `BigInt`; bignum results that fit in `i64` drop back down.

use std::rc::Rc;

use crate::ast::{Operator, UnaryOp};
use crate::config::DivisionPolicy;
use crate::num::BigInt;
use crate::runtime::class::lookup_special;
use crate::runtime::error::{check_arity, check_method_arity, reject_kwargs, take_kwarg, finish_kwargs};
use crate::runtime::exception::{PyException, PyResult};
use crate::runtime::object::{CallContext, call_method, truthy};
use crate::runtime::{format, set};
use crate::runtime::value::{Kwargs, Value};

/// `bool` becomes `int`; other values are returned unchanged.
pub fn to_int(value: &Value) -> Value {
    match value {
        Value::Bool(flag) => Value::Int(*flag as i64),
        other => other.clone(),
    }
}

fn big(value: &Value) -> Option<BigInt> {
    value.to_bigint()
}

fn float_of(value: &Value) -> PyResult<f64> {
    let float = value
        .to_f64()
        .ok_or_else(|| PyException::type_error("must be real number"))?;
    if float.is_infinite() && value.is_int() {
        return Err(PyException::overflow("int too large to convert to float"));
    }
    Ok(float)
}

fn zero_division() -> PyException {
    PyException::zero_division("integer division or modulo by zero")
}

fn zero_modulo() -> PyException {
    PyException::zero_division("integer modulo by zero")
}

fn negative_shift() -> PyException {
    PyException::value_error("negative shift count")
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let quotient = a.checked_div(b)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        Some(quotient - 1)
    } else {
        Some(quotient)
    }
}

fn floor_mod(a: i64, b: i64) -> i64 {
    let remainder = a.checked_rem(b).unwrap_or(0);
    if remainder != 0 && ((remainder < 0) != (b < 0)) {
        remainder + b
    } else {
        remainder
    }
}

fn python_fmod(a: f64, b: f64) -> f64 {
    let remainder = a % b;
    if remainder != 0.0 && ((remainder < 0.0) != (b < 0.0)) {
        remainder + b
    } else {
        remainder
    }
}

/// `int ** int`; negative exponents fall over to float.
fn int_pow(base: &Value, exponent: &Value) -> PyResult<Value> {
    let exponent_big = big(exponent).unwrap_or_default();
    if exponent_big.is_negative() {
        let base = float_of(base)?;
        if base == 0.0 {
            return Err(PyException::zero_division(
                "0.0 cannot be raised to a negative power",
            ));
        }
        return Ok(Value::Float(base.powf(float_of(exponent)?)));
    }
    if let (Some(a), Some(e)) = (base.as_i64(), exponent.as_i64())
        && let Ok(e) = u32::try_from(e)
        && let Some(result) = a.checked_pow(e)
    {
        return Ok(Value::Int(result));
    }
    let base = big(base).unwrap_or_default();
    let Some(exponent) = exponent_big.to_u64() else {
        return match base.to_i64() {
            Some(0 | 1) => Ok(Value::from_bigint(base)),
            Some(-1) => Ok(Value::Int(if exponent_big.is_odd() { -1 } else { 1 })),
            _ => Err(PyException::overflow("exponent too large")),
        };
    };
    Ok(Value::from_bigint(base.pow(exponent)))
}

/// Largest magnitude every integer below which converts to `f64` exactly.
const EXACT_FLOAT_INT: u64 = 1 << 53;

/// Bits kept in the scaled quotient: 53 for the mantissa, two more for rounding.
const QUOTIENT_BITS: i64 = 55;

/// Correctly rounded `a / b` for integers of any size. `b` is non-zero.
fn true_quotient(a: &BigInt, b: &BigInt) -> PyResult<f64> {
    let negative = a.is_negative() != b.is_negative();
    let signed = |value: f64| if negative { -value } else { value };
    let (a, b) = (a.abs(), b.abs());
    let bits = a.bit_length() as i64 - b.bit_length() as i64;
    if a.is_zero() || bits < f64::MIN_EXP as i64 - f64::MANTISSA_DIGITS as i64 - 2 {
        return Ok(signed(0.0));
    }
    if bits > f64::MAX_EXP as i64 + 1 {
        return Err(too_large_quotient());
    }
    // Scale so the integer quotient carries QUOTIENT_BITS or one more.
    let shift = bits - QUOTIENT_BITS;
    let (a, b) = if shift > 0 {
        (a, b.shl(shift as u64))
    } else {
        (a.shl(shift.unsigned_abs()), b)
    };
    let (quotient, remainder) = a.div_rem_trunc(&b).ok_or_else(zero_division)?;
    let mut mantissa = quotient.to_u64().ok_or_else(too_large_quotient)?;
    if !remainder.is_zero() {
        // Sticky bit: the dropped remainder still decides ties.
        mantissa |= 1;
    }
    let half = (shift / 2) as i32;
    let value = mantissa as f64 * 2f64.powi(half) * 2f64.powi(shift as i32 - half);
    if value.is_infinite() {
        return Err(too_large_quotient());
    }
    Ok(signed(value))
}

fn too_large_quotient() -> PyException {
    PyException::overflow("integer division result too large for a float")
}

fn small_int_op(policy: DivisionPolicy, op: Operator, a: i64, b: i64) -> PyResult<Option<Value>> {
    Ok(match op {
        Operator::Add => a.checked_add(b).map(Value::Int),
        Operator::Sub => a.checked_sub(b).map(Value::Int),
        Operator::Mult => a.checked_mul(b).map(Value::Int),
        Operator::FloorDiv => {
            if b == 0 {
                return Err(zero_division());
            }
            floor_div(a, b).map(Value::Int)
        }
        Operator::Mod => {
            if b == 0 {
                return Err(zero_modulo());
            }
            Some(Value::Int(floor_mod(a, b)))
        }
        Operator::Div => {
            if b == 0 {
                return Err(PyException::zero_division("division by zero"));
            }
            match policy {
                DivisionPolicy::Floor => floor_div(a, b).map(Value::Int),
                DivisionPolicy::Exact if a.checked_rem(b) == Some(0) => a.checked_div(b).map(Value::Int),
                DivisionPolicy::True | DivisionPolicy::Exact => {
                    if a.unsigned_abs() <= EXACT_FLOAT_INT && b.unsigned_abs() <= EXACT_FLOAT_INT {
                        Some(Value::Float(a as f64 / b as f64))
                    } else {
                        let quotient = true_quotient(&BigInt::from_i64(a), &BigInt::from_i64(b))?;
                        Some(Value::Float(quotient))
                    }
                }
            }
        }
        Operator::LShift => {
            if b < 0 {
                return Err(negative_shift());
            }
            if a == 0 {
                Some(Value::Int(0))
            } else if b < 64 {
                i64::try_from((a as i128) << b).ok().map(Value::Int)
            } else {
                None
            }
        }
        Operator::RShift => {
            if b < 0 {
                return Err(negative_shift());
            }
            Some(Value::Int(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b }))
        }
        Operator::BitAnd => Some(Value::Int(a & b)),
        Operator::BitOr => Some(Value::Int(a | b)),
        Operator::BitXor => Some(Value::Int(a ^ b)),
        Operator::Pow | Operator::MatMult => None,
    })
}

fn big_int_op(policy: DivisionPolicy, op: Operator, a: &BigInt, b: &BigInt) -> PyResult<Option<Value>> {
    let shift_count = |count: &BigInt| -> PyResult<u64> {
        if count.is_negative() {
            return Err(negative_shift());
        }
        count
            .to_u64()
            .ok_or_else(|| PyException::overflow("shift count too large"))
    };
    Ok(Some(match op {
        Operator::Add => Value::from_bigint(a + b),
        Operator::Sub => Value::from_bigint(a - b),
        Operator::Mult => Value::from_bigint(a * b),
        Operator::FloorDiv => Value::from_bigint(a.div_mod_floor(b).ok_or_else(zero_division)?.0),
        Operator::Mod => Value::from_bigint(a.div_mod_floor(b).ok_or_else(zero_modulo)?.1),
        Operator::Div => {
            let (quotient, remainder) = a
                .div_mod_floor(b)
                .ok_or_else(|| PyException::zero_division("division by zero"))?;
            match policy {
                DivisionPolicy::Floor => Value::from_bigint(quotient),
                DivisionPolicy::Exact if remainder.is_zero() => Value::from_bigint(quotient),
                _ => Value::Float(true_quotient(a, b)?),
            }
        }
        Operator::LShift => Value::from_bigint(a.shl(shift_count(b)?)),
        Operator::RShift => {
            let count = shift_count(b).unwrap_or(u64::MAX);
            if b.is_negative() {
                return Err(negative_shift());
            }
            Value::from_bigint(a.shr(count))
        }
        Operator::BitAnd => Value::from_bigint(a.bitand(b)),
        Operator::BitOr => Value::from_bigint(a.bitor(b)),
        Operator::BitXor => Value::from_bigint(a.bitxor(b)),
        Operator::Pow | Operator::MatMult => return Ok(None),
    }))
}

fn float_op(op: Operator, a: f64, b: f64) -> PyResult<Option<Value>> {
    Ok(Some(Value::Float(match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => a * b,
        Operator::Div => {
            if b == 0.0 {
                return Err(PyException::zero_division("float division by zero"));
            }
            a / b
        }
        Operator::FloorDiv => {
            if b == 0.0 {
                return Err(PyException::zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        Operator::Mod => {
            if b == 0.0 {
                return Err(PyException::zero_division("float modulo"));
            }
            python_fmod(a, b)
        }
        Operator::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(PyException::zero_division(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(PyException::value_error("math domain error"));
            }
            let result = a.powf(b);
            if result.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(PyException::overflow("(34, 'Numerical result out of range')"));
            }
            result
        }
        _ => return Ok(None),
    })))
}

/// Arithmetic between two built-in numbers; `None` when either operand is
/// not a number or the operator does not apply.
pub fn numeric_binary(
    policy: DivisionPolicy,
    op: Operator,
    left: &Value,
    right: &Value,
) -> PyResult<Option<Value>> {
    if !left.is_number() || !right.is_number() {
        return Ok(None);
    }
    if matches!(left, Value::Float(_)) || matches!(right, Value::Float(_)) {
        return float_op(op, float_of(left)?, float_of(right)?);
    }
    if op == Operator::Pow {
        return int_pow(left, right).map(Some);
    }
    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64())
        && let Some(result) = small_int_op(policy, op, a, b)?
    {
        return Ok(Some(result));
    }
    let (Some(a), Some(b)) = (big(left), big(right)) else {
        return Ok(None);
    };
    big_int_op(policy, op, &a, &b)
}

fn repeat(items: &[Value], count: &Value) -> Option<Vec<Value>> {
    let count = count.as_i64()?.max(0) as usize;
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend_from_slice(items);
    }
    Some(out)
}

/// `+`, `*` and `%` on built-in sequences, `|` on dicts.
fn sequence_binary(cx: &mut dyn CallContext, op: Operator, left: &Value, right: &Value) -> PyResult<Option<Value>> {
    Ok(match (op, left, right) {
        (Operator::Add, Value::Str(a), Value::Str(b)) => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Some(Value::from(joined))
        }
        (Operator::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Some(Value::list(items))
        }
        (Operator::Add, Value::Tuple(a), Value::Tuple(b)) => {
            Some(Value::tuple(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Operator::Mult, Value::Str(text), count @ (Value::Int(_) | Value::Bool(_)))
        | (Operator::Mult, count @ (Value::Int(_) | Value::Bool(_)), Value::Str(text)) => {
            let count = count.as_i64().unwrap_or_default().max(0) as usize;
            Some(Value::from(text.repeat(count)))
        }
        (Operator::Mult, Value::List(items), count @ (Value::Int(_) | Value::Bool(_)))
        | (Operator::Mult, count @ (Value::Int(_) | Value::Bool(_)), Value::List(items)) => {
            repeat(&items.borrow(), count).map(Value::list)
        }
        (Operator::Mult, Value::Tuple(items), count @ (Value::Int(_) | Value::Bool(_)))
        | (Operator::Mult, count @ (Value::Int(_) | Value::Bool(_)), Value::Tuple(items)) => {
            repeat(items, count).map(Value::tuple)
        }
        (Operator::Mod, Value::Str(template), args) => {
            Some(Value::from(format::percent_format(cx, template, args)?))
        }
        (Operator::BitOr, Value::Dict(a), Value::Dict(b)) => {
            let merged = Rc::new(std::cell::RefCell::new(a.borrow().clone()));
            crate::runtime::dict::dict_update(cx, &merged, &Value::Dict(b.clone()))?;
            Some(Value::Dict(merged))
        }
        _ => set::binary_op(cx, op, left, right)?,
    })
}

fn unsupported(op: Operator, left: &Value, right: &Value) -> PyException {
    match (op, left) {
        (Operator::Add, Value::Str(_)) => PyException::type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            right.type_name()
        )),
        (Operator::Add, Value::List(_)) => PyException::type_error(format!(
            "can only concatenate list (not \"{}\") to list",
            right.type_name()
        )),
        (Operator::Add, Value::Tuple(_)) => PyException::type_error(format!(
            "can only concatenate tuple (not \"{}\") to tuple",
            right.type_name()
        )),
        _ => PyException::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            if op == Operator::Pow { "** or pow()" } else { op.symbol() },
            left.type_name(),
            right.type_name()
        )),
    }
}

fn not_implemented(result: &Option<Value>) -> bool {
    matches!(result, None | Some(Value::NotImplemented))
}

/// `left <op> right` with the full forward/reflected protocol.
pub fn binary_op(cx: &mut dyn CallContext, op: Operator, left: &Value, right: &Value) -> PyResult<Value> {
    if let Some(result) = numeric_binary(cx.division(), op, left, right)? {
        return Ok(result);
    }
    if let Some(result) = sequence_binary(cx, op, left, right)? {
        return Ok(result);
    }
    let (forward, reflected, _) = op.dunders();
    let result = call_method(cx, left, forward, vec![right.clone()])?;
    if !not_implemented(&result) {
        return Ok(result.unwrap_or(Value::None));
    }
    let result = call_method(cx, right, reflected, vec![left.clone()])?;
    if !not_implemented(&result) {
        return Ok(result.unwrap_or(Value::None));
    }
    Err(unsupported(op, left, right))
}

/// `left <op>= right`: lists extend in place, instances may define `__iop__`.
pub fn inplace_op(cx: &mut dyn CallContext, op: Operator, left: &Value, right: &Value) -> PyResult<Value> {
    match (op, left) {
        (Operator::Add, Value::List(items)) => {
            let extra = crate::runtime::object::Iterable::collect(right, cx)?;
            items.borrow_mut().extend(extra);
            return Ok(left.clone());
        }
        (Operator::BitOr, Value::Set(set)) if matches!(right, Value::Set(_) | Value::FrozenSet(_)) => {
            for item in crate::runtime::object::Iterable::collect(right, cx)? {
                set::set_add(cx, set, item)?;
            }
            return Ok(left.clone());
        }
        (Operator::BitOr, Value::Dict(dict)) if matches!(right, Value::Dict(_)) => {
            crate::runtime::dict::dict_update(cx, dict, right)?;
            return Ok(left.clone());
        }
        _ => {}
    }
    if lookup_special(left, op.dunders().2).is_some() {
        let result = call_method(cx, left, op.dunders().2, vec![right.clone()])?;
        if !not_implemented(&result) {
            return Ok(result.unwrap_or(Value::None));
        }
    }
    binary_op(cx, op, left, right)
}

pub fn unary_op(cx: &mut dyn CallContext, op: UnaryOp, operand: &Value) -> PyResult<Value> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!truthy(cx, operand)?));
    }
    let result = match (op, operand) {
        (UnaryOp::USub, Value::Int(value)) => Some(
            value
                .checked_neg()
                .map_or_else(|| Value::from_bigint(-BigInt::from_i64(*value)), Value::Int),
        ),
        (UnaryOp::USub, Value::Bool(flag)) => Some(Value::Int(-(*flag as i64))),
        (UnaryOp::USub, Value::Big(value)) => Some(Value::from_bigint(-&**value)),
        (UnaryOp::USub, Value::Float(value)) => Some(Value::Float(-value)),
        (UnaryOp::UAdd, value) if value.is_number() => Some(to_int(value)),
        (UnaryOp::Invert, Value::Int(value)) => Some(Value::Int(!value)),
        (UnaryOp::Invert, Value::Bool(flag)) => Some(Value::Int(!(*flag as i64))),
        (UnaryOp::Invert, Value::Big(value)) => Some(Value::from_bigint(value.not())),
        _ => None,
    };
    if let Some(result) = result {
        return Ok(result);
    }
    let (dunder, symbol) = match op {
        UnaryOp::USub => ("__neg__", "-"),
        UnaryOp::UAdd => ("__pos__", "+"),
        UnaryOp::Invert => ("__invert__", "~"),
        UnaryOp::Not => unreachable!("handled above"),
    };
    call_method(cx, operand, dunder, Vec::new())?.ok_or_else(|| {
        PyException::type_error(format!(
            "bad operand type for unary {symbol}: '{}'",
            operand.type_name()
        ))
    })
}

/// Parses an `int()` literal in `base` (0 infers it from the prefix).
pub fn parse_int(text: &str, base: u32) -> Option<Value> {
    let trimmed = text.trim();
    let (negative, body) = match trimmed.as_bytes().first()? {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = body.to_ascii_lowercase();
    let prefixed = |prefix: &str| lower.strip_prefix(prefix).map(str::to_string);
    let (base, digits) = match base {
        0 => {
            if let Some(rest) = prefixed("0x") {
                (16, rest)
            } else if let Some(rest) = prefixed("0o") {
                (8, rest)
            } else if let Some(rest) = prefixed("0b") {
                (2, rest)
            } else {
                if lower.len() > 1 && lower.starts_with('0') && lower.trim_start_matches(['0', '_']).len() > 0 {
                    return None;
                }
                (10, lower.clone())
            }
        }
        16 => (16, prefixed("0x").unwrap_or_else(|| lower.clone())),
        8 => (8, prefixed("0o").unwrap_or_else(|| lower.clone())),
        2 => (2, prefixed("0b").unwrap_or_else(|| lower.clone())),
        other => (other, lower.clone()),
    };
    let digits = digits.strip_prefix('_').unwrap_or(&digits);
    if digits.is_empty() || digits.ends_with('_') || digits.contains("__") {
        return None;
    }
    let clean: String = digits.chars().filter(|&ch| ch != '_').collect();
    let value = BigInt::parse_radix(&clean, base)?;
    Some(Value::from_bigint(if negative { -value } else { value }))
}

pub fn parse_float(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.contains("__") || trimmed.starts_with('_') || trimmed.ends_with('_') {
        return None;
    }
    let clean: String = trimmed.chars().filter(|&ch| ch != '_').collect();
    match clean.to_ascii_lowercase().trim_start_matches(['+', '-']) {
        "inf" | "infinity" | "nan" => {}
        other if other.chars().any(|ch| ch.is_ascii_alphabetic() && ch != 'e') => return None,
        _ => {}
    }
    clean.parse().ok()
}

/// `int(x=0, base=10)`.
pub fn int_new(cx: &mut dyn CallContext, args: Vec<Value>, mut kwargs: Kwargs) -> PyResult<Value> {
    let base = take_kwarg(&mut kwargs, "base");
    finish_kwargs("int", kwargs)?;
    check_arity("int", args.len(), 0, 2)?;
    let base = args.get(1).cloned().or(base);
    let Some(value) = args.into_iter().next() else {
        return Ok(Value::Int(0));
    };
    if let Some(base) = base {
        let base = base.expect_index("base")?;
        if base != 0 && !(2..=36).contains(&base) {
            return Err(PyException::value_error("int() base must be >= 2 and <= 36, or 0"));
        }
        let Value::Str(text) = &value else {
            return Err(PyException::type_error("int() can't convert non-string with explicit base"));
        };
        return parse_int(text, base as u32).ok_or_else(|| {
            PyException::value_error(format!(
                "invalid literal for int() with base {base}: {}",
                value.basic_repr()
            ))
        });
    }
    match &value {
        Value::Int(_) | Value::Big(_) | Value::Bool(_) => Ok(to_int(&value)),
        Value::Float(float) => {
            if float.is_nan() {
                return Err(PyException::value_error("cannot convert float NaN to integer"));
            }
            BigInt::from_f64(*float)
                .map(Value::from_bigint)
                .ok_or_else(|| PyException::overflow("cannot convert float infinity to integer"))
        }
        Value::Str(text) => parse_int(text, 10).ok_or_else(|| {
            PyException::value_error(format!(
                "invalid literal for int() with base 10: {}",
                value.basic_repr()
            ))
        }),
        Value::Instance(_) => {
            for hook in ["__int__", "__index__"] {
                if let Some(result) = call_method(cx, &value, hook, Vec::new())? {
                    return Ok(to_int(&result));
                }
            }
            Err(int_type_error(&value))
        }
        other => Err(int_type_error(other)),
    }
}

fn int_type_error(value: &Value) -> PyException {
    PyException::type_error(format!(
        "int() argument must be a string, a bytes-like object or a real number, not '{}'",
        value.type_name()
    ))
}

/// `float(x=0.0)`.
pub fn float_new(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("float", &kwargs)?;
    check_arity("float", args.len(), 0, 1)?;
    let Some(value) = args.into_iter().next() else {
        return Ok(Value::Float(0.0));
    };
    match &value {
        number if number.is_number() => Ok(Value::Float(float_of(number)?)),
        Value::Str(text) => parse_float(text).map(Value::Float).ok_or_else(|| {
            PyException::value_error(format!(
                "could not convert string to float: {}",
                value.basic_repr()
            ))
        }),
        Value::Instance(_) => match call_method(cx, &value, "__float__", Vec::new())? {
            Some(result @ Value::Float(_)) => Ok(result),
            _ => Err(float_type_error(&value)),
        },
        other => Err(float_type_error(other)),
    }
}

fn float_type_error(value: &Value) -> PyException {
    PyException::type_error(format!(
        "float() argument must be a string or a real number, not '{}'",
        value.type_name()
    ))
}

/// `bool(x=False)`.
pub fn bool_new(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("bool", &kwargs)?;
    check_arity("bool", args.len(), 0, 1)?;
    match args.first() {
        Some(value) => Ok(Value::Bool(truthy(cx, value)?)),
        None => Ok(Value::Bool(false)),
    }
}

fn bit_length(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("bit_length", &kwargs)?;
    check_method_arity("bit_length", &args, 0, 0)?;
    let value = big(&args[0]).ok_or_else(|| PyException::type_error("bit_length() requires an int"))?;
    Ok(Value::Int(value.bit_length() as i64))
}

fn conjugate(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("conjugate", &kwargs)?;
    check_method_arity("conjugate", &args, 0, 0)?;
    Ok(to_int(&args[0]))
}

fn is_integer(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("is_integer", &kwargs)?;
    check_method_arity("is_integer", &args, 0, 0)?;
    match &args[0] {
        Value::Float(value) => Ok(Value::Bool(value.is_finite() && value.fract() == 0.0)),
        other => Err(PyException::type_error(format!(
            "descriptor 'is_integer' requires a 'float' object but received a '{}'",
            other.type_name()
        ))),
    }
}

pub(crate) const INT_METHODS: &[(&str, crate::runtime::callable::NativeFn)] =
    &[("bit_length", bit_length), ("conjugate", conjugate)];

pub(crate) const FLOAT_METHODS: &[(&str, crate::runtime::callable::NativeFn)] =
    &[("is_integer", is_integer), ("conjugate", conjugate)];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::tests::NoCalls;

    fn binary(op: Operator, a: Value, b: Value) -> String {
        let mut cx = NoCalls::new();
        match binary_op(&mut cx, op, &a, &b) {
            Ok(value) => value.basic_repr(),
            Err(error) => error.summary(),
        }
    }

    #[test]
    fn overflow_promotes_and_demotes() {
        assert_eq!(binary(Operator::Pow, Value::Int(2), Value::Int(64)), "18446744073709551616");
        assert_eq!(
            binary(Operator::Add, Value::Int(i64::MAX), Value::Int(1)),
            "9223372036854775808"
        );
        let big = Value::from_i128(1 << 64);
        assert!(matches!(
            numeric_binary(DivisionPolicy::True, Operator::Sub, &big, &Value::from_i128(1 << 64)).unwrap(),
            Some(Value::Int(0))
        ));
        assert!(matches!(binary_op(&mut NoCalls::new(), Operator::Add, &Value::Int(1), &Value::Int(1)).unwrap(), Value::Int(2)));
    }

    #[test]
    fn true_division_of_large_integers_is_exact_before_rounding() {
        let power = |base: i64, exponent: u64| Value::from_bigint(BigInt::from_i64(base).pow(exponent));
        assert_eq!(binary(Operator::Div, power(10, 400), power(10, 399)), "10.0");
        assert_eq!(binary(Operator::Div, power(-10, 401), power(10, 399)), "-100.0");
        assert_eq!(binary(Operator::Div, power(10, 399), power(10, 400)), "0.1");
        assert_eq!(binary(Operator::Div, Value::Int(1), power(10, 400)), "0.0");
        assert_eq!(
            binary(Operator::Div, Value::Int((1 << 53) + 1), Value::Int(1)),
            "9007199254740992.0"
        );
        assert!(
            binary(Operator::Div, power(2, 1100), power(2, 50)).starts_with("OverflowError"),
            "quotient beyond the float range"
        );
    }

    #[test]
    fn floor_semantics_and_zero_division() {
        assert_eq!(binary(Operator::FloorDiv, Value::Int(-7), Value::Int(2)), "-4");
        assert_eq!(binary(Operator::Mod, Value::Int(-7), Value::Int(2)), "1");
        assert_eq!(binary(Operator::Mod, Value::Float(-7.5), Value::Int(2)), "0.5");
        assert_eq!(
            binary(Operator::Div, Value::Int(1), Value::Int(0)),
            "ZeroDivisionError: division by zero"
        );
        assert_eq!(
            binary(Operator::Mod, Value::Int(1), Value::Int(0)),
            "ZeroDivisionError: integer modulo by zero"
        );
        assert_eq!(
            binary(Operator::FloorDiv, Value::Int(1), Value::Int(0)),
            "ZeroDivisionError: integer division or modulo by zero"
        );
    }

    #[test]
    fn division_policies() {
        let seven = Value::Int(7);
        let two = Value::Int(2);
        let run = |policy| {
            numeric_binary(policy, Operator::Div, &seven, &two)
                .unwrap()
                .unwrap()
                .basic_repr()
        };
        assert_eq!(run(DivisionPolicy::True), "3.5");
        assert_eq!(run(DivisionPolicy::Floor), "3");
        assert_eq!(run(DivisionPolicy::Exact), "3.5");
        let exact = numeric_binary(DivisionPolicy::Exact, Operator::Div, &Value::Int(8), &two).unwrap();
        assert_eq!(exact.unwrap().basic_repr(), "4");
    }

    #[test]
    fn sequences_and_type_errors() {
        assert_eq!(binary(Operator::Mult, Value::from("ab"), Value::Int(3)), "'ababab'");
        assert_eq!(
            binary(Operator::Add, Value::from("a"), Value::Int(1)),
            "TypeError: can only concatenate str (not \"int\") to str"
        );
        assert_eq!(
            binary(Operator::Sub, Value::from("a"), Value::Int(1)),
            "TypeError: unsupported operand type(s) for -: 'str' and 'int'"
        );
    }

    #[test]
    fn parses_int_literals() {
        assert_eq!(parse_int(" -42 ", 10).unwrap().basic_repr(), "-42");
        assert_eq!(parse_int("0x_ff", 0).unwrap().basic_repr(), "255");
        assert_eq!(parse_int("1_000", 10).unwrap().basic_repr(), "1000");
        assert!(parse_int("12a", 10).is_none());
        assert!(parse_int("010", 0).is_none());
        assert_eq!(parse_float(" 1e3 "), Some(1000.0));
        assert!(parse_float("abc").is_none());
    }
}
