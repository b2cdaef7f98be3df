//! Rich comparison.
//!
//! The chain is: the native slot for built-in operands, the left operand's
//! `__op__`, the right operand's reflected `__rop__`, a three-way `__cmp__`,
//! identity for `==`/`!=`, and finally `TypeError`.

use std::cmp::Ordering;

use crate::ast::CmpOp;
use crate::num::BigInt;
use crate::runtime::dict::dict_get;
use crate::runtime::exception::{PyException, PyResult};
use crate::runtime::object::{CallContext, Sequence, call_method, native_eq, truthy, values_equal};
use crate::runtime::set;
use crate::runtime::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn from_ast(op: CmpOp) -> Option<Self> {
        Some(match op {
            CmpOp::Eq => Self::Eq,
            CmpOp::NotEq => Self::Ne,
            CmpOp::Lt => Self::Lt,
            CmpOp::LtE => Self::Le,
            CmpOp::Gt => Self::Gt,
            CmpOp::GtE => Self::Ge,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    pub fn dunder(self) -> &'static str {
        match self {
            Self::Lt => "__lt__",
            Self::Le => "__le__",
            Self::Eq => "__eq__",
            Self::Ne => "__ne__",
            Self::Gt => "__gt__",
            Self::Ge => "__ge__",
        }
    }

    /// The operator with its operands swapped: `a < b` is `b > a`.
    pub fn swapped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            other => other,
        }
    }

    pub fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

/// Ordering between two numbers; `None` for NaN or non-numbers.
pub fn numeric_order(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return Some(x.cmp(&y));
    }
    if a.is_int() && b.is_int() {
        return Some(a.to_bigint()?.cmp(&b.to_bigint()?));
    }
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Float(x), int) if int.is_int() => float_int_order(*x, int),
        (int, Value::Float(y)) if int.is_int() => float_int_order(*y, int).map(Ordering::reverse),
        _ => None,
    }
}

/// Compares a float with an integer exactly, even past 2^53.
fn float_int_order(float: f64, int: &Value) -> Option<Ordering> {
    if float.is_nan() {
        return None;
    }
    if float.is_infinite() {
        return Some(if float > 0.0 { Ordering::Greater } else { Ordering::Less });
    }
    let whole = BigInt::from_f64(float.trunc())?;
    let int = int.to_bigint()?;
    match whole.cmp(&int) {
        Ordering::Equal if float.fract() > 0.0 => Some(Ordering::Greater),
        Ordering::Equal if float.fract() < 0.0 => Some(Ordering::Less),
        other => Some(other),
    }
}

/// `==` between numbers; `None` when either side is not a number.
pub fn numeric_eq(a: &Value, b: &Value) -> Option<bool> {
    if !a.is_number() || !b.is_number() {
        return None;
    }
    Some(numeric_order(a, b) == Some(Ordering::Equal))
}

fn sequence_compare(cx: &mut dyn CallContext, a: &[Value], b: &[Value], op: CompareOp) -> PyResult<bool> {
    for (left, right) in a.iter().zip(b) {
        if left.is(right) || values_equal(cx, left, right)? {
            continue;
        }
        return match op {
            CompareOp::Eq => Ok(false),
            CompareOp::Ne => Ok(true),
            _ => {
                let result = compare(cx, left, right, op)?;
                truthy(cx, &result)
            }
        };
    }
    Ok(op.holds(a.len().cmp(&b.len())))
}

fn dict_eq(cx: &mut dyn CallContext, a: &Value, b: &Value) -> PyResult<bool> {
    let (Value::Dict(a), Value::Dict(b)) = (a, b) else {
        return Ok(false);
    };
    if a.borrow().len() != b.borrow().len() {
        return Ok(false);
    }
    let pairs = a.borrow().items();
    for (key, value) in pairs {
        match dict_get(cx, b, &key)? {
            Some(other) if values_equal(cx, &value, &other)? => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

/// The built-in comparison slots; `None` when the operands have none.
fn native_compare(cx: &mut dyn CallContext, a: &Value, b: &Value, op: CompareOp) -> PyResult<Option<bool>> {
    if a.is_number() && b.is_number() {
        return Ok(Some(match numeric_order(a, b) {
            Some(ordering) => op.holds(ordering),
            None => op == CompareOp::Ne,
        }));
    }
    let result = match (a, b) {
        (Value::Str(x), Value::Str(y)) => op.holds(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            sequence_compare(cx, &x, &y, op)?
        }
        (Value::Tuple(x), Value::Tuple(y)) => sequence_compare(cx, x, y, op)?,
        (Value::Set(_) | Value::FrozenSet(_), Value::Set(_) | Value::FrozenSet(_)) => {
            let answer = match op {
                CompareOp::Eq => set::set_eq(cx, a, b)?,
                CompareOp::Ne => set::set_eq(cx, a, b)?.map(|equal| !equal),
                CompareOp::Le => set::set_compare(cx, a, b, false, false)?,
                CompareOp::Lt => set::set_compare(cx, a, b, true, false)?,
                CompareOp::Ge => set::set_compare(cx, a, b, false, true)?,
                CompareOp::Gt => set::set_compare(cx, a, b, true, true)?,
            };
            return Ok(answer);
        }
        (Value::Dict(_), Value::Dict(_)) => match op {
            CompareOp::Eq => dict_eq(cx, a, b)?,
            CompareOp::Ne => !dict_eq(cx, a, b)?,
            _ => return Ok(None),
        },
        (Value::DictView(x), Value::DictView(y)) if matches!(op, CompareOp::Eq | CompareOp::Ne) => {
            let mut equal = x.len() == y.len();
            if equal {
                let others = Value::list(y.snapshot());
                for item in x.snapshot() {
                    if !others.contains(cx, &item)? {
                        equal = false;
                        break;
                    }
                }
            }
            equal == (op == CompareOp::Eq)
        }
        (Value::Instance(_), _) | (_, Value::Instance(_)) => return Ok(None),
        _ => match op {
            CompareOp::Eq | CompareOp::Ne => match native_eq(a, b) {
                Some(equal) => equal == (op == CompareOp::Eq),
                None => return Ok(None),
            },
            _ => return Ok(None),
        },
    };
    Ok(Some(result))
}

fn is_not_implemented(result: &Option<Value>) -> bool {
    matches!(result, None | Some(Value::NotImplemented))
}

/// `a <op> b` for the six rich comparison operators.
pub fn compare(cx: &mut dyn CallContext, a: &Value, b: &Value, op: CompareOp) -> PyResult<Value> {
    if let Some(result) = native_compare(cx, a, b, op)? {
        return Ok(Value::Bool(result));
    }
    let result = call_method(cx, a, op.dunder(), vec![b.clone()])?;
    if !is_not_implemented(&result) {
        return Ok(result.unwrap_or(Value::None));
    }
    let result = call_method(cx, b, op.swapped().dunder(), vec![a.clone()])?;
    if !is_not_implemented(&result) {
        return Ok(result.unwrap_or(Value::None));
    }
    if let Some(ordering) = three_way(cx, a, b)? {
        return Ok(Value::Bool(op.holds(ordering)));
    }
    match op {
        CompareOp::Eq => Ok(Value::Bool(a.is(b))),
        CompareOp::Ne => Ok(Value::Bool(!a.is(b))),
        _ => Err(PyException::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// `__cmp__` on either operand, normalized to an ordering.
fn three_way(cx: &mut dyn CallContext, a: &Value, b: &Value) -> PyResult<Option<Ordering>> {
    let (result, reversed) = match call_method(cx, a, "__cmp__", vec![b.clone()])? {
        Some(result) if !matches!(result, Value::NotImplemented) => (result, false),
        _ => match call_method(cx, b, "__cmp__", vec![a.clone()])? {
            Some(result) if !matches!(result, Value::NotImplemented) => (result, true),
            _ => return Ok(None),
        },
    };
    let sign = match numeric_order(&result, &Value::Int(0)) {
        Some(ordering) => ordering,
        None => {
            return Err(PyException::type_error(format!(
                "__cmp__ should return an int, returned {}",
                result.type_name()
            )));
        }
    };
    Ok(Some(if reversed { sign.reverse() } else { sign }))
}

/// Any comparison operator from a compiled `Compare` instruction.
pub fn compare_op(cx: &mut dyn CallContext, op: CmpOp, a: &Value, b: &Value) -> PyResult<Value> {
    match op {
        CmpOp::Is => Ok(Value::Bool(a.is(b))),
        CmpOp::IsNot => Ok(Value::Bool(!a.is(b))),
        CmpOp::In => Ok(Value::Bool(b.contains(cx, a)?)),
        CmpOp::NotIn => Ok(Value::Bool(!b.contains(cx, a)?)),
        rich => {
            let op = CompareOp::from_ast(rich).unwrap_or(CompareOp::Eq);
            compare(cx, a, b, op)
        }
    }
}

/// Total order used by `sort`, `min` and `max`: `a < b`.
pub fn less_than(cx: &mut dyn CallContext, a: &Value, b: &Value) -> PyResult<bool> {
    if let Some(ordering) = numeric_order(a, b) {
        return Ok(ordering == Ordering::Less);
    }
    if let (Value::Str(x), Value::Str(y)) = (a, b) {
        return Ok(x < y);
    }
    let result = compare(cx, a, b, CompareOp::Lt)?;
    truthy(cx, &result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::tests::NoCalls;

    fn check(a: Value, op: CompareOp, b: Value) -> Result<bool, String> {
        let mut cx = NoCalls::new();
        match compare(&mut cx, &a, &b, op) {
            Ok(Value::Bool(flag)) => Ok(flag),
            Ok(other) => Err(other.basic_repr()),
            Err(error) => Err(error.summary()),
        }
    }

    #[test]
    fn numbers_compare_across_representations() {
        assert_eq!(check(Value::Int(1), CompareOp::Eq, Value::Float(1.0)), Ok(true));
        assert_eq!(check(Value::Bool(true), CompareOp::Eq, Value::Int(1)), Ok(true));
        let big = Value::from_i128(1 << 70);
        assert_eq!(check(big.clone(), CompareOp::Gt, Value::Int(i64::MAX)), Ok(true));
        assert_eq!(check(Value::Float(2.5), CompareOp::Lt, Value::Int(3)), Ok(true));
        assert_eq!(check(Value::Int(3), CompareOp::Gt, Value::Float(2.5)), Ok(true));
        assert_eq!(check(Value::Float(f64::NAN), CompareOp::Eq, Value::Float(f64::NAN)), Ok(false));
        assert_eq!(check(Value::Float(f64::NAN), CompareOp::Ne, Value::Int(0)), Ok(true));
    }

    #[test]
    fn sequences_compare_lexicographically() {
        let a = Value::tuple(vec![Value::Int(1), Value::Int(2)]);
        let b = Value::tuple(vec![Value::Int(1), Value::Int(3)]);
        assert_eq!(check(a.clone(), CompareOp::Lt, b.clone()), Ok(true));
        assert_eq!(check(a.clone(), CompareOp::Eq, b), Ok(false));
        let prefix = Value::tuple(vec![Value::Int(1)]);
        assert_eq!(check(prefix, CompareOp::Lt, a), Ok(true));
        assert_eq!(check(Value::from("abc"), CompareOp::Lt, Value::from("abd")), Ok(true));
    }

    #[test]
    fn mismatched_types() {
        assert_eq!(check(Value::Int(1), CompareOp::Eq, Value::from("1")), Ok(false));
        assert_eq!(check(Value::None, CompareOp::Ne, Value::Int(0)), Ok(true));
        assert_eq!(
            check(Value::Int(1), CompareOp::Lt, Value::from("a")),
            Err("TypeError: '<' not supported between instances of 'int' and 'str'".to_string())
        );
    }

    #[test]
    fn membership_and_identity() {
        let mut cx = NoCalls::new();
        let items = Value::list(vec![Value::Int(1), Value::Float(2.0)]);
        let found = compare_op(&mut cx, CmpOp::In, &Value::Int(2), &items).unwrap();
        assert!(matches!(found, Value::Bool(true)));
        let same = compare_op(&mut cx, CmpOp::Is, &items, &items).unwrap();
        assert!(matches!(same, Value::Bool(true)));
    }
}
