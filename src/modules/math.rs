use crate::num::{BigInt, is_probable_prime};
use crate::runtime::callable::{BuiltinFunction, NativeFn};
use crate::runtime::error::{check_arity, reject_kwargs};
use crate::runtime::exception::{PyException, PyResult};
use crate::runtime::module::ModuleObject;
use crate::runtime::object::{CallContext, call_method};
use crate::runtime::value::{Kwargs, Value};

const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("ceil", ceil),
    ("factorial", factorial),
    ("floor", floor),
    ("gcd", gcd),
    ("isprime", isprime),
    ("isqrt", isqrt),
    ("sqrt", sqrt),
];

pub(super) fn module() -> ModuleObject {
    let mut members: Vec<(&str, Value)> = FUNCTIONS
        .iter()
        .map(|(name, function)| (*name, BuiltinFunction::native(name, *function)))
        .collect();
    members.push(("pi", Value::Float(std::f64::consts::PI)));
    members.push(("e", Value::Float(std::f64::consts::E)));
    members.push(("inf", Value::Float(f64::INFINITY)));
    ModuleObject::with_members("math", members)
}

fn one(name: &str, args: Vec<Value>, kwargs: &Kwargs) -> PyResult<Value> {
    reject_kwargs(name, kwargs)?;
    check_arity(name, args.len(), 1, 1)?;
    Ok(args.into_iter().next().unwrap_or(Value::None))
}

fn integer(name: &str, value: &Value) -> PyResult<BigInt> {
    value.to_bigint().ok_or_else(|| {
        PyException::type_error(format!(
            "'{}' object cannot be interpreted as an integer in {name}()",
            value.type_name()
        ))
    })
}

fn real(value: &Value) -> PyResult<f64> {
    value.to_f64().ok_or_else(|| {
        PyException::type_error(format!("must be real number, not {}", value.type_name()))
    })
}

fn float_to_int(value: f64) -> PyResult<Value> {
    if value.is_nan() {
        return Err(PyException::value_error("cannot convert float NaN to integer"));
    }
    BigInt::from_f64(value)
        .map(Value::from_bigint)
        .ok_or_else(|| PyException::overflow("cannot convert float infinity to integer"))
}

/// Shared by `floor` and `ceil`: ints pass through, floats round, instances
/// use their dunder.
fn rounding(cx: &mut dyn CallContext, value: Value, dunder: &str, round: fn(f64) -> f64) -> PyResult<Value> {
    match &value {
        Value::Bool(flag) => Ok(Value::Int(*flag as i64)),
        Value::Int(_) | Value::Big(_) => Ok(value),
        Value::Float(float) => float_to_int(round(*float)),
        Value::Instance(_) => call_method(cx, &value, dunder, Vec::new())?
            .ok_or_else(|| PyException::type_error(format!("must be real number, not {}", value.type_name()))),
        other => Err(PyException::type_error(format!("must be real number, not {}", other.type_name()))),
    }
}

fn floor(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = one("floor", args, &kwargs)?;
    rounding(cx, value, "__floor__", f64::floor)
}

fn ceil(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = one("ceil", args, &kwargs)?;
    rounding(cx, value, "__ceil__", f64::ceil)
}

fn sqrt(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = real(&one("sqrt", args, &kwargs)?)?;
    if value < 0.0 {
        return Err(PyException::value_error("math domain error"));
    }
    Ok(Value::Float(value.sqrt()))
}

fn isqrt(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = integer("isqrt", &one("isqrt", args, &kwargs)?)?;
    value
        .isqrt()
        .map(Value::from_bigint)
        .ok_or_else(|| PyException::value_error("isqrt() argument must be nonnegative"))
}

fn gcd(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("gcd", &kwargs)?;
    let mut result = BigInt::zero();
    for value in &args {
        result = result.gcd(&integer("gcd", value)?);
    }
    Ok(Value::from_bigint(result))
}

fn isprime(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = integer("isprime", &one("isprime", args, &kwargs)?)?;
    Ok(Value::Bool(is_probable_prime(&value)))
}

fn factorial(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    let value = one("factorial", args, &kwargs)?;
    if matches!(value, Value::Float(_)) {
        return Err(PyException::type_error("'float' object cannot be interpreted as an integer"));
    }
    let n = integer("factorial", &value)?;
    if n.is_negative() {
        return Err(PyException::value_error("factorial() not defined for negative values"));
    }
    let n = n
        .to_u64()
        .ok_or_else(|| PyException::overflow("factorial() argument should not exceed 2**64"))?;
    let mut product = BigInt::one();
    for factor in 2..=n {
        product = &product * &BigInt::from_u64(factor);
    }
    Ok(Value::from_bigint(product))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::tests::NoCalls;

    fn call(name: &str, args: Vec<Value>) -> PyResult<String> {
        let module = module();
        let Some(Value::Builtin(function)) = module.get(name) else {
            panic!("math.{name} missing");
        };
        let mut cx = NoCalls::new();
        function.call_native(&mut cx, args, Vec::new()).map(|value| value.basic_repr())
    }

    #[test]
    fn integer_functions_use_the_bignum_tower() {
        assert_eq!(call("factorial", vec![Value::Int(25)]).unwrap(), "15511210043330985984000000");
        assert_eq!(call("gcd", vec![Value::Int(84), Value::Int(-36), Value::Int(120)]).unwrap(), "12");
        assert_eq!(call("gcd", Vec::new()).unwrap(), "0");
        assert_eq!(call("isqrt", vec![Value::Int(99)]).unwrap(), "9");
        assert_eq!(call("isprime", vec![Value::Int(2_147_483_647)]).unwrap(), "True");
        assert_eq!(call("isprime", vec![Value::Int(561)]).unwrap(), "False");
    }

    #[test]
    fn float_functions_round_towards_ints() {
        assert_eq!(call("floor", vec![Value::Float(-2.5)]).unwrap(), "-3");
        assert_eq!(call("ceil", vec![Value::Float(2.1)]).unwrap(), "3");
        assert_eq!(call("sqrt", vec![Value::Int(16)]).unwrap(), "4.0");
    }

    #[test]
    fn domain_errors_are_value_errors() {
        let err = call("sqrt", vec![Value::Int(-1)]).unwrap_err();
        assert_eq!(err.summary(), "ValueError: math domain error");
        let err = call("factorial", vec![Value::Int(-1)]).unwrap_err();
        assert_eq!(err.message(), "factorial() not defined for negative values");
    }
}
