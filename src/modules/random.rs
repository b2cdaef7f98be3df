use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::runtime::callable::{BuiltinFunction, NativeFn};
use crate::runtime::error::{check_arity, reject_kwargs};
use crate::runtime::exception::{PyException, PyResult};
use crate::runtime::module::ModuleObject;
use crate::runtime::object::{CallContext, Sequence, hash_value};
use crate::runtime::value::{Kwargs, Value};

const FUNCTIONS: &[(&str, NativeFn)] = &[
    ("choice", choice),
    ("randint", randint),
    ("random", random),
    ("randrange", randrange),
    ("seed", seed),
    ("shuffle", shuffle),
    ("uniform", uniform),
];

pub(super) fn module() -> ModuleObject {
    let members = FUNCTIONS
        .iter()
        .map(|(name, function)| (*name, BuiltinFunction::native(name, *function)))
        .collect();
    ModuleObject::with_members("random", members)
}

fn small_int(name: &str, value: &Value) -> PyResult<i64> {
    value.as_i64().ok_or_else(|| {
        PyException::type_error(format!(
            "{name}() requires integer arguments, got {}",
            value.type_name()
        ))
    })
}

fn random(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("random", &kwargs)?;
    check_arity("random", args.len(), 0, 0)?;
    Ok(Value::Float(cx.rng().r#gen::<f64>()))
}

fn uniform(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("uniform", &kwargs)?;
    check_arity("uniform", args.len(), 2, 2)?;
    let (Some(low), Some(high)) = (args[0].to_f64(), args[1].to_f64()) else {
        return Err(PyException::type_error("uniform() requires real arguments"));
    };
    let fraction = cx.rng().r#gen::<f64>();
    Ok(Value::Float(low + (high - low) * fraction))
}

/// `randint(a, b)`, both ends included.
fn randint(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("randint", &kwargs)?;
    check_arity("randint", args.len(), 2, 2)?;
    let low = small_int("randint", &args[0])?;
    let high = small_int("randint", &args[1])?;
    if low > high {
        return Err(PyException::value_error(format!("empty range for randint({low}, {high})")));
    }
    Ok(Value::Int(cx.rng().gen_range(low..=high)))
}

/// `randrange(stop)` or `randrange(start, stop[, step])`.
fn randrange(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("randrange", &kwargs)?;
    check_arity("randrange", args.len(), 1, 3)?;
    let bounds = args
        .iter()
        .map(|value| small_int("randrange", value))
        .collect::<PyResult<Vec<_>>>()?;
    let (start, stop, step) = match bounds.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => unreachable!("arity checked"),
    };
    if step == 0 {
        return Err(PyException::value_error("zero step for randrange()"));
    }
    let span = stop - start;
    let count = if step > 0 { (span + step - 1) / step } else { (span + step + 1) / step };
    if count <= 0 {
        return Err(PyException::value_error(format!(
            "empty range for randrange({start}, {stop}, {step})"
        )));
    }
    let index = cx.rng().gen_range(0..count);
    Ok(Value::Int(start + step * index))
}

fn choice(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("choice", &kwargs)?;
    check_arity("choice", args.len(), 1, 1)?;
    let length = args[0].len(cx)?;
    if length == 0 {
        return Err(PyException::index_error("Cannot choose from an empty sequence"));
    }
    let index = cx.rng().gen_range(0..length);
    args[0].get_item(cx, &Value::from(index))
}

/// Shuffles a list in place.
fn shuffle(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("shuffle", &kwargs)?;
    check_arity("shuffle", args.len(), 1, 1)?;
    let Value::List(items) = &args[0] else {
        return Err(PyException::type_error(format!(
            "shuffle() argument must be a list, not {}",
            args[0].type_name()
        )));
    };
    let mut shuffled = items.borrow().clone();
    shuffled.shuffle(cx.rng());
    *items.borrow_mut() = shuffled;
    Ok(Value::None)
}

/// `seed()` reseeds from entropy; `seed(x)` is deterministic for ints,
/// strings and anything else hashable.
fn seed(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("seed", &kwargs)?;
    check_arity("seed", args.len(), 0, 1)?;
    let rng = match args.first() {
        None | Some(Value::None) => StdRng::from_entropy(),
        Some(value) => {
            let seed = match value.as_i64() {
                Some(number) => number,
                None => hash_value(cx, value)?,
            };
            StdRng::seed_from_u64(seed as u64)
        }
    };
    *cx.rng() = rng;
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::tests::NoCalls;

    fn call(cx: &mut NoCalls, function: NativeFn, args: Vec<Value>) -> Value {
        function(cx, args, Vec::new()).unwrap()
    }

    #[test]
    fn seeding_makes_draws_repeatable() {
        let mut cx = NoCalls::new();
        call(&mut cx, seed, vec![Value::Int(7)]);
        let first: Vec<String> = (0..5)
            .map(|_| call(&mut cx, randint, vec![Value::Int(1), Value::Int(100)]).basic_repr())
            .collect();
        call(&mut cx, seed, vec![Value::Int(7)]);
        let second: Vec<String> = (0..5)
            .map(|_| call(&mut cx, randint, vec![Value::Int(1), Value::Int(100)]).basic_repr())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn draws_stay_in_range() {
        let mut cx = NoCalls::new();
        for _ in 0..200 {
            let Value::Int(value) = call(&mut cx, randrange, vec![Value::Int(10), Value::Int(0), Value::Int(-3)]) else {
                panic!("randrange returned a non-int");
            };
            assert!([10, 7, 4, 1].contains(&value));
            let Value::Float(fraction) = call(&mut cx, random, Vec::new()) else {
                panic!("random returned a non-float");
            };
            assert!((0.0..1.0).contains(&fraction));
        }
    }

    #[test]
    fn shuffle_keeps_every_element() {
        let mut cx = NoCalls::new();
        let list = Value::list((0..20).map(Value::Int).collect());
        call(&mut cx, shuffle, vec![list.clone()]);
        let Value::List(items) = &list else { unreachable!() };
        let mut values: Vec<i64> = items.borrow().iter().filter_map(Value::as_i64).collect();
        values.sort_unstable();
        assert_eq!(values, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn empty_ranges_raise_value_error() {
        let mut cx = NoCalls::new();
        let err = randint(&mut cx, vec![Value::Int(5), Value::Int(1)], Vec::new()).unwrap_err();
        assert_eq!(err.message(), "empty range for randint(5, 1)");
        let err = choice(&mut cx, vec![Value::list(Vec::new())], Vec::new()).unwrap_err();
        assert_eq!(err.message(), "Cannot choose from an empty sequence");
    }
}
