use thiserror::Error;

use crate::runtime::exception::PyException;
use crate::runtime::value::{Kwargs, Value};

/// Argument-shape failures of built-in callables; they surface as `TypeError`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("{name}() takes no arguments ({found} given)")]
    NoArguments { name: String, found: usize },
    #[error("{name}() takes exactly {expected} argument{} ({found} given)", plural(*expected))]
    Exact {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("{name}() takes at least {expected} argument{} ({found} given)", plural(*expected))]
    AtLeast {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("{name}() takes at most {expected} argument{} ({found} given)", plural(*expected))]
    AtMost {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("{name}() takes no keyword arguments")]
    NoKeywords { name: String },
    #[error("{name}() got an unexpected keyword argument '{keyword}'")]
    UnexpectedKeyword { name: String, keyword: String },
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

impl From<ArgumentError> for PyException {
    fn from(error: ArgumentError) -> Self {
        PyException::type_error(error.to_string())
    }
}

/// Checks a positional count against `min..=max`.
pub fn check_arity(name: &str, found: usize, min: usize, max: usize) -> Result<(), ArgumentError> {
    let name = name.to_string();
    if min == max && found != min {
        return Err(if min == 0 {
            ArgumentError::NoArguments { name, found }
        } else {
            ArgumentError::Exact {
                name,
                expected: min,
                found,
            }
        });
    }
    if found < min {
        return Err(ArgumentError::AtLeast {
            name,
            expected: min,
            found,
        });
    }
    if found > max {
        return Err(ArgumentError::AtMost {
            name,
            expected: max,
            found,
        });
    }
    Ok(())
}

/// Method variant: `args[0]` is the receiver and does not count.
pub fn check_method_arity(
    name: &str,
    args: &[Value],
    min: usize,
    max: usize,
) -> Result<(), ArgumentError> {
    check_arity(name, args.len().saturating_sub(1), min, max)
}

pub fn reject_kwargs(name: &str, kwargs: &Kwargs) -> Result<(), ArgumentError> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(ArgumentError::NoKeywords {
            name: name.to_string(),
        })
    }
}

/// Removes a keyword argument by name.
pub fn take_kwarg(kwargs: &mut Kwargs, keyword: &str) -> Option<Value> {
    let index = kwargs.iter().position(|(name, _)| &**name == keyword)?;
    Some(kwargs.remove(index).1)
}

/// Fails on the first keyword nobody consumed.
pub fn finish_kwargs(name: &str, kwargs: Kwargs) -> Result<(), ArgumentError> {
    match kwargs.into_iter().next() {
        Some((keyword, _)) => Err(ArgumentError::UnexpectedKeyword {
            name: name.to_string(),
            keyword: keyword.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_messages_read_like_python() {
        assert_eq!(
            check_arity("upper", 1, 0, 0).unwrap_err().to_string(),
            "upper() takes no arguments (1 given)"
        );
        assert_eq!(
            check_arity("append", 0, 1, 1).unwrap_err().to_string(),
            "append() takes exactly 1 argument (0 given)"
        );
        assert_eq!(
            check_arity("pop", 3, 0, 2).unwrap_err().to_string(),
            "pop() takes at most 2 arguments (3 given)"
        );
        assert!(check_arity("get", 2, 1, 2).is_ok());
    }

    #[test]
    fn keyword_helpers() {
        let mut kwargs: Kwargs = vec![("key".into(), Value::None), ("extra".into(), Value::Int(1))];
        assert!(take_kwarg(&mut kwargs, "key").is_some());
        assert_eq!(
            finish_kwargs("sorted", kwargs).unwrap_err().to_string(),
            "sorted() got an unexpected keyword argument 'extra'"
        );
    }
}
