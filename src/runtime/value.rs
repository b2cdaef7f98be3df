//! The tagged union every runtime operation consumes and produces.
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::compiler::Constant;
use crate::num::BigInt;
use crate::runtime::callable::{
    BoundMethod, BuiltinFunction, FunctionObject, PropertyObject, SuperObject,
};
use crate::runtime::class::{InstanceObject, TypeObject};
use crate::runtime::dict::{DictObject, DictView};
use crate::runtime::exception::{PyException, PyResult};
use crate::runtime::format;
use crate::runtime::iter::{GeneratorObject, IteratorObject};
use crate::runtime::module::ModuleObject;
use crate::runtime::set::SetObject;

pub type DictRef = Rc<RefCell<DictObject>>;
pub type ListRef = Rc<RefCell<Vec<Value>>>;
pub type CellRef = Rc<RefCell<Option<Value>>>;
pub type Kwargs = Vec<(Rc<str>, Value)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeObject {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeObject {
    pub fn len(&self) -> usize {
        let (low, high, step) = if self.step > 0 {
            (self.start as i128, self.stop as i128, self.step as i128)
        } else {
            (self.stop as i128, self.start as i128, -(self.step as i128))
        };
        if high <= low {
            0
        } else {
            ((high - low - 1) / step + 1) as usize
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        (index < self.len()).then(|| self.start + self.step * index as i64)
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (value - self.start) % self.step == 0
    }
}

#[derive(Debug, Clone)]
pub struct SliceObject {
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

#[derive(Clone)]
pub enum Value {
    None,
    NotImplemented,
    Ellipsis,
    Bool(bool),
    Int(i64),
    Big(Rc<BigInt>),
    Float(f64),
    Str(Rc<str>),
    List(ListRef),
    Tuple(Rc<[Value]>),
    Dict(DictRef),
    Set(Rc<RefCell<SetObject>>),
    FrozenSet(Rc<SetObject>),
    Range(Rc<RangeObject>),
    Slice(Rc<SliceObject>),
    Function(Rc<FunctionObject>),
    Builtin(Rc<BuiltinFunction>),
    Method(Rc<BoundMethod>),
    Generator(Rc<RefCell<GeneratorObject>>),
    Iterator(Rc<RefCell<IteratorObject>>),
    DictView(Rc<DictView>),
    Type(Rc<TypeObject>),
    Instance(Rc<InstanceObject>),
    Module(Rc<ModuleObject>),
    Property(Rc<PropertyObject>),
    ClassMethod(Rc<Value>),
    StaticMethod(Rc<Value>),
    Super(Rc<SuperObject>),
    Cell(CellRef),
}

impl Value {
    pub fn string(text: impl Into<Rc<str>>) -> Self {
        Self::Str(text.into())
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Self::Tuple(items.into())
    }

    pub fn empty_tuple() -> Self {
        Self::Tuple(Rc::from(Vec::new()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(dict: DictObject) -> Self {
        Self::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(set: SetObject) -> Self {
        Self::Set(Rc::new(RefCell::new(set)))
    }

    pub fn range(start: i64, stop: i64, step: i64) -> Self {
        Self::Range(Rc::new(RangeObject { start, stop, step }))
    }

    /// An integer in its smallest representation.
    pub fn from_bigint(value: BigInt) -> Self {
        match value.to_i64() {
            Some(small) => Self::Int(small),
            None => Self::Big(Rc::new(value)),
        }
    }

    pub fn from_i128(value: i128) -> Self {
        match i64::try_from(value) {
            Ok(small) => Self::Int(small),
            Err(_) => {
                let high = BigInt::from_u64((value.unsigned_abs() >> 64) as u64).shl(64);
                let magnitude = &high + &BigInt::from_u64(value.unsigned_abs() as u64);
                Self::from_bigint(if value < 0 { -magnitude } else { magnitude })
            }
        }
    }

    pub fn from_constant(constant: &Constant) -> Self {
        match constant {
            Constant::None => Self::None,
            Constant::Bool(value) => Self::Bool(*value),
            Constant::Int(value) => Self::Int(*value),
            Constant::Big(value) => Self::Big(value.clone()),
            Constant::Float(value) => Self::Float(*value),
            Constant::Str(value) => Self::Str(value.clone()),
            Constant::Ellipsis => Self::Ellipsis,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Identity in the sense of the `is` operator.
    pub fn is(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::None, Self::None)
            | (Self::NotImplemented, Self::NotImplemented)
            | (Self::Ellipsis, Self::Ellipsis) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Big(a), Self::Big(b)) => Rc::ptr_eq(a, b),
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b) || (a.len() <= 1 && a == b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Tuple(a), Self::Tuple(b)) => Rc::ptr_eq(a, b) || (a.is_empty() && b.is_empty()),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b),
            (Self::Set(a), Self::Set(b)) => Rc::ptr_eq(a, b),
            (Self::FrozenSet(a), Self::FrozenSet(b)) => Rc::ptr_eq(a, b),
            (Self::Range(a), Self::Range(b)) => Rc::ptr_eq(a, b),
            (Self::Slice(a), Self::Slice(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => Rc::ptr_eq(a, b),
            (Self::Method(a), Self::Method(b)) => Rc::ptr_eq(a, b),
            (Self::Generator(a), Self::Generator(b)) => Rc::ptr_eq(a, b),
            (Self::Iterator(a), Self::Iterator(b)) => Rc::ptr_eq(a, b),
            (Self::DictView(a), Self::DictView(b)) => Rc::ptr_eq(a, b),
            (Self::Type(a), Self::Type(b)) => Rc::ptr_eq(a, b),
            (Self::Instance(a), Self::Instance(b)) => Rc::ptr_eq(a, b),
            (Self::Module(a), Self::Module(b)) => Rc::ptr_eq(a, b),
            (Self::Property(a), Self::Property(b)) => Rc::ptr_eq(a, b),
            (Self::ClassMethod(a), Self::ClassMethod(b)) => Rc::ptr_eq(a, b),
            (Self::StaticMethod(a), Self::StaticMethod(b)) => Rc::ptr_eq(a, b),
            (Self::Super(a), Self::Super(b)) => Rc::ptr_eq(a, b),
            (Self::Cell(a), Self::Cell(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// A stable address for `id()` and default hashing.
    pub fn identity(&self) -> usize {
        fn addr<T: ?Sized>(rc: &Rc<T>) -> usize {
            Rc::as_ptr(rc) as *const u8 as usize
        }
        match self {
            Self::None => 0x10,
            Self::NotImplemented => 0x20,
            Self::Ellipsis => 0x30,
            Self::Bool(value) => 0x40 + *value as usize,
            Self::Int(value) => *value as usize,
            Self::Float(value) => value.to_bits() as usize,
            Self::Big(rc) => addr(rc),
            Self::Str(rc) => addr(rc),
            Self::List(rc) => addr(rc),
            Self::Tuple(rc) => addr(rc),
            Self::Dict(rc) => addr(rc),
            Self::Set(rc) => addr(rc),
            Self::FrozenSet(rc) => addr(rc),
            Self::Range(rc) => addr(rc),
            Self::Slice(rc) => addr(rc),
            Self::Function(rc) => addr(rc),
            Self::Builtin(rc) => addr(rc),
            Self::Method(rc) => addr(rc),
            Self::Generator(rc) => addr(rc),
            Self::Iterator(rc) => addr(rc),
            Self::DictView(rc) => addr(rc),
            Self::Type(rc) => addr(rc),
            Self::Instance(rc) => addr(rc),
            Self::Module(rc) => addr(rc),
            Self::Property(rc) => addr(rc),
            Self::ClassMethod(rc) => addr(rc),
            Self::StaticMethod(rc) => addr(rc),
            Self::Super(rc) => addr(rc),
            Self::Cell(rc) => addr(rc),
        }
    }

    /// The name of the value's type as `type(x).__name__` reports it.
    pub fn type_name(&self) -> String {
        let name = match self {
            Self::None => "NoneType",
            Self::NotImplemented => "NotImplementedType",
            Self::Ellipsis => "ellipsis",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::Big(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::FrozenSet(_) => "frozenset",
            Self::Range(_) => "range",
            Self::Slice(_) => "slice",
            Self::Function(_) => "function",
            Self::Builtin(_) => "builtin_function_or_method",
            Self::Method(_) => "method",
            Self::Generator(_) => "generator",
            Self::Iterator(iterator) => iterator.borrow().type_name(),
            Self::DictView(view) => view.type_name(),
            Self::Type(_) => "type",
            Self::Instance(instance) => return instance.class.name.to_string(),
            Self::Module(_) => "module",
            Self::Property(_) => "property",
            Self::ClassMethod(_) => "classmethod",
            Self::StaticMethod(_) => "staticmethod",
            Self::Super(_) => "super",
            Self::Cell(_) => "cell",
        };
        name.to_string()
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(text) => Some(text),
            _ => None,
        }
    }

    /// `int` semantics for `bool` and native ints; `None` for bignums and
    /// non-integers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Bool(value) => Some(*value as i64),
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn to_bigint(&self) -> Option<BigInt> {
        match self {
            Self::Bool(value) => Some(BigInt::from_i64(*value as i64)),
            Self::Int(value) => Some(BigInt::from_i64(*value)),
            Self::Big(value) => Some((**value).clone()),
            _ => None,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::Int(_) | Self::Big(_))
    }

    pub fn is_number(&self) -> bool {
        self.is_int() || matches!(self, Self::Float(_))
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(value) => Some(*value as i64 as f64),
            Self::Int(value) => Some(*value as f64),
            Self::Big(value) => Some(value.to_f64()),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// An index-like integer argument (`list[i]`, `range(n)`, `chr(n)`).
    pub fn expect_index(&self, what: &str) -> PyResult<i64> {
        match self {
            Self::Bool(_) | Self::Int(_) => Ok(self.as_i64().unwrap_or_default()),
            Self::Big(_) => Err(PyException::index_error(
                "cannot fit 'int' into an index-sized integer",
            )),
            other => Err(PyException::type_error(format!(
                "{what} must be integers or slices, not {}",
                other.type_name()
            ))),
        }
    }

    /// Truthiness of values that never run user code.
    pub fn native_truthy(&self) -> Option<bool> {
        Some(match self {
            Self::None => false,
            Self::Bool(value) => *value,
            Self::Int(value) => *value != 0,
            Self::Big(value) => !value.is_zero(),
            Self::Float(value) => *value != 0.0,
            Self::Str(text) => !text.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::Dict(dict) => !dict.borrow().is_empty(),
            Self::Set(set) => !set.borrow().is_empty(),
            Self::FrozenSet(set) => !set.is_empty(),
            Self::Range(range) => !range.is_empty(),
            Self::DictView(view) => view.len() != 0,
            Self::Instance(_) => return None,
            _ => true,
        })
    }

    /// `repr()` without invoking user-defined `__repr__`.
    pub fn basic_repr(&self) -> String {
        format::repr(None, self).unwrap_or_else(|_| format!("<{} object>", self.type_name()))
    }

    /// `str()` without invoking user-defined `__str__`.
    pub fn basic_str(&self) -> String {
        match self {
            Self::Str(text) => text.to_string(),
            other => other.basic_repr(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.basic_repr())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(Rc::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_length_and_membership() {
        let range = RangeObject { start: 0, stop: 10, step: 3 };
        assert_eq!(range.len(), 4);
        assert_eq!(range.get(3), Some(9));
        assert!(range.contains(6));
        assert!(!range.contains(7));
        let down = RangeObject { start: 5, stop: 0, step: -2 };
        assert_eq!(down.len(), 3);
        assert!(down.contains(1));
        assert!(RangeObject { start: 3, stop: 3, step: 1 }.is_empty());
    }

    #[test]
    fn bigints_demote_when_they_fit() {
        assert!(matches!(Value::from_bigint(BigInt::from_i64(42)), Value::Int(42)));
        assert!(matches!(Value::from_i128(1 << 70), Value::Big(_)));
        assert!(matches!(Value::from_i128(-5), Value::Int(-5)));
        assert_eq!(Value::from_i128(1 << 64).basic_repr(), "18446744073709551616");
    }

    #[test]
    fn identity_of_small_values() {
        assert!(Value::None.is(&Value::None));
        assert!(Value::Int(3).is(&Value::Int(3)));
        let items = Value::list(vec![]);
        assert!(items.is(&items.clone()));
        assert!(!items.is(&Value::list(vec![])));
    }
}
