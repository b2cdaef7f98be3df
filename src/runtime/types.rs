//! The built-in type objects and their method tables.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::runtime::callable::{self, BuiltinFunction, BuiltinKind, IntrinsicFn, NativeFn};
use crate::runtime::class::{self, InstanceObject, TypeObject};
use crate::runtime::error::{check_method_arity, reject_kwargs};
use crate::runtime::exception::{ExceptionKind, PyException, PyResult, exception_args};
use crate::runtime::format;
use crate::runtime::object::{CallContext, call_method, repr, str_of, truthy};
use crate::runtime::dict::DictObject;
use crate::runtime::value::{DictRef, Kwargs, Value};
use crate::runtime::{dict, int, iter, list, set, string};
use crate::vm::intrinsics;

pub struct BuiltinTypes {
    pub object: Rc<TypeObject>,
    pub type_type: Rc<TypeObject>,
    pub int: Rc<TypeObject>,
    pub bool: Rc<TypeObject>,
    pub float: Rc<TypeObject>,
    pub str: Rc<TypeObject>,
    pub list: Rc<TypeObject>,
    pub tuple: Rc<TypeObject>,
    pub dict: Rc<TypeObject>,
    pub set: Rc<TypeObject>,
    pub frozenset: Rc<TypeObject>,
    pub range: Rc<TypeObject>,
    pub slice: Rc<TypeObject>,
    pub none: Rc<TypeObject>,
    pub not_implemented: Rc<TypeObject>,
    pub ellipsis: Rc<TypeObject>,
    pub function: Rc<TypeObject>,
    pub builtin_function: Rc<TypeObject>,
    pub method: Rc<TypeObject>,
    pub generator: Rc<TypeObject>,
    pub module: Rc<TypeObject>,
    pub property: Rc<TypeObject>,
    pub classmethod: Rc<TypeObject>,
    pub staticmethod: Rc<TypeObject>,
    pub super_type: Rc<TypeObject>,
    pub cell: Rc<TypeObject>,
    views: [Rc<TypeObject>; 3],
    iterators: FxHashMap<&'static str, Rc<TypeObject>>,
    /// Indexed by `ExceptionKind::index`.
    exceptions: Vec<Rc<TypeObject>>,
}

fn make(name: &str, bases: &[&Rc<TypeObject>], constructor: Option<NativeFn>) -> TypeObject {
    let mut class = TypeObject::builtin(name, bases.iter().map(|base| Rc::clone(base)).collect());
    class.constructor = constructor;
    class
}

fn install(class: TypeObject, methods: &[(&str, NativeFn)]) -> Rc<TypeObject> {
    {
        let mut namespace = class.dict.borrow_mut();
        for (name, function) in methods {
            namespace.set_str(name, BuiltinFunction::method(&class.name, name, BuiltinKind::Native(*function)));
        }
    }
    Rc::new(class)
}

fn install_intrinsics(class: &Rc<TypeObject>, methods: &[(&str, IntrinsicFn)]) {
    let mut namespace = class.dict.borrow_mut();
    for (name, function) in methods {
        namespace.set_str(name, BuiltinFunction::method(&class.name, name, BuiltinKind::Intrinsic(*function)));
    }
}

impl BuiltinTypes {
    pub fn new() -> Self {
        let object = install(make("object", &[], None), OBJECT_METHODS);
        let type_type = install(make("type", &[&object], None), TYPE_METHODS);
        let simple = |name: &str, constructor: Option<NativeFn>, methods: &[(&str, NativeFn)]| {
            install(make(name, &[&object], constructor), methods)
        };
        let int = simple("int", Some(int::int_new), int::INT_METHODS);
        let bool = install(make("bool", &[&int], Some(int::bool_new)), &[]);
        let float = simple("float", Some(int::float_new), int::FLOAT_METHODS);
        let str = simple("str", Some(string::str_new), string::METHODS);
        let list = simple("list", Some(list::list_new), list::LIST_METHODS);
        let tuple = simple("tuple", Some(list::tuple_new), list::TUPLE_METHODS);
        let dict = simple("dict", Some(dict::dict_new), dict::METHODS);
        let set = simple("set", Some(set::set_new), set::METHODS);
        let frozen_methods: Vec<(&str, NativeFn)> = set::METHODS
            .iter()
            .filter(|(name, _)| set::FROZEN_METHODS.contains(name))
            .copied()
            .collect();
        let frozenset = simple("frozenset", Some(set::frozenset_new), &frozen_methods);
        let generator = simple("generator", None, &[]);
        install_intrinsics(&generator, intrinsics::GENERATOR_METHODS);
        let views = ["dict_keys", "dict_values", "dict_items"].map(|name| simple(name, None, &[]));
        let iterators = iter::TYPE_NAMES
            .iter()
            .map(|&name| {
                let constructor: Option<NativeFn> = match name {
                    "enumerate" => Some(iter::enumerate_new),
                    "zip" => Some(iter::zip_new),
                    "map" => Some(iter::map_new),
                    "filter" => Some(iter::filter_new),
                    _ => None,
                };
                (name, simple(name, constructor, iter::METHODS))
            })
            .collect();
        let mut exceptions: Vec<Rc<TypeObject>> = Vec::with_capacity(ExceptionKind::ALL.len());
        for kind in ExceptionKind::ALL {
            let parent = match kind.parent() {
                None => &object,
                Some(parent) => &exceptions[parent.index()],
            };
            let mut class = make(kind.name(), &[parent], None);
            class.exception = Some(*kind);
            let methods = if kind.parent().is_none() { EXCEPTION_METHODS } else { &[] };
            exceptions.push(install(class, methods));
        }
        Self {
            range: simple("range", Some(list::range_new), &[]),
            slice: simple("slice", Some(list::slice_new), &[]),
            none: simple("NoneType", None, &[]),
            not_implemented: simple("NotImplementedType", None, &[]),
            ellipsis: simple("ellipsis", None, &[]),
            function: simple("function", None, &[]),
            builtin_function: simple("builtin_function_or_method", None, &[]),
            method: simple("method", None, &[]),
            module: simple("module", None, &[]),
            property: simple("property", Some(callable::property_new), callable::PROPERTY_METHODS),
            classmethod: simple("classmethod", Some(callable::classmethod_new), &[]),
            staticmethod: simple("staticmethod", Some(callable::staticmethod_new), &[]),
            super_type: simple("super", None, &[]),
            cell: simple("cell", None, &[]),
            object,
            type_type,
            int,
            bool,
            float,
            str,
            list,
            tuple,
            dict,
            set,
            frozenset,
            generator,
            views,
            iterators,
            exceptions,
        }
    }

    pub fn exception(&self, kind: ExceptionKind) -> Rc<TypeObject> {
        self.exceptions[kind.index()].clone()
    }

    /// The names scripts see as built-in classes.
    pub fn named(&self) -> Vec<(&str, Rc<TypeObject>)> {
        let mut named = vec![
            ("object", self.object.clone()),
            ("type", self.type_type.clone()),
            ("int", self.int.clone()),
            ("bool", self.bool.clone()),
            ("float", self.float.clone()),
            ("str", self.str.clone()),
            ("list", self.list.clone()),
            ("tuple", self.tuple.clone()),
            ("dict", self.dict.clone()),
            ("set", self.set.clone()),
            ("frozenset", self.frozenset.clone()),
            ("range", self.range.clone()),
            ("slice", self.slice.clone()),
            ("property", self.property.clone()),
            ("classmethod", self.classmethod.clone()),
            ("staticmethod", self.staticmethod.clone()),
            ("super", self.super_type.clone()),
        ];
        for name in ["enumerate", "zip", "map", "filter"] {
            named.push((name, self.iterators[name].clone()));
        }
        for kind in ExceptionKind::ALL {
            named.push((kind.name(), self.exception(*kind)));
        }
        named
    }

    pub fn type_of(&self, value: &Value) -> Rc<TypeObject> {
        let class = match value {
            Value::None => &self.none,
            Value::NotImplemented => &self.not_implemented,
            Value::Ellipsis => &self.ellipsis,
            Value::Bool(_) => &self.bool,
            Value::Int(_) | Value::Big(_) => &self.int,
            Value::Float(_) => &self.float,
            Value::Str(_) => &self.str,
            Value::List(_) => &self.list,
            Value::Tuple(_) => &self.tuple,
            Value::Dict(_) => &self.dict,
            Value::Set(_) => &self.set,
            Value::FrozenSet(_) => &self.frozenset,
            Value::Range(_) => &self.range,
            Value::Slice(_) => &self.slice,
            Value::Function(_) => &self.function,
            Value::Builtin(_) => &self.builtin_function,
            Value::Method(_) => &self.method,
            Value::Generator(_) => &self.generator,
            Value::Iterator(iterator) => {
                let name = iterator.borrow().type_name();
                return self.iterators.get(name).unwrap_or(&self.object).clone();
            }
            Value::DictView(view) => match view.kind {
                dict::ViewKind::Keys => &self.views[0],
                dict::ViewKind::Values => &self.views[1],
                dict::ViewKind::Items => &self.views[2],
            },
            Value::Type(_) => &self.type_type,
            Value::Instance(instance) => &instance.class,
            Value::Module(_) => &self.module,
            Value::Property(_) => &self.property,
            Value::ClassMethod(_) => &self.classmethod,
            Value::StaticMethod(_) => &self.staticmethod,
            Value::Super(_) => &self.super_type,
            Value::Cell(_) => &self.cell,
        };
        class.clone()
    }

    /// An instance of an exception class with `args` already set.
    pub fn new_exception(&self, class: &Rc<TypeObject>, args: Vec<Value>) -> Value {
        let instance = InstanceObject::new(class.clone());
        set_exception_args(&mut instance.dict.borrow_mut(), class, args);
        Value::Instance(Rc::new(instance))
    }
}

impl Default for BuiltinTypes {
    fn default() -> Self {
        Self::new()
    }
}

fn object_init(_cx: &mut dyn CallContext, _args: Vec<Value>, _kwargs: Kwargs) -> PyResult<Value> {
    Ok(Value::None)
}

fn object_repr(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("__repr__", &kwargs)?;
    check_method_arity("__repr__", &args, 0, 0)?;
    Ok(Value::from(format::default_object_repr(&args[0])))
}

fn object_str(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("__str__", &kwargs)?;
    check_method_arity("__str__", &args, 0, 0)?;
    Ok(Value::from(repr(cx, &args[0])?))
}

fn object_eq(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("__eq__", &kwargs)?;
    check_method_arity("__eq__", &args, 1, 1)?;
    Ok(if args[0].is(&args[1]) { Value::Bool(true) } else { Value::NotImplemented })
}

fn object_ne(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("__ne__", &kwargs)?;
    check_method_arity("__ne__", &args, 1, 1)?;
    match call_method(cx, &args[0], "__eq__", vec![args[1].clone()])? {
        Some(Value::NotImplemented) | None => Ok(Value::NotImplemented),
        Some(result) => Ok(Value::Bool(!truthy(cx, &result)?)),
    }
}

fn object_hash(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("__hash__", &kwargs)?;
    check_method_arity("__hash__", &args, 0, 0)?;
    Ok(Value::Int(args[0].identity() as i64 >> 4))
}

fn instance_dict(value: &Value, method: &str) -> PyResult<DictRef> {
    match value {
        Value::Instance(instance) => Ok(instance.dict.clone()),
        other => Err(PyException::type_error(format!(
            "can't apply object.{method} to '{}' object",
            other.type_name()
        ))),
    }
}

fn object_setattr(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("__setattr__", &kwargs)?;
    check_method_arity("__setattr__", &args, 2, 2)?;
    let name = args[1]
        .as_str()
        .ok_or_else(|| PyException::type_error("attribute name must be string"))?;
    let dict = instance_dict(&args[0], "__setattr__")?;
    class::store(&args[0], &dict, name, Some(args[2].clone()))?;
    Ok(Value::None)
}

fn object_delattr(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("__delattr__", &kwargs)?;
    check_method_arity("__delattr__", &args, 1, 1)?;
    let name = args[1]
        .as_str()
        .ok_or_else(|| PyException::type_error("attribute name must be string"))?;
    let dict = instance_dict(&args[0], "__delattr__")?;
    class::store(&args[0], &dict, name, None)?;
    Ok(Value::None)
}

const OBJECT_METHODS: &[(&str, NativeFn)] = &[
    ("__init__", object_init),
    ("__repr__", object_repr),
    ("__str__", object_str),
    ("__eq__", object_eq),
    ("__ne__", object_ne),
    ("__hash__", object_hash),
    ("__setattr__", object_setattr),
    ("__delattr__", object_delattr),
];

fn type_mro(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("mro", &kwargs)?;
    check_method_arity("mro", &args, 0, 0)?;
    match &args[0] {
        Value::Type(class) => Ok(Value::list(class.full_mro().into_iter().map(Value::Type).collect())),
        other => Err(PyException::type_error(format!(
            "descriptor 'mro' requires a 'type' object but received a '{}'",
            other.type_name()
        ))),
    }
}

const TYPE_METHODS: &[(&str, NativeFn)] = &[("mro", type_mro)];

fn exception_init(_cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("BaseException", &kwargs)?;
    check_method_arity("__init__", &args, 0, usize::MAX)?;
    let dict = instance_dict(&args[0], "__init__")?;
    if let Value::Instance(instance) = &args[0] {
        set_exception_args(&mut dict.borrow_mut(), &instance.class, args[1..].to_vec());
    }
    Ok(Value::None)
}

/// `args`, plus `value` on `StopIteration`.
fn set_exception_args(dict: &mut DictObject, class: &TypeObject, args: Vec<Value>) {
    if class.exception_kind() == Some(ExceptionKind::StopIteration) {
        dict.set_str("value", args.first().cloned().unwrap_or(Value::None));
    }
    dict.set_str("args", Value::tuple(args));
}

fn exception_str(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("__str__", &kwargs)?;
    check_method_arity("__str__", &args, 0, 0)?;
    let is_key_error = match &args[0] {
        Value::Instance(instance) => instance.class.exception_kind() == Some(ExceptionKind::KeyError),
        _ => false,
    };
    let text = match exception_args(&args[0]).as_slice() {
        [] => String::new(),
        [single] if is_key_error => repr(cx, single)?,
        [single] => str_of(cx, single)?,
        many => repr(cx, &Value::tuple(many.to_vec()))?,
    };
    Ok(Value::from(text))
}

fn exception_repr(cx: &mut dyn CallContext, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
    reject_kwargs("__repr__", &kwargs)?;
    check_method_arity("__repr__", &args, 0, 0)?;
    let name = args[0].type_name();
    let items = exception_args(&args[0]);
    let mut parts = Vec::with_capacity(items.len());
    for item in &items {
        parts.push(repr(cx, item)?);
    }
    Ok(Value::from(format!("{name}({})", parts.join(", "))))
}

const EXCEPTION_METHODS: &[(&str, NativeFn)] = &[
    ("__init__", exception_init),
    ("__str__", exception_str),
    ("__repr__", exception_repr),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_hierarchy_is_wired() {
        let types = BuiltinTypes::new();
        assert!(types.bool.is_subtype(&types.int));
        assert!(types.int.is_subtype(&types.object));
        let zero_division = types.exception(ExceptionKind::ZeroDivisionError);
        assert!(zero_division.is_subtype(&types.exception(ExceptionKind::ArithmeticError)));
        assert!(zero_division.is_subtype(&types.exception(ExceptionKind::BaseException)));
        assert_eq!(zero_division.exception_kind(), Some(ExceptionKind::ZeroDivisionError));
        assert!(types.str.lookup("upper").is_some());
        assert!(types.bool.lookup("bit_length").is_some());
    }

    #[test]
    fn type_of_maps_every_value() {
        let types = BuiltinTypes::new();
        assert_eq!(&*types.type_of(&Value::Bool(true)).name, "bool");
        assert_eq!(&*types.type_of(&Value::from_i128(1 << 90)).name, "int");
        let iterator = iter::IteratorObject::new(iter::IterKind::Range {
            range: crate::runtime::value::RangeObject { start: 0, stop: 1, step: 1 },
            index: 0,
        })
        .into_value();
        assert_eq!(&*types.type_of(&iterator).name, "range_iterator");
    }

    #[test]
    fn exceptions_materialize_with_args() {
        let types = BuiltinTypes::new();
        let value = PyException::value_error("bad").to_value(&types);
        assert_eq!(value.type_name(), "ValueError");
        assert_eq!(value.basic_repr(), "ValueError('bad')");
        assert_eq!(exception_args(&value).len(), 1);
    }
}
