//! Classes, instances, C3 linearization and attribute resolution.
use std::rc::Rc;

use crate::runtime::callable::{BoundMethod, NativeFn};
use crate::runtime::dict::new_dict;
use crate::runtime::exception::{ExceptionKind, PyException, PyResult};
use crate::runtime::object::CallContext;
use crate::runtime::types::BuiltinTypes;
use crate::runtime::value::{DictRef, Value};

pub struct TypeObject {
    pub name: Rc<str>,
    pub qualname: Rc<str>,
    pub module: Rc<str>,
    pub bases: Vec<Rc<TypeObject>>,
    /// Method resolution order, excluding the class itself.
    pub mro: Vec<Rc<TypeObject>>,
    pub dict: DictRef,
    /// Set on the built-in exception classes only.
    pub exception: Option<ExceptionKind>,
    pub builtin: bool,
    /// Native constructor of a built-in type (`int(x)`, `list(it)`, ...).
    pub constructor: Option<NativeFn>,
}

impl std::fmt::Debug for TypeObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<class '{}'>", self.name)
    }
}

impl TypeObject {
    pub fn builtin(name: &str, bases: Vec<Rc<TypeObject>>) -> Self {
        let mut mro = Vec::new();
        for base in &bases {
            for class in std::iter::once(base).chain(&base.mro) {
                if !mro.iter().any(|seen| Rc::ptr_eq(seen, class)) {
                    mro.push(class.clone());
                }
            }
        }
        Self {
            name: Rc::from(name),
            qualname: Rc::from(name),
            module: Rc::from("builtins"),
            bases,
            mro,
            dict: new_dict(),
            exception: None,
            builtin: true,
            constructor: None,
        }
    }

    /// Looks `name` up along the MRO, starting with this class.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.dict.borrow().get_str(name) {
            return Some(value);
        }
        self.mro
            .iter()
            .find_map(|class| class.dict.borrow().get_str(name))
    }

    pub fn is_subtype(&self, other: &Rc<TypeObject>) -> bool {
        std::ptr::eq(self, Rc::as_ptr(other)) || self.mro.iter().any(|class| Rc::ptr_eq(class, other))
    }

    pub fn exception_kind(&self) -> Option<ExceptionKind> {
        self.exception
            .or_else(|| self.mro.iter().find_map(|class| class.exception))
    }

    pub fn full_mro(self: &Rc<Self>) -> Vec<Rc<TypeObject>> {
        std::iter::once(self.clone())
            .chain(self.mro.iter().cloned())
            .collect()
    }

    /// `__module__.__qualname__` for reprs, without the `builtins.` prefix.
    pub fn display_name(&self) -> String {
        if self.builtin || &*self.module == "builtins" {
            self.qualname.to_string()
        } else {
            format!("{}.{}", self.module, self.qualname)
        }
    }
}

pub struct InstanceObject {
    pub class: Rc<TypeObject>,
    pub dict: DictRef,
}

impl InstanceObject {
    pub fn new(class: Rc<TypeObject>) -> Self {
        Self {
            class,
            dict: new_dict(),
        }
    }
}

impl std::fmt::Debug for InstanceObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{} object>", self.class.name)
    }
}

/// C3 linearization of `bases`, not including the new class itself.
pub fn linearize(bases: &[Rc<TypeObject>]) -> PyResult<Vec<Rc<TypeObject>>> {
    let mut sequences: Vec<Vec<Rc<TypeObject>>> = bases
        .iter()
        .map(|base| base.full_mro())
        .chain(std::iter::once(bases.to_vec()))
        .collect();
    let mut result = Vec::new();
    loop {
        sequences.retain(|sequence| !sequence.is_empty());
        if sequences.is_empty() {
            return Ok(result);
        }
        let candidate = sequences.iter().map(|sequence| &sequence[0]).find(|head| {
            !sequences
                .iter()
                .any(|sequence| sequence[1..].iter().any(|class| Rc::ptr_eq(class, head)))
        });
        let Some(candidate) = candidate.cloned() else {
            let names = bases
                .iter()
                .map(|base| base.name.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(PyException::type_error(format!(
                "Cannot create a consistent method resolution order (MRO) for bases {names}"
            )));
        };
        for sequence in &mut sequences {
            if Rc::ptr_eq(&sequence[0], &candidate) {
                sequence.remove(0);
            }
        }
        result.push(candidate);
    }
}

/// Creates a class from an executed body namespace.
pub fn new_class(
    types: &BuiltinTypes,
    name: &str,
    qualname: &str,
    bases: &[Value],
    namespace: DictRef,
) -> PyResult<Rc<TypeObject>> {
    let mut base_classes = Vec::with_capacity(bases.len());
    for base in bases {
        let Value::Type(class) = base else {
            return Err(PyException::type_error(format!(
                "bases must be types, not {}",
                base.type_name()
            )));
        };
        if base_classes.iter().any(|seen: &Rc<TypeObject>| Rc::ptr_eq(seen, class)) {
            return Err(PyException::type_error(format!(
                "duplicate base class {}",
                class.name
            )));
        }
        if class.builtin && class.exception.is_none() && !Rc::ptr_eq(class, &types.object) {
            return Err(PyException::type_error(format!(
                "type '{}' is not an acceptable base type",
                class.name
            )));
        }
        base_classes.push(class.clone());
    }
    if base_classes.is_empty() {
        base_classes.push(types.object.clone());
    }
    let mro = linearize(&base_classes)?;

    let module = {
        let mut namespace = namespace.borrow_mut();
        if namespace.contains_str("__eq__") && !namespace.contains_str("__hash__") {
            namespace.set_str("__hash__", Value::None);
        }
        match namespace.get_str("__module__") {
            Some(Value::Str(module)) => module,
            _ => Rc::from("__main__"),
        }
    };
    Ok(Rc::new(TypeObject {
        name: Rc::from(name),
        qualname: Rc::from(qualname),
        module,
        bases: base_classes,
        mro,
        dict: namespace,
        exception: None,
        builtin: false,
        constructor: None,
    }))
}

/// Class-level lookup used for operator and protocol dispatch on instances.
pub fn lookup_special(value: &Value, name: &str) -> Option<Value> {
    match value {
        Value::Instance(instance) => instance.class.lookup(name),
        _ => None,
    }
}

/// Binds a class attribute found for `receiver`.
fn bind(receiver: &Value, owner: &Rc<TypeObject>, attr: Value) -> Value {
    match attr {
        Value::Function(_) => method(receiver.clone(), attr),
        Value::Builtin(ref builtin) if builtin.method => method(receiver.clone(), attr),
        Value::ClassMethod(inner) => method(Value::Type(owner.clone()), (*inner).clone()),
        Value::StaticMethod(inner) => (*inner).clone(),
        other => other,
    }
}

pub fn method(receiver: Value, function: Value) -> Value {
    Value::Method(Rc::new(BoundMethod { receiver, function }))
}

fn missing(value: &Value, name: &str) -> PyException {
    let message = match value {
        Value::Type(class) => format!("type object '{}' has no attribute '{name}'", class.name),
        Value::Module(module) => format!("module '{}' has no attribute '{name}'", module.name),
        other => format!("'{}' object has no attribute '{name}'", other.type_name()),
    };
    PyException::attribute_error(message)
}

pub fn get_attribute(cx: &mut dyn CallContext, value: &Value, name: &str) -> PyResult<Value> {
    let types = cx.types();
    if name == "__class__" {
        return Ok(Value::Type(types.type_of(value)));
    }
    match value {
        Value::Instance(instance) => instance_attribute(cx, value, &instance.class, &instance.dict, name),
        Value::Type(class) => class_attribute(&types, class, name).ok_or_else(|| missing(value, name)),
        Value::Module(module) => {
            if name == "__dict__" {
                return Ok(Value::Dict(module.dict.clone()));
            }
            module.dict.borrow().get_str(name).ok_or_else(|| missing(value, name))
        }
        Value::Super(sup) => {
            let start = sup
                .receiver_type
                .full_mro()
                .iter()
                .position(|class| Rc::ptr_eq(class, &sup.start))
                .map_or(0, |index| index + 1);
            for class in sup.receiver_type.full_mro().into_iter().skip(start) {
                let found = class.dict.borrow().get_str(name);
                if let Some(attr) = found {
                    return Ok(match (&sup.receiver, attr) {
                        (Value::Type(owner), Value::ClassMethod(inner)) => {
                            method(Value::Type(owner.clone()), (*inner).clone())
                        }
                        (Value::Type(_), Value::StaticMethod(inner)) => (*inner).clone(),
                        (Value::Type(_), attr) => attr,
                        (receiver, Value::Property(property)) => match &property.fget {
                            Some(getter) => cx.call(getter, vec![receiver.clone()], Vec::new())?,
                            None => return Err(PyException::attribute_error("unreadable attribute")),
                        },
                        (receiver, attr) => bind(receiver, &sup.receiver_type, attr),
                    });
                }
            }
            Err(missing(value, name))
        }
        other => {
            if let Some(attr) = special_attribute(other, name) {
                return Ok(attr);
            }
            let class = types.type_of(other);
            match class.lookup(name) {
                Some(attr) => Ok(bind(other, &class, attr)),
                None => Err(missing(other, name)),
            }
        }
    }
}

fn instance_attribute(
    cx: &mut dyn CallContext,
    value: &Value,
    class: &Rc<TypeObject>,
    dict: &DictRef,
    name: &str,
) -> PyResult<Value> {
    let class_attr = class.lookup(name);
    if let Some(Value::Property(property)) = &class_attr {
        return match &property.fget {
            Some(getter) => cx.call(getter, vec![value.clone()], Vec::new()),
            None => Err(PyException::attribute_error("unreadable attribute")),
        };
    }
    if name == "__dict__" {
        return Ok(Value::Dict(dict.clone()));
    }
    if let Some(found) = dict.borrow().get_str(name) {
        return Ok(found);
    }
    if let Some(attr) = class_attr {
        return Ok(bind(value, class, attr));
    }
    if let Some(getattr) = class.lookup("__getattr__") {
        let getattr = bind(value, class, getattr);
        return cx.call(&getattr, vec![Value::from(name)], Vec::new());
    }
    Err(missing(value, name))
}

fn class_attribute(types: &BuiltinTypes, class: &Rc<TypeObject>, name: &str) -> Option<Value> {
    match name {
        "__name__" => return Some(Value::string(class.name.clone())),
        "__qualname__" => return Some(Value::string(class.qualname.clone())),
        "__mro__" => {
            return Some(Value::tuple(class.full_mro().into_iter().map(Value::Type).collect()));
        }
        "__bases__" => {
            return Some(Value::tuple(class.bases.iter().cloned().map(Value::Type).collect()));
        }
        "__dict__" => return Some(Value::dict(class.dict.borrow().clone())),
        "__module__" if class.builtin => return Some(Value::from("builtins")),
        "__doc__" if class.lookup("__doc__").is_none() => return Some(Value::None),
        _ => {}
    }
    let attr = class.lookup(name).or_else(|| {
        // Attributes of `type` itself, such as `mro`.
        types.type_type.dict.borrow().get_str(name).map(|attr| match attr {
            Value::Builtin(ref builtin) if builtin.method => {
                method(Value::Type(class.clone()), attr.clone())
            }
            other => other,
        })
    })?;
    Some(match attr {
        Value::ClassMethod(inner) => method(Value::Type(class.clone()), (*inner).clone()),
        Value::StaticMethod(inner) => (*inner).clone(),
        other => other,
    })
}

/// Read-only data attributes of built-in objects.
fn special_attribute(value: &Value, name: &str) -> Option<Value> {
    match (value, name) {
        (Value::Function(function), _) => match name {
            "__name__" => Some(Value::string(function.name.clone())),
            "__qualname__" => Some(Value::string(function.qualname.clone())),
            "__module__" => Some(Value::string(function.module.clone())),
            "__doc__" => Some(
                function
                    .code
                    .doc
                    .clone()
                    .map_or(Value::None, Value::Str),
            ),
            "__dict__" => Some(Value::Dict(function.dict.clone())),
            "__defaults__" if function.defaults.is_empty() => Some(Value::None),
            "__defaults__" => Some(Value::tuple(function.defaults.clone())),
            _ => function.dict.borrow().get_str(name),
        },
        (Value::Builtin(builtin), "__name__" | "__qualname__") => {
            Some(Value::string(builtin.name.clone()))
        }
        (Value::Builtin(_), "__doc__") => Some(Value::None),
        (Value::Method(bound), "__self__") => Some(bound.receiver.clone()),
        (Value::Method(bound), "__func__") => Some(bound.function.clone()),
        (Value::Method(bound), "__name__" | "__qualname__" | "__doc__") => match &bound.function {
            Value::Function(function) => special_attribute(&Value::Function(function.clone()), name),
            Value::Builtin(builtin) => Some(Value::string(builtin.name.clone())),
            _ => None,
        },
        (Value::Property(property), "fget") => Some(property.fget.clone().unwrap_or(Value::None)),
        (Value::Property(property), "fset") => Some(property.fset.clone().unwrap_or(Value::None)),
        (Value::Property(property), "fdel") => Some(property.fdel.clone().unwrap_or(Value::None)),
        (Value::Property(property), "__doc__") => Some(property.doc.clone().unwrap_or(Value::None)),
        (Value::ClassMethod(inner) | Value::StaticMethod(inner), "__func__") => {
            Some((**inner).clone())
        }
        (Value::Slice(slice), "start") => Some(slice.start.clone()),
        (Value::Slice(slice), "stop") => Some(slice.stop.clone()),
        (Value::Slice(slice), "step") => Some(slice.step.clone()),
        (Value::Range(range), "start") => Some(Value::Int(range.start)),
        (Value::Range(range), "stop") => Some(Value::Int(range.stop)),
        (Value::Range(range), "step") => Some(Value::Int(range.step)),
        (Value::Generator(generator), "__name__") => Some(Value::string(generator.borrow().name.clone())),
        (Value::Generator(generator), "__qualname__") => {
            Some(Value::string(generator.borrow().qualname.clone()))
        }
        (Value::Int(_) | Value::Big(_) | Value::Bool(_), "real" | "numerator") => {
            Some(crate::runtime::int::to_int(value))
        }
        (Value::Int(_) | Value::Big(_) | Value::Bool(_), "imag") => Some(Value::Int(0)),
        (Value::Int(_) | Value::Big(_) | Value::Bool(_), "denominator") => Some(Value::Int(1)),
        (Value::Float(float), "real") => Some(Value::Float(*float)),
        (Value::Float(_), "imag") => Some(Value::Float(0.0)),
        (Value::Cell(cell), "cell_contents") => cell.borrow().clone(),
        _ => None,
    }
}

/// `setattr` (`Some`) and `delattr` (`None`).
pub fn set_attribute(
    cx: &mut dyn CallContext,
    target: &Value,
    name: &str,
    value: Option<Value>,
) -> PyResult<()> {
    match target {
        Value::Instance(instance) => {
            let class = &instance.class;
            if let Some(Value::Property(property)) = class.lookup(name) {
                let (accessor, args) = match value {
                    Some(value) => (&property.fset, vec![target.clone(), value]),
                    None => (&property.fdel, vec![target.clone()]),
                };
                return match accessor {
                    Some(accessor) => cx.call(accessor, args, Vec::new()).map(drop),
                    None if args.len() == 2 => Err(PyException::attribute_error("can't set attribute")),
                    None => Err(PyException::attribute_error("can't delete attribute")),
                };
            }
            let hook = if value.is_some() { "__setattr__" } else { "__delattr__" };
            if let Some(custom @ Value::Function(_)) = class.lookup(hook) {
                let mut args = vec![target.clone(), Value::from(name)];
                args.extend(value);
                return cx.call(&custom, args, Vec::new()).map(drop);
            }
            store(target, &instance.dict, name, value)
        }
        Value::Type(class) if !class.builtin => store(target, &class.dict, name, value),
        Value::Type(class) => Err(PyException::type_error(format!(
            "cannot set '{name}' attribute of immutable type '{}'",
            class.name
        ))),
        Value::Module(module) => store(target, &module.dict, name, value),
        Value::Function(function) => store(target, &function.dict, name, value),
        other => Err(PyException::attribute_error(format!(
            "'{}' object has no attribute '{name}'",
            other.type_name()
        ))),
    }
}

/// Plain dict store, as `object.__setattr__` does it.
pub fn store(target: &Value, dict: &DictRef, name: &str, value: Option<Value>) -> PyResult<()> {
    match value {
        Some(value) => {
            dict.borrow_mut().set_str(name, value);
            Ok(())
        }
        None => dict
            .borrow_mut()
            .remove_str(name)
            .map(drop)
            .ok_or_else(|| missing(target, name)),
    }
}

pub fn new_instance(class: &Rc<TypeObject>) -> Value {
    Value::Instance(Rc::new(InstanceObject::new(class.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::HasAttr;
    use crate::runtime::object::tests::NoCalls;

    fn class(types: &BuiltinTypes, name: &str, bases: &[Value]) -> PyResult<Rc<TypeObject>> {
        new_class(types, name, name, bases, new_dict())
    }

    fn names(mro: &[Rc<TypeObject>]) -> Vec<String> {
        mro.iter().map(|class| class.name.to_string()).collect()
    }

    #[test]
    fn diamond_linearizes_with_c3() {
        let types = BuiltinTypes::new();
        let a = class(&types, "A", &[]).unwrap();
        let b = class(&types, "B", &[Value::Type(a.clone())]).unwrap();
        let c = class(&types, "C", &[Value::Type(a.clone())]).unwrap();
        let d = class(&types, "D", &[Value::Type(b.clone()), Value::Type(c.clone())]).unwrap();
        assert_eq!(names(&d.full_mro()), ["D", "B", "C", "A", "object"]);
        assert!(d.is_subtype(&a));
        assert!(!a.is_subtype(&d));
    }

    #[test]
    fn inconsistent_and_duplicate_bases_are_type_errors() {
        let types = BuiltinTypes::new();
        let a = class(&types, "A", &[]).unwrap();
        let b = class(&types, "B", &[Value::Type(a.clone())]).unwrap();
        let err = class(&types, "C", &[Value::Type(a.clone()), Value::Type(b.clone())]).unwrap_err();
        assert_eq!(
            err.summary(),
            "TypeError: Cannot create a consistent method resolution order (MRO) for bases A, B"
        );
        let err = class(&types, "D", &[Value::Type(a.clone()), Value::Type(a)]).unwrap_err();
        assert_eq!(err.summary(), "TypeError: duplicate base class A");
    }

    #[test]
    fn instance_dict_shadows_plain_class_attributes() {
        let mut cx = NoCalls::new();
        let types = cx.types();
        let namespace = new_dict();
        namespace.borrow_mut().set_str("x", Value::Int(1));
        let point = new_class(&types, "P", "P", &[], namespace).unwrap();
        let instance = new_instance(&point);
        assert_eq!(instance.get_attr(&mut cx, "x").unwrap().basic_repr(), "1");
        instance.set_attr(&mut cx, "x", Value::Int(2)).unwrap();
        assert_eq!(instance.get_attr(&mut cx, "x").unwrap().basic_repr(), "2");
        instance.del_attr(&mut cx, "x").unwrap();
        assert_eq!(instance.get_attr(&mut cx, "x").unwrap().basic_repr(), "1");
        let err = instance.get_attr(&mut cx, "y").unwrap_err();
        assert_eq!(err.summary(), "AttributeError: 'P' object has no attribute 'y'");
    }
}
