use std::rc::Rc;

use crate::runtime::dict::new_dict;
use crate::runtime::value::{DictRef, Value};

/// A module: a named namespace. Its dict doubles as the globals of the code
/// that runs inside it.
#[derive(Debug)]
pub struct ModuleObject {
    pub name: Rc<str>,
    pub dict: DictRef,
}

impl ModuleObject {
    pub fn new(name: &str, file: Option<&str>) -> Self {
        let dict = new_dict();
        {
            let mut namespace = dict.borrow_mut();
            namespace.set_str("__name__", Value::from(name));
            namespace.set_str("__doc__", Value::None);
            if let Some(file) = file {
                namespace.set_str("__file__", Value::from(file));
            }
        }
        Self {
            name: Rc::from(name),
            dict,
        }
    }

    /// A module with native members, such as `math`.
    pub fn with_members(name: &str, members: Vec<(&str, Value)>) -> Self {
        let module = Self::new(name, None);
        {
            let mut namespace = module.dict.borrow_mut();
            for (member, value) in members {
                namespace.set_str(member, value);
            }
        }
        module
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.dict.borrow().get_str(name)
    }

    pub fn into_value(self) -> Value {
        Value::Module(Rc::new(self))
    }
}
