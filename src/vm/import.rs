//! `import` and `from ... import`: registry lookup, built-in modules, then
//! source files under the configured search roots.

use std::rc::Rc;

use log::debug;

use crate::error::CompileError;
use crate::modules;
use crate::parser::Mode;
use crate::runtime::exception::{ExceptionKind, PyException, PyResult};
use crate::runtime::module::ModuleObject;
use crate::runtime::object::{HasAttr, Iterable};
use crate::runtime::value::{DictRef, Value};
use crate::vm::frame::Frame;
use crate::vm::{Engine, Flow};

/// A module source file found under a search root.
struct Located {
    path: String,
    source: String,
    package: bool,
}

impl Engine {
    /// `import a.b` pushes `a` (or `a.b` with `leaf`); `from ..a import x`
    /// resolves relative to the importing module's package first.
    pub(super) fn import_name(&mut self, name: &str, level: usize, leaf: bool) -> PyResult<Value> {
        let full = if level > 0 {
            let base = self.relative_base(level)?;
            match (base.is_empty(), name.is_empty()) {
                (_, true) => base,
                (true, false) => name.to_string(),
                (false, false) => format!("{base}.{name}"),
            }
        } else {
            name.to_string()
        };
        let mut parent: Option<Value> = None;
        let mut top: Option<Value> = None;
        let mut prefix = String::new();
        for component in full.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(component);
            let module = self.import_module(&prefix, parent.as_ref())?;
            top.get_or_insert_with(|| module.clone());
            parent = Some(module);
        }
        let result = if leaf { parent } else { top };
        result.ok_or_else(|| PyException::import_error("Empty module name"))
    }

    /// The package a relative import of `level` dots starts from.
    fn relative_base(&mut self, level: usize) -> PyResult<String> {
        let globals = self.current_globals();
        let globals = globals.borrow();
        let package = match globals.get_str("__package__") {
            Some(Value::Str(package)) => package.to_string(),
            _ => {
                let name = globals.get_str("__name__").and_then(|name| name.as_str().map(str::to_string));
                let name = name.unwrap_or_default();
                if globals.contains_str("__path__") {
                    name
                } else {
                    name.rsplit_once('.').map(|(parent, _)| parent.to_string()).unwrap_or_default()
                }
            }
        };
        if package.is_empty() || package == "__main__" {
            return Err(PyException::import_error(
                "attempted relative import with no known parent package",
            ));
        }
        let mut base = package.as_str();
        for _ in 1..level {
            match base.rsplit_once('.') {
                Some((parent, _)) => base = parent,
                None => {
                    return Err(PyException::import_error("attempted relative import beyond top-level package"));
                }
            }
        }
        Ok(base.to_string())
    }

    /// Imports one dotted name whose parents are already imported.
    fn import_module(&mut self, full: &str, parent: Option<&Value>) -> PyResult<Value> {
        if let Some(module) = self.modules.borrow().get_str(full) {
            return Ok(module);
        }
        if let Some(module) = modules::load(self, full) {
            debug!("loaded built-in module {full}");
            self.modules.borrow_mut().set_str(full, module.clone());
            return Ok(module);
        }
        let Some(located) = self.locate(full) else {
            return Err(PyException::import_error(format!("No module named '{full}'")));
        };
        let module = self.execute_module(full, located)?;
        if let Some(Value::Module(parent)) = parent {
            let child = full.rsplit('.').next().unwrap_or(full);
            parent.dict.borrow_mut().set_str(child, module.clone());
        }
        Ok(module)
    }

    fn locate(&self, full: &str) -> Option<Located> {
        let relative = full.replace('.', "/");
        for root in &self.config.search_paths {
            let root = root.trim_end_matches('/');
            let candidates = [
                (format!("{root}/{relative}.py"), false),
                (format!("{root}/{relative}/__init__.py"), true),
            ];
            for (path, package) in candidates {
                if let Some(source) = self.host.read_source(&path) {
                    return Some(Located { path, source, package });
                }
            }
        }
        None
    }

    /// Compiles and runs a module body in a nested, non-suspendable run.
    fn execute_module(&mut self, full: &str, located: Located) -> PyResult<Value> {
        let Located { path, source, package } = located;
        let code = self
            .compile(full, &source, &path, Mode::Exec)
            .map_err(compile_exception)?;
        let module = ModuleObject::new(full, Some(&path));
        {
            let mut namespace = module.dict.borrow_mut();
            if package {
                let directory = path.trim_end_matches("/__init__.py");
                namespace.set_str("__path__", Value::list(vec![Value::from(directory)]));
                namespace.set_str("__package__", Value::from(full));
            } else {
                let parent = full.rsplit_once('.').map(|(parent, _)| parent).unwrap_or("");
                namespace.set_str("__package__", Value::from(parent));
            }
        }
        let globals: DictRef = module.dict.clone();
        let module = module.into_value();
        self.modules.borrow_mut().set_str(full, module.clone());
        debug!("importing {full} from {path}");

        self.check_depth()?;
        let base = self.frames.len();
        self.frames.push(Frame::module(code, globals, Rc::from(full)));
        match self.run_nested(base) {
            Ok(Flow::Return(_)) => Ok(module),
            Ok(Flow::Suspend(_)) => Err(PyException::runtime_error("module import suspended")),
            Err(exception) => {
                self.frames.truncate(base);
                self.modules.borrow_mut().remove_str(full);
                Err(exception)
            }
        }
    }

    /// `from module import name`, falling back to a submodule.
    pub(super) fn import_from(&mut self, module: &Value, name: &str) -> PyResult<Value> {
        if let Some(value) = module.lookup_attr(self, name)? {
            return Ok(value);
        }
        let cannot = |module_name: &str| {
            PyException::import_error(format!("cannot import name '{name}' from '{module_name}'"))
        };
        let Value::Module(package) = module else {
            return Err(cannot(&module.type_name()));
        };
        if !package.dict.borrow().contains_str("__path__") {
            return Err(cannot(&package.name));
        }
        let full = format!("{}.{name}", package.name);
        if self.modules.borrow().contains_str(&full) || self.locate(&full).is_some() {
            return self.import_module(&full, Some(module));
        }
        Err(cannot(&package.name))
    }

    /// `from module import *` into the current namespace.
    pub(super) fn import_star(&mut self, module: &Value) -> PyResult<()> {
        let Value::Module(source) = module else {
            return Err(PyException::type_error("import * requires a module"));
        };
        let exported = source.dict.borrow().get_str("__all__");
        let names: Vec<Rc<str>> = match exported {
            Some(names) => names
                .collect(self)?
                .into_iter()
                .map(|name| match name {
                    Value::Str(name) => Ok(name),
                    other => Err(PyException::type_error(format!(
                        "Item in {}.__all__ must be str, not {}",
                        source.name,
                        other.type_name()
                    ))),
                })
                .collect::<PyResult<_>>()?,
            None => source
                .dict
                .borrow()
                .keys()
                .into_iter()
                .filter_map(|key| match key {
                    Value::Str(name) if !name.starts_with('_') => Some(name),
                    _ => None,
                })
                .collect(),
        };
        let frame = self.frame();
        let target = frame.namespace.clone().unwrap_or_else(|| frame.globals.clone());
        for name in names {
            let value = source.dict.borrow().get_str(&name).ok_or_else(|| {
                PyException::attribute_error(format!("module '{}' has no attribute '{name}'", source.name))
            })?;
            target.borrow_mut().set_str(&name, value);
        }
        Ok(())
    }
}

/// A compile failure inside a running program becomes a catchable exception
/// of the same name.
fn compile_exception(error: CompileError) -> PyException {
    let kind = ExceptionKind::from_name(error.kind.name()).unwrap_or(ExceptionKind::SyntaxError);
    PyException::new(
        kind,
        format!("{} ({}, line {})", error.message, error.filename, error.line),
    )
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::config::EngineConfig;
    use crate::host::BufferHost;
    use crate::vm::{Engine, EngineError, run_to_completion};

    fn run(host: BufferHost, main: &str) -> Result<String, EngineError> {
        let output = host.output();
        let mut engine = Engine::new(EngineConfig::without_time_slicing(), Box::new(host));
        let completion = engine.run_source(main, "main.py")?;
        run_to_completion(&mut engine, completion)?;
        let text = output.borrow().clone();
        Ok(text)
    }

    #[test]
    fn imports_packages_submodules_and_relative_names() {
        let host = BufferHost::new()
            .with_file("pkg/__init__.py", "from .util import double\nNAME = 'pkg'\n")
            .with_file("pkg/util.py", "def double(x):\n    return 2 * x\n")
            .with_file("pkg/sub/__init__.py", "")
            .with_file("pkg/sub/leaf.py", "from ..util import double\nVALUE = double(21)\n");
        let output = run(
            host,
            indoc! {"
                import pkg.sub.leaf
                from pkg import util, NAME
                from pkg.sub.leaf import VALUE as answer
                print(pkg.sub.leaf.VALUE, util.double(4), NAME, answer)
            "},
        )
        .unwrap();
        assert_eq!(output, "42 8 pkg 42\n");
    }

    #[test]
    fn module_bodies_run_once() {
        let host = BufferHost::new().with_file("counter.py", "print('loading')\nhits = 0\n");
        let output = run(
            host,
            indoc! {"
                import counter
                import counter as again
                counter.hits += 1
                print(again.hits)
            "},
        )
        .unwrap();
        assert_eq!(output, "loading\n1\n");
    }

    #[test]
    fn failures_surface_as_import_or_syntax_errors() {
        let host = BufferHost::new().with_file("broken.py", "def f(:\n");
        let output = run(
            host,
            indoc! {"
                try:
                    import missing
                except ImportError as e:
                    print(e)
                try:
                    import broken
                except SyntaxError:
                    print('syntax')
                try:
                    from math import nothing
                except ImportError as e:
                    print(e)
            "},
        )
        .unwrap();
        assert_eq!(
            output,
            "No module named 'missing'\nsyntax\ncannot import name 'nothing' from 'math'\n"
        );
    }

    #[test]
    fn star_import_honors_all() {
        let host = BufferHost::new().with_file("shapes.py", "__all__ = ['square']\ndef square(x):\n    return x * x\ndef cube(x):\n    return x ** 3\n");
        let output = run(
            host,
            indoc! {"
                from shapes import *
                print(square(3))
                print('cube' in globals())
            "},
        )
        .unwrap();
        assert_eq!(output, "9\nFalse\n");
    }
}
