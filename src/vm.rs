//! The execution engine: an iterative stack machine over basic blocks.
//!
//! Python-to-Python calls, class bodies, `__init__` and generator resumption
//! push frames on [`Engine::frames`] instead of recursing on the Rust stack,
//! so the whole stack can be moved into a [`Suspension`] at any time slice or
//! blocking request and replayed later by [`Engine::resume`].

use std::cell::RefCell;
use std::io;
use std::ops::ControlFlow;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, trace, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::builtins;
use crate::compiler::{self, BlockId, CodeObject, Instruction};
use crate::config::{DivisionPolicy, EngineConfig};
use crate::error::CompileError;
use crate::host::Host;
use crate::parser::Mode;
use crate::runtime::callable::{BuiltinKind, FunctionObject};
use crate::runtime::class::{self, TypeObject};
use crate::runtime::compare;
use crate::runtime::dict::{dict_from_pairs, dict_set, dict_update, new_dict};
use crate::runtime::exception::{ExceptionKind, PyException, PyResult};
use crate::runtime::int;
use crate::runtime::iter::{GeneratorObject, IteratorObject};
use crate::runtime::module::ModuleObject;
use crate::runtime::object::{CallContext, HasAttr, Iterable, Sequence, is_instance, repr, truthy};
use crate::runtime::set::{SetObject, set_add};
use crate::runtime::types::BuiltinTypes;
use crate::runtime::value::{CellRef, DictRef, Kwargs, SliceObject, Value};

pub mod frame;
mod import;
pub(crate) mod intrinsics;
pub mod scheduler;

use frame::{Frame, FrameLink, GenMode, Handler};
pub use scheduler::{Completion, Reply, Request, Suspension, run_to_completion};

/// Native code re-entering the engine nests a run loop on the host stack.
/// This bounds those loops independently of `recursion_limit`.
const MAX_NESTED_RUNS: usize = 32;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("{}", .0.summary())]
    Exception(PyException),
    #[error("can't open file '{0}': No such file or directory")]
    MissingSource(String),
}

impl EngineError {
    /// The text a command line shows for this failure.
    pub fn report(&self) -> String {
        match self {
            Self::Exception(exception) => exception.format_traceback(),
            other => format!("{other}\n"),
        }
    }
}

/// The result of starting a call.
pub enum CallOutcome {
    Value(Value),
    /// A frame was pushed; its result reaches the caller when it finishes.
    Frame,
    /// The callee needs the host before it can produce a value.
    Block(Request),
}

/// Why a run of the dispatch loop stopped.
enum Flow {
    Return(Value),
    Suspend(Request),
}

/// What a finishing frame hands to the frame below it.
enum Delivery {
    Push(Value),
    /// Replace the caller's top of stack (a finished `yield from`).
    ReplaceTop(Value),
    /// Pop the caller's iterator and continue at a loop exit.
    ForExit(BlockId),
    Raise(PyException),
}

/// Result of trying to resume a generator.
pub(crate) enum Resumed {
    Running,
    Finished,
}

pub struct Engine {
    config: EngineConfig,
    host: Box<dyn Host>,
    types: Rc<BuiltinTypes>,
    builtins: DictRef,
    modules: DictRef,
    code_cache: FxHashMap<(Rc<str>, Rc<str>), Rc<CodeObject>>,
    frames: Vec<Frame>,
    nested_runs: usize,
    last_suspension: Instant,
    /// Skip the next time-slice check so a resumed script makes progress.
    resumed: bool,
    rng: StdRng,
    start: Instant,
}

impl Engine {
    pub fn new(config: EngineConfig, host: Box<dyn Host>) -> Self {
        let types = Rc::new(BuiltinTypes::new());
        let builtins = builtins::namespace(&types);
        let now = Instant::now();
        Self {
            config,
            host,
            types,
            builtins,
            modules: new_dict(),
            code_cache: FxHashMap::default(),
            frames: Vec::new(),
            nested_runs: 0,
            last_suspension: now,
            resumed: false,
            rng: StdRng::from_entropy(),
            start: now,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn host_mut(&mut self) -> &mut dyn Host {
        self.host.as_mut()
    }

    /// Reseeds the generator behind the `random` module.
    pub fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Compiles `source`, caching the unit per module and scope name.
    fn compile(&mut self, module: &str, source: &str, filename: &str, mode: Mode) -> Result<Rc<CodeObject>, CompileError> {
        let key = (Rc::from(module), Rc::from(mode_scope(mode)));
        let cacheable = mode == Mode::Exec && module != "__main__";
        if cacheable
            && let Some(code) = self.code_cache.get(&key)
            && &*code.filename == filename
        {
            return Ok(code.clone());
        }
        let code = compiler::compile_source(source, filename, mode)?;
        if self.config.trace_compile {
            debug!("{}", code.disassemble());
        }
        if cacheable {
            self.code_cache.insert(key, code.clone());
        }
        Ok(code)
    }

    fn main_module(&mut self, filename: Option<&str>) -> DictRef {
        if let Some(Value::Module(module)) = self.modules.borrow().get_str("__main__") {
            return module.dict.clone();
        }
        let module = ModuleObject::new("__main__", filename);
        let globals = module.dict.clone();
        self.modules.borrow_mut().set_str("__main__", module.into_value());
        globals
    }

    /// Runs `source` as the `__main__` module.
    pub fn run_source(&mut self, source: &str, filename: &str) -> Result<Completion, EngineError> {
        let code = self.compile("__main__", source, filename, Mode::Exec)?;
        let globals = self.main_module(Some(filename));
        self.start_module(code, globals)
    }

    /// Runs a file read through the host as `__main__`.
    pub fn run_file(&mut self, path: &str) -> Result<Completion, EngineError> {
        let source = self
            .host
            .read_source(path)
            .ok_or_else(|| EngineError::MissingSource(path.to_string()))?;
        self.run_source(&source, path)
    }

    /// Runs interactive input: expression statements print their repr.
    pub fn run_interactive(&mut self, source: &str) -> Result<Completion, EngineError> {
        let code = self.compile("__main__", source, "<stdin>", Mode::Single)?;
        let globals = self.main_module(None);
        self.start_module(code, globals)
    }

    /// Evaluates one expression in `__main__` without suspending.
    pub fn eval(&mut self, source: &str) -> Result<Value, EngineError> {
        let code = self.compile("__main__", source, "<eval>", Mode::Eval)?;
        let globals = self.main_module(None);
        let base = self.frames.len();
        self.frames.push(Frame::module(code, globals, Rc::from("__main__")));
        match self.run_nested(base) {
            Ok(Flow::Return(value)) => Ok(value),
            Ok(Flow::Suspend(_)) => Err(EngineError::Exception(PyException::runtime_error(
                "evaluation suspended",
            ))),
            Err(exception) => {
                self.frames.truncate(base);
                Err(EngineError::Exception(exception))
            }
        }
    }

    fn start_module(&mut self, code: Rc<CodeObject>, globals: DictRef) -> Result<Completion, EngineError> {
        if !self.frames.is_empty() {
            return Err(EngineError::Exception(PyException::runtime_error(
                "the engine is already running a script",
            )));
        }
        self.frames.push(Frame::module(code, globals, Rc::from("__main__")));
        self.last_suspension = Instant::now();
        self.drive(None)
    }

    /// Continues a suspended script with the embedder's reply.
    pub fn resume(&mut self, suspension: Suspension, reply: Reply) -> Result<Completion, EngineError> {
        let Suspension { frames, request } = suspension;
        self.frames = frames;
        let result = match (request, reply) {
            (Request::TimeSlice, _) => None,
            (Request::Input { .. }, Reply::Input(line)) => Some(Value::from(line)),
            (Request::Input { .. }, Reply::Continue) => Some(Value::from("")),
            (Request::Sleep(_), _) => Some(Value::None),
        };
        if let Some(result) = result
            && let Some(frame) = self.frames.last_mut()
        {
            frame.push(result);
        }
        debug!("resuming {} frames", self.frames.len());
        self.resumed = true;
        self.last_suspension = Instant::now();
        self.drive(None)
    }

    /// Continues a suspended script by raising the host's failure at the
    /// blocking call.
    pub fn resume_with_error(&mut self, suspension: Suspension, error: io::Error) -> Result<Completion, EngineError> {
        self.frames = suspension.frames;
        self.resumed = true;
        self.last_suspension = Instant::now();
        self.drive(Some(host_error(error)))
    }

    fn drive(&mut self, pending: Option<PyException>) -> Result<Completion, EngineError> {
        let result = match pending {
            Some(exception) => match self.unwind(exception, 0) {
                Ok(Some(flow)) => Ok(flow),
                Ok(None) => self.run_frames(0, true),
                Err(exception) => Err(exception),
            },
            None => self.run_frames(0, true),
        };
        match result {
            Ok(Flow::Return(value)) => Ok(Completion::Done(value)),
            Ok(Flow::Suspend(request)) => {
                let frames = std::mem::take(&mut self.frames);
                debug!("suspending {} frames for {request:?}", frames.len());
                Ok(Completion::Suspended(Suspension { frames, request }))
            }
            Err(exception) => {
                self.frames.clear();
                Err(EngineError::Exception(exception))
            }
        }
    }

    /// Runs until the frame at index `base` finishes. Only the outermost run
    /// may suspend; nested runs serve blocking requests synchronously.
    fn run_frames(&mut self, base: usize, suspendable: bool) -> PyResult<Flow> {
        loop {
            let step = match self.step(base, suspendable) {
                Err(exception) => self.unwind(exception, base),
                other => other,
            };
            if let Some(flow) = step? {
                return Ok(flow);
            }
        }
    }

    /// Runs the frame at `base` to completion on behalf of native code.
    fn run_nested(&mut self, base: usize) -> PyResult<Flow> {
        if self.nested_runs >= MAX_NESTED_RUNS.min(self.config.recursion_limit) {
            return Err(PyException::runtime_error("maximum recursion depth exceeded"));
        }
        self.nested_runs += 1;
        let result = self.run_frames(base, false);
        self.nested_runs -= 1;
        result
    }

    fn frame(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("a frame is running")
    }

    fn slice_expired(&mut self) -> bool {
        if std::mem::take(&mut self.resumed) {
            return false;
        }
        match self.config.yield_interval_ms {
            Some(interval) => self.last_suspension.elapsed() >= Duration::from_millis(interval),
            None => false,
        }
    }

    fn step(&mut self, base: usize, suspendable: bool) -> PyResult<Option<Flow>> {
        if self.frames.len() <= base {
            return Ok(Some(Flow::Return(Value::None)));
        }
        let frame = self.frame();
        if let Some(exception) = frame.pending_throw.take() {
            return self.throw_at_resume(exception);
        }
        let Some(instruction) = frame.fetch() else {
            return self.return_value(Value::None, base);
        };
        let check_point = match &instruction {
            Instruction::CallFunction { .. }
            | Instruction::CallFunctionKw { .. }
            | Instruction::CallFunctionEx { .. } => true,
            Instruction::Jump(target) => *target <= frame.block,
            _ => false,
        };
        if suspendable && check_point && self.slice_expired() {
            return Ok(Some(Flow::Suspend(Request::TimeSlice)));
        }
        self.frame().ip += 1;
        self.execute(instruction, base, suspendable)
    }

    fn execute(&mut self, instruction: Instruction, base: usize, suspendable: bool) -> PyResult<Option<Flow>> {
        match instruction {
            Instruction::LoadConst(constant) => self.frame().push(Value::from_constant(&constant)),
            Instruction::LoadFast(slot) => {
                let frame = self.frame();
                let value = frame.fast[slot]
                    .clone()
                    .ok_or_else(|| unbound_local(&frame.code.varnames[slot]))?;
                frame.push(value);
            }
            Instruction::StoreFast(slot) => {
                let frame = self.frame();
                let value = frame.pop();
                frame.fast[slot] = Some(value);
            }
            Instruction::DeleteFast(slot) => {
                let frame = self.frame();
                if frame.fast[slot].take().is_none() {
                    return Err(unbound_local(&frame.code.varnames[slot]));
                }
            }
            Instruction::LoadDeref(slot) => {
                let frame = self.frame();
                let value = frame.cells[slot].borrow().clone();
                let value = value.ok_or_else(|| unbound_cell(&frame.code, slot))?;
                frame.push(value);
            }
            Instruction::StoreDeref(slot) => {
                let frame = self.frame();
                let value = frame.pop();
                *frame.cells[slot].borrow_mut() = Some(value);
            }
            Instruction::DeleteDeref(slot) => {
                let frame = self.frame();
                if frame.cells[slot].borrow_mut().take().is_none() {
                    return Err(unbound_cell(&frame.code, slot));
                }
            }
            Instruction::LoadClassDeref(slot) => {
                let frame = self.frame();
                let name = cell_name(&frame.code, slot);
                let found = frame
                    .namespace
                    .as_ref()
                    .and_then(|namespace| namespace.borrow().get_str(&name));
                let value = match found {
                    Some(value) => value,
                    None => {
                        let value = frame.cells[slot].borrow().clone();
                        value.ok_or_else(|| unbound_cell(&frame.code, slot))?
                    }
                };
                frame.push(value);
            }
            Instruction::LoadClosure(slot) => {
                let frame = self.frame();
                let cell = frame.cells[slot].clone();
                frame.push(Value::Cell(cell));
            }
            Instruction::LoadName(name) => {
                let value = self.load_name(&name)?;
                self.frame().push(value);
            }
            Instruction::StoreName(name) => {
                let frame = self.frame();
                let value = frame.pop();
                let namespace = frame.namespace.clone().unwrap_or_else(|| frame.globals.clone());
                namespace.borrow_mut().set_str(&name, value);
            }
            Instruction::DeleteName(name) => {
                let frame = self.frame();
                let namespace = frame.namespace.clone().unwrap_or_else(|| frame.globals.clone());
                if namespace.borrow_mut().remove_str(&name).is_none() {
                    return Err(name_error(&name));
                }
            }
            Instruction::LoadGlobal(name) => {
                let globals = self.frame().globals.clone();
                let found = globals.borrow().get_str(&name);
                let value = match found {
                    Some(value) => value,
                    None => self.builtins.borrow().get_str(&name).ok_or_else(|| name_error(&name))?,
                };
                self.frame().push(value);
            }
            Instruction::StoreGlobal(name) => {
                let frame = self.frame();
                let value = frame.pop();
                frame.globals.borrow_mut().set_str(&name, value);
            }
            Instruction::DeleteGlobal(name) => {
                let frame = self.frame();
                if frame.globals.borrow_mut().remove_str(&name).is_none() {
                    return Err(name_error(&name));
                }
            }
            Instruction::LoadAttr(name) => {
                let object = self.frame().pop();
                let value = object.get_attr(self, &name)?;
                self.frame().push(value);
            }
            Instruction::StoreAttr(name) => {
                let frame = self.frame();
                let object = frame.pop();
                let value = frame.pop();
                object.set_attr(self, &name, value)?;
            }
            Instruction::DeleteAttr(name) => {
                let object = self.frame().pop();
                object.del_attr(self, &name)?;
            }
            Instruction::LoadSubscript => {
                let frame = self.frame();
                let key = frame.pop();
                let object = frame.pop();
                let value = object.get_item(self, &key)?;
                self.frame().push(value);
            }
            Instruction::StoreSubscript => {
                let frame = self.frame();
                let key = frame.pop();
                let object = frame.pop();
                let value = frame.pop();
                object.set_item(self, key, value)?;
            }
            Instruction::DeleteSubscript => {
                let frame = self.frame();
                let key = frame.pop();
                let object = frame.pop();
                object.del_item(self, &key)?;
            }
            Instruction::LoadAssertionError => {
                let class = self.types.exception(ExceptionKind::AssertionError);
                self.frame().push(Value::Type(class));
            }

            Instruction::Pop => {
                self.frame().pop();
            }
            Instruction::Dup => {
                let frame = self.frame();
                let top = frame.top();
                frame.push(top);
            }
            Instruction::DupTwo => {
                let frame = self.frame();
                let (below, top) = (frame.peek(2), frame.peek(1));
                frame.push(below);
                frame.push(top);
            }
            Instruction::Rot2 => {
                let frame = self.frame();
                let len = frame.stack.len();
                frame.stack.swap(len - 1, len - 2);
            }
            Instruction::Rot3 => {
                let frame = self.frame();
                let top = frame.pop();
                let at = frame.stack.len() - 2;
                frame.stack.insert(at, top);
            }

            Instruction::Unary(op) => {
                let operand = self.frame().pop();
                let result = int::unary_op(self, op, &operand)?;
                self.frame().push(result);
            }
            Instruction::Binary(op) => {
                let frame = self.frame();
                let right = frame.pop();
                let left = frame.pop();
                let result = int::binary_op(self, op, &left, &right)?;
                self.frame().push(result);
            }
            Instruction::Inplace(op) => {
                let frame = self.frame();
                let right = frame.pop();
                let left = frame.pop();
                let result = int::inplace_op(self, op, &left, &right)?;
                self.frame().push(result);
            }
            Instruction::Compare(op) => {
                let frame = self.frame();
                let right = frame.pop();
                let left = frame.pop();
                let result = compare::compare_op(self, op, &left, &right)?;
                self.frame().push(result);
            }
            Instruction::ExceptionMatch => {
                let frame = self.frame();
                let class = frame.pop();
                let exception = frame.pop();
                let matched = self.exception_matches(&exception, &class)?;
                self.frame().push(Value::Bool(matched));
            }

            Instruction::BuildTuple(count) => {
                let frame = self.frame();
                let items = frame.pop_n(count);
                frame.push(Value::tuple(items));
            }
            Instruction::BuildList(count) => {
                let frame = self.frame();
                let items = frame.pop_n(count);
                frame.push(Value::list(items));
            }
            Instruction::BuildSet(count) => {
                let items = self.frame().pop_n(count);
                let set = SetObject::from_values(self, items)?;
                self.frame().push(Value::set(set));
            }
            Instruction::BuildMap(count) => {
                let flat = self.frame().pop_n(count * 2);
                let mut pairs = Vec::with_capacity(count);
                let mut flat = flat.into_iter();
                while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
                    pairs.push((key, value));
                }
                let dict = dict_from_pairs(self, pairs)?;
                self.frame().push(Value::Dict(dict));
            }
            Instruction::BuildSlice(count) => {
                let frame = self.frame();
                let step = if count == 3 { frame.pop() } else { Value::None };
                let stop = frame.pop();
                let start = frame.pop();
                frame.push(Value::Slice(Rc::new(SliceObject { start, stop, step })));
            }
            Instruction::ListAppend(depth) => {
                let frame = self.frame();
                let value = frame.pop();
                if let Value::List(items) = frame.peek(depth) {
                    items.borrow_mut().push(value);
                }
            }
            Instruction::SetAdd(depth) => {
                let frame = self.frame();
                let value = frame.pop();
                if let Value::Set(set) = frame.peek(depth) {
                    set_add(self, &set, value)?;
                }
            }
            Instruction::MapAdd(depth) => {
                let frame = self.frame();
                let value = frame.pop();
                let key = frame.pop();
                if let Value::Dict(dict) = frame.peek(depth) {
                    dict_set(self, &dict, key, value)?;
                }
            }
            Instruction::ListExtend(depth) => {
                let frame = self.frame();
                let iterable = frame.pop();
                let target = frame.peek(depth);
                let items = iterable.collect(self)?;
                if let Value::List(list) = target {
                    list.borrow_mut().extend(items);
                }
            }
            Instruction::SetUpdate(depth) => {
                let frame = self.frame();
                let iterable = frame.pop();
                let target = frame.peek(depth);
                let items = iterable.collect(self)?;
                if let Value::Set(set) = target {
                    for item in items {
                        set_add(self, &set, item)?;
                    }
                }
            }
            Instruction::DictUpdate(depth) => {
                let frame = self.frame();
                let source = frame.pop();
                if let Value::Dict(dict) = frame.peek(depth) {
                    self.update_mapping(&dict, &source, false)?;
                }
            }
            Instruction::DictMerge(depth) => {
                let frame = self.frame();
                let source = frame.pop();
                if let Value::Dict(dict) = frame.peek(depth) {
                    self.update_mapping(&dict, &source, true)?;
                }
            }
            Instruction::ListToTuple => {
                let frame = self.frame();
                let list = frame.pop();
                let items = match list {
                    Value::List(items) => items.borrow().clone(),
                    other => vec![other],
                };
                frame.push(Value::tuple(items));
            }
            Instruction::UnpackSequence(count) => {
                let sequence = self.frame().pop();
                let items = sequence.collect(self)?;
                if items.len() != count {
                    return Err(PyException::value_error(if items.len() > count {
                        format!("too many values to unpack (expected {count})")
                    } else {
                        format!("not enough values to unpack (expected {count}, got {})", items.len())
                    }));
                }
                self.frame().stack.extend(items.into_iter().rev());
            }
            Instruction::UnpackEx { before, after } => {
                let sequence = self.frame().pop();
                let mut items = sequence.collect(self)?;
                if items.len() < before + after {
                    return Err(PyException::value_error(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        before + after,
                        items.len()
                    )));
                }
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(before);
                let frame = self.frame();
                frame.stack.extend(tail.into_iter().rev());
                frame.push(Value::list(middle));
                frame.stack.extend(items.into_iter().rev());
            }

            Instruction::GetIter => {
                let iterable = self.frame().pop();
                let iterator = iterable.iter(self)?;
                self.frame().push(iterator);
            }
            Instruction::GetYieldFromIter => {
                let iterable = self.frame().pop();
                let iterator = match iterable {
                    Value::Generator(_) => iterable,
                    other => other.iter(self)?,
                };
                self.frame().push(iterator);
            }
            Instruction::ForIter { exit } => return self.for_iter(exit),
            Instruction::Jump(target) => self.frame().jump(target),
            Instruction::PopJumpIfFalse(target) => {
                let value = self.frame().pop();
                if !truthy(self, &value)? {
                    self.frame().jump(target);
                }
            }
            Instruction::PopJumpIfTrue(target) => {
                let value = self.frame().pop();
                if truthy(self, &value)? {
                    self.frame().jump(target);
                }
            }
            Instruction::JumpIfFalseOrPop(target) => {
                let value = self.frame().top();
                if truthy(self, &value)? {
                    self.frame().pop();
                } else {
                    self.frame().jump(target);
                }
            }
            Instruction::JumpIfTrueOrPop(target) => {
                let value = self.frame().top();
                if truthy(self, &value)? {
                    self.frame().jump(target);
                } else {
                    self.frame().pop();
                }
            }

            Instruction::CallFunction { argc } => {
                let frame = self.frame();
                let args = frame.pop_n(argc);
                let callee = frame.pop();
                let outcome = self.call_value(callee, args, Vec::new())?;
                return self.apply_outcome(outcome, suspendable);
            }
            Instruction::CallFunctionKw { argc, names } => {
                let frame = self.frame();
                let mut args = frame.pop_n(argc + names.len());
                let values = args.split_off(argc);
                let callee = frame.pop();
                let kwargs = names.iter().cloned().zip(values).collect();
                let outcome = self.call_value(callee, args, kwargs)?;
                return self.apply_outcome(outcome, suspendable);
            }
            Instruction::CallFunctionEx { kwargs } => {
                let frame = self.frame();
                let mapping = if kwargs { Some(frame.pop()) } else { None };
                let args = frame.pop();
                let callee = frame.pop();
                let args = args.collect(self)?;
                let kwargs = match mapping {
                    Some(mapping) => self.keyword_arguments(&mapping)?,
                    None => Vec::new(),
                };
                let outcome = self.call_value(callee, args, kwargs)?;
                return self.apply_outcome(outcome, suspendable);
            }
            Instruction::MakeFunction {
                code,
                defaults,
                kwdefaults,
                closure,
            } => {
                let frame = self.frame();
                let closure = if closure { closure_cells(frame.pop()) } else { Vec::new() };
                let kwdefaults = if kwdefaults {
                    match frame.pop() {
                        Value::Dict(dict) => dict
                            .borrow()
                            .items()
                            .into_iter()
                            .filter_map(|(key, value)| Some((key.as_str().map(Rc::from)?, value)))
                            .collect(),
                        _ => Vec::new(),
                    }
                } else {
                    Vec::new()
                };
                let defaults = if defaults {
                    match frame.pop() {
                        Value::Tuple(items) => items.to_vec(),
                        _ => Vec::new(),
                    }
                } else {
                    Vec::new()
                };
                let mut function = FunctionObject::new(code, frame.globals.clone());
                function.defaults = defaults;
                function.kwdefaults = kwdefaults;
                function.closure = closure;
                frame.push(Value::Function(Rc::new(function)));
            }
            Instruction::BuildClass {
                code,
                bases,
                keywords,
                closure,
            } => {
                let frame = self.frame();
                let keyword_values = frame.pop_n(keywords.len());
                let bases = frame.pop_n(bases);
                let closure = if closure { closure_cells(frame.pop()) } else { Vec::new() };
                for (keyword, value) in keywords.iter().zip(&keyword_values) {
                    let plain_type = matches!(value, Value::Type(class) if Rc::ptr_eq(class, &self.types.type_type));
                    if &**keyword != "metaclass" || !plain_type {
                        return Err(PyException::type_error(format!(
                            "{}() got an unexpected keyword argument '{keyword}'",
                            code.name
                        )));
                    }
                }
                self.check_depth()?;
                let frame = self.frame();
                let globals = frame.globals.clone();
                let namespace = new_dict();
                {
                    let mut namespace = namespace.borrow_mut();
                    let module = globals.borrow().get_str("__name__").unwrap_or(Value::from("__main__"));
                    namespace.set_str("__module__", module);
                    namespace.set_str("__qualname__", Value::string(code.qualname.clone()));
                }
                let link = FrameLink::ClassBody {
                    name: code.name.clone(),
                    qualname: code.qualname.clone(),
                    bases,
                };
                trace!("running class body {}", code.qualname);
                self.frames
                    .push(Frame::class_body(code, globals, namespace, closure, link));
            }
            Instruction::ReturnValue => {
                let value = self.frame().pop();
                return self.return_value(value, base);
            }
            Instruction::YieldValue { resume } => {
                let frame = self.frame();
                let value = frame.pop();
                frame.jump(resume);
                return self.yield_value(value, base);
            }
            Instruction::YieldFrom { resume } => return self.yield_from(resume, base),

            Instruction::SetupExcept(target) | Instruction::SetupFinally(target) => {
                let frame = self.frame();
                let handler = Handler {
                    target,
                    stack_depth: frame.stack.len(),
                    handled_depth: frame.handled.len(),
                };
                frame.handlers.push(handler);
            }
            Instruction::SetupWith(target) => {
                let manager = self.frame().pop();
                let enter = self.special_method(&manager, "__enter__")?;
                let exit = self.special_method(&manager, "__exit__")?;
                let entered = self.call(&enter, Vec::new(), Vec::new())?;
                let frame = self.frame();
                frame.push(exit);
                let handler = Handler {
                    target,
                    stack_depth: frame.stack.len(),
                    handled_depth: frame.handled.len(),
                };
                frame.handlers.push(handler);
                frame.push(entered);
            }
            Instruction::PopBlock => {
                self.frame().handlers.pop();
            }
            Instruction::PopExcept => {
                self.frame().handled.pop();
            }
            Instruction::WithExceptArgs => {
                let frame = self.frame();
                let exception = frame.peek(1);
                let exit = frame.peek(2);
                let class = Value::Type(self.types.type_of(&exception));
                let frame = self.frame();
                frame.push(exit);
                frame.push(class);
                frame.push(exception);
                frame.push(Value::None);
            }
            Instruction::Raise(count) => return Err(self.raise(count)?),
            Instruction::Reraise => {
                let frame = self.frame();
                let value = frame.pop();
                return Err(frame
                    .handled
                    .pop()
                    .unwrap_or_else(|| PyException::from_value(value)));
            }

            Instruction::ImportName { name, level, leaf } => {
                let module = self.import_name(&name, level, leaf)?;
                self.frame().push(module);
            }
            Instruction::ImportFrom(name) => {
                let module = self.frame().top();
                let value = self.import_from(&module, &name)?;
                self.frame().push(value);
            }
            Instruction::ImportStar => {
                let module = self.frame().pop();
                self.import_star(&module)?;
            }
            Instruction::PrintExpr => {
                let value = self.frame().pop();
                if !value.is_none() {
                    let text = repr(self, &value)?;
                    self.write_output(&format!("{text}\n"))?;
                    self.builtins.borrow_mut().set_str("_", value);
                }
            }
        }
        Ok(None)
    }

    fn apply_outcome(&mut self, outcome: CallOutcome, suspendable: bool) -> PyResult<Option<Flow>> {
        match outcome {
            CallOutcome::Value(value) => self.frame().push(value),
            CallOutcome::Frame => {}
            CallOutcome::Block(request) if suspendable => {
                return Ok(Some(Flow::Suspend(request)));
            }
            CallOutcome::Block(request) => {
                let value = self.serve(request)?;
                self.frame().push(value);
            }
        }
        Ok(None)
    }

    /// Answers a blocking request through the host.
    /// Resolves a blocking request in place; only nested runs get here.
    fn serve(&mut self, request: Request) -> PyResult<Value> {
        if request != Request::TimeSlice {
            warn!("{request:?} cannot suspend from a nested call, blocking the host");
        }
        match request {
            Request::TimeSlice => Ok(Value::None),
            Request::Input { prompt } => self
                .host
                .read_input(&prompt)
                .map(Value::from)
                .map_err(host_error),
            Request::Sleep(duration) => {
                self.host.sleep(duration);
                Ok(Value::None)
            }
        }
    }

    fn load_name(&mut self, name: &str) -> PyResult<Value> {
        let frame = self.frame();
        if let Some(namespace) = &frame.namespace
            && let Some(value) = namespace.borrow().get_str(name)
        {
            return Ok(value);
        }
        if let Some(value) = frame.globals.borrow().get_str(name) {
            return Ok(value);
        }
        self.builtins.borrow().get_str(name).ok_or_else(|| name_error(name))
    }

    fn check_depth(&self) -> PyResult<()> {
        if self.frames.len() >= self.config.recursion_limit {
            return Err(PyException::runtime_error("maximum recursion depth exceeded"));
        }
        Ok(())
    }

    fn push_frame(&mut self, frame: Frame) -> PyResult<CallOutcome> {
        self.check_depth()?;
        self.frames.push(frame);
        Ok(CallOutcome::Frame)
    }

    /// Starts a call. Compiled functions push a frame; natives run now.
    pub(crate) fn call_value(&mut self, callee: Value, mut args: Vec<Value>, kwargs: Kwargs) -> PyResult<CallOutcome> {
        match callee {
            Value::Function(function) => {
                let fast = function.bind_arguments(args, kwargs)?;
                let frame = Frame::function(&function, fast, FrameLink::Function);
                if function.code.is_generator {
                    return Ok(CallOutcome::Value(GeneratorObject::new(frame).into_value()));
                }
                self.push_frame(frame)
            }
            Value::Builtin(builtin) => match builtin.kind {
                BuiltinKind::Native(function) => function(self, args, kwargs).map(CallOutcome::Value),
                BuiltinKind::Intrinsic(function) => function(self, args, kwargs),
            },
            Value::Method(bound) => {
                args.insert(0, bound.receiver.clone());
                self.call_value(bound.function.clone(), args, kwargs)
            }
            Value::Type(class) => self.instantiate(class, args, kwargs),
            Value::StaticMethod(inner) => self.call_value((*inner).clone(), args, kwargs),
            Value::Instance(ref instance) => match instance.class.lookup("__call__") {
                Some(method) => {
                    args.insert(0, callee.clone());
                    self.call_value(method, args, kwargs)
                }
                None => Err(not_callable(&callee)),
            },
            other => Err(not_callable(&other)),
        }
    }

    fn instantiate(&mut self, class: Rc<TypeObject>, args: Vec<Value>, kwargs: Kwargs) -> PyResult<CallOutcome> {
        let types = self.types.clone();
        if Rc::ptr_eq(&class, &types.type_type) {
            return self.type_call(args, kwargs).map(CallOutcome::Value);
        }
        if Rc::ptr_eq(&class, &types.super_type) {
            return intrinsics::super_new(self, args, kwargs);
        }
        if let Some(constructor) = class.constructor {
            return constructor(self, args, kwargs).map(CallOutcome::Value);
        }
        if class.builtin && class.exception.is_none() && !Rc::ptr_eq(&class, &types.object) {
            return Err(PyException::type_error(format!(
                "cannot create '{}' instances",
                class.name
            )));
        }
        let init = class.lookup("__init__");
        let instance = if class.exception_kind().is_some() {
            types.new_exception(&class, args.clone())
        } else {
            class::new_instance(&class)
        };
        match init {
            Some(Value::Function(function)) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(instance.clone());
                full.extend(args);
                let fast = function.bind_arguments(full, kwargs)?;
                let link = FrameLink::Init { instance };
                self.push_frame(Frame::function(&function, fast, link))
            }
            Some(Value::Builtin(builtin)) if class.exception_kind().is_none() => {
                let object_init = types.object.dict.borrow().get_str("__init__");
                let is_object_init = matches!(&object_init, Some(Value::Builtin(found)) if Rc::ptr_eq(found, &builtin));
                if is_object_init && (!args.is_empty() || !kwargs.is_empty()) {
                    return Err(PyException::type_error(format!("{}() takes no arguments", class.name)));
                }
                let mut full = vec![instance.clone()];
                full.extend(args);
                builtin.call_native(self, full, kwargs)?;
                Ok(CallOutcome::Value(instance))
            }
            Some(other @ (Value::Builtin(_) | Value::Method(_))) if class.exception_kind().is_none() => {
                let mut full = vec![instance.clone()];
                full.extend(args);
                self.call(&other, full, kwargs)?;
                Ok(CallOutcome::Value(instance))
            }
            _ => {
                if class.exception_kind().is_some() && !kwargs.is_empty() {
                    return Err(PyException::type_error(format!(
                        "{}() takes no keyword arguments",
                        class.name
                    )));
                }
                Ok(CallOutcome::Value(instance))
            }
        }
    }

    /// `type(x)` and `type(name, bases, namespace)`.
    fn type_call(&mut self, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
        if !kwargs.is_empty() {
            return Err(PyException::type_error("type() takes no keyword arguments"));
        }
        match args.as_slice() {
            [value] => Ok(Value::Type(self.types.type_of(value))),
            [name, bases, namespace] => {
                let Some(name) = name.as_str() else {
                    return Err(PyException::type_error("type.__new__() argument 1 must be str"));
                };
                let bases = bases.collect(self)?;
                let Value::Dict(namespace) = namespace else {
                    return Err(PyException::type_error("type.__new__() argument 3 must be dict"));
                };
                let namespace = Rc::new(RefCell::new(namespace.borrow().clone()));
                if !namespace.borrow().contains_str("__module__") {
                    let module = self
                        .frames
                        .last()
                        .and_then(|frame| frame.globals.borrow().get_str("__name__"))
                        .unwrap_or(Value::from("__main__"));
                    namespace.borrow_mut().set_str("__module__", module);
                }
                let class = class::new_class(&self.types, name, name, &bases, namespace)?;
                Ok(Value::Type(class))
            }
            _ => Err(PyException::type_error("type() takes 1 or 3 arguments")),
        }
    }

    fn special_method(&mut self, manager: &Value, name: &str) -> PyResult<Value> {
        match class::lookup_special(manager, name) {
            Some(method) => Ok(class::method(manager.clone(), method)),
            None => Err(PyException::type_error(format!(
                "'{}' object does not support the context manager protocol",
                manager.type_name()
            ))),
        }
    }

    /// Adds a mapping's items to `dict` for `{**m}` displays and `f(**m)`.
    fn update_mapping(&mut self, dict: &DictRef, source: &Value, unique: bool) -> PyResult<()> {
        if !unique {
            return match source {
                Value::Dict(_) | Value::Instance(_) => dict_update(self, dict, source),
                other => Err(PyException::type_error(format!(
                    "'{}' object is not a mapping",
                    other.type_name()
                ))),
            };
        }
        for (key, value) in self.mapping_items(source)? {
            let Some(name) = key.as_str() else {
                return Err(PyException::type_error("keywords must be strings"));
            };
            if dict.borrow().contains_str(name) {
                return Err(PyException::type_error(format!(
                    "got multiple values for keyword argument '{name}'"
                )));
            }
            dict_set(self, dict, key, value)?;
        }
        Ok(())
    }

    fn mapping_items(&mut self, source: &Value) -> PyResult<Vec<(Value, Value)>> {
        match source {
            Value::Dict(dict) => Ok(dict.borrow().items()),
            Value::Instance(_) => {
                let keys = source.get_attr(self, "keys")?;
                let keys = self.call(&keys, Vec::new(), Vec::new())?.collect(self)?;
                let mut items = Vec::with_capacity(keys.len());
                for key in keys {
                    let value = source.get_item(self, &key)?;
                    items.push((key, value));
                }
                Ok(items)
            }
            other => Err(PyException::type_error(format!(
                "argument after ** must be a mapping, not {}",
                other.type_name()
            ))),
        }
    }

    fn keyword_arguments(&mut self, mapping: &Value) -> PyResult<Kwargs> {
        self.mapping_items(mapping)?
            .into_iter()
            .map(|(key, value)| match key {
                Value::Str(name) => Ok((name, value)),
                _ => Err(PyException::type_error("keywords must be strings")),
            })
            .collect()
    }

    fn exception_matches(&mut self, exception: &Value, class: &Value) -> PyResult<bool> {
        match class {
            Value::Tuple(classes) => {
                for class in classes.iter() {
                    if self.exception_matches(exception, class)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Type(class) if class.exception_kind().is_some() => {
                Ok(is_instance(&self.types, exception, class))
            }
            _ => Err(PyException::type_error(
                "catching classes that do not inherit from BaseException is not allowed",
            )),
        }
    }

    /// Builds the exception a `raise` statement throws.
    fn raise(&mut self, count: usize) -> PyResult<PyException> {
        if count == 0 {
            return self
                .frames
                .iter()
                .rev()
                .find_map(|frame| frame.handled.last().cloned())
                .ok_or_else(|| PyException::runtime_error("No active exception to reraise"));
        }
        let frame = self.frame();
        let cause = if count == 2 { Some(frame.pop()) } else { None };
        let raised = frame.pop();
        let exception = self.exception_value(raised)?;
        if let Some(cause) = cause {
            let cause = match cause {
                Value::None => Value::None,
                other => self.exception_value(other)?,
            };
            if let Value::Instance(instance) = &exception {
                instance.dict.borrow_mut().set_str("__cause__", cause);
            }
        }
        Ok(PyException::from_value(exception))
    }

    /// An exception instance from a raised class or instance.
    fn exception_value(&mut self, raised: Value) -> PyResult<Value> {
        match &raised {
            Value::Type(class) if class.exception_kind().is_some() => {
                let instance = self.call(&raised, Vec::new(), Vec::new())?;
                Ok(instance)
            }
            Value::Instance(instance) if instance.class.exception_kind().is_some() => Ok(raised),
            _ => Err(PyException::type_error("exceptions must derive from BaseException")),
        }
    }

    fn return_value(&mut self, value: Value, base: usize) -> PyResult<Option<Flow>> {
        let frame = self.frames.pop().expect("a frame is running");
        let delivery = self.finish_frame(frame, value);
        self.deliver(delivery, base)
    }

    fn finish_frame(&mut self, frame: Frame, value: Value) -> Delivery {
        let Frame {
            code,
            cells,
            namespace,
            link,
            ..
        } = frame;
        match link {
            FrameLink::Function | FrameLink::Module { .. } => Delivery::Push(value),
            FrameLink::ClassBody { name, qualname, bases } => {
                let namespace = namespace.unwrap_or_else(new_dict);
                match class::new_class(&self.types, &name, &qualname, &bases, namespace) {
                    Ok(class) => {
                        if let Some(slot) = code.cell_index("__class__") {
                            *cells[slot].borrow_mut() = Some(Value::Type(class.clone()));
                        }
                        Delivery::Push(Value::Type(class))
                    }
                    Err(exception) => Delivery::Raise(exception),
                }
            }
            FrameLink::Init { instance } => {
                if value.is_none() {
                    Delivery::Push(instance)
                } else {
                    Delivery::Raise(PyException::type_error(format!(
                        "__init__() should return None, not '{}'",
                        value.type_name()
                    )))
                }
            }
            FrameLink::Generator { generator, mode } => {
                {
                    let mut generator = generator.borrow_mut();
                    generator.running = false;
                    generator.finished = true;
                    generator.frame = None;
                }
                match mode {
                    GenMode::Next { default: Some(default) } => Delivery::Push(default),
                    GenMode::Next { default: None } => Delivery::Raise(PyException::stop_iteration(value)),
                    GenMode::ForIter { exit } => Delivery::ForExit(exit),
                    GenMode::Delegate { .. } => Delivery::ReplaceTop(value),
                    GenMode::Close => Delivery::Push(Value::None),
                }
            }
        }
    }

    /// Finishes a frame an exception escaped from.
    fn fail_frame(&mut self, frame: Frame, exception: PyException) -> Delivery {
        match frame.link {
            FrameLink::Module { name } => {
                debug!("module {name} failed: {}", exception.summary());
                if &*name != "__main__" {
                    self.modules.borrow_mut().remove_str(&name);
                }
                Delivery::Raise(exception)
            }
            FrameLink::Generator { generator, mode } => {
                {
                    let mut generator = generator.borrow_mut();
                    generator.running = false;
                    generator.finished = true;
                    generator.frame = None;
                }
                let closing = matches!(mode, GenMode::Close);
                if closing && exception.is(ExceptionKind::GeneratorExit) {
                    Delivery::Push(Value::None)
                } else if exception.is(ExceptionKind::StopIteration) {
                    let mut error = PyException::runtime_error("generator raised StopIteration");
                    error.traceback = exception.traceback;
                    Delivery::Raise(error)
                } else {
                    Delivery::Raise(exception)
                }
            }
            _ => Delivery::Raise(exception),
        }
    }

    fn deliver(&mut self, delivery: Delivery, base: usize) -> PyResult<Option<Flow>> {
        if self.frames.len() <= base {
            return match delivery {
                Delivery::Push(value) | Delivery::ReplaceTop(value) => Ok(Some(Flow::Return(value))),
                Delivery::ForExit(_) => Ok(Some(Flow::Return(Value::None))),
                Delivery::Raise(exception) => Err(exception),
            };
        }
        let frame = self.frame();
        match delivery {
            Delivery::Push(value) => frame.push(value),
            Delivery::ReplaceTop(value) => {
                frame.pop();
                frame.push(value);
            }
            Delivery::ForExit(exit) => {
                frame.pop();
                frame.jump(exit);
            }
            Delivery::Raise(exception) => return self.unwind(exception, base),
        }
        Ok(None)
    }

    /// Finds a handler for `exception`, popping frames above `base` that have
    /// none.
    fn unwind(&mut self, mut exception: PyException, base: usize) -> PyResult<Option<Flow>> {
        let types = self.types.clone();
        loop {
            if self.frames.len() <= base {
                return Err(exception);
            }
            let depth = self.frames.len();
            let frame = self.frame();
            // A re-raise in the frame that already recorded this exception
            // keeps the original location.
            if exception.recorded_depth != Some(depth) {
                exception.traceback.push(frame.trace_entry());
                exception.recorded_depth = Some(depth);
            }
            if let Some(handler) = frame.handlers.pop() {
                frame.stack.truncate(handler.stack_depth);
                frame.handled.truncate(handler.handled_depth);
                let value = exception.materialize(&types);
                frame.handled.push(exception);
                frame.push(value);
                frame.jump(handler.target);
                return Ok(None);
            }
            let frame = self.frames.pop().expect("checked above");
            match self.fail_frame(frame, exception) {
                Delivery::Raise(next) => exception = next,
                delivery => return self.deliver(delivery, base),
            }
        }
    }

    /// Suspends the generator frame on top of the stack and hands `value`
    /// to whoever resumed it.
    fn yield_value(&mut self, value: Value, base: usize) -> PyResult<Option<Flow>> {
        loop {
            let mut frame = self.frames.pop().expect("a generator frame is running");
            let FrameLink::Generator { generator, mode } = std::mem::replace(&mut frame.link, FrameLink::Function)
            else {
                return Err(PyException::runtime_error("yield outside of a generator frame"));
            };
            {
                let mut generator = generator.borrow_mut();
                generator.running = false;
                generator.frame = Some(frame);
            }
            match mode {
                GenMode::Delegate { resume } => {
                    // The delegating generator yields the same value outwards.
                    self.frame().jump(resume);
                }
                GenMode::Next { .. } | GenMode::ForIter { .. } => {
                    return self.deliver(Delivery::Push(value), base);
                }
                GenMode::Close => {
                    let error = PyException::runtime_error("generator ignored GeneratorExit");
                    return self.deliver(Delivery::Raise(error), base);
                }
            }
        }
    }

    fn for_iter(&mut self, exit: BlockId) -> PyResult<Option<Flow>> {
        let iterator = self.frame().top();
        let next = match &iterator {
            Value::Generator(generator) => {
                let mode = GenMode::ForIter { exit };
                return match self.resume_generator(generator, Value::None, None, mode)? {
                    Resumed::Running => Ok(None),
                    Resumed::Finished => {
                        let frame = self.frame();
                        frame.pop();
                        frame.jump(exit);
                        Ok(None)
                    }
                };
            }
            Value::Iterator(native) => IteratorObject::advance(native, self)?,
            other => other.next(self)?,
        };
        let frame = self.frame();
        match next {
            Some(item) => frame.push(item),
            None => {
                frame.pop();
                frame.jump(exit);
            }
        }
        Ok(None)
    }

    fn yield_from(&mut self, resume: BlockId, base: usize) -> PyResult<Option<Flow>> {
        let frame = self.frame();
        let sent = frame.pop();
        let iterator = frame.top();
        if let Value::Generator(generator) = &iterator {
            let mode = GenMode::Delegate { resume };
            return match self.resume_generator(generator, sent, None, mode)? {
                Resumed::Running => Ok(None),
                Resumed::Finished => {
                    let frame = self.frame();
                    frame.pop();
                    frame.push(Value::None);
                    Ok(None)
                }
            };
        }
        // `Break` carries the delegate's result: the value of its StopIteration.
        let step = if sent.is_none() && !matches!(iterator, Value::Instance(_)) {
            match iterator.next(self)? {
                Some(value) => ControlFlow::Continue(value),
                None => ControlFlow::Break(Value::None),
            }
        } else {
            let (method, args) = if sent.is_none() {
                ("__next__", Vec::new())
            } else {
                ("send", vec![sent])
            };
            let callee = iterator.get_attr(self, method)?;
            match self.call(&callee, args, Vec::new()) {
                Ok(value) => ControlFlow::Continue(value),
                Err(error) if error.is(ExceptionKind::StopIteration) => ControlFlow::Break(error.stop_value()),
                Err(error) => return Err(error),
            }
        };
        match step {
            ControlFlow::Continue(value) => {
                self.frame().jump(resume);
                self.yield_value(value, base)
            }
            ControlFlow::Break(result) => {
                let frame = self.frame();
                frame.pop();
                frame.push(result);
                Ok(None)
            }
        }
    }

    /// Raises an exception thrown into a resumed generator at its current
    /// position, forwarding it to a generator it is delegating to.
    fn throw_at_resume(&mut self, exception: PyException) -> PyResult<Option<Flow>> {
        let frame = self.frame();
        let delegating = match frame.fetch() {
            Some(Instruction::YieldFrom { resume }) => match frame.top() {
                Value::Generator(inner) => Some((inner, resume)),
                _ => None,
            },
            _ => None,
        };
        let Some((inner, resume)) = delegating else {
            return Err(exception);
        };
        self.frame().ip += 1;
        match self.resume_generator(&inner, Value::None, Some(exception), GenMode::Delegate { resume })? {
            Resumed::Running => Ok(None),
            Resumed::Finished => {
                let frame = self.frame();
                frame.pop();
                frame.push(Value::None);
                Ok(None)
            }
        }
    }

    /// Puts a generator's frame back on the stack. `throw` raises inside it
    /// instead of delivering `sent`.
    pub(crate) fn resume_generator(
        &mut self,
        generator: &Rc<RefCell<GeneratorObject>>,
        sent: Value,
        throw: Option<PyException>,
        mode: GenMode,
    ) -> PyResult<Resumed> {
        let mut state = generator.borrow_mut();
        if state.running {
            return Err(PyException::value_error("generator already executing"));
        }
        if state.finished {
            drop(state);
            return match throw {
                Some(exception) if !matches!(mode, GenMode::Close) => Err(exception),
                _ => Ok(Resumed::Finished),
            };
        }
        if !state.started {
            if let Some(exception) = throw {
                state.finished = true;
                state.frame = None;
                return if matches!(mode, GenMode::Close) {
                    Ok(Resumed::Finished)
                } else {
                    Err(exception)
                };
            }
            if !sent.is_none() {
                return Err(PyException::type_error(
                    "can't send non-None value to a just-started generator",
                ));
            }
        }
        let Some(mut frame) = state.frame.take() else {
            return Ok(Resumed::Finished);
        };
        if state.started && throw.is_none() {
            frame.push(sent);
        }
        frame.pending_throw = throw;
        frame.link = FrameLink::Generator {
            generator: generator.clone(),
            mode,
        };
        state.started = true;
        state.running = true;
        drop(state);
        if let Err(error) = self.check_depth() {
            let mut state = generator.borrow_mut();
            state.running = false;
            frame.link = FrameLink::Function;
            state.frame = Some(frame);
            return Err(error);
        }
        self.frames.push(frame);
        Ok(Resumed::Running)
    }

    /// The globals of the innermost running frame, `__main__` otherwise.
    pub(crate) fn current_globals(&mut self) -> DictRef {
        match self.frames.last() {
            Some(frame) => frame.globals.clone(),
            None => self.main_module(None),
        }
    }

    pub(crate) fn current_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }
}

impl CallContext for Engine {
    fn types(&self) -> Rc<BuiltinTypes> {
        self.types.clone()
    }

    fn call(&mut self, callee: &Value, args: Vec<Value>, kwargs: Kwargs) -> PyResult<Value> {
        let base = self.frames.len();
        match self.call_value(callee.clone(), args, kwargs)? {
            CallOutcome::Value(value) => Ok(value),
            CallOutcome::Block(request) => self.serve(request),
            CallOutcome::Frame => match self.run_nested(base) {
                Ok(Flow::Return(value)) => Ok(value),
                Ok(Flow::Suspend(_)) => Err(PyException::runtime_error("nested call suspended")),
                Err(exception) => {
                    self.frames.truncate(base);
                    Err(exception)
                }
            },
        }
    }

    fn division(&self) -> DivisionPolicy {
        self.config.division
    }

    fn write_output(&mut self, text: &str) -> PyResult<()> {
        self.host.write_output(text).map_err(host_error)
    }

    fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    fn recursion_limit(&self) -> usize {
        self.config.recursion_limit
    }

    fn set_recursion_limit(&mut self, limit: usize) {
        self.config.recursion_limit = limit;
    }

    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    fn modules(&self) -> DictRef {
        self.modules.clone()
    }

    fn search_paths(&self) -> Vec<String> {
        self.config.search_paths.clone()
    }
}

fn mode_scope(mode: Mode) -> &'static str {
    match mode {
        Mode::Exec => "<module>",
        Mode::Eval => "<eval>",
        Mode::Single => "<interactive>",
    }
}

fn host_error(error: io::Error) -> PyException {
    match error.kind() {
        io::ErrorKind::UnexpectedEof => PyException::new(ExceptionKind::EOFError, "EOF when reading a line"),
        _ => PyException::runtime_error(error.to_string()),
    }
}

fn name_error(name: &str) -> PyException {
    PyException::name_error(format!("name '{name}' is not defined"))
}

fn unbound_local(name: &str) -> PyException {
    PyException::new(
        ExceptionKind::UnboundLocalError,
        format!("local variable '{name}' referenced before assignment"),
    )
}

fn cell_name(code: &CodeObject, slot: usize) -> Rc<str> {
    code.cellvars
        .iter()
        .chain(&code.freevars)
        .nth(slot)
        .cloned()
        .unwrap_or_else(|| Rc::from("?"))
}

fn unbound_cell(code: &CodeObject, slot: usize) -> PyException {
    let name = cell_name(code, slot);
    if slot < code.cellvars.len() {
        unbound_local(&name)
    } else {
        PyException::name_error(format!(
            "free variable '{name}' referenced before assignment in enclosing scope"
        ))
    }
}

fn not_callable(value: &Value) -> PyException {
    PyException::type_error(format!("'{}' object is not callable", value.type_name()))
}

fn closure_cells(tuple: Value) -> Vec<CellRef> {
    match tuple {
        Value::Tuple(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::Cell(cell) => Some(cell.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("frames", &self.frames.len())
            .field("config", &self.config)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::CompileErrorKind;
    use crate::host::BufferHost;

    fn engine(config: EngineConfig) -> (Engine, crate::host::SharedOutput) {
        let host = BufferHost::new();
        let output = host.output();
        (Engine::new(config, Box::new(host)), output)
    }

    fn run(source: &str) -> String {
        let (mut engine, output) = engine(EngineConfig::without_time_slicing());
        let completion = engine.run_source(source, "<test>").unwrap();
        run_to_completion(&mut engine, completion).unwrap();
        let text = output.borrow().clone();
        text
    }

    #[test]
    fn generators_yield_across_resumptions() {
        let output = run(indoc! {"
            def f():
                x = 1
                yield x
                yield x + 1
            print(list(f()))

            def g():
                for i in range(3):
                    yield i
            it = g()
            print(next(it), next(it), next(it), next(it, 'stop'))
        "});
        assert_eq!(output, "[1, 2]\n0 1 2 stop\n");
    }

    #[test]
    fn integers_promote_to_bignums_and_back() {
        let (mut engine, _) = engine(EngineConfig::without_time_slicing());
        assert!(matches!(engine.eval("1 + 1").unwrap(), Value::Int(2)));
        let big = engine.eval("2 ** 64").unwrap();
        assert!(matches!(big, Value::Big(_)));
        assert_eq!(big.basic_repr(), "18446744073709551616");
        assert!(matches!(engine.eval("2 ** 64 - 2 ** 64 + 3").unwrap(), Value::Int(3)));
    }

    #[test]
    fn isinstance_follows_subclassing() {
        let output = run(indoc! {"
            class A: pass
            class B(A): pass
            print(isinstance(B(), A), isinstance(A(), B))
        "});
        assert_eq!(output, "True False\n");
    }

    #[test]
    fn division_policy_comes_from_configuration() {
        let cases = [
            (DivisionPolicy::True, "3.5 3.0"),
            (DivisionPolicy::Floor, "3 3"),
            (DivisionPolicy::Exact, "3.5 3"),
        ];
        for (division, expected) in cases {
            let config = EngineConfig {
                division,
                ..EngineConfig::without_time_slicing()
            };
            let (mut engine, _) = engine(config);
            let value = engine.eval("(7 / 2, 6 / 2)").unwrap();
            let Value::Tuple(items) = value else {
                panic!("expected a tuple");
            };
            let rendered: Vec<String> = items.iter().map(Value::basic_repr).collect();
            assert_eq!(rendered.join(" "), expected);
        }
    }

    #[test]
    fn uncaught_exceptions_keep_output_and_carry_a_traceback() {
        let (mut engine, output) = engine(EngineConfig::without_time_slicing());
        let source = indoc! {"
            print('before')
            def fail(x):
                return x[3]
            fail([1])
        "};
        let error = engine
            .run_source(source, "main.py")
            .and_then(|completion| run_to_completion(&mut engine, completion))
            .unwrap_err();
        assert_eq!(&*output.borrow(), "before\n");
        assert_eq!(
            error.report(),
            indoc! {r#"
                Traceback (most recent call last):
                  File "main.py", line 4, in <module>
                  File "main.py", line 3, in fail
                IndexError: list index out of range
            "#}
        );
        // The engine is reusable after a failure.
        let completion = engine.run_source("print('again')\n", "main.py").unwrap();
        run_to_completion(&mut engine, completion).unwrap();
        assert_eq!(&*output.borrow(), "before\nagain\n");
    }

    #[test]
    fn reraising_keeps_the_original_location() {
        let sources = [
            indoc! {"
                def f():
                    raise ValueError('bad')
                try:
                    f()
                except KeyError:
                    pass
                finally:
                    done = True
            "},
            indoc! {"
                def f():
                    raise ValueError('bad')
                try:
                    f()
                except ValueError:
                    raise
            "},
        ];
        for source in sources {
            let (mut engine, _) = engine(EngineConfig::without_time_slicing());
            let error = engine
                .run_source(source, "main.py")
                .and_then(|completion| run_to_completion(&mut engine, completion))
                .unwrap_err();
            assert_eq!(
                error.report(),
                indoc! {r#"
                    Traceback (most recent call last):
                      File "main.py", line 4, in <module>
                      File "main.py", line 2, in f
                    ValueError: bad
                "#}
            );
        }
    }

    #[test]
    fn compile_errors_are_reported_before_running() {
        let (mut engine, output) = engine(EngineConfig::without_time_slicing());
        let error = engine.run_source("print('x')\nx = = 1\n", "bad.py").unwrap_err();
        let EngineError::Compile(error) = error else {
            panic!("expected a compile error");
        };
        assert_eq!(error.kind, CompileErrorKind::Syntax);
        assert_eq!(error.line, 2);
        assert_eq!(&*output.borrow(), "");
    }

    #[test]
    fn interactive_statements_echo_expression_values() {
        let (mut engine, output) = engine(EngineConfig::without_time_slicing());
        for line in ["x = 6\n", "x * 7\n", "None\n", "'text'\n"] {
            let completion = engine.run_interactive(line).unwrap();
            run_to_completion(&mut engine, completion).unwrap();
        }
        assert_eq!(&*output.borrow(), "42\n'text'\n");
    }

    #[test]
    fn recursion_limit_is_enforced() {
        let config = EngineConfig {
            recursion_limit: 50,
            ..EngineConfig::without_time_slicing()
        };
        let (mut engine, output) = engine(config);
        let source = indoc! {"
            def down(n):
                return down(n + 1)
            try:
                down(0)
            except RuntimeError as e:
                print(e)
        "};
        let completion = engine.run_source(source, "<test>").unwrap();
        run_to_completion(&mut engine, completion).unwrap();
        assert_eq!(&*output.borrow(), "maximum recursion depth exceeded\n");
    }

    #[test]
    fn native_reentry_depth_raises_instead_of_overflowing() {
        let output = run(indoc! {"
            class Node:
                def __init__(self, child):
                    self.child = child
                def __repr__(self):
                    return 'Node(' + repr(self.child) + ')'
            chain = None
            for i in range(200):
                chain = Node(chain)
            try:
                repr(chain)
            except RuntimeError as e:
                print(e)
            print(repr(Node(Node(None))))
        "});
        assert_eq!(output, "maximum recursion depth exceeded\nNode(Node(None))\n");
    }

    #[test]
    fn deep_python_recursion_does_not_use_the_host_stack() {
        let config = EngineConfig {
            recursion_limit: 20_000,
            ..EngineConfig::without_time_slicing()
        };
        let (mut engine, output) = engine(config);
        let source = indoc! {"
            def depth(n):
                if n == 0:
                    return 0
                return 1 + depth(n - 1)
            print(depth(15000))
        "};
        let completion = engine.run_source(source, "<test>").unwrap();
        run_to_completion(&mut engine, completion).unwrap();
        assert_eq!(&*output.borrow(), "15000\n");
    }

    #[test]
    fn closures_share_cells() {
        let output = run(indoc! {"
            def pair():
                value = 0
                def get():
                    return value
                def put(v):
                    nonlocal value
                    value = v
                return get, put
            get, put = pair()
            put(5)
            print(get())
        "});
        assert_eq!(output, "5\n");
    }

    #[test]
    fn class_bodies_decorators_and_properties() {
        let output = run(indoc! {"
            def tag(cls):
                cls.tagged = True
                return cls

            @tag
            class Box:
                size = 2
                doubled = size * 2

                def __init__(self, v):
                    self._v = v

                @property
                def v(self):
                    return self._v

                @v.setter
                def v(self, new):
                    self._v = new * 10

            b = Box(1)
            b.v = 3
            print(Box.tagged, Box.doubled, b.v)
        "});
        assert_eq!(output, "True 4 30\n");
    }
}
