//! Activation records and what happens when they finish.

use std::cell::RefCell;
use std::rc::Rc;

use crate::compiler::{BlockId, CodeObject, Instruction};
use crate::runtime::callable::FunctionObject;
use crate::runtime::exception::{PyException, TraceEntry};
use crate::runtime::iter::GeneratorObject;
use crate::runtime::value::{CellRef, DictRef, Value};

/// How a generator was resumed, which decides where its next yielded or
/// returned value goes.
#[derive(Debug, Clone)]
pub enum GenMode {
    /// `next(g[, default])`, `g.__next__()`, `g.send(v)`, `g.throw(e)`.
    Next { default: Option<Value> },
    /// A `ForIter` in the caller; exhaustion jumps to `exit`.
    ForIter { exit: BlockId },
    /// `yield from` in a generator caller; yields propagate outwards and the
    /// caller re-enters `resume` afterwards.
    Delegate { resume: BlockId },
    /// `g.close()`.
    Close,
}

/// What the caller receives when a frame finishes.
#[derive(Debug)]
pub enum FrameLink {
    /// The return value is pushed on the caller's stack.
    Function,
    /// A module body. The module is dropped from the registry on failure.
    Module { name: Rc<str> },
    /// A class body; its namespace becomes the new class.
    ClassBody { name: Rc<str>, qualname: Rc<str>, bases: Vec<Value> },
    /// `__init__` run on behalf of `Class(...)`; the caller gets `instance`.
    Init { instance: Value },
    Generator {
        generator: Rc<RefCell<GeneratorObject>>,
        mode: GenMode,
    },
}

/// An installed `try`/`with` handler.
#[derive(Debug, Clone, Copy)]
pub struct Handler {
    pub target: BlockId,
    /// Operand stack height to restore before entering the handler.
    pub stack_depth: usize,
    /// Number of exceptions being handled when the handler was installed.
    pub handled_depth: usize,
}

pub struct Frame {
    pub code: Rc<CodeObject>,
    pub block: BlockId,
    pub ip: usize,
    pub stack: Vec<Value>,
    pub fast: Vec<Option<Value>>,
    /// Cell slots: `cellvars` first, then the captured `freevars`.
    pub cells: Vec<CellRef>,
    /// Module and class bodies bind names here.
    pub namespace: Option<DictRef>,
    pub globals: DictRef,
    pub handlers: Vec<Handler>,
    /// Exceptions whose `except`/`finally` bodies are currently running.
    pub handled: Vec<PyException>,
    pub link: FrameLink,
    /// Raised at the current instruction when a generator resumes via
    /// `throw()` or `close()`.
    pub pending_throw: Option<PyException>,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<frame {} block {} ip {}>", self.code.qualname, self.block, self.ip)
    }
}

impl Frame {
    fn new(code: Rc<CodeObject>, globals: DictRef, namespace: Option<DictRef>, link: FrameLink) -> Self {
        let cells = code
            .cellvars
            .iter()
            .map(|_| Rc::new(RefCell::new(None)))
            .collect();
        Self {
            fast: vec![None; code.varnames.len()],
            code,
            block: 0,
            ip: 0,
            stack: Vec::new(),
            cells,
            namespace,
            globals,
            handlers: Vec::new(),
            handled: Vec::new(),
            link,
            pending_throw: None,
        }
    }

    /// A module body; the namespace is the module's globals.
    pub fn module(code: Rc<CodeObject>, globals: DictRef, name: Rc<str>) -> Self {
        Self::new(code, globals.clone(), Some(globals), FrameLink::Module { name })
    }

    /// A class body running in a fresh namespace.
    pub fn class_body(
        code: Rc<CodeObject>,
        globals: DictRef,
        namespace: DictRef,
        closure: Vec<CellRef>,
        link: FrameLink,
    ) -> Self {
        let mut frame = Self::new(code, globals, Some(namespace), link);
        frame.cells.extend(closure);
        frame
    }

    /// A function call with arguments already bound to fast slots.
    pub fn function(function: &FunctionObject, fast: Vec<Option<Value>>, link: FrameLink) -> Self {
        let mut frame = Self::new(function.code.clone(), function.globals.clone(), None, link);
        frame.fast = fast;
        for &(cell, slot) in &function.code.cell_params {
            *frame.cells[cell].borrow_mut() = frame.fast[slot].clone();
        }
        frame.cells.extend(function.closure.iter().cloned());
        frame
    }

    /// The instruction at the current position, following fall-through into
    /// the next block. `None` past the last block.
    pub fn fetch(&mut self) -> Option<Instruction> {
        loop {
            let block = self.code.blocks.get(self.block)?;
            if let Some(instruction) = block.instructions.get(self.ip) {
                return Some(instruction.clone());
            }
            self.block += 1;
            self.ip = 0;
        }
    }

    pub fn jump(&mut self, target: BlockId) {
        self.block = target;
        self.ip = 0;
    }

    /// Line of the instruction executing now (the one before `ip`).
    pub fn line(&self) -> usize {
        self.code.line_at(self.block, self.ip.saturating_sub(1))
    }

    pub fn trace_entry(&self) -> TraceEntry {
        TraceEntry {
            filename: self.code.filename.clone(),
            line: self.line(),
            scope: self.code.name.clone(),
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::None)
    }

    pub fn pop_n(&mut self, count: usize) -> Vec<Value> {
        let at = self.stack.len().saturating_sub(count);
        self.stack.split_off(at)
    }

    pub fn top(&self) -> Value {
        self.stack.last().cloned().unwrap_or(Value::None)
    }

    /// The value `depth` entries below the top, counting the top as 1.
    pub fn peek(&self, depth: usize) -> Value {
        self.stack
            .len()
            .checked_sub(depth)
            .and_then(|index| self.stack.get(index))
            .cloned()
            .unwrap_or(Value::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_source;
    use crate::parser::Mode;
    use crate::runtime::dict::new_dict;

    #[test]
    fn fetch_falls_through_empty_blocks() {
        let code = compile_source("while x:\n    pass\n", "<test>", Mode::Exec).unwrap();
        let mut frame = Frame::module(code.clone(), new_dict(), Rc::from("__main__"));
        let mut seen = 0;
        while let Some(_instruction) = frame.fetch() {
            frame.ip += 1;
            seen += 1;
        }
        assert_eq!(seen, code.instruction_count());
    }

    #[test]
    fn stack_helpers_count_from_the_top() {
        let code = compile_source("pass\n", "<test>", Mode::Exec).unwrap();
        let mut frame = Frame::module(code, new_dict(), Rc::from("m"));
        frame.push(Value::Int(1));
        frame.push(Value::Int(2));
        frame.push(Value::Int(3));
        assert_eq!(frame.peek(3).basic_repr(), "1");
        assert_eq!(frame.top().basic_repr(), "3");
        let popped = frame.pop_n(2);
        assert_eq!(popped.len(), 2);
        assert_eq!(frame.pop().basic_repr(), "1");
        assert!(frame.pop().is_none());
    }
}
