//! Compiled units: instructions grouped into basic blocks.

use std::fmt::{self, Write as _};
use std::rc::Rc;

use crate::ast::{CmpOp, Operator, UnaryOp};
use crate::num::BigInt;

pub type BlockId = usize;
pub type Name = Rc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodeKind {
    Module,
    Class,
    Function,
}

#[derive(Debug, Clone)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Big(Rc<BigInt>),
    Float(f64),
    Str(Rc<str>),
    Ellipsis,
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Big(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:?}"),
            Self::Str(value) => write!(f, "{value:?}"),
            Self::Ellipsis => f.write_str("Ellipsis"),
        }
    }
}

/// One stack-machine instruction.
///
/// Jump-like instructions name their target block; execution that runs past
/// the end of a block falls through into the next one.
#[derive(Debug, Clone)]
pub enum Instruction {
    LoadConst(Constant),
    LoadFast(usize),
    StoreFast(usize),
    DeleteFast(usize),
    /// Cell slots index `cellvars` first, then `freevars`.
    LoadDeref(usize),
    StoreDeref(usize),
    DeleteDeref(usize),
    /// Class bodies: the namespace first, then the captured cell.
    LoadClassDeref(usize),
    /// Pushes the cell itself, for building a closure.
    LoadClosure(usize),
    LoadName(Name),
    StoreName(Name),
    DeleteName(Name),
    LoadGlobal(Name),
    StoreGlobal(Name),
    DeleteGlobal(Name),
    LoadAttr(Name),
    StoreAttr(Name),
    DeleteAttr(Name),
    LoadSubscript,
    StoreSubscript,
    DeleteSubscript,
    LoadAssertionError,

    Pop,
    Dup,
    DupTwo,
    Rot2,
    Rot3,

    Unary(UnaryOp),
    Binary(Operator),
    Inplace(Operator),
    Compare(CmpOp),
    /// Pops a class (or tuple of classes) and the exception beneath it,
    /// pushes whether the exception is an instance.
    ExceptionMatch,

    BuildTuple(usize),
    BuildList(usize),
    BuildSet(usize),
    /// `count` key/value pairs, keys below values.
    BuildMap(usize),
    BuildSlice(usize),
    /// Pops a value and appends it to the list `depth` entries down.
    ListAppend(usize),
    SetAdd(usize),
    /// Pops a value and then a key.
    MapAdd(usize),
    ListExtend(usize),
    SetUpdate(usize),
    DictUpdate(usize),
    /// Like `DictUpdate`, but duplicate keys are an error (call unpacking).
    DictMerge(usize),
    ListToTuple,
    UnpackSequence(usize),
    UnpackEx {
        before: usize,
        after: usize,
    },

    GetIter,
    GetYieldFromIter,
    /// Pushes the next item, or pops the iterator and jumps to `exit`.
    ForIter {
        exit: BlockId,
    },
    Jump(BlockId),
    PopJumpIfFalse(BlockId),
    PopJumpIfTrue(BlockId),
    JumpIfFalseOrPop(BlockId),
    JumpIfTrueOrPop(BlockId),

    CallFunction {
        argc: usize,
    },
    /// `argc` positional values followed by one value per keyword name.
    CallFunctionKw {
        argc: usize,
        names: Rc<[Name]>,
    },
    /// Callee, an argument tuple and, with `kwargs`, a dict.
    CallFunctionEx {
        kwargs: bool,
    },
    /// Optional operands are popped in reverse: closure, keyword defaults,
    /// defaults.
    MakeFunction {
        code: Rc<CodeObject>,
        defaults: bool,
        kwdefaults: bool,
        closure: bool,
    },
    /// Pops keyword values, then `bases` base classes, then the closure.
    BuildClass {
        code: Rc<CodeObject>,
        bases: usize,
        keywords: Rc<[Name]>,
        closure: bool,
    },
    ReturnValue,
    /// Suspends the generator; resumption continues at `resume` with the
    /// sent value pushed.
    YieldValue {
        resume: BlockId,
    },
    /// Delegates to the iterator below the sent value. `resume` is the block
    /// holding this instruction, so it runs again after each resumption.
    YieldFrom {
        resume: BlockId,
    },

    SetupExcept(BlockId),
    SetupFinally(BlockId),
    /// Pops a context manager, pushes its `__exit__`, installs a handler and
    /// pushes the result of `__enter__`.
    SetupWith(BlockId),
    PopBlock,
    PopExcept,
    /// `[exit, exc]` -> `[exit, exc, exit, type, exc, None]`.
    WithExceptArgs,
    Raise(usize),
    /// Re-raises the exception on top of the stack unchanged.
    Reraise,

    ImportName {
        name: Name,
        level: usize,
        /// Push the leaf module instead of the top-level package.
        leaf: bool,
    },
    ImportFrom(Name),
    ImportStar,
    PrintExpr,
}

impl Instruction {
    /// Rewrites every block reference through `map`.
    pub(super) fn map_targets(&mut self, map: impl Fn(BlockId) -> BlockId) {
        match self {
            Self::ForIter { exit: target }
            | Self::Jump(target)
            | Self::PopJumpIfFalse(target)
            | Self::PopJumpIfTrue(target)
            | Self::JumpIfFalseOrPop(target)
            | Self::JumpIfTrueOrPop(target)
            | Self::YieldValue { resume: target }
            | Self::YieldFrom { resume: target }
            | Self::SetupExcept(target)
            | Self::SetupFinally(target)
            | Self::SetupWith(target) => *target = map(*target),
            _ => {}
        }
    }

    /// True for instructions after which control never falls through.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Jump(_) | Self::ReturnValue | Self::Raise(_) | Self::Reraise
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadConst(constant) => write!(f, "LoadConst {constant}"),
            Self::CallFunctionKw { argc, names } => {
                write!(f, "CallFunctionKw {argc} {:?}", names.iter().map(|n| &**n).collect::<Vec<_>>())
            }
            Self::MakeFunction { code, .. } => write!(f, "MakeFunction <code {}>", code.qualname),
            Self::BuildClass { code, bases, .. } => {
                write!(f, "BuildClass <code {}> bases={bases}", code.qualname)
            }
            Self::Unary(op) => write!(f, "Unary {op:?}"),
            Self::Binary(op) => write!(f, "Binary {}", op.symbol()),
            Self::Inplace(op) => write!(f, "Inplace {}=", op.symbol()),
            Self::Compare(op) => write!(f, "Compare {}", op.symbol()),
            other => write!(f, "{other:?}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub instructions: Vec<Instruction>,
    /// Source line of each instruction.
    pub lines: Vec<usize>,
}

impl Block {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn is_terminated(&self) -> bool {
        self.instructions.last().is_some_and(Instruction::is_terminal)
    }
}

/// The resumable procedure for one lexical scope.
#[derive(Debug, Clone)]
pub struct CodeObject {
    pub name: Rc<str>,
    pub qualname: Rc<str>,
    pub filename: Rc<str>,
    pub kind: CodeKind,
    pub blocks: Vec<Block>,
    pub varnames: Vec<Name>,
    pub cellvars: Vec<Name>,
    pub freevars: Vec<Name>,
    /// `(cell slot, fast slot)` for parameters captured by inner scopes.
    pub cell_params: Vec<(usize, usize)>,
    pub argcount: usize,
    pub kwonlyargcount: usize,
    pub has_varargs: bool,
    pub has_varkeywords: bool,
    pub is_generator: bool,
    pub first_line: usize,
    pub doc: Option<Rc<str>>,
}

impl CodeObject {
    pub fn line_at(&self, block: BlockId, ip: usize) -> usize {
        self.blocks
            .get(block)
            .and_then(|block| block.lines.get(ip))
            .copied()
            .unwrap_or(self.first_line)
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    pub fn cell_index(&self, name: &str) -> Option<usize> {
        self.cellvars
            .iter()
            .chain(self.freevars.iter())
            .position(|candidate| &**candidate == name)
    }

    /// Visits this unit and every unit nested in its constants.
    pub fn walk(self: &Rc<Self>, visit: &mut impl FnMut(&Rc<CodeObject>)) {
        visit(self);
        for block in &self.blocks {
            for instruction in &block.instructions {
                if let Instruction::MakeFunction { code, .. } | Instruction::BuildClass { code, .. } =
                    instruction
                {
                    code.walk(visit);
                }
            }
        }
    }

    /// Human-readable listing of this unit and its nested units.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "code {} ({:?}):", self.qualname, self.kind);
        for (id, block) in self.blocks.iter().enumerate() {
            let _ = writeln!(out, "  block {id}:");
            for (instruction, line) in block.instructions.iter().zip(&block.lines) {
                let _ = writeln!(out, "    {line:>4} {instruction}");
            }
        }
        for block in &self.blocks {
            for instruction in &block.instructions {
                if let Instruction::MakeFunction { code, .. } | Instruction::BuildClass { code, .. } =
                    instruction
                {
                    out.push_str(&code.disassemble());
                }
            }
        }
        out
    }
}
