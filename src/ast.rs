//! Typed syntax tree built from the CST.
//!
//! Every statement and expression carries a `NodeId` unique within one
//! compile; scope records and compiled units are keyed by it. `dump` renders
//! a deterministic textual form used by tests and `--dump-ast`.

use std::fmt::Write as _;

use crate::lexer::Pos;
use crate::num::BigInt;

mod builder;
mod literal;

pub use builder::{build, build_source};

pub type NodeId = u32;

/// Id of the module-level scope; real nodes are numbered from 1.
pub const MODULE_ID: NodeId = 0;

/// Deepest expression nesting the recursive passes accept.
pub const MAX_NESTING: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum Mod {
    Module { body: Vec<Stmt> },
    Interactive { body: Vec<Stmt> },
    Expression { body: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub id: NodeId,
    pub pos: Pos,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    FunctionDef {
        name: String,
        args: Box<Arguments>,
        body: Vec<Stmt>,
        decorators: Vec<Expr>,
        returns: Option<Box<Expr>>,
    },
    ClassDef {
        name: String,
        bases: Vec<Expr>,
        keywords: Vec<Keyword>,
        body: Vec<Stmt>,
        decorators: Vec<Expr>,
    },
    Return(Option<Expr>),
    Delete(Vec<Expr>),
    Assign {
        targets: Vec<Expr>,
        value: Expr,
    },
    AugAssign {
        target: Expr,
        op: Operator,
        value: Expr,
    },
    AnnAssign {
        target: Expr,
        annotation: Expr,
        value: Option<Expr>,
    },
    For {
        target: Expr,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    With {
        items: Vec<WithItem>,
        body: Vec<Stmt>,
    },
    Raise {
        exc: Option<Expr>,
        cause: Option<Expr>,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finalbody: Vec<Stmt>,
    },
    Assert {
        test: Expr,
        msg: Option<Expr>,
    },
    Import(Vec<Alias>),
    ImportFrom {
        module: Option<String>,
        names: Vec<Alias>,
        level: usize,
    },
    Global(Vec<String>),
    Nonlocal(Vec<String>),
    Expr(Expr),
    Pass,
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub pos: Pos,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    BinOp {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Lambda {
        args: Box<Arguments>,
        body: Box<Expr>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    /// A `None` key marks a `**mapping` entry.
    Dict {
        keys: Vec<Option<Expr>>,
        values: Vec<Expr>,
    },
    Set(Vec<Expr>),
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    SetComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    DictComp {
        key: Box<Expr>,
        value: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    GeneratorExp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    Yield(Option<Box<Expr>>),
    YieldFrom(Box<Expr>),
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    Num(Number),
    Str(String),
    NameConstant(Constant),
    Ellipsis,
    Attribute {
        value: Box<Expr>,
        attr: String,
        ctx: ExprContext,
    },
    Subscript {
        value: Box<Expr>,
        slice: Box<Slice>,
        ctx: ExprContext,
    },
    Starred {
        value: Box<Expr>,
        ctx: ExprContext,
    },
    Name {
        name: String,
        ctx: ExprContext,
    },
    List {
        elts: Vec<Expr>,
        ctx: ExprContext,
    },
    Tuple {
        elts: Vec<Expr>,
        ctx: ExprContext,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Number {
    Int(i64),
    Big(BigInt),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    None,
    True,
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprContext {
    Load,
    Store,
    Del,
    AugStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mult,
    MatMult,
    Div,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
    FloorDiv,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mult => "*",
            Self::MatMult => "@",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::LShift => "<<",
            Self::RShift => ">>",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
            Self::FloorDiv => "//",
        }
    }

    pub fn from_symbol(text: &str) -> Option<Self> {
        Some(match text {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mult,
            "@" => Self::MatMult,
            "/" => Self::Div,
            "%" => Self::Mod,
            "**" => Self::Pow,
            "<<" => Self::LShift,
            ">>" => Self::RShift,
            "|" => Self::BitOr,
            "^" => Self::BitXor,
            "&" => Self::BitAnd,
            "//" => Self::FloorDiv,
            _ => return None,
        })
    }

    /// Dunder names for the forward, reflected and in-place slots.
    pub fn dunders(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::Add => ("__add__", "__radd__", "__iadd__"),
            Self::Sub => ("__sub__", "__rsub__", "__isub__"),
            Self::Mult => ("__mul__", "__rmul__", "__imul__"),
            Self::MatMult => ("__matmul__", "__rmatmul__", "__imatmul__"),
            Self::Div => ("__truediv__", "__rtruediv__", "__itruediv__"),
            Self::Mod => ("__mod__", "__rmod__", "__imod__"),
            Self::Pow => ("__pow__", "__rpow__", "__ipow__"),
            Self::LShift => ("__lshift__", "__rlshift__", "__ilshift__"),
            Self::RShift => ("__rshift__", "__rrshift__", "__irshift__"),
            Self::BitOr => ("__or__", "__ror__", "__ior__"),
            Self::BitXor => ("__xor__", "__rxor__", "__ixor__"),
            Self::BitAnd => ("__and__", "__rand__", "__iand__"),
            Self::FloorDiv => ("__floordiv__", "__rfloordiv__", "__ifloordiv__"),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Add => "Add",
            Self::Sub => "Sub",
            Self::Mult => "Mult",
            Self::MatMult => "MatMult",
            Self::Div => "Div",
            Self::Mod => "Mod",
            Self::Pow => "Pow",
            Self::LShift => "LShift",
            Self::RShift => "RShift",
            Self::BitOr => "BitOr",
            Self::BitXor => "BitXor",
            Self::BitAnd => "BitAnd",
            Self::FloorDiv => "FloorDiv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Invert,
    Not,
    UAdd,
    USub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtE => "<=",
            Self::Gt => ">",
            Self::GtE => ">=",
            Self::Is => "is",
            Self::IsNot => "is not",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Slice {
    Index(Expr),
    Slice {
        lower: Option<Expr>,
        upper: Option<Expr>,
        step: Option<Expr>,
    },
    ExtSlice(Vec<Slice>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    pub args: Vec<Arg>,
    pub vararg: Option<Arg>,
    pub kwonlyargs: Vec<Arg>,
    /// Parallel to `kwonlyargs`.
    pub kw_defaults: Vec<Option<Expr>>,
    pub kwarg: Option<Arg>,
    /// Defaults for the last `defaults.len()` positional parameters.
    pub defaults: Vec<Expr>,
}

impl Arguments {
    pub fn all_names(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .chain(self.vararg.iter())
            .chain(self.kwonlyargs.iter())
            .chain(self.kwarg.iter())
            .map(|arg| arg.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: String,
    pub annotation: Option<Expr>,
    pub pos: Pos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    /// `None` for `**mapping`.
    pub arg: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithItem {
    pub context_expr: Expr,
    pub optional_vars: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptHandler {
    pub pos: Pos,
    pub typ: Option<Expr>,
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    pub ifs: Vec<Expr>,
}

impl Expr {
    /// Human-readable description used in "can't assign to ..." messages.
    pub fn describe(&self) -> &'static str {
        match &self.kind {
            ExprKind::BoolOp { .. } | ExprKind::BinOp { .. } | ExprKind::UnaryOp { .. } => {
                "operator"
            }
            ExprKind::Lambda { .. } => "lambda",
            ExprKind::IfExp { .. } => "conditional expression",
            ExprKind::Dict { .. } | ExprKind::Set(_) | ExprKind::Num(_) | ExprKind::Str(_) => {
                "literal"
            }
            ExprKind::ListComp { .. } => "list comprehension",
            ExprKind::SetComp { .. } => "set comprehension",
            ExprKind::DictComp { .. } => "dict comprehension",
            ExprKind::GeneratorExp { .. } => "generator expression",
            ExprKind::Yield(_) | ExprKind::YieldFrom(_) => "yield expression",
            ExprKind::Compare { .. } => "comparison",
            ExprKind::Call { .. } => "function call",
            ExprKind::NameConstant(_) => "keyword",
            ExprKind::Ellipsis => "Ellipsis",
            ExprKind::Attribute { .. } => "attribute",
            ExprKind::Subscript { .. } => "subscript",
            ExprKind::Starred { .. } => "starred",
            ExprKind::Name { .. } => "name",
            ExprKind::List { .. } => "list",
            ExprKind::Tuple { .. } => "tuple",
        }
    }
}

/// Deterministic textual rendering in the style of Python's `ast.dump`.
pub fn dump(module: &Mod) -> String {
    let mut out = String::new();
    match module {
        Mod::Module { body } => {
            out.push_str("Module(body=");
            body.dump(&mut out);
        }
        Mod::Interactive { body } => {
            out.push_str("Interactive(body=");
            body.dump(&mut out);
        }
        Mod::Expression { body } => {
            out.push_str("Expression(body=");
            body.dump(&mut out);
        }
    }
    out.push(')');
    out
}

trait Dump {
    fn dump(&self, out: &mut String);
}

impl<T: Dump> Dump for Vec<T> {
    fn dump(&self, out: &mut String) {
        out.push('[');
        for (index, item) in self.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            item.dump(out);
        }
        out.push(']');
    }
}

impl<T: Dump> Dump for Option<T> {
    fn dump(&self, out: &mut String) {
        match self {
            Some(value) => value.dump(out),
            None => out.push_str("None"),
        }
    }
}

impl<T: Dump> Dump for Box<T> {
    fn dump(&self, out: &mut String) {
        self.as_ref().dump(out);
    }
}

impl Dump for String {
    fn dump(&self, out: &mut String) {
        out.push('\'');
        for ch in self.chars() {
            match ch {
                '\'' => out.push_str("\\'"),
                '\\' => out.push_str("\\\\"),
                '\n' => out.push_str("\\n"),
                '\t' => out.push_str("\\t"),
                c => out.push(c),
            }
        }
        out.push('\'');
    }
}

impl Dump for usize {
    fn dump(&self, out: &mut String) {
        let _ = write!(out, "{self}");
    }
}

/// Writes `Name(field=value, ...)`.
struct Fields<'o> {
    out: &'o mut String,
    first: bool,
}

impl<'o> Fields<'o> {
    fn open(out: &'o mut String, name: &str) -> Self {
        out.push_str(name);
        out.push('(');
        Self { out, first: true }
    }

    fn field(mut self, name: &str, value: &dyn Dump) -> Self {
        if !self.first {
            self.out.push_str(", ");
        }
        self.first = false;
        self.out.push_str(name);
        self.out.push('=');
        value.dump(self.out);
        self
    }

    fn raw(mut self, name: &str, value: &str) -> Self {
        if !self.first {
            self.out.push_str(", ");
        }
        self.first = false;
        self.out.push_str(name);
        self.out.push('=');
        self.out.push_str(value);
        self
    }

    fn close(self) {
        self.out.push(')');
    }
}

fn unit(name: &str) -> String {
    format!("{name}()")
}

impl Dump for ExprContext {
    fn dump(&self, out: &mut String) {
        out.push_str(&unit(match self {
            Self::Load => "Load",
            Self::Store => "Store",
            Self::Del => "Del",
            Self::AugStore => "AugStore",
        }));
    }
}

impl Dump for Operator {
    fn dump(&self, out: &mut String) {
        out.push_str(&unit(self.name()));
    }
}

impl Dump for CmpOp {
    fn dump(&self, out: &mut String) {
        out.push_str(&unit(match self {
            Self::Eq => "Eq",
            Self::NotEq => "NotEq",
            Self::Lt => "Lt",
            Self::LtE => "LtE",
            Self::Gt => "Gt",
            Self::GtE => "GtE",
            Self::Is => "Is",
            Self::IsNot => "IsNot",
            Self::In => "In",
            Self::NotIn => "NotIn",
        }));
    }
}

impl Dump for Stmt {
    fn dump(&self, out: &mut String) {
        match &self.kind {
            StmtKind::FunctionDef {
                name,
                args,
                body,
                decorators,
                returns,
            } => Fields::open(out, "FunctionDef")
                .field("name", name)
                .field("args", args)
                .field("body", body)
                .field("decorator_list", decorators)
                .field("returns", returns)
                .close(),
            StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorators,
            } => Fields::open(out, "ClassDef")
                .field("name", name)
                .field("bases", bases)
                .field("keywords", keywords)
                .field("body", body)
                .field("decorator_list", decorators)
                .close(),
            StmtKind::Return(value) => Fields::open(out, "Return").field("value", value).close(),
            StmtKind::Delete(targets) => Fields::open(out, "Delete").field("targets", targets).close(),
            StmtKind::Assign { targets, value } => Fields::open(out, "Assign")
                .field("targets", targets)
                .field("value", value)
                .close(),
            StmtKind::AugAssign { target, op, value } => Fields::open(out, "AugAssign")
                .field("target", target)
                .field("op", op)
                .field("value", value)
                .close(),
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => Fields::open(out, "AnnAssign")
                .field("target", target)
                .field("annotation", annotation)
                .field("value", value)
                .close(),
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => Fields::open(out, "For")
                .field("target", target)
                .field("iter", iter)
                .field("body", body)
                .field("orelse", orelse)
                .close(),
            StmtKind::While { test, body, orelse } => Fields::open(out, "While")
                .field("test", test)
                .field("body", body)
                .field("orelse", orelse)
                .close(),
            StmtKind::If { test, body, orelse } => Fields::open(out, "If")
                .field("test", test)
                .field("body", body)
                .field("orelse", orelse)
                .close(),
            StmtKind::With { items, body } => Fields::open(out, "With")
                .field("items", items)
                .field("body", body)
                .close(),
            StmtKind::Raise { exc, cause } => Fields::open(out, "Raise")
                .field("exc", exc)
                .field("cause", cause)
                .close(),
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => Fields::open(out, "Try")
                .field("body", body)
                .field("handlers", handlers)
                .field("orelse", orelse)
                .field("finalbody", finalbody)
                .close(),
            StmtKind::Assert { test, msg } => Fields::open(out, "Assert")
                .field("test", test)
                .field("msg", msg)
                .close(),
            StmtKind::Import(names) => Fields::open(out, "Import").field("names", names).close(),
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => Fields::open(out, "ImportFrom")
                .field("module", module)
                .field("names", names)
                .field("level", level)
                .close(),
            StmtKind::Global(names) => Fields::open(out, "Global").field("names", names).close(),
            StmtKind::Nonlocal(names) => Fields::open(out, "Nonlocal").field("names", names).close(),
            StmtKind::Expr(value) => Fields::open(out, "Expr").field("value", value).close(),
            StmtKind::Pass => out.push_str("Pass"),
            StmtKind::Break => out.push_str("Break"),
            StmtKind::Continue => out.push_str("Continue"),
        }
    }
}

impl Dump for Expr {
    fn dump(&self, out: &mut String) {
        match &self.kind {
            ExprKind::BoolOp { op, values } => Fields::open(out, "BoolOp")
                .raw(
                    "op",
                    &unit(match op {
                        BoolOp::And => "And",
                        BoolOp::Or => "Or",
                    }),
                )
                .field("values", values)
                .close(),
            ExprKind::BinOp { left, op, right } => Fields::open(out, "BinOp")
                .field("left", left)
                .field("op", op)
                .field("right", right)
                .close(),
            ExprKind::UnaryOp { op, operand } => Fields::open(out, "UnaryOp")
                .raw(
                    "op",
                    &unit(match op {
                        UnaryOp::Invert => "Invert",
                        UnaryOp::Not => "Not",
                        UnaryOp::UAdd => "UAdd",
                        UnaryOp::USub => "USub",
                    }),
                )
                .field("operand", operand)
                .close(),
            ExprKind::Lambda { args, body } => Fields::open(out, "Lambda")
                .field("args", args)
                .field("body", body)
                .close(),
            ExprKind::IfExp { test, body, orelse } => Fields::open(out, "IfExp")
                .field("test", test)
                .field("body", body)
                .field("orelse", orelse)
                .close(),
            ExprKind::Dict { keys, values } => Fields::open(out, "Dict")
                .field("keys", keys)
                .field("values", values)
                .close(),
            ExprKind::Set(elts) => Fields::open(out, "Set").field("elts", elts).close(),
            ExprKind::ListComp { elt, generators } => Fields::open(out, "ListComp")
                .field("elt", elt)
                .field("generators", generators)
                .close(),
            ExprKind::SetComp { elt, generators } => Fields::open(out, "SetComp")
                .field("elt", elt)
                .field("generators", generators)
                .close(),
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => Fields::open(out, "DictComp")
                .field("key", key)
                .field("value", value)
                .field("generators", generators)
                .close(),
            ExprKind::GeneratorExp { elt, generators } => Fields::open(out, "GeneratorExp")
                .field("elt", elt)
                .field("generators", generators)
                .close(),
            ExprKind::Yield(value) => Fields::open(out, "Yield").field("value", value).close(),
            ExprKind::YieldFrom(value) => Fields::open(out, "YieldFrom").field("value", value).close(),
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => Fields::open(out, "Compare")
                .field("left", left)
                .field("ops", ops)
                .field("comparators", comparators)
                .close(),
            ExprKind::Call {
                func,
                args,
                keywords,
            } => Fields::open(out, "Call")
                .field("func", func)
                .field("args", args)
                .field("keywords", keywords)
                .close(),
            ExprKind::Num(number) => {
                let text = match number {
                    Number::Int(value) => value.to_string(),
                    Number::Big(value) => value.to_string(),
                    Number::Float(value) => format!("{value:?}"),
                };
                Fields::open(out, "Num").raw("n", &text).close();
            }
            ExprKind::Str(value) => Fields::open(out, "Str").field("s", value).close(),
            ExprKind::NameConstant(constant) => Fields::open(out, "NameConstant")
                .raw(
                    "value",
                    match constant {
                        Constant::None => "None",
                        Constant::True => "True",
                        Constant::False => "False",
                    },
                )
                .close(),
            ExprKind::Ellipsis => out.push_str("Ellipsis()"),
            ExprKind::Attribute { value, attr, ctx } => Fields::open(out, "Attribute")
                .field("value", value)
                .field("attr", attr)
                .field("ctx", ctx)
                .close(),
            ExprKind::Subscript { value, slice, ctx } => Fields::open(out, "Subscript")
                .field("value", value)
                .field("slice", slice)
                .field("ctx", ctx)
                .close(),
            ExprKind::Starred { value, ctx } => Fields::open(out, "Starred")
                .field("value", value)
                .field("ctx", ctx)
                .close(),
            ExprKind::Name { name, ctx } => Fields::open(out, "Name")
                .field("id", name)
                .field("ctx", ctx)
                .close(),
            ExprKind::List { elts, ctx } => Fields::open(out, "List")
                .field("elts", elts)
                .field("ctx", ctx)
                .close(),
            ExprKind::Tuple { elts, ctx } => Fields::open(out, "Tuple")
                .field("elts", elts)
                .field("ctx", ctx)
                .close(),
        }
    }
}

impl Dump for Slice {
    fn dump(&self, out: &mut String) {
        match self {
            Slice::Index(value) => Fields::open(out, "Index").field("value", value).close(),
            Slice::Slice { lower, upper, step } => Fields::open(out, "Slice")
                .field("lower", lower)
                .field("upper", upper)
                .field("step", step)
                .close(),
            Slice::ExtSlice(dims) => Fields::open(out, "ExtSlice").field("dims", dims).close(),
        }
    }
}

impl Dump for Arguments {
    fn dump(&self, out: &mut String) {
        Fields::open(out, "arguments")
            .field("args", &self.args)
            .field("vararg", &self.vararg)
            .field("kwonlyargs", &self.kwonlyargs)
            .field("kw_defaults", &self.kw_defaults)
            .field("kwarg", &self.kwarg)
            .field("defaults", &self.defaults)
            .close();
    }
}

impl Dump for Arg {
    fn dump(&self, out: &mut String) {
        Fields::open(out, "arg")
            .field("arg", &self.name)
            .field("annotation", &self.annotation)
            .close();
    }
}

impl Dump for Keyword {
    fn dump(&self, out: &mut String) {
        Fields::open(out, "keyword")
            .field("arg", &self.arg)
            .field("value", &self.value)
            .close();
    }
}

impl Dump for Alias {
    fn dump(&self, out: &mut String) {
        Fields::open(out, "alias")
            .field("name", &self.name)
            .field("asname", &self.asname)
            .close();
    }
}

impl Dump for WithItem {
    fn dump(&self, out: &mut String) {
        Fields::open(out, "withitem")
            .field("context_expr", &self.context_expr)
            .field("optional_vars", &self.optional_vars)
            .close();
    }
}

impl Dump for ExceptHandler {
    fn dump(&self, out: &mut String) {
        Fields::open(out, "ExceptHandler")
            .field("type", &self.typ)
            .field("name", &self.name)
            .field("body", &self.body)
            .close();
    }
}

impl Dump for Comprehension {
    fn dump(&self, out: &mut String) {
        Fields::open(out, "comprehension")
            .field("target", &self.target)
            .field("iter", &self.iter)
            .field("ifs", &self.ifs)
            .close();
    }
}
