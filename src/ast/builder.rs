//! CST to AST conversion.
//!
//! One method per nonterminal. Single-child chains (`test` -> `or_test` ->
//! ... -> `atom`) are walked in a loop without building intermediate nodes.
//! Assignment targets are built as ordinary expressions and then passed
//! through `set_context`, which fixes their context and rejects anything
//! that cannot be bound.

use log::trace;
use rustc_hash::FxHashSet;

use super::literal::{parse_number, parse_string};
use super::{
    Alias, Arg, Arguments, BoolOp, CmpOp, Comprehension, Constant, ExceptHandler, Expr, ExprContext,
    ExprKind, Keyword, MAX_NESTING, Mod, NodeId, Operator, Slice, Stmt, StmtKind, UnaryOp, WithItem,
};
use crate::error::{CompileError, CompileResult};
use crate::grammar::Symbol;
use crate::lexer::{Pos, TokenKind};
use crate::parser::{self, Mode, Node};

const FORBIDDEN_NAMES: [&str; 4] = ["None", "True", "False", "__debug__"];

/// Parses and builds `source` in one step.
pub fn build_source(source: &str, filename: &str, mode: Mode) -> CompileResult<Mod> {
    let root = parser::parse(source, filename, mode)?;
    build(&root, filename)
}

/// Converts a CST rooted at one of the start rules.
pub fn build(root: &Node<'_>, filename: &str) -> CompileResult<Mod> {
    let mut builder = Builder {
        filename,
        next_id: super::MODULE_ID,
        loop_depth: 0,
        depth: 0,
    };
    let module = match root.symbol() {
        Some(Symbol::FileInput) => {
            let mut body = Vec::new();
            for child in &root.children {
                if child.is(Symbol::Stmt) {
                    builder.stmt(child, &mut body)?;
                }
            }
            Mod::Module { body }
        }
        Some(Symbol::SingleInput) => {
            let mut body = Vec::new();
            let first = root.child(0);
            if first.is(Symbol::SimpleStmt) {
                builder.simple_stmt(first, &mut body)?;
            } else if first.is(Symbol::CompoundStmt) {
                body.push(builder.compound_stmt(first.child(0))?);
            }
            Mod::Interactive { body }
        }
        Some(Symbol::EvalInput) => Mod::Expression {
            body: Box::new(builder.expr(root.child(0))?),
        },
        _ => return Err(builder.error(root.start, "invalid syntax")),
    };
    trace!("built AST for {filename} with {} nodes", builder.next_id);
    Ok(module)
}

struct Builder<'f> {
    filename: &'f str,
    next_id: NodeId,
    loop_depth: usize,
    depth: usize,
}

impl Builder<'_> {
    fn error(&self, pos: Pos, message: impl Into<String>) -> CompileError {
        CompileError::syntax(message, self.filename, pos)
    }

    fn id(&mut self) -> NodeId {
        self.next_id += 1;
        self.next_id
    }

    fn new_stmt(&mut self, pos: Pos, kind: StmtKind) -> Stmt {
        Stmt {
            id: self.id(),
            pos,
            kind,
        }
    }

    fn new_expr(&mut self, pos: Pos, kind: ExprKind) -> Expr {
        Expr {
            id: self.id(),
            pos,
            kind,
        }
    }

    // ----- statements -------------------------------------------------------

    fn stmt(&mut self, node: &Node<'_>, out: &mut Vec<Stmt>) -> CompileResult<()> {
        let inner = node.child(0);
        if inner.is(Symbol::SimpleStmt) {
            self.simple_stmt(inner, out)
        } else {
            out.push(self.compound_stmt(inner.child(0))?);
            Ok(())
        }
    }

    fn simple_stmt(&mut self, node: &Node<'_>, out: &mut Vec<Stmt>) -> CompileResult<()> {
        for child in &node.children {
            if child.is(Symbol::SmallStmt) {
                out.push(self.small_stmt(child.child(0))?);
            }
        }
        Ok(())
    }

    fn suite(&mut self, node: &Node<'_>) -> CompileResult<Vec<Stmt>> {
        let mut body = Vec::new();
        let first = node.child(0);
        if first.is(Symbol::SimpleStmt) {
            self.simple_stmt(first, &mut body)?;
        } else {
            for child in &node.children {
                if child.is(Symbol::Stmt) {
                    self.stmt(child, &mut body)?;
                }
            }
        }
        Ok(body)
    }

    /// Builds a suite that is a loop body.
    fn loop_suite(&mut self, node: &Node<'_>) -> CompileResult<Vec<Stmt>> {
        self.loop_depth += 1;
        let body = self.suite(node);
        self.loop_depth -= 1;
        body
    }

    /// Builds a function or class body, where enclosing loops do not count.
    fn scope_suite(&mut self, node: &Node<'_>) -> CompileResult<Vec<Stmt>> {
        let saved = std::mem::replace(&mut self.loop_depth, 0);
        let body = self.suite(node);
        self.loop_depth = saved;
        body
    }

    fn small_stmt(&mut self, node: &Node<'_>) -> CompileResult<Stmt> {
        let pos = node.start;
        let kind = match node.symbol() {
            Some(Symbol::ExprStmt) => return self.expr_stmt(node),
            Some(Symbol::DelStmt) => {
                let targets = self.expr_list_items(node.child(1))?;
                let mut deleted = Vec::with_capacity(targets.len());
                for mut target in targets {
                    self.set_context(&mut target, ExprContext::Del)?;
                    deleted.push(target);
                }
                StmtKind::Delete(deleted)
            }
            Some(Symbol::PassStmt) => StmtKind::Pass,
            Some(Symbol::FlowStmt) => return self.flow_stmt(node.child(0)),
            Some(Symbol::ImportStmt) => return self.import_stmt(node.child(0)),
            Some(Symbol::GlobalStmt) => StmtKind::Global(self.name_list(node)),
            Some(Symbol::NonlocalStmt) => StmtKind::Nonlocal(self.name_list(node)),
            Some(Symbol::AssertStmt) => {
                let test = self.expr(node.child(1))?;
                let msg = match node.children.get(3) {
                    Some(msg) => Some(self.expr(msg)?),
                    None => None,
                };
                StmtKind::Assert { test, msg }
            }
            _ => return Err(self.error(pos, "invalid syntax")),
        };
        Ok(self.new_stmt(pos, kind))
    }

    fn name_list(&self, node: &Node<'_>) -> Vec<String> {
        node.children
            .iter()
            .skip(1)
            .step_by(2)
            .map(|name| name.value.to_string())
            .collect()
    }

    fn expr_stmt(&mut self, node: &Node<'_>) -> CompileResult<Stmt> {
        let pos = node.start;
        let children = &node.children;

        if children.len() == 1 {
            let value = self.expr(&children[0])?;
            return Ok(self.new_stmt(pos, StmtKind::Expr(value)));
        }

        if children[1].is(Symbol::Annassign) {
            let annassign = &children[1];
            let mut target = self.expr(&children[0])?;
            match target.kind {
                ExprKind::Name { .. } | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => {}
                ExprKind::Tuple { .. } => {
                    return Err(self.error(
                        target.pos,
                        "only single target (not tuple) can be annotated",
                    ));
                }
                ExprKind::List { .. } => {
                    return Err(self.error(target.pos, "only single target (not list) can be annotated"));
                }
                _ => return Err(self.error(target.pos, "illegal target for annotation")),
            }
            self.set_context(&mut target, ExprContext::Store)?;
            let annotation = self.expr(annassign.child(1))?;
            let value = match annassign.children.get(3) {
                Some(value) => Some(self.expr(value)?),
                None => None,
            };
            return Ok(self.new_stmt(
                pos,
                StmtKind::AnnAssign {
                    target,
                    annotation,
                    value,
                },
            ));
        }

        if children[1].is(Symbol::Augassign) {
            let mut target = self.expr(&children[0])?;
            match target.kind {
                ExprKind::Name { .. } | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => {}
                _ => {
                    return Err(self.error(
                        target.pos,
                        format!(
                            "illegal expression for augmented assignment ({})",
                            target.describe()
                        ),
                    ));
                }
            }
            self.set_context(&mut target, ExprContext::AugStore)?;
            let op_text = children[1].child(0).value;
            let op = Operator::from_symbol(op_text.trim_end_matches('='))
                .ok_or_else(|| self.error(children[1].start, "invalid syntax"))?;
            let value = self.expr(&children[2])?;
            return Ok(self.new_stmt(pos, StmtKind::AugAssign { target, op, value }));
        }

        // testlist_star_expr ('=' (yield_expr | testlist_star_expr))+
        let last = children.len() - 1;
        let mut targets = Vec::new();
        for child in children[..last].iter().step_by(2) {
            if child.is(Symbol::YieldExpr) {
                return Err(self.error(child.start, "assignment to yield expression not possible"));
            }
            let mut target = self.expr(child)?;
            self.set_context(&mut target, ExprContext::Store)?;
            targets.push(target);
        }
        let value = self.expr(&children[last])?;
        Ok(self.new_stmt(pos, StmtKind::Assign { targets, value }))
    }

    fn flow_stmt(&mut self, node: &Node<'_>) -> CompileResult<Stmt> {
        let pos = node.start;
        let kind = match node.symbol() {
            Some(Symbol::BreakStmt) => {
                if self.loop_depth == 0 {
                    return Err(self.error(pos, "'break' outside loop"));
                }
                StmtKind::Break
            }
            Some(Symbol::ContinueStmt) => {
                if self.loop_depth == 0 {
                    return Err(self.error(pos, "'continue' not properly in loop"));
                }
                StmtKind::Continue
            }
            Some(Symbol::ReturnStmt) => {
                let value = match node.children.get(1) {
                    Some(value) => Some(self.expr(value)?),
                    None => None,
                };
                StmtKind::Return(value)
            }
            Some(Symbol::RaiseStmt) => {
                let exc = match node.children.get(1) {
                    Some(exc) => Some(self.expr(exc)?),
                    None => None,
                };
                let cause = match node.children.get(3) {
                    Some(cause) => Some(self.expr(cause)?),
                    None => None,
                };
                StmtKind::Raise { exc, cause }
            }
            Some(Symbol::YieldStmt) => StmtKind::Expr(self.expr(node.child(0))?),
            _ => return Err(self.error(pos, "invalid syntax")),
        };
        Ok(self.new_stmt(pos, kind))
    }

    fn import_stmt(&mut self, node: &Node<'_>) -> CompileResult<Stmt> {
        let pos = node.start;
        if node.is(Symbol::ImportName) {
            let mut names = Vec::new();
            for dotted in node.child(1).children.iter().step_by(2) {
                names.push(self.dotted_as_name(dotted)?);
            }
            return Ok(self.new_stmt(pos, StmtKind::Import(names)));
        }

        // import_from
        let mut level = 0;
        let mut module = None;
        let mut index = 1;
        while let Some(child) = node.children.get(index) {
            if child.is_text(".") {
                level += 1;
            } else if child.is_text("...") {
                level += 3;
            } else if child.is(Symbol::DottedName) {
                module = Some(dotted_name(child));
            } else {
                break;
            }
            index += 1;
        }
        // children[index] is 'import'
        index += 1;
        let names_node = node.child(index);
        let names = if names_node.is_text("*") {
            vec![Alias {
                name: "*".to_string(),
                asname: None,
            }]
        } else {
            let list = if names_node.is_text("(") {
                node.child(index + 1)
            } else {
                names_node
            };
            let mut names = Vec::new();
            for item in list.children.iter().filter(|child| child.is(Symbol::ImportAsName)) {
                let asname = item.children.get(2).map(|name| name.value.to_string());
                if let Some(asname) = &asname {
                    self.check_forbidden(asname, item.start)?;
                }
                names.push(Alias {
                    name: item.child(0).value.to_string(),
                    asname,
                });
            }
            names
        };
        Ok(self.new_stmt(
            pos,
            StmtKind::ImportFrom {
                module,
                names,
                level,
            },
        ))
    }

    fn dotted_as_name(&self, node: &Node<'_>) -> CompileResult<Alias> {
        let asname = node.children.get(2).map(|name| name.value.to_string());
        if let Some(asname) = &asname {
            self.check_forbidden(asname, node.start)?;
        }
        Ok(Alias {
            name: dotted_name(node.child(0)),
            asname,
        })
    }

    fn compound_stmt(&mut self, node: &Node<'_>) -> CompileResult<Stmt> {
        let pos = node.start;
        match node.symbol() {
            Some(Symbol::IfStmt) => self.if_stmt(node),
            Some(Symbol::WhileStmt) => {
                let test = self.expr(node.child(1))?;
                let body = self.loop_suite(node.child(3))?;
                let orelse = match node.children.get(6) {
                    Some(suite) => self.suite(suite)?,
                    None => Vec::new(),
                };
                Ok(self.new_stmt(pos, StmtKind::While { test, body, orelse }))
            }
            Some(Symbol::ForStmt) => {
                let mut target = self.expr(node.child(1))?;
                self.set_context(&mut target, ExprContext::Store)?;
                let iter = self.expr(node.child(3))?;
                let body = self.loop_suite(node.child(5))?;
                let orelse = match node.children.get(8) {
                    Some(suite) => self.suite(suite)?,
                    None => Vec::new(),
                };
                Ok(self.new_stmt(
                    pos,
                    StmtKind::For {
                        target,
                        iter,
                        body,
                        orelse,
                    },
                ))
            }
            Some(Symbol::TryStmt) => self.try_stmt(node),
            Some(Symbol::WithStmt) => {
                let mut items = Vec::new();
                for item in node.children.iter().filter(|child| child.is(Symbol::WithItem)) {
                    let context_expr = self.expr(item.child(0))?;
                    let optional_vars = match item.children.get(2) {
                        Some(target) => {
                            let mut target = self.expr(target)?;
                            self.set_context(&mut target, ExprContext::Store)?;
                            Some(target)
                        }
                        None => None,
                    };
                    items.push(WithItem {
                        context_expr,
                        optional_vars,
                    });
                }
                let body = self.suite(node.children.last().unwrap_or(node))?;
                Ok(self.new_stmt(pos, StmtKind::With { items, body }))
            }
            Some(Symbol::Funcdef) => self.funcdef(node, Vec::new()),
            Some(Symbol::Classdef) => self.classdef(node, Vec::new()),
            Some(Symbol::Decorated) => {
                let mut decorators = Vec::new();
                for decorator in &node.child(0).children {
                    decorators.push(self.decorator(decorator)?);
                }
                let definition = node.child(1);
                if definition.is(Symbol::Funcdef) {
                    self.funcdef(definition, decorators)
                } else {
                    self.classdef(definition, decorators)
                }
            }
            _ => Err(self.error(pos, "invalid syntax")),
        }
    }

    fn if_stmt(&mut self, node: &Node<'_>) -> CompileResult<Stmt> {
        // Arms are built in source order, then folded from the last one so
        // every `elif` becomes a nested `If` in the previous arm's `orelse`.
        let children = &node.children;
        let mut arms = Vec::new();
        let mut orelse = Vec::new();
        let mut index = 0;
        while index < children.len() {
            if children[index].is_text("else") {
                orelse = self.suite(&children[index + 2])?;
                break;
            }
            let test = self.expr(&children[index + 1])?;
            let body = self.suite(&children[index + 3])?;
            arms.push((children[index].start, test, body));
            index += 4;
        }

        while let Some((pos, test, body)) = arms.pop() {
            let stmt = self.new_stmt(pos, StmtKind::If { test, body, orelse });
            orelse = vec![stmt];
        }
        orelse
            .pop()
            .ok_or_else(|| self.error(node.start, "invalid syntax"))
    }

    fn try_stmt(&mut self, node: &Node<'_>) -> CompileResult<Stmt> {
        let children = &node.children;
        let body = self.suite(&children[2])?;
        let mut handlers: Vec<ExceptHandler> = Vec::new();
        let mut orelse = Vec::new();
        let mut finalbody = Vec::new();

        let mut index = 3;
        while index < children.len() {
            let child = &children[index];
            if child.is(Symbol::ExceptClause) {
                if let Some(previous) = handlers.last()
                    && previous.typ.is_none()
                {
                    return Err(self.error(previous.pos, "default 'except:' must be last"));
                }
                let typ = match child.children.get(1) {
                    Some(test) => Some(self.expr(test)?),
                    None => None,
                };
                let name = child.children.get(3).map(|name| name.value.to_string());
                if let Some(name) = &name {
                    self.check_forbidden(name, child.start)?;
                }
                let handler_body = self.suite(&children[index + 2])?;
                handlers.push(ExceptHandler {
                    pos: child.start,
                    typ,
                    name,
                    body: handler_body,
                });
            } else if child.is_text("else") {
                orelse = self.suite(&children[index + 2])?;
            } else if child.is_text("finally") {
                finalbody = self.suite(&children[index + 2])?;
            }
            index += 3;
        }

        Ok(self.new_stmt(
            node.start,
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
        ))
    }

    fn decorator(&mut self, node: &Node<'_>) -> CompileResult<Expr> {
        let dotted = node.child(1);
        let mut expr = {
            let first = dotted.child(0);
            self.name_expr(first.value, first.start)
        };
        for part in dotted.children.iter().skip(2).step_by(2) {
            expr = self.new_expr(
                part.start,
                ExprKind::Attribute {
                    value: Box::new(expr),
                    attr: part.value.to_string(),
                    ctx: ExprContext::Load,
                },
            );
        }
        if node.child(2).is_text("(") {
            let (args, keywords) = match node.children.get(3) {
                Some(arglist) if arglist.is(Symbol::Arglist) => self.arglist(arglist)?,
                _ => (Vec::new(), Vec::new()),
            };
            expr = self.new_expr(
                node.start,
                ExprKind::Call {
                    func: Box::new(expr),
                    args,
                    keywords,
                },
            );
        }
        Ok(expr)
    }

    fn funcdef(&mut self, node: &Node<'_>, decorators: Vec<Expr>) -> CompileResult<Stmt> {
        let name = node.child(1).value.to_string();
        self.check_forbidden(&name, node.child(1).start)?;
        let parameters = node.child(2);
        let args = match parameters.children.get(1) {
            Some(list) if list.is(Symbol::Typedargslist) => self.arguments(list)?,
            _ => Arguments::default(),
        };
        let returns = if node.child(3).is_text("->") {
            Some(Box::new(self.expr(node.child(4))?))
        } else {
            None
        };
        let body = self.scope_suite(node.children.last().unwrap_or(node))?;
        Ok(self.new_stmt(
            node.start,
            StmtKind::FunctionDef {
                name,
                args: Box::new(args),
                body,
                decorators,
                returns,
            },
        ))
    }

    fn classdef(&mut self, node: &Node<'_>, decorators: Vec<Expr>) -> CompileResult<Stmt> {
        let name = node.child(1).value.to_string();
        self.check_forbidden(&name, node.child(1).start)?;
        let (bases, keywords) = match node.children.get(3) {
            Some(arglist) if arglist.is(Symbol::Arglist) => self.arglist(arglist)?,
            _ => (Vec::new(), Vec::new()),
        };
        let body = self.scope_suite(node.children.last().unwrap_or(node))?;
        Ok(self.new_stmt(
            node.start,
            StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorators,
            },
        ))
    }

    /// `typedargslist` or `varargslist`.
    fn arguments(&mut self, node: &Node<'_>) -> CompileResult<Arguments> {
        let children = &node.children;
        let mut arguments = Arguments::default();
        let mut seen = FxHashSet::default();
        let mut after_star = false;
        let mut bare_star = None;
        let mut index = 0;

        while index < children.len() {
            let child = &children[index];
            if child.is(Symbol::Tfpdef) || child.is(Symbol::Vfpdef) {
                let arg = self.arg(child, &mut seen)?;
                let default = if children.get(index + 1).is_some_and(|next| next.is_text("=")) {
                    let value = self.expr(&children[index + 2])?;
                    index += 2;
                    Some(value)
                } else {
                    None
                };
                if after_star {
                    arguments.kwonlyargs.push(arg);
                    arguments.kw_defaults.push(default);
                    bare_star = None;
                } else {
                    match default {
                        Some(value) => arguments.defaults.push(value),
                        None if !arguments.defaults.is_empty() => {
                            return Err(self.error(
                                child.start,
                                "non-default argument follows default argument",
                            ));
                        }
                        None => {}
                    }
                    arguments.args.push(arg);
                }
                index += 1;
            } else if child.is_text("*") {
                after_star = true;
                match children.get(index + 1) {
                    Some(next) if next.is(Symbol::Tfpdef) || next.is(Symbol::Vfpdef) => {
                        arguments.vararg = Some(self.arg(next, &mut seen)?);
                        index += 2;
                    }
                    _ => {
                        bare_star = Some(child.start);
                        index += 1;
                    }
                }
            } else if child.is_text("**") {
                arguments.kwarg = Some(self.arg(&children[index + 1], &mut seen)?);
                index += 2;
            } else {
                index += 1;
            }
        }

        if let Some(pos) = bare_star {
            return Err(self.error(pos, "named arguments must follow bare *"));
        }
        Ok(arguments)
    }

    fn arg(&mut self, node: &Node<'_>, seen: &mut FxHashSet<String>) -> CompileResult<Arg> {
        let name_node = node.child(0);
        let name = name_node.value.to_string();
        self.check_forbidden(&name, name_node.start)?;
        if !seen.insert(name.clone()) {
            return Err(self.error(
                name_node.start,
                format!("duplicate argument '{name}' in function definition"),
            ));
        }
        let annotation = match node.children.get(2) {
            Some(annotation) => Some(self.expr(annotation)?),
            None => None,
        };
        Ok(Arg {
            name,
            annotation,
            pos: name_node.start,
        })
    }

    fn check_forbidden(&self, name: &str, pos: Pos) -> CompileResult<()> {
        if FORBIDDEN_NAMES.contains(&name) {
            return Err(self.error(pos, format!("cannot assign to {name}")));
        }
        Ok(())
    }

    // ----- expressions ------------------------------------------------------

    fn expr(&mut self, node: &Node<'_>) -> CompileResult<Expr> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(node.start, "too many nested expressions"));
        }
        self.depth += 1;
        let result = self.build_expr(node);
        self.depth -= 1;
        result
    }

    fn build_expr(&mut self, node: &Node<'_>) -> CompileResult<Expr> {
        let mut node = node;
        loop {
            let Some(symbol) = node.symbol() else {
                return Err(self.error(node.start, "invalid syntax"));
            };
            match symbol {
                Symbol::Test | Symbol::TestNocond => {
                    if node.children.len() == 1 {
                        node = node.child(0);
                        continue;
                    }
                    let body = self.expr(node.child(0))?;
                    let test = self.expr(node.child(2))?;
                    let orelse = self.expr(node.child(4))?;
                    return Ok(self.new_expr(
                        node.start,
                        ExprKind::IfExp {
                            test: Box::new(test),
                            body: Box::new(body),
                            orelse: Box::new(orelse),
                        },
                    ));
                }
                Symbol::Lambdef | Symbol::LambdefNocond => return self.lambdef(node),
                Symbol::OrTest | Symbol::AndTest => {
                    if node.children.len() == 1 {
                        node = node.child(0);
                        continue;
                    }
                    let op = if symbol == Symbol::OrTest {
                        BoolOp::Or
                    } else {
                        BoolOp::And
                    };
                    let mut values = Vec::new();
                    for operand in node.children.iter().step_by(2) {
                        values.push(self.expr(operand)?);
                    }
                    return Ok(self.new_expr(node.start, ExprKind::BoolOp { op, values }));
                }
                Symbol::NotTest => {
                    if node.children.len() == 1 {
                        node = node.child(0);
                        continue;
                    }
                    let operand = self.expr(node.child(1))?;
                    return Ok(self.new_expr(
                        node.start,
                        ExprKind::UnaryOp {
                            op: UnaryOp::Not,
                            operand: Box::new(operand),
                        },
                    ));
                }
                Symbol::Comparison => {
                    if node.children.len() == 1 {
                        node = node.child(0);
                        continue;
                    }
                    return self.comparison(node);
                }
                Symbol::StarExpr => {
                    let value = self.expr(node.child(1))?;
                    return Ok(self.new_expr(
                        node.start,
                        ExprKind::Starred {
                            value: Box::new(value),
                            ctx: ExprContext::Load,
                        },
                    ));
                }
                Symbol::Expr
                | Symbol::XorExpr
                | Symbol::AndExpr
                | Symbol::ShiftExpr
                | Symbol::ArithExpr
                | Symbol::Term => {
                    if node.children.len() == 1 {
                        node = node.child(0);
                        continue;
                    }
                    return self.binary_chain(node);
                }
                Symbol::Factor => {
                    if node.children.len() == 1 {
                        node = node.child(0);
                        continue;
                    }
                    let op = match node.child(0).value {
                        "+" => UnaryOp::UAdd,
                        "-" => UnaryOp::USub,
                        _ => UnaryOp::Invert,
                    };
                    let operand = self.expr(node.child(1))?;
                    return Ok(self.new_expr(
                        node.start,
                        ExprKind::UnaryOp {
                            op,
                            operand: Box::new(operand),
                        },
                    ));
                }
                Symbol::Power => {
                    if node.children.len() == 1 {
                        node = node.child(0);
                        continue;
                    }
                    let left = self.expr(node.child(0))?;
                    let right = self.expr(node.child(2))?;
                    return Ok(self.new_expr(
                        node.start,
                        ExprKind::BinOp {
                            left: Box::new(left),
                            op: Operator::Pow,
                            right: Box::new(right),
                        },
                    ));
                }
                Symbol::AtomExpr => {
                    if node.children.len() == 1 {
                        node = node.child(0);
                        continue;
                    }
                    return self.atom_expr(node);
                }
                Symbol::Atom => return self.atom(node),
                Symbol::Testlist
                | Symbol::TestlistStarExpr
                | Symbol::Exprlist
                | Symbol::TestlistComp => {
                    if node.children.len() == 1 {
                        node = node.child(0);
                        continue;
                    }
                    if node.children.get(1).is_some_and(|child| child.is(Symbol::CompFor)) {
                        return self.comprehension_expr(node);
                    }
                    let elts = self.expr_list_items(node)?;
                    return Ok(self.new_expr(
                        node.start,
                        ExprKind::Tuple {
                            elts,
                            ctx: ExprContext::Load,
                        },
                    ));
                }
                Symbol::YieldExpr => return self.yield_expr(node),
                _ => return Err(self.error(node.start, "invalid syntax")),
            }
        }
    }

    /// Elements of a comma-separated list node, skipping the commas.
    fn expr_list_items(&mut self, node: &Node<'_>) -> CompileResult<Vec<Expr>> {
        let mut items = Vec::new();
        for child in node.children.iter().filter(|child| !child.is_text(",")) {
            items.push(self.expr(child)?);
        }
        Ok(items)
    }

    fn comparison(&mut self, node: &Node<'_>) -> CompileResult<Expr> {
        let left = self.expr(node.child(0))?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        for pair in node.children[1..].chunks(2) {
            let op_node = &pair[0];
            let first = op_node.child(0).value;
            let second = op_node.children.get(1).map(|child| child.value);
            let op = match (first, second) {
                ("<", _) => CmpOp::Lt,
                (">", _) => CmpOp::Gt,
                ("==", _) => CmpOp::Eq,
                (">=", _) => CmpOp::GtE,
                ("<=", _) => CmpOp::LtE,
                ("!=", _) => CmpOp::NotEq,
                ("in", _) => CmpOp::In,
                ("not", _) => CmpOp::NotIn,
                ("is", Some("not")) => CmpOp::IsNot,
                ("is", _) => CmpOp::Is,
                _ => return Err(self.error(op_node.start, "invalid comparison")),
            };
            ops.push(op);
            comparators.push(self.expr(&pair[1])?);
        }
        Ok(self.new_expr(
            node.start,
            ExprKind::Compare {
                left: Box::new(left),
                ops,
                comparators,
            },
        ))
    }

    fn binary_chain(&mut self, node: &Node<'_>) -> CompileResult<Expr> {
        let mut left = self.expr(node.child(0))?;
        for pair in node.children[1..].chunks(2) {
            let op = Operator::from_symbol(pair[0].value)
                .ok_or_else(|| self.error(pair[0].start, "invalid syntax"))?;
            let right = self.expr(&pair[1])?;
            left = self.new_expr(
                node.start,
                ExprKind::BinOp {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
            );
        }
        Ok(left)
    }

    fn lambdef(&mut self, node: &Node<'_>) -> CompileResult<Expr> {
        let args = if node.child(1).is(Symbol::Varargslist) {
            self.arguments(node.child(1))?
        } else {
            Arguments::default()
        };
        let saved = std::mem::replace(&mut self.loop_depth, 0);
        let body = self.expr(node.children.last().unwrap_or(node));
        self.loop_depth = saved;
        let body = body?;
        Ok(self.new_expr(
            node.start,
            ExprKind::Lambda {
                args: Box::new(args),
                body: Box::new(body),
            },
        ))
    }

    fn yield_expr(&mut self, node: &Node<'_>) -> CompileResult<Expr> {
        let kind = match node.children.get(1) {
            None => ExprKind::Yield(None),
            Some(arg) if arg.child(0).is_text("from") => {
                ExprKind::YieldFrom(Box::new(self.expr(arg.child(1))?))
            }
            Some(arg) => ExprKind::Yield(Some(Box::new(self.expr(arg.child(0))?))),
        };
        Ok(self.new_expr(node.start, kind))
    }

    fn atom_expr(&mut self, node: &Node<'_>) -> CompileResult<Expr> {
        let mut expr = self.atom(node.child(0))?;
        for trailer in &node.children[1..] {
            let pos = trailer.start;
            let opener = trailer.child(0);
            expr = if opener.is_text("(") {
                let (args, keywords) = match trailer.children.get(1) {
                    Some(arglist) if arglist.is(Symbol::Arglist) => self.arglist(arglist)?,
                    _ => (Vec::new(), Vec::new()),
                };
                self.new_expr(
                    pos,
                    ExprKind::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    },
                )
            } else if opener.is_text("[") {
                let slice = self.subscriptlist(trailer.child(1))?;
                self.new_expr(
                    pos,
                    ExprKind::Subscript {
                        value: Box::new(expr),
                        slice: Box::new(slice),
                        ctx: ExprContext::Load,
                    },
                )
            } else {
                self.new_expr(
                    pos,
                    ExprKind::Attribute {
                        value: Box::new(expr),
                        attr: trailer.child(1).value.to_string(),
                        ctx: ExprContext::Load,
                    },
                )
            };
        }
        Ok(expr)
    }

    fn name_expr(&mut self, name: &str, pos: Pos) -> Expr {
        let kind = match name {
            "None" => ExprKind::NameConstant(Constant::None),
            "True" => ExprKind::NameConstant(Constant::True),
            "False" => ExprKind::NameConstant(Constant::False),
            _ => ExprKind::Name {
                name: name.to_string(),
                ctx: ExprContext::Load,
            },
        };
        self.new_expr(pos, kind)
    }

    fn atom(&mut self, node: &Node<'_>) -> CompileResult<Expr> {
        let pos = node.start;
        let first = node.child(0);
        if first.is_token(TokenKind::Name) {
            return Ok(self.name_expr(first.value, pos));
        }
        if first.is_token(TokenKind::Number) {
            let number = parse_number(first.value).map_err(|message| self.error(pos, message))?;
            return Ok(self.new_expr(pos, ExprKind::Num(number)));
        }
        if first.is_token(TokenKind::String) {
            let mut value = String::new();
            for piece in &node.children {
                let decoded = parse_string(piece.value).map_err(|message| self.error(piece.start, message))?;
                value.push_str(&decoded);
            }
            return Ok(self.new_expr(pos, ExprKind::Str(value)));
        }
        if first.is_text("...") {
            return Ok(self.new_expr(pos, ExprKind::Ellipsis));
        }

        let inner = node.children.get(1).filter(|child| child.symbol().is_some());
        match first.value {
            "(" => match inner {
                None => Ok(self.new_expr(
                    pos,
                    ExprKind::Tuple {
                        elts: Vec::new(),
                        ctx: ExprContext::Load,
                    },
                )),
                Some(inner) if inner.is(Symbol::YieldExpr) => self.yield_expr(inner),
                Some(inner) => {
                    if inner.children.get(1).is_some_and(|child| child.is(Symbol::CompFor)) {
                        return self.comprehension_expr(inner);
                    }
                    let mut expr = self.expr(inner)?;
                    if matches!(expr.kind, ExprKind::Tuple { .. }) {
                        expr.pos = pos;
                    }
                    Ok(expr)
                }
            },
            "[" => match inner {
                None => Ok(self.new_expr(
                    pos,
                    ExprKind::List {
                        elts: Vec::new(),
                        ctx: ExprContext::Load,
                    },
                )),
                Some(inner) => {
                    if inner.children.get(1).is_some_and(|child| child.is(Symbol::CompFor)) {
                        let elt = self.expr(inner.child(0))?;
                        let generators = self.comprehensions(inner.child(1))?;
                        return Ok(self.new_expr(
                            pos,
                            ExprKind::ListComp {
                                elt: Box::new(elt),
                                generators,
                            },
                        ));
                    }
                    let elts = self.expr_list_items(inner)?;
                    Ok(self.new_expr(
                        pos,
                        ExprKind::List {
                            elts,
                            ctx: ExprContext::Load,
                        },
                    ))
                }
            },
            "{" => match inner {
                None => Ok(self.new_expr(
                    pos,
                    ExprKind::Dict {
                        keys: Vec::new(),
                        values: Vec::new(),
                    },
                )),
                Some(inner) => self.dictorsetmaker(inner, pos),
            },
            _ => Err(self.error(pos, "invalid syntax")),
        }
    }

    /// A parenthesized or call-argument generator expression.
    fn comprehension_expr(&mut self, node: &Node<'_>) -> CompileResult<Expr> {
        let elt = self.expr(node.child(0))?;
        let generators = self.comprehensions(node.child(1))?;
        Ok(self.new_expr(
            node.start,
            ExprKind::GeneratorExp {
                elt: Box::new(elt),
                generators,
            },
        ))
    }

    fn dictorsetmaker(&mut self, node: &Node<'_>, pos: Pos) -> CompileResult<Expr> {
        let children = &node.children;
        let is_dict = children[0].is_text("**") || children.get(1).is_some_and(|child| child.is_text(":"));

        if !is_dict {
            if children.get(1).is_some_and(|child| child.is(Symbol::CompFor)) {
                let elt = self.expr(&children[0])?;
                let generators = self.comprehensions(&children[1])?;
                return Ok(self.new_expr(
                    pos,
                    ExprKind::SetComp {
                        elt: Box::new(elt),
                        generators,
                    },
                ));
            }
            let elts = self.expr_list_items(node)?;
            return Ok(self.new_expr(pos, ExprKind::Set(elts)));
        }

        if children.get(3).is_some_and(|child| child.is(Symbol::CompFor)) {
            let key = self.expr(&children[0])?;
            let value = self.expr(&children[2])?;
            let generators = self.comprehensions(&children[3])?;
            return Ok(self.new_expr(
                pos,
                ExprKind::DictComp {
                    key: Box::new(key),
                    value: Box::new(value),
                    generators,
                },
            ));
        }

        let mut keys = Vec::new();
        let mut values = Vec::new();
        let mut index = 0;
        while index < children.len() {
            if children[index].is_text("**") {
                keys.push(None);
                values.push(self.expr(&children[index + 1])?);
                index += 3;
            } else {
                keys.push(Some(self.expr(&children[index])?));
                values.push(self.expr(&children[index + 2])?);
                index += 4;
            }
        }
        Ok(self.new_expr(pos, ExprKind::Dict { keys, values }))
    }

    fn comprehensions(&mut self, comp_for: &Node<'_>) -> CompileResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        let mut current = Some(comp_for);
        while let Some(node) = current.take() {
            let mut target = self.expr(node.child(1))?;
            self.set_context(&mut target, ExprContext::Store)?;
            let iter = self.expr(node.child(3))?;
            let mut ifs = Vec::new();

            let mut next = node.children.get(4);
            while let Some(comp_iter) = next {
                let inner = comp_iter.child(0);
                if inner.is(Symbol::CompFor) {
                    current = Some(inner);
                    break;
                }
                ifs.push(self.expr(inner.child(1))?);
                next = inner.children.get(2);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn subscriptlist(&mut self, node: &Node<'_>) -> CompileResult<Slice> {
        let subscripts = node
            .children
            .iter()
            .filter(|child| child.is(Symbol::Subscript))
            .collect::<Vec<_>>();
        let trailing_comma = node.children.last().is_some_and(|child| child.is_text(","));

        if subscripts.len() == 1 && !trailing_comma {
            return self.subscript(subscripts[0]);
        }

        let mut slices = Vec::with_capacity(subscripts.len());
        for subscript in &subscripts {
            slices.push(self.subscript(subscript)?);
        }
        if slices.iter().all(|slice| matches!(slice, Slice::Index(_))) {
            let elts = slices
                .into_iter()
                .filter_map(|slice| match slice {
                    Slice::Index(expr) => Some(expr),
                    _ => None,
                })
                .collect();
            let tuple = self.new_expr(
                node.start,
                ExprKind::Tuple {
                    elts,
                    ctx: ExprContext::Load,
                },
            );
            return Ok(Slice::Index(tuple));
        }
        Ok(Slice::ExtSlice(slices))
    }

    fn subscript(&mut self, node: &Node<'_>) -> CompileResult<Slice> {
        let children = &node.children;
        if children.len() == 1 && children[0].is(Symbol::Test) {
            return Ok(Slice::Index(self.expr(&children[0])?));
        }
        let mut index = 0;
        let mut lower = None;
        let mut upper = None;
        let mut step = None;
        if children[0].is(Symbol::Test) {
            lower = Some(self.expr(&children[0])?);
            index = 1;
        }
        // children[index] is ':'
        index += 1;
        if let Some(child) = children.get(index)
            && child.is(Symbol::Test)
        {
            upper = Some(self.expr(child)?);
            index += 1;
        }
        if let Some(sliceop) = children.get(index)
            && let Some(value) = sliceop.children.get(1)
        {
            step = Some(self.expr(value)?);
        }
        Ok(Slice::Slice { lower, upper, step })
    }

    fn arglist(&mut self, node: &Node<'_>) -> CompileResult<(Vec<Expr>, Vec<Keyword>)> {
        let arguments = node
            .children
            .iter()
            .filter(|child| child.is(Symbol::Argument))
            .collect::<Vec<_>>();
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();
        let mut seen_keyword = false;
        let mut seen_kw_unpack = false;

        for argument in &arguments {
            let children = &argument.children;
            if children.len() == 1 {
                if seen_kw_unpack {
                    return Err(self.error(
                        argument.start,
                        "positional argument follows keyword argument unpacking",
                    ));
                }
                if seen_keyword {
                    return Err(self.error(argument.start, "positional argument follows keyword argument"));
                }
                args.push(self.expr(&children[0])?);
            } else if children[0].is_text("*") {
                if seen_kw_unpack {
                    return Err(self.error(
                        argument.start,
                        "iterable argument unpacking follows keyword argument unpacking",
                    ));
                }
                let value = self.expr(&children[1])?;
                args.push(self.new_expr(
                    argument.start,
                    ExprKind::Starred {
                        value: Box::new(value),
                        ctx: ExprContext::Load,
                    },
                ));
            } else if children[0].is_text("**") {
                seen_kw_unpack = true;
                keywords.push(Keyword {
                    arg: None,
                    value: self.expr(&children[1])?,
                });
            } else if children[1].is(Symbol::CompFor) {
                if arguments.len() > 1 {
                    return Err(self.error(argument.start, "Generator expression must be parenthesized"));
                }
                args.push(self.comprehension_expr(argument)?);
            } else {
                let key = self.expr(&children[0])?;
                let ExprKind::Name { name, .. } = key.kind else {
                    return Err(self.error(key.pos, "keyword can't be an expression"));
                };
                self.check_forbidden(&name, key.pos)?;
                if keywords.iter().any(|keyword| keyword.arg.as_deref() == Some(name.as_str())) {
                    return Err(self.error(key.pos, "keyword argument repeated"));
                }
                seen_keyword = true;
                keywords.push(Keyword {
                    arg: Some(name),
                    value: self.expr(&children[2])?,
                });
            }
        }
        Ok((args, keywords))
    }

    // ----- context ----------------------------------------------------------

    /// Marks `expr` as a binding (or deletion) target.
    fn set_context(&self, expr: &mut Expr, ctx: ExprContext) -> CompileResult<()> {
        let pos = expr.pos;
        let description = expr.describe();
        let verb = if ctx == ExprContext::Del {
            "delete"
        } else {
            "assign to"
        };
        match &mut expr.kind {
            ExprKind::Name { name, ctx: slot } => {
                if FORBIDDEN_NAMES.contains(&name.as_str()) {
                    return Err(self.error(pos, format!("cannot {verb} {name}")));
                }
                *slot = ctx;
            }
            ExprKind::Attribute { ctx: slot, .. } | ExprKind::Subscript { ctx: slot, .. } => {
                *slot = ctx;
            }
            ExprKind::Starred { value, ctx: slot } => {
                if ctx == ExprContext::Del {
                    return Err(self.error(pos, "can't use starred expression here"));
                }
                *slot = ctx;
                self.set_context(value, ctx)?;
            }
            ExprKind::List { elts, ctx: slot } | ExprKind::Tuple { elts, ctx: slot } => {
                if ctx == ExprContext::AugStore {
                    return Err(self.error(
                        pos,
                        format!("illegal expression for augmented assignment ({description})"),
                    ));
                }
                *slot = ctx;
                for elt in elts {
                    self.set_context(elt, ctx)?;
                }
            }
            _ => {
                let verb = if ctx == ExprContext::Del {
                    "can't delete"
                } else {
                    "can't assign to"
                };
                return Err(self.error(pos, format!("{verb} {description}")));
            }
        }
        Ok(())
    }
}

fn dotted_name(node: &Node<'_>) -> String {
    node.children
        .iter()
        .map(|child| child.value)
        .collect::<String>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::dump;
    use crate::error::CompileErrorKind;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn module(source: &str) -> Mod {
        build_source(source, "<test>", Mode::Exec).expect("source should build")
    }

    fn syntax_error(source: &str) -> CompileError {
        build_source(source, "<test>", Mode::Exec).expect_err("source should be rejected")
    }

    #[test]
    fn dumps_assignment_and_call() {
        let tree = module("x = 1\nprint(x, sep='')\n");
        assert_eq!(
            dump(&tree),
            "Module(body=[Assign(targets=[Name(id='x', ctx=Store())], value=Num(n=1)), \
             Expr(value=Call(func=Name(id='print', ctx=Load()), args=[Name(id='x', ctx=Load())], \
             keywords=[keyword(arg='sep', value=Str(s=''))]))])"
        );
    }

    #[test]
    fn dump_is_stable_across_builds() {
        let source = indoc! {"
            class C(A, B):
                def m(self, *args, k=1, **kw):
                    return [x * 2 for x in args if x]
            @decorate
            def f(a, b=2):
                yield from g(a)
        "};
        assert_eq!(dump(&module(source)), dump(&module(source)));
    }

    #[test]
    fn elif_chains_nest_in_orelse() {
        let tree = module("if a:\n    x\nelif b:\n    y\nelse:\n    z\n");
        let Mod::Module { body } = tree else {
            panic!("expected module");
        };
        let StmtKind::If { orelse, .. } = &body[0].kind else {
            panic!("expected if");
        };
        assert!(matches!(&orelse[0].kind, StmtKind::If { orelse, .. } if orelse.len() == 1));
    }

    #[test]
    fn comprehension_desugars_into_generators() {
        let tree = module("r = [x for y in z for x in y if x if not x]\n");
        let text = dump(&tree);
        assert!(text.contains("generators=[comprehension(target=Name(id='y', ctx=Store())"));
        assert!(text.contains("ifs=[Name(id='x', ctx=Load()), UnaryOp(op=Not()"));
    }

    #[test]
    fn adjacent_strings_concatenate() {
        let text = dump(&module("s = 'a' \"b\" '''c'''\n"));
        assert!(text.contains("value=Str(s='abc')"));
    }

    #[test]
    fn slices_and_tuple_indexes() {
        let text = dump(&module("a[1:2, ::3]\nb[1, 2]\nc[::]\n"));
        assert!(text.contains("ExtSlice(dims=[Slice(lower=Num(n=1), upper=Num(n=2), step=None)"));
        assert!(text.contains("Index(value=Tuple(elts=[Num(n=1), Num(n=2)]"));
        assert!(text.contains("Slice(lower=None, upper=None, step=None)"));
    }

    #[test]
    fn rejects_illegal_targets() {
        for (source, message) in [
            ("1 = x\n", "can't assign to literal"),
            ("f() = 1\n", "can't assign to function call"),
            ("a < b = 1\n", "can't assign to comparison"),
            ("None = 1\n", "can't assign to keyword"),
            ("__debug__ = 1\n", "cannot assign to __debug__"),
            ("del f()\n", "can't delete function call"),
            ("(a, b) += 1\n", "illegal expression for augmented assignment"),
            ("for 1 in x: pass\n", "can't assign to literal"),
            ("lambda: 1 = 2\n", "can't assign to lambda"),
        ] {
            let err = syntax_error(source);
            assert_eq!(err.kind, CompileErrorKind::Syntax, "{source}");
            assert!(err.message.contains(message), "{source}: {}", err.message);
        }
    }

    #[test]
    fn rejects_bad_parameter_lists() {
        assert!(syntax_error("def f(a, a): pass\n").message.contains("duplicate argument 'a'"));
        assert!(syntax_error("def f(a=1, b): pass\n").message.contains("non-default argument"));
        assert!(syntax_error("def f(*): pass\n").message.contains("named arguments must follow bare *"));
    }

    #[test]
    fn rejects_bad_call_arguments() {
        assert!(syntax_error("f(a=1, a=2)\n").message.contains("keyword argument repeated"));
        assert!(syntax_error("f(a=1, 2)\n").message.contains("positional argument follows keyword"));
        assert!(syntax_error("f(x for x in y, 1)\n").message.contains("must be parenthesized"));
    }

    #[test]
    fn break_and_continue_need_a_loop() {
        assert!(syntax_error("break\n").message.contains("'break' outside loop"));
        let source = indoc! {"
            while x:
                def f():
                    continue
        "};
        assert!(syntax_error(source).message.contains("'continue' not properly in loop"));
        module("for x in y:\n    if x:\n        break\n    continue\n");
    }

    #[test]
    fn relative_imports_count_dots() {
        let text = dump(&module("from ...pkg.sub import a as b, c\nfrom . import *\n"));
        assert!(text.contains(
            "ImportFrom(module='pkg.sub', names=[alias(name='a', asname='b'), alias(name='c', asname=None)], level=3)"
        ));
        assert!(text.contains("ImportFrom(module=None, names=[alias(name='*', asname=None)], level=1)"));
    }

    #[test]
    fn starred_assignment_target() {
        let text = dump(&module("a, *b = c\n"));
        assert!(text.contains(
            "targets=[Tuple(elts=[Name(id='a', ctx=Store()), Starred(value=Name(id='b', ctx=Store()), ctx=Store())], ctx=Store())]"
        ));
    }
}
