//! Scope analysis.
//!
//! `SymbolTable::build` walks a module twice. The collect pass records a
//! flag set per name in every lexical scope; the resolve pass then runs
//! bottom-up over the scope tree and gives every name exactly one
//! `NameScope`. Scopes are keyed by the `NodeId` of the statement or
//! expression that opens them (`MODULE_ID` for the module itself).

use std::collections::BTreeSet;

use log::trace;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::{
    Arguments, Comprehension, ExceptHandler, Expr, ExprContext, ExprKind, Keyword, MAX_NESTING,
    MODULE_ID, Mod, NodeId, Slice, Stmt, StmtKind,
};
use crate::error::{CompileError, CompileResult};
use crate::lexer::Pos;

pub const DEF_LOCAL: u16 = 1;
pub const DEF_PARAM: u16 = 1 << 1;
pub const DEF_GLOBAL: u16 = 1 << 2;
pub const DEF_NONLOCAL: u16 = 1 << 3;
pub const USE: u16 = 1 << 4;
pub const DEF_IMPORT: u16 = 1 << 5;
pub const DEF_STAR: u16 = 1 << 6;
pub const DEF_DOUBLESTAR: u16 = 1 << 7;
/// A class-local name that a nested scope also captures from outside.
pub const DEF_FREE_CLASS: u16 = 1 << 8;

const DEF_BOUND: u16 = DEF_LOCAL | DEF_PARAM | DEF_IMPORT;

/// Name of the implicit cell a class body provides for zero-argument `super()`.
pub const CLASS_CELL: &str = "__class__";

/// Name of the implicit parameter that carries the outermost iterator into a
/// comprehension scope.
pub const COMPREHENSION_ARG: &str = ".0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Module,
    Class,
    /// Functions, lambdas and comprehensions.
    Function,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameScope {
    Local,
    GlobalImplicit,
    GlobalExplicit,
    Free,
    Cell,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub flags: u16,
    pub scope: NameScope,
}

impl Symbol {
    pub fn is(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub id: NodeId,
    pub name: String,
    pub kind: ScopeKind,
    pub symbols: FxHashMap<String, Symbol>,
    /// Names in the order they were first seen.
    order: Vec<String>,
    /// Parameters in signature order: positional, keyword-only, `*`, `**`.
    pub params: Vec<String>,
    pub children: Vec<NodeId>,
    pub is_generator: bool,
    /// Set on class scopes whose methods refer to `__class__` or `super`.
    pub needs_class_cell: bool,
    return_with_value: Option<Pos>,
    first_yield: Option<Pos>,
    declarations: FxHashMap<String, Pos>,
}

impl Scope {
    fn new(id: NodeId, name: impl Into<String>, kind: ScopeKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            symbols: FxHashMap::default(),
            order: Vec::new(),
            params: Vec::new(),
            children: Vec::new(),
            is_generator: false,
            needs_class_cell: false,
            return_with_value: None,
            first_yield: None,
            declarations: FxHashMap::default(),
        }
    }

    /// Final classification of `name`. Names the scope never mentions are
    /// implicit globals.
    pub fn lookup(&self, name: &str) -> NameScope {
        self.symbols
            .get(name)
            .map_or(NameScope::GlobalImplicit, |symbol| symbol.scope)
    }

    pub fn flags(&self, name: &str) -> u16 {
        self.symbols.get(name).map_or(0, |symbol| symbol.flags)
    }

    /// Local slot names for a function scope: parameters first, then every
    /// other name classified `Local` in first-seen order.
    pub fn varnames(&self) -> Vec<String> {
        let mut names = self.params.clone();
        if self.kind != ScopeKind::Function {
            return names;
        }
        for name in &self.order {
            if self.lookup(name) == NameScope::Local && !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Sorted names that need a cell in this scope.
    pub fn cellvars(&self) -> Vec<String> {
        let mut names = self
            .symbols
            .iter()
            .filter(|(_, symbol)| symbol.scope == NameScope::Cell)
            .map(|(name, _)| name.clone())
            .collect::<BTreeSet<_>>();
        if self.needs_class_cell {
            names.insert(CLASS_CELL.to_string());
        }
        names.into_iter().collect()
    }

    /// Sorted names captured from enclosing function scopes.
    pub fn freevars(&self) -> Vec<String> {
        self.symbols
            .iter()
            .filter(|(_, symbol)| symbol.scope == NameScope::Free || symbol.is(DEF_FREE_CLASS))
            .map(|(name, _)| name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn add(&mut self, name: &str, flag: u16) {
        match self.symbols.get_mut(name) {
            Some(symbol) => symbol.flags |= flag,
            None => {
                self.order.push(name.to_string());
                self.symbols.insert(
                    name.to_string(),
                    Symbol {
                        flags: flag,
                        scope: NameScope::GlobalImplicit,
                    },
                );
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    scopes: FxHashMap<NodeId, Scope>,
}

impl SymbolTable {
    pub fn build(module: &Mod, filename: &str) -> CompileResult<Self> {
        let mut collector = Collector {
            filename,
            scopes: FxHashMap::default(),
            stack: vec![Scope::new(MODULE_ID, "top", ScopeKind::Module)],
            depth: 0,
        };
        match module {
            Mod::Module { body } | Mod::Interactive { body } => collector.stmts(body)?,
            Mod::Expression { body } => collector.expr(body)?,
        }
        let root = collector
            .stack
            .pop()
            .expect("module scope stays on the collector stack");
        collector.scopes.insert(MODULE_ID, root);

        let mut table = Self {
            scopes: collector.scopes,
        };
        table.analyze(MODULE_ID, &FxHashSet::default(), filename)?;
        trace!("analyzed {} scopes in {filename}", table.scopes.len());
        Ok(table)
    }

    pub fn scope(&self, id: NodeId) -> &Scope {
        self.scopes
            .get(&id)
            .unwrap_or_else(|| panic!("no scope recorded for node {id}"))
    }

    pub fn module(&self) -> &Scope {
        self.scope(MODULE_ID)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Resolves `id` and its descendants. Returns the names that are free in
    /// this scope, for the parent to bind or pass through.
    fn analyze(
        &mut self,
        id: NodeId,
        bound: &FxHashSet<String>,
        filename: &str,
    ) -> CompileResult<FxHashSet<String>> {
        let mut scope = self
            .scopes
            .remove(&id)
            .expect("every child id has a recorded scope");

        let mut local = FxHashSet::default();
        let mut free = FxHashSet::default();
        let mut declared_global = FxHashSet::default();

        for name in scope.order.clone() {
            let flags = scope.flags(&name);
            let resolved = if flags & DEF_GLOBAL != 0 {
                declared_global.insert(name.clone());
                NameScope::GlobalExplicit
            } else if flags & DEF_NONLOCAL != 0 {
                if !bound.contains(&name) {
                    return Err(CompileError::syntax(
                        format!("no binding for nonlocal '{name}' found"),
                        filename,
                        scope.declarations.get(&name).copied().unwrap_or(Pos::new(1, 0)),
                    ));
                }
                free.insert(name.clone());
                NameScope::Free
            } else if flags & DEF_BOUND != 0 {
                local.insert(name.clone());
                NameScope::Local
            } else if scope.kind != ScopeKind::Module && bound.contains(&name) {
                free.insert(name.clone());
                NameScope::Free
            } else {
                // Module bindings and names an enclosing scope declared
                // `global` both land here.
                NameScope::GlobalImplicit
            };
            if let Some(symbol) = scope.symbols.get_mut(&name) {
                symbol.scope = resolved;
            }
        }

        // What nested scopes may capture from here. Class bodies do not
        // provide bindings, but they do provide the implicit `__class__`.
        let mut new_bound = bound.clone();
        match scope.kind {
            ScopeKind::Function => new_bound.extend(local.iter().cloned()),
            ScopeKind::Class => {
                new_bound.insert(CLASS_CELL.to_string());
            }
            ScopeKind::Module => {}
        }
        for name in &declared_global {
            new_bound.remove(name);
        }

        let mut child_free = FxHashSet::default();
        for child in scope.children.clone() {
            let names = self.analyze(child, &new_bound, filename)?;
            child_free.extend(names);
        }

        match scope.kind {
            ScopeKind::Function => {
                for name in &local {
                    if child_free.remove(name)
                        && let Some(symbol) = scope.symbols.get_mut(name)
                    {
                        symbol.scope = NameScope::Cell;
                    }
                }
            }
            ScopeKind::Class => {
                if child_free.remove(CLASS_CELL) {
                    scope.needs_class_cell = true;
                }
            }
            ScopeKind::Module => {}
        }

        // Names free in children pass through this scope on their way to
        // the function that binds them.
        for name in child_free {
            match scope.symbols.get_mut(&name) {
                Some(symbol) => {
                    if scope.kind == ScopeKind::Class && symbol.scope == NameScope::Local {
                        symbol.flags |= DEF_FREE_CLASS;
                        free.insert(name);
                    } else if symbol.scope == NameScope::Free {
                        free.insert(name);
                    } else if scope.kind != ScopeKind::Module
                        && matches!(symbol.scope, NameScope::GlobalImplicit)
                        && bound.contains(&name)
                    {
                        symbol.scope = NameScope::Free;
                        free.insert(name);
                    }
                }
                None if bound.contains(&name) && scope.kind != ScopeKind::Module => {
                    scope.order.push(name.clone());
                    scope.symbols.insert(
                        name.clone(),
                        Symbol {
                            flags: 0,
                            scope: NameScope::Free,
                        },
                    );
                    free.insert(name);
                }
                None => {}
            }
        }

        if scope.is_generator
            && let Some(pos) = scope.return_with_value
        {
            return Err(CompileError::syntax(
                "'return' with value in generator",
                filename,
                pos,
            ));
        }

        self.scopes.insert(id, scope);
        Ok(free)
    }
}

struct Collector<'f> {
    filename: &'f str,
    scopes: FxHashMap<NodeId, Scope>,
    stack: Vec<Scope>,
    depth: usize,
}

impl Collector<'_> {
    fn error(&self, pos: Pos, message: impl Into<String>) -> CompileError {
        CompileError::syntax(message, self.filename, pos)
    }

    fn current(&mut self) -> &mut Scope {
        self.stack
            .last_mut()
            .expect("collector always has an open scope")
    }

    fn add(&mut self, name: &str, flag: u16, pos: Pos) -> CompileResult<()> {
        let scope = self.current();
        let existing = scope.flags(name);
        if flag & DEF_PARAM != 0 && existing & DEF_PARAM != 0 {
            return Err(self.error(
                pos,
                format!("duplicate argument '{name}' in function definition"),
            ));
        }
        self.current().add(name, flag);
        if name == "super" && flag == USE && self.current().kind == ScopeKind::Function {
            self.current().add(CLASS_CELL, USE);
        }
        Ok(())
    }

    fn enter(&mut self, id: NodeId, name: &str, kind: ScopeKind) {
        self.current().children.push(id);
        self.stack.push(Scope::new(id, name, kind));
    }

    fn leave(&mut self) {
        let scope = self
            .stack
            .pop()
            .expect("leave pairs with a previous enter");
        self.scopes.insert(scope.id, scope);
    }

    fn stmts(&mut self, body: &[Stmt]) -> CompileResult<()> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        let pos = stmt.pos;
        match &stmt.kind {
            StmtKind::FunctionDef {
                name,
                args,
                body,
                decorators,
                returns,
            } => {
                self.add(name, DEF_LOCAL, pos)?;
                self.exprs(decorators)?;
                self.argument_defaults(args)?;
                self.argument_annotations(args)?;
                if let Some(returns) = returns {
                    self.expr(returns)?;
                }
                self.enter(stmt.id, name, ScopeKind::Function);
                self.parameters(args)?;
                self.stmts(body)?;
                self.leave();
            }
            StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorators,
            } => {
                self.add(name, DEF_LOCAL, pos)?;
                self.exprs(decorators)?;
                self.exprs(bases)?;
                self.keywords(keywords)?;
                self.enter(stmt.id, name, ScopeKind::Class);
                self.stmts(body)?;
                self.leave();
            }
            StmtKind::Return(value) => {
                if self.current().kind != ScopeKind::Function {
                    return Err(self.error(pos, "'return' outside function"));
                }
                if let Some(value) = value {
                    if self.current().return_with_value.is_none() {
                        self.current().return_with_value = Some(pos);
                    }
                    self.expr(value)?;
                }
            }
            StmtKind::Delete(targets) => self.exprs(targets)?,
            StmtKind::Assign { targets, value } => {
                self.exprs(targets)?;
                self.expr(value)?;
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.expr(target)?;
                self.expr(value)?;
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => {
                self.expr(target)?;
                self.expr(annotation)?;
                if let Some(value) = value {
                    self.expr(value)?;
                }
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.expr(target)?;
                self.expr(iter)?;
                self.stmts(body)?;
                self.stmts(orelse)?;
            }
            StmtKind::While { test, body, orelse } | StmtKind::If { test, body, orelse } => {
                self.expr(test)?;
                self.stmts(body)?;
                self.stmts(orelse)?;
            }
            StmtKind::With { items, body } => {
                for item in items {
                    self.expr(&item.context_expr)?;
                    if let Some(target) = &item.optional_vars {
                        self.expr(target)?;
                    }
                }
                self.stmts(body)?;
            }
            StmtKind::Raise { exc, cause } => {
                if let Some(exc) = exc {
                    self.expr(exc)?;
                }
                if let Some(cause) = cause {
                    self.expr(cause)?;
                }
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.stmts(body)?;
                for handler in handlers {
                    self.handler(handler)?;
                }
                self.stmts(orelse)?;
                self.stmts(finalbody)?;
            }
            StmtKind::Assert { test, msg } => {
                self.expr(test)?;
                if let Some(msg) = msg {
                    self.expr(msg)?;
                }
            }
            StmtKind::Import(names) => {
                for alias in names {
                    let bound = match &alias.asname {
                        Some(asname) => asname.as_str(),
                        None => alias.name.split('.').next().unwrap_or(&alias.name),
                    };
                    self.add(bound, DEF_IMPORT, pos)?;
                }
            }
            StmtKind::ImportFrom { names, .. } => {
                for alias in names {
                    if alias.name == "*" {
                        if self.current().kind != ScopeKind::Module {
                            return Err(self.error(pos, "import * only allowed at module level"));
                        }
                        continue;
                    }
                    let bound = alias.asname.as_deref().unwrap_or(&alias.name);
                    self.add(bound, DEF_IMPORT, pos)?;
                }
            }
            StmtKind::Global(names) => {
                for name in names {
                    let flags = self.current().flags(name);
                    if flags & DEF_PARAM != 0 {
                        return Err(self.error(pos, format!("name '{name}' is parameter and global")));
                    }
                    if flags & DEF_NONLOCAL != 0 {
                        return Err(self.error(pos, format!("name '{name}' is nonlocal and global")));
                    }
                    if flags & DEF_LOCAL != 0 {
                        return Err(self.error(
                            pos,
                            format!("name '{name}' is assigned to before global declaration"),
                        ));
                    }
                    if flags & USE != 0 {
                        return Err(self.error(
                            pos,
                            format!("name '{name}' is used prior to global declaration"),
                        ));
                    }
                    self.current().add(name, DEF_GLOBAL);
                }
            }
            StmtKind::Nonlocal(names) => {
                if self.current().kind == ScopeKind::Module {
                    return Err(self.error(pos, "nonlocal declaration not allowed at module level"));
                }
                for name in names {
                    let flags = self.current().flags(name);
                    if flags & DEF_PARAM != 0 {
                        return Err(self.error(pos, format!("name '{name}' is parameter and nonlocal")));
                    }
                    if flags & DEF_GLOBAL != 0 {
                        return Err(self.error(pos, format!("name '{name}' is nonlocal and global")));
                    }
                    if flags & (DEF_LOCAL | USE) != 0 {
                        return Err(self.error(
                            pos,
                            format!("name '{name}' is assigned to before nonlocal declaration"),
                        ));
                    }
                    self.current().add(name, DEF_NONLOCAL);
                    self.current().declarations.insert(name.clone(), pos);
                }
            }
            StmtKind::Expr(value) => self.expr(value)?,
            StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
        }
        Ok(())
    }

    fn handler(&mut self, handler: &ExceptHandler) -> CompileResult<()> {
        if let Some(typ) = &handler.typ {
            self.expr(typ)?;
        }
        if let Some(name) = &handler.name {
            self.add(name, DEF_LOCAL, handler.pos)?;
        }
        self.stmts(&handler.body)
    }

    fn argument_defaults(&mut self, args: &Arguments) -> CompileResult<()> {
        self.exprs(&args.defaults)?;
        for default in args.kw_defaults.iter().flatten() {
            self.expr(default)?;
        }
        Ok(())
    }

    fn argument_annotations(&mut self, args: &Arguments) -> CompileResult<()> {
        let all = args
            .args
            .iter()
            .chain(args.vararg.iter())
            .chain(args.kwonlyargs.iter())
            .chain(args.kwarg.iter());
        for arg in all {
            if let Some(annotation) = &arg.annotation {
                self.expr(annotation)?;
            }
        }
        Ok(())
    }

    fn parameters(&mut self, args: &Arguments) -> CompileResult<()> {
        for arg in args.args.iter().chain(args.kwonlyargs.iter()) {
            self.param(&arg.name, DEF_PARAM, arg.pos)?;
        }
        if let Some(vararg) = &args.vararg {
            self.param(&vararg.name, DEF_PARAM | DEF_STAR, vararg.pos)?;
        }
        if let Some(kwarg) = &args.kwarg {
            self.param(&kwarg.name, DEF_PARAM | DEF_DOUBLESTAR, kwarg.pos)?;
        }
        Ok(())
    }

    fn param(&mut self, name: &str, flags: u16, pos: Pos) -> CompileResult<()> {
        self.add(name, flags, pos)?;
        self.current().params.push(name.to_string());
        Ok(())
    }

    fn keywords(&mut self, keywords: &[Keyword]) -> CompileResult<()> {
        for keyword in keywords {
            self.expr(&keyword.value)?;
        }
        Ok(())
    }

    fn exprs(&mut self, exprs: &[Expr]) -> CompileResult<()> {
        for expr in exprs {
            self.expr(expr)?;
        }
        Ok(())
    }

    fn mark_yield(&mut self, pos: Pos) -> CompileResult<()> {
        let scope = self.current();
        if scope.kind != ScopeKind::Function {
            return Err(self.error(pos, "'yield' outside function"));
        }
        scope.is_generator = true;
        if scope.first_yield.is_none() {
            scope.first_yield = Some(pos);
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> CompileResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(expr.pos, "too many nested expressions"));
        }
        self.depth += 1;
        let result = self.visit_expr(expr);
        self.depth -= 1;
        result
    }

    fn visit_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        let pos = expr.pos;
        match &expr.kind {
            ExprKind::BoolOp { values, .. } => self.exprs(values)?,
            ExprKind::BinOp { left, right, .. } => {
                self.expr(left)?;
                self.expr(right)?;
            }
            ExprKind::UnaryOp { operand, .. } => self.expr(operand)?,
            ExprKind::Lambda { args, body } => {
                self.argument_defaults(args)?;
                self.enter(expr.id, "lambda", ScopeKind::Function);
                self.parameters(args)?;
                self.expr(body)?;
                self.leave();
            }
            ExprKind::IfExp { test, body, orelse } => {
                self.expr(test)?;
                self.expr(body)?;
                self.expr(orelse)?;
            }
            ExprKind::Dict { keys, values } => {
                for key in keys.iter().flatten() {
                    self.expr(key)?;
                }
                self.exprs(values)?;
            }
            ExprKind::Set(elts) => self.exprs(elts)?,
            ExprKind::ListComp { elt, generators } => {
                self.comprehension(expr.id, "listcomp", generators, &[elt], false)?;
            }
            ExprKind::SetComp { elt, generators } => {
                self.comprehension(expr.id, "setcomp", generators, &[elt], false)?;
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                self.comprehension(expr.id, "dictcomp", generators, &[key, value], false)?;
            }
            ExprKind::GeneratorExp { elt, generators } => {
                self.comprehension(expr.id, "genexpr", generators, &[elt], true)?;
            }
            ExprKind::Yield(value) => {
                self.mark_yield(pos)?;
                if let Some(value) = value {
                    self.expr(value)?;
                }
            }
            ExprKind::YieldFrom(value) => {
                self.mark_yield(pos)?;
                self.expr(value)?;
            }
            ExprKind::Compare {
                left, comparators, ..
            } => {
                self.expr(left)?;
                self.exprs(comparators)?;
            }
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                self.expr(func)?;
                self.exprs(args)?;
                self.keywords(keywords)?;
            }
            ExprKind::Num(_) | ExprKind::Str(_) | ExprKind::NameConstant(_) | ExprKind::Ellipsis => {}
            ExprKind::Attribute { value, .. } => self.expr(value)?,
            ExprKind::Subscript { value, slice, .. } => {
                self.expr(value)?;
                self.slice(slice)?;
            }
            ExprKind::Starred { value, .. } => self.expr(value)?,
            ExprKind::Name { name, ctx } => {
                let flag = match ctx {
                    ExprContext::Load => USE,
                    ExprContext::Store | ExprContext::Del => DEF_LOCAL,
                    ExprContext::AugStore => DEF_LOCAL | USE,
                };
                self.add(name, flag, pos)?;
            }
            ExprKind::List { elts, .. } | ExprKind::Tuple { elts, .. } => self.exprs(elts)?,
        }
        Ok(())
    }

    fn slice(&mut self, slice: &Slice) -> CompileResult<()> {
        match slice {
            Slice::Index(value) => self.expr(value),
            Slice::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(part)?;
                }
                Ok(())
            }
            Slice::ExtSlice(dims) => {
                for dim in dims {
                    self.slice(dim)?;
                }
                Ok(())
            }
        }
    }

    /// The outermost iterable is evaluated in the enclosing scope; everything
    /// else runs in a new function scope that receives it as `.0`.
    fn comprehension(
        &mut self,
        id: NodeId,
        name: &str,
        generators: &[Comprehension],
        elts: &[&Expr],
        is_generator: bool,
    ) -> CompileResult<()> {
        let Some((first, rest)) = generators.split_first() else {
            return Ok(());
        };
        self.expr(&first.iter)?;
        self.enter(id, name, ScopeKind::Function);
        self.current().is_generator = is_generator;
        self.param(COMPREHENSION_ARG, DEF_PARAM, first.iter.pos)?;
        self.expr(&first.target)?;
        self.exprs(&first.ifs)?;
        for generator in rest {
            self.expr(&generator.iter)?;
            self.expr(&generator.target)?;
            self.exprs(&generator.ifs)?;
        }
        for elt in elts {
            self.expr(elt)?;
        }
        self.leave();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build_source;
    use crate::parser::Mode;
    use indoc::indoc;

    fn analyze(source: &str) -> CompileResult<(Mod, SymbolTable)> {
        let module = build_source(source, "<test>", Mode::Exec)?;
        let table = SymbolTable::build(&module, "<test>")?;
        Ok((module, table))
    }

    fn function_ids(module: &Mod) -> Vec<NodeId> {
        fn walk(body: &[Stmt], out: &mut Vec<NodeId>) {
            for stmt in body {
                match &stmt.kind {
                    StmtKind::FunctionDef { body, .. } | StmtKind::ClassDef { body, .. } => {
                        out.push(stmt.id);
                        walk(body, out);
                    }
                    _ => {}
                }
            }
        }
        let mut out = Vec::new();
        if let Mod::Module { body } = module {
            walk(body, &mut out);
        }
        out
    }

    #[test]
    fn captured_local_is_cell_in_owner_and_free_in_closure() {
        let source = indoc! {"
            def outer():
                x = 1
                def inner():
                    return x
                return inner
        "};
        let (module, table) = analyze(source).expect("valid program");
        let ids = function_ids(&module);
        let outer = table.scope(ids[0]);
        let inner = table.scope(ids[1]);
        assert_eq!(outer.lookup("x"), NameScope::Cell);
        assert_eq!(inner.lookup("x"), NameScope::Free);
        assert_eq!(outer.cellvars(), vec!["x".to_string()]);
        assert_eq!(inner.freevars(), vec!["x".to_string()]);
        assert_eq!(outer.lookup("inner"), NameScope::Local);
    }

    #[test]
    fn module_names_are_implicit_globals_inside_functions() {
        let source = indoc! {"
            y = 2
            def f(a):
                return a + y + len([])
        "};
        let (module, table) = analyze(source).expect("valid program");
        let f = table.scope(function_ids(&module)[0]);
        assert_eq!(f.lookup("a"), NameScope::Local);
        assert_eq!(f.lookup("y"), NameScope::GlobalImplicit);
        assert_eq!(f.lookup("len"), NameScope::GlobalImplicit);
        assert_eq!(table.module().lookup("y"), NameScope::Local);
    }

    #[test]
    fn explicit_global_and_nonlocal() {
        let source = indoc! {"
            def f():
                global g
                g = 1
                n = 0
                def h():
                    nonlocal n
                    n += 1
                return h
        "};
        let (module, table) = analyze(source).expect("valid program");
        let ids = function_ids(&module);
        assert_eq!(table.scope(ids[0]).lookup("g"), NameScope::GlobalExplicit);
        assert_eq!(table.scope(ids[0]).lookup("n"), NameScope::Cell);
        assert_eq!(table.scope(ids[1]).lookup("n"), NameScope::Free);
    }

    #[test]
    fn global_declarations_hide_enclosing_bindings() {
        let source = indoc! {"
            x = 0
            def f():
                x = 1
                def g():
                    global x
                    def h():
                        return x
                    return h
                return g
        "};
        let (module, table) = analyze(source).expect("valid program");
        let ids = function_ids(&module);
        let (f, g, h) = (table.scope(ids[0]), table.scope(ids[1]), table.scope(ids[2]));
        assert_eq!(f.lookup("x"), NameScope::Local);
        assert_eq!(g.lookup("x"), NameScope::GlobalExplicit);
        assert_eq!(h.lookup("x"), NameScope::GlobalImplicit);
    }

    #[test]
    fn class_bodies_do_not_provide_bindings_to_methods() {
        let source = indoc! {"
            def f():
                x = 1
                class C:
                    x = 2
                    def m(self):
                        return x
                return C
        "};
        let (module, table) = analyze(source).expect("valid program");
        let ids = function_ids(&module);
        let (f, class, method) = (table.scope(ids[0]), table.scope(ids[1]), table.scope(ids[2]));
        assert_eq!(method.lookup("x"), NameScope::Free);
        assert_eq!(f.lookup("x"), NameScope::Cell);
        assert_eq!(class.lookup("x"), NameScope::Local);
        assert!(class.symbols["x"].is(DEF_FREE_CLASS));
        assert_eq!(class.freevars(), vec!["x".to_string()]);
    }

    #[test]
    fn super_requests_a_class_cell() {
        let source = indoc! {"
            class A:
                def m(self):
                    return super().m()
        "};
        let (module, table) = analyze(source).expect("valid program");
        let ids = function_ids(&module);
        assert!(table.scope(ids[0]).needs_class_cell);
        assert_eq!(table.scope(ids[0]).cellvars(), vec![CLASS_CELL.to_string()]);
        assert_eq!(table.scope(ids[1]).lookup(CLASS_CELL), NameScope::Free);
    }

    #[test]
    fn comprehension_scope_takes_implicit_argument() {
        let (module, table) = analyze("r = [x * k for x in range(3)]\nk = 2\n").expect("valid");
        let Mod::Module { body } = &module else {
            panic!("expected module");
        };
        let StmtKind::Assign { value, .. } = &body[0].kind else {
            panic!("expected assignment");
        };
        let scope = table.scope(value.id);
        assert_eq!(scope.params, vec![COMPREHENSION_ARG.to_string()]);
        assert_eq!(scope.lookup("x"), NameScope::Local);
        assert_eq!(scope.lookup("k"), NameScope::GlobalImplicit);
        assert_eq!(table.module().lookup("x"), NameScope::GlobalImplicit);
    }

    #[test]
    fn generator_flag_is_recorded() {
        let (module, table) = analyze("def f():\n    x = 1\n    yield x\n    yield x + 1\n").expect("valid");
        assert!(table.scope(function_ids(&module)[0]).is_generator);
    }

    #[test]
    fn rejects_scope_errors() {
        for (source, message) in [
            ("def f():\n    x = 1\n    global x\n", "assigned to before global declaration"),
            ("def f():\n    print(x)\n    global x\n", "used prior to global declaration"),
            ("def f(a):\n    global a\n", "parameter and global"),
            ("def f():\n    nonlocal q\n", "no binding for nonlocal 'q' found"),
            ("nonlocal q\n", "not allowed at module level"),
            ("return 1\n", "'return' outside function"),
            ("class C:\n    yield 1\n", "'yield' outside function"),
            ("def f():\n    yield 1\n    return 2\n", "'return' with value in generator"),
            ("def f():\n    from m import *\n", "import * only allowed at module level"),
        ] {
            let err = analyze(source).expect_err(source);
            assert!(err.message.contains(message), "{source}: {}", err.message);
        }
    }
}
