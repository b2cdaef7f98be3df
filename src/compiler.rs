//! Code generation: AST plus resolved scopes into compiled units.
//!
//! Each scope compiles to its own `CodeObject`. Blocks are allocated in an
//! arena and placed in the order they are entered; finalization renumbers
//! them by placement so falling off one block continues in the next.

use std::rc::Rc;

use log::{debug, trace};

use crate::ast::{
    self, Arguments, BoolOp, CmpOp, Comprehension, Constant as AstConstant, ExceptHandler, Expr,
    ExprContext, ExprKind, Keyword, MAX_NESTING, Mod, NodeId, Number, Slice, Stmt, StmtKind,
    WithItem,
};
use crate::error::{CompileError, CompileResult};
use crate::lexer::Pos;
use crate::parser::Mode;
use crate::symtable::{COMPREHENSION_ARG, NameScope, Scope, SymbolTable};

mod code;

pub use code::{Block, BlockId, CodeKind, CodeObject, Constant, Instruction, Name};

/// Parses, analyzes and compiles `source`.
pub fn compile_source(source: &str, filename: &str, mode: Mode) -> CompileResult<Rc<CodeObject>> {
    let module = ast::build_source(source, filename, mode)?;
    compile(&module, filename)
}

pub fn compile(module: &Mod, filename: &str) -> CompileResult<Rc<CodeObject>> {
    let table = SymbolTable::build(module, filename)?;
    let mut compiler = Compiler {
        table: &table,
        filename: Rc::from(filename),
        units: Vec::new(),
        depth: 0,
    };
    let code = compiler.module(module)?;
    debug!(
        "compiled {filename}: {} scopes, {} top-level instructions",
        table.len(),
        code.instruction_count()
    );
    Ok(code)
}

/// An enclosing construct that `return`, `break` and `continue` must unwind.
#[derive(Clone, Copy)]
enum FBlock<'a> {
    While { head: BlockId, exit: BlockId },
    For { head: BlockId, exit: BlockId },
    /// Body of `try` guarded by an except handler.
    Except,
    /// Body of `try` guarded by a `finally` clause.
    FinallyTry(&'a [Stmt]),
    /// The exceptional copy of a `finally` body; the exception sits on the
    /// stack and is being handled.
    FinallyEnd,
    /// Body of an `except` clause.
    HandlerCleanup,
    /// Body of a `with` statement; `__exit__` sits on the stack.
    With,
}

struct Unit<'a> {
    scope: &'a Scope,
    kind: CodeKind,
    name: Rc<str>,
    qualname: Rc<str>,
    arena: Vec<Block>,
    order: Vec<BlockId>,
    current: BlockId,
    varnames: Vec<Name>,
    cellvars: Vec<Name>,
    freevars: Vec<Name>,
    fblocks: Vec<FBlock<'a>>,
    line: usize,
    first_line: usize,
    argcount: usize,
    kwonlyargcount: usize,
    has_varargs: bool,
    has_varkeywords: bool,
    doc: Option<Rc<str>>,
}

impl<'a> Unit<'a> {
    fn new(scope: &'a Scope, kind: CodeKind, name: &str, qualname: String, line: usize) -> Self {
        let names = |list: Vec<String>| list.into_iter().map(Rc::from).collect::<Vec<Name>>();
        Self {
            scope,
            kind,
            name: Rc::from(name),
            qualname: Rc::from(qualname),
            arena: vec![Block::default()],
            order: vec![0],
            current: 0,
            varnames: names(scope.varnames()),
            cellvars: names(scope.cellvars()),
            freevars: names(scope.freevars()),
            fblocks: Vec::new(),
            line,
            first_line: line,
            argcount: 0,
            kwonlyargcount: 0,
            has_varargs: false,
            has_varkeywords: false,
            doc: None,
        }
    }

    fn cell_index(&self, name: &str) -> Option<usize> {
        self.cellvars
            .iter()
            .chain(self.freevars.iter())
            .position(|candidate| &**candidate == name)
    }

    fn finish(mut self, filename: Rc<str>) -> CodeObject {
        let terminated = self.arena[self.current].is_terminated();
        if !terminated {
            let line = self.line;
            let block = &mut self.arena[self.current];
            block.instructions.push(Instruction::LoadConst(Constant::None));
            block.instructions.push(Instruction::ReturnValue);
            block.lines.extend([line, line]);
        }

        let mut position = vec![None; self.arena.len()];
        for (index, &id) in self.order.iter().enumerate() {
            position[id] = Some(index);
        }
        let mut blocks = Vec::with_capacity(self.order.len());
        for &id in &self.order {
            let mut block = std::mem::take(&mut self.arena[id]);
            for instruction in &mut block.instructions {
                instruction.map_targets(|target| {
                    position[target].expect("jump targets are always placed")
                });
            }
            blocks.push(block);
        }

        let cell_params = self
            .cellvars
            .iter()
            .enumerate()
            .filter_map(|(cell, name)| {
                let params = self.argcount
                    + self.kwonlyargcount
                    + usize::from(self.has_varargs)
                    + usize::from(self.has_varkeywords);
                self.varnames[..params.min(self.varnames.len())]
                    .iter()
                    .position(|candidate| candidate == name)
                    .map(|fast| (cell, fast))
            })
            .collect();

        CodeObject {
            name: self.name,
            qualname: self.qualname,
            filename,
            kind: self.kind,
            blocks,
            varnames: self.varnames,
            cellvars: self.cellvars,
            freevars: self.freevars,
            cell_params,
            argcount: self.argcount,
            kwonlyargcount: self.kwonlyargcount,
            has_varargs: self.has_varargs,
            has_varkeywords: self.has_varkeywords,
            is_generator: self.scope.is_generator,
            first_line: self.first_line,
            doc: self.doc,
        }
    }
}

enum NameOp {
    Fast(usize),
    Deref(usize),
    ClassDeref(usize),
    Name,
    Global,
}

struct Compiler<'a> {
    table: &'a SymbolTable,
    filename: Rc<str>,
    units: Vec<Unit<'a>>,
    depth: usize,
}

impl<'a> Compiler<'a> {
    fn error(&self, pos: Pos, message: impl Into<String>) -> CompileError {
        CompileError::syntax(message, &self.filename, pos)
    }

    fn unit(&self) -> &Unit<'a> {
        self.units.last().expect("a unit is open while compiling")
    }

    fn unit_mut(&mut self) -> &mut Unit<'a> {
        self.units.last_mut().expect("a unit is open while compiling")
    }

    fn emit(&mut self, instruction: Instruction) {
        let unit = self.unit_mut();
        let line = unit.line;
        let block = &mut unit.arena[unit.current];
        block.instructions.push(instruction);
        block.lines.push(line);
    }

    fn new_block(&mut self) -> BlockId {
        let unit = self.unit_mut();
        unit.arena.push(Block::default());
        unit.arena.len() - 1
    }

    /// Places `block` after the current one and makes it current.
    fn use_block(&mut self, block: BlockId) {
        let unit = self.unit_mut();
        unit.order.push(block);
        unit.current = block;
    }

    fn set_line(&mut self, pos: Pos) {
        self.unit_mut().line = pos.line;
    }

    fn load_const(&mut self, constant: Constant) {
        self.emit(Instruction::LoadConst(constant));
    }

    fn enter_scope(&mut self, id: NodeId, name: &str, kind: CodeKind, line: usize) {
        let scope = self.table.scope(id);
        let qualname = match self.units.last() {
            Some(parent) if parent.kind == CodeKind::Function => {
                format!("{}.<locals>.{name}", parent.qualname)
            }
            Some(parent) if parent.kind == CodeKind::Class => format!("{}.{name}", parent.qualname),
            _ => name.to_string(),
        };
        self.units.push(Unit::new(scope, kind, name, qualname, line));
    }

    fn leave_scope(&mut self) -> Rc<CodeObject> {
        let unit = self.units.pop().expect("leave_scope pairs with enter_scope");
        let code = Rc::new(unit.finish(self.filename.clone()));
        trace!("compiled unit {}\n{}", code.qualname, code.disassemble());
        code
    }

    fn module(&mut self, module: &'a Mod) -> CompileResult<Rc<CodeObject>> {
        self.units.push(Unit::new(
            self.table.module(),
            CodeKind::Module,
            "<module>",
            "<module>".to_string(),
            1,
        ));
        match module {
            Mod::Module { body } => {
                self.docstring_name(body);
                self.stmts(body)?;
            }
            Mod::Interactive { body } => {
                for stmt in body {
                    if let StmtKind::Expr(value) = &stmt.kind {
                        self.set_line(stmt.pos);
                        self.expr(value)?;
                        self.emit(Instruction::PrintExpr);
                    } else {
                        self.stmt(stmt)?;
                    }
                }
            }
            Mod::Expression { body } => {
                self.expr(body)?;
                self.emit(Instruction::ReturnValue);
            }
        }
        Ok(self.leave_scope())
    }

    fn docstring(body: &[Stmt]) -> Option<&str> {
        match body.first().map(|stmt| &stmt.kind) {
            Some(StmtKind::Expr(Expr {
                kind: ExprKind::Str(text),
                ..
            })) => Some(text),
            _ => None,
        }
    }

    /// Module and class docstrings become `__doc__` in the namespace.
    fn docstring_name(&mut self, body: &[Stmt]) {
        if let Some(doc) = Self::docstring(body) {
            self.load_const(Constant::Str(Rc::from(doc)));
            self.emit(Instruction::StoreName(Rc::from("__doc__")));
        }
    }

    fn stmts(&mut self, body: &'a [Stmt]) -> CompileResult<()> {
        for stmt in body {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &'a Stmt) -> CompileResult<()> {
        self.set_line(stmt.pos);
        match &stmt.kind {
            StmtKind::FunctionDef {
                name,
                args,
                body,
                decorators,
                ..
            } => self.function_def(stmt, name, args, body, decorators),
            StmtKind::ClassDef {
                name,
                bases,
                keywords,
                body,
                decorators,
            } => self.class_def(stmt, name, bases, keywords, body, decorators),
            StmtKind::Return(value) => self.return_stmt(value.as_ref()),
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
            StmtKind::Assign { targets, value } => {
                self.expr(value)?;
                for (index, target) in targets.iter().enumerate() {
                    if index + 1 < targets.len() {
                        self.emit(Instruction::Dup);
                    }
                    self.assign(target)?;
                }
                Ok(())
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value),
            StmtKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    self.expr(value)?;
                    self.assign(target)?;
                }
                Ok(())
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => self.for_stmt(target, iter, body, orelse),
            StmtKind::While { test, body, orelse } => self.while_stmt(test, body, orelse),
            StmtKind::If { test, body, orelse } => {
                let orelse_block = self.new_block();
                self.expr(test)?;
                self.emit(Instruction::PopJumpIfFalse(orelse_block));
                self.stmts(body)?;
                if orelse.is_empty() {
                    self.use_block(orelse_block);
                } else {
                    let end = self.new_block();
                    self.emit(Instruction::Jump(end));
                    self.use_block(orelse_block);
                    self.stmts(orelse)?;
                    self.use_block(end);
                }
                Ok(())
            }
            StmtKind::With { items, body } => self.with_stmt(items, body),
            StmtKind::Raise { exc, cause } => {
                let mut count = 0;
                if let Some(exc) = exc {
                    self.expr(exc)?;
                    count += 1;
                    if let Some(cause) = cause {
                        self.expr(cause)?;
                        count += 1;
                    }
                }
                self.emit(Instruction::Raise(count));
                Ok(())
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                if finalbody.is_empty() {
                    self.try_except(body, handlers, orelse)
                } else {
                    self.try_finally(body, handlers, orelse, finalbody)
                }
            }
            StmtKind::Assert { test, msg } => {
                let end = self.new_block();
                self.expr(test)?;
                self.emit(Instruction::PopJumpIfTrue(end));
                self.emit(Instruction::LoadAssertionError);
                if let Some(msg) = msg {
                    self.expr(msg)?;
                    self.emit(Instruction::CallFunction { argc: 1 });
                }
                self.emit(Instruction::Raise(1));
                self.use_block(end);
                Ok(())
            }
            StmtKind::Import(names) => {
                for alias in names {
                    self.emit(Instruction::ImportName {
                        name: Rc::from(alias.name.as_str()),
                        level: 0,
                        leaf: alias.asname.is_some(),
                    });
                    let bound = match &alias.asname {
                        Some(asname) => asname.as_str(),
                        None => alias.name.split('.').next().unwrap_or(&alias.name),
                    };
                    self.store_name(bound)?;
                }
                Ok(())
            }
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => {
                self.emit(Instruction::ImportName {
                    name: Rc::from(module.as_deref().unwrap_or("")),
                    level: *level,
                    leaf: true,
                });
                if names.first().is_some_and(|alias| alias.name == "*") {
                    self.emit(Instruction::ImportStar);
                    return Ok(());
                }
                for alias in names {
                    self.emit(Instruction::ImportFrom(Rc::from(alias.name.as_str())));
                    self.store_name(alias.asname.as_deref().unwrap_or(&alias.name))?;
                }
                self.emit(Instruction::Pop);
                Ok(())
            }
            StmtKind::Global(_) | StmtKind::Nonlocal(_) | StmtKind::Pass => Ok(()),
            StmtKind::Expr(value) => {
                if matches!(value.kind, ExprKind::Str(_) | ExprKind::Num(_)) {
                    return Ok(());
                }
                self.expr(value)?;
                self.emit(Instruction::Pop);
                Ok(())
            }
            StmtKind::Break => self.break_stmt(stmt.pos),
            StmtKind::Continue => self.continue_stmt(stmt.pos),
        }
    }

    fn function_def(
        &mut self,
        stmt: &'a Stmt,
        name: &str,
        args: &'a Arguments,
        body: &'a [Stmt],
        decorators: &'a [Expr],
    ) -> CompileResult<()> {
        for decorator in decorators {
            self.expr(decorator)?;
        }
        let (defaults, kwdefaults) = self.argument_defaults(args)?;

        self.enter_scope(stmt.id, name, CodeKind::Function, stmt.pos.line);
        self.set_signature(args);
        let doc = Self::docstring(body);
        self.unit_mut().doc = doc.map(Rc::from);
        let body = if doc.is_some() { &body[1..] } else { body };
        self.stmts(body)?;
        let code = self.leave_scope();

        self.make_function(code, defaults, kwdefaults, stmt.pos)?;
        for _ in decorators {
            self.emit(Instruction::CallFunction { argc: 1 });
        }
        self.store_name(name)
    }

    fn set_signature(&mut self, args: &Arguments) {
        let unit = self.unit_mut();
        unit.argcount = args.args.len();
        unit.kwonlyargcount = args.kwonlyargs.len();
        unit.has_varargs = args.vararg.is_some();
        unit.has_varkeywords = args.kwarg.is_some();
    }

    /// Emits the defaults tuple and keyword-only defaults dict, if any.
    fn argument_defaults(&mut self, args: &'a Arguments) -> CompileResult<(bool, bool)> {
        let defaults = !args.defaults.is_empty();
        if defaults {
            for default in &args.defaults {
                self.expr(default)?;
            }
            self.emit(Instruction::BuildTuple(args.defaults.len()));
        }
        let mut count = 0;
        for (arg, default) in args.kwonlyargs.iter().zip(&args.kw_defaults) {
            if let Some(default) = default {
                self.load_const(Constant::Str(Rc::from(arg.name.as_str())));
                self.expr(default)?;
                count += 1;
            }
        }
        if count > 0 {
            self.emit(Instruction::BuildMap(count));
        }
        Ok((defaults, count > 0))
    }

    /// Pushes the cells `code` captures as a tuple. Returns whether it did.
    fn closure(&mut self, code: &CodeObject, pos: Pos) -> CompileResult<bool> {
        if code.freevars.is_empty() {
            return Ok(false);
        }
        for name in &code.freevars {
            let index = self.unit().cell_index(name).ok_or_else(|| {
                self.error(pos, format!("no cell for captured name '{name}'"))
            })?;
            self.emit(Instruction::LoadClosure(index));
        }
        self.emit(Instruction::BuildTuple(code.freevars.len()));
        Ok(true)
    }

    fn make_function(
        &mut self,
        code: Rc<CodeObject>,
        defaults: bool,
        kwdefaults: bool,
        pos: Pos,
    ) -> CompileResult<()> {
        let closure = self.closure(&code, pos)?;
        self.emit(Instruction::MakeFunction {
            code,
            defaults,
            kwdefaults,
            closure,
        });
        Ok(())
    }

    fn class_def(
        &mut self,
        stmt: &'a Stmt,
        name: &str,
        bases: &'a [Expr],
        keywords: &'a [Keyword],
        body: &'a [Stmt],
        decorators: &'a [Expr],
    ) -> CompileResult<()> {
        for decorator in decorators {
            self.expr(decorator)?;
        }

        self.enter_scope(stmt.id, name, CodeKind::Class, stmt.pos.line);
        self.docstring_name(body);
        self.stmts(body)?;
        let code = self.leave_scope();

        let closure = self.closure(&code, stmt.pos)?;
        for base in bases {
            if matches!(base.kind, ExprKind::Starred { .. }) {
                return Err(self.error(base.pos, "starred base classes are not supported"));
            }
            self.expr(base)?;
        }
        let mut names = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let Some(arg) = &keyword.arg else {
                return Err(self.error(stmt.pos, "keyword unpacking in class bases is not supported"));
            };
            self.expr(&keyword.value)?;
            names.push(Rc::from(arg.as_str()));
        }
        self.set_line(stmt.pos);
        self.emit(Instruction::BuildClass {
            code,
            bases: bases.len(),
            keywords: names.into(),
            closure,
        });
        for _ in decorators {
            self.emit(Instruction::CallFunction { argc: 1 });
        }
        self.store_name(name)
    }

    fn return_stmt(&mut self, value: Option<&'a Expr>) -> CompileResult<()> {
        match value {
            Some(value) => {
                self.expr(value)?;
                self.unwind_all(true)?;
            }
            None => {
                self.unwind_all(false)?;
                self.load_const(Constant::None);
            }
        }
        self.emit(Instruction::ReturnValue);
        Ok(())
    }

    /// Emits the exit code for every open fblock, innermost first.
    fn unwind_all(&mut self, preserve_tos: bool) -> CompileResult<()> {
        let saved = self.unit().fblocks.clone();
        while let Some(fblock) = self.unit_mut().fblocks.pop() {
            self.unwind_fblock(fblock, preserve_tos)?;
        }
        self.unit_mut().fblocks = saved;
        Ok(())
    }

    fn unwind_fblock(&mut self, fblock: FBlock<'a>, preserve_tos: bool) -> CompileResult<()> {
        match fblock {
            FBlock::While { .. } => {}
            FBlock::For { .. } => {
                if preserve_tos {
                    self.emit(Instruction::Rot2);
                }
                self.emit(Instruction::Pop);
            }
            FBlock::Except => self.emit(Instruction::PopBlock),
            FBlock::FinallyTry(body) => {
                self.emit(Instruction::PopBlock);
                self.stmts(body)?;
            }
            FBlock::FinallyEnd => {
                if preserve_tos {
                    self.emit(Instruction::Rot2);
                }
                self.emit(Instruction::Pop);
                self.emit(Instruction::PopExcept);
            }
            FBlock::HandlerCleanup => self.emit(Instruction::PopExcept),
            FBlock::With => {
                self.emit(Instruction::PopBlock);
                if preserve_tos {
                    self.emit(Instruction::Rot2);
                }
                self.exit_with_none();
            }
        }
        Ok(())
    }

    /// `__exit__(None, None, None)` on the callable at the top of the stack.
    fn exit_with_none(&mut self) {
        for _ in 0..3 {
            self.load_const(Constant::None);
        }
        self.emit(Instruction::CallFunction { argc: 3 });
        self.emit(Instruction::Pop);
    }

    /// Unwinds to the innermost loop and returns it.
    fn unwind_to_loop(&mut self, pos: Pos, keyword: &str) -> CompileResult<FBlock<'a>> {
        let saved = self.unit().fblocks.clone();
        let mut found = None;
        while let Some(fblock) = self.unit_mut().fblocks.pop() {
            if matches!(fblock, FBlock::While { .. } | FBlock::For { .. }) {
                found = Some(fblock);
                break;
            }
            self.unwind_fblock(fblock, false)?;
        }
        self.unit_mut().fblocks = saved;
        found.ok_or_else(|| self.error(pos, format!("'{keyword}' outside loop")))
    }

    fn break_stmt(&mut self, pos: Pos) -> CompileResult<()> {
        match self.unwind_to_loop(pos, "break")? {
            FBlock::For { exit, .. } => {
                self.emit(Instruction::Pop);
                self.emit(Instruction::Jump(exit));
            }
            FBlock::While { exit, .. } => self.emit(Instruction::Jump(exit)),
            _ => {}
        }
        Ok(())
    }

    fn continue_stmt(&mut self, pos: Pos) -> CompileResult<()> {
        match self.unwind_to_loop(pos, "continue")? {
            FBlock::For { head, .. } | FBlock::While { head, .. } => {
                self.emit(Instruction::Jump(head));
            }
            _ => {}
        }
        Ok(())
    }

    fn while_stmt(&mut self, test: &'a Expr, body: &'a [Stmt], orelse: &'a [Stmt]) -> CompileResult<()> {
        let head = self.new_block();
        let orelse_block = self.new_block();
        let exit = self.new_block();

        self.use_block(head);
        if !is_constant_true(test) {
            self.expr(test)?;
            self.emit(Instruction::PopJumpIfFalse(orelse_block));
        }
        self.unit_mut().fblocks.push(FBlock::While { head, exit });
        self.stmts(body)?;
        self.unit_mut().fblocks.pop();
        self.emit(Instruction::Jump(head));

        self.use_block(orelse_block);
        self.stmts(orelse)?;
        self.use_block(exit);
        Ok(())
    }

    fn for_stmt(
        &mut self,
        target: &'a Expr,
        iter: &'a Expr,
        body: &'a [Stmt],
        orelse: &'a [Stmt],
    ) -> CompileResult<()> {
        let head = self.new_block();
        let orelse_block = self.new_block();
        let exit = self.new_block();

        self.expr(iter)?;
        self.emit(Instruction::GetIter);
        self.use_block(head);
        self.emit(Instruction::ForIter { exit: orelse_block });
        self.assign(target)?;
        self.unit_mut().fblocks.push(FBlock::For { head, exit });
        self.stmts(body)?;
        self.unit_mut().fblocks.pop();
        self.emit(Instruction::Jump(head));

        self.use_block(orelse_block);
        self.stmts(orelse)?;
        self.use_block(exit);
        Ok(())
    }

    fn try_except(
        &mut self,
        body: &'a [Stmt],
        handlers: &'a [ExceptHandler],
        orelse: &'a [Stmt],
    ) -> CompileResult<()> {
        let handler_block = self.new_block();
        let orelse_block = self.new_block();
        let end = self.new_block();

        self.emit(Instruction::SetupExcept(handler_block));
        self.unit_mut().fblocks.push(FBlock::Except);
        self.stmts(body)?;
        self.unit_mut().fblocks.pop();
        self.emit(Instruction::PopBlock);
        self.emit(Instruction::Jump(orelse_block));

        self.use_block(handler_block);
        for handler in handlers {
            self.set_line(handler.pos);
            let next = self.new_block();
            if let Some(typ) = &handler.typ {
                self.emit(Instruction::Dup);
                self.expr(typ)?;
                self.emit(Instruction::ExceptionMatch);
                self.emit(Instruction::PopJumpIfFalse(next));
            }
            match &handler.name {
                Some(name) => self.store_name(name)?,
                None => self.emit(Instruction::Pop),
            }
            self.unit_mut().fblocks.push(FBlock::HandlerCleanup);
            self.stmts(&handler.body)?;
            self.unit_mut().fblocks.pop();
            self.emit(Instruction::PopExcept);
            if let Some(name) = &handler.name {
                self.load_const(Constant::None);
                self.store_name(name)?;
                self.name_op(name, ExprContext::Del, handler.pos)?;
            }
            self.emit(Instruction::Jump(end));
            self.use_block(next);
        }
        self.emit(Instruction::Reraise);

        self.use_block(orelse_block);
        self.stmts(orelse)?;
        self.use_block(end);
        Ok(())
    }

    fn try_finally(
        &mut self,
        body: &'a [Stmt],
        handlers: &'a [ExceptHandler],
        orelse: &'a [Stmt],
        finalbody: &'a [Stmt],
    ) -> CompileResult<()> {
        let handler_block = self.new_block();
        let end = self.new_block();

        self.emit(Instruction::SetupFinally(handler_block));
        self.unit_mut().fblocks.push(FBlock::FinallyTry(finalbody));
        if handlers.is_empty() {
            self.stmts(body)?;
        } else {
            self.try_except(body, handlers, orelse)?;
        }
        self.unit_mut().fblocks.pop();
        self.emit(Instruction::PopBlock);
        self.stmts(finalbody)?;
        self.emit(Instruction::Jump(end));

        self.use_block(handler_block);
        self.unit_mut().fblocks.push(FBlock::FinallyEnd);
        self.stmts(finalbody)?;
        self.unit_mut().fblocks.pop();
        self.emit(Instruction::Reraise);

        self.use_block(end);
        Ok(())
    }

    fn with_stmt(&mut self, items: &'a [WithItem], body: &'a [Stmt]) -> CompileResult<()> {
        let Some((item, rest)) = items.split_first() else {
            return self.stmts(body);
        };
        let cleanup = self.new_block();
        let suppress = self.new_block();
        let after = self.new_block();

        self.expr(&item.context_expr)?;
        self.emit(Instruction::SetupWith(cleanup));
        match &item.optional_vars {
            Some(target) => self.assign(target)?,
            None => self.emit(Instruction::Pop),
        }
        self.unit_mut().fblocks.push(FBlock::With);
        self.with_stmt(rest, body)?;
        self.unit_mut().fblocks.pop();
        self.emit(Instruction::PopBlock);
        self.exit_with_none();
        self.emit(Instruction::Jump(after));

        self.use_block(cleanup);
        self.emit(Instruction::WithExceptArgs);
        self.emit(Instruction::CallFunction { argc: 3 });
        self.emit(Instruction::PopJumpIfTrue(suppress));
        self.emit(Instruction::Reraise);

        self.use_block(suppress);
        self.emit(Instruction::Pop);
        self.emit(Instruction::PopExcept);
        self.emit(Instruction::Pop);
        self.use_block(after);
        Ok(())
    }

    fn resolve(&self, name: &str, pos: Pos) -> CompileResult<NameOp> {
        let unit = self.unit();
        let missing_cell = || self.error(pos, format!("no cell for name '{name}'"));
        Ok(match unit.scope.lookup(name) {
            NameScope::Free if unit.kind == CodeKind::Class => {
                NameOp::ClassDeref(unit.cell_index(name).ok_or_else(missing_cell)?)
            }
            NameScope::Free | NameScope::Cell => {
                NameOp::Deref(unit.cell_index(name).ok_or_else(missing_cell)?)
            }
            NameScope::Local if unit.kind == CodeKind::Function => {
                let index = unit
                    .varnames
                    .iter()
                    .position(|candidate| &**candidate == name)
                    .ok_or_else(|| self.error(pos, format!("no slot for local '{name}'")))?;
                NameOp::Fast(index)
            }
            NameScope::GlobalImplicit if unit.kind == CodeKind::Function => NameOp::Global,
            NameScope::GlobalExplicit => NameOp::Global,
            NameScope::Local | NameScope::GlobalImplicit => NameOp::Name,
        })
    }

    fn name_op(&mut self, name: &str, ctx: ExprContext, pos: Pos) -> CompileResult<()> {
        let op = self.resolve(name, pos)?;
        let name: Name = Rc::from(name);
        let instruction = match (op, ctx) {
            (NameOp::Fast(index), ExprContext::Load) => Instruction::LoadFast(index),
            (NameOp::Fast(index), ExprContext::Del) => Instruction::DeleteFast(index),
            (NameOp::Fast(index), _) => Instruction::StoreFast(index),
            (NameOp::Deref(index), ExprContext::Load) => Instruction::LoadDeref(index),
            (NameOp::ClassDeref(index), ExprContext::Load) => Instruction::LoadClassDeref(index),
            (NameOp::Deref(index) | NameOp::ClassDeref(index), ExprContext::Del) => {
                Instruction::DeleteDeref(index)
            }
            (NameOp::Deref(index) | NameOp::ClassDeref(index), _) => Instruction::StoreDeref(index),
            (NameOp::Name, ExprContext::Load) => Instruction::LoadName(name),
            (NameOp::Name, ExprContext::Del) => Instruction::DeleteName(name),
            (NameOp::Name, _) => Instruction::StoreName(name),
            (NameOp::Global, ExprContext::Load) => Instruction::LoadGlobal(name),
            (NameOp::Global, ExprContext::Del) => Instruction::DeleteGlobal(name),
            (NameOp::Global, _) => Instruction::StoreGlobal(name),
        };
        self.emit(instruction);
        Ok(())
    }

    fn store_name(&mut self, name: &str) -> CompileResult<()> {
        let pos = Pos::new(self.unit().line, 0);
        self.name_op(name, ExprContext::Store, pos)
    }

    /// Stores the value on top of the stack into `target`.
    fn assign(&mut self, target: &'a Expr) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Name { name, .. } => self.name_op(name, ExprContext::Store, target.pos),
            ExprKind::Attribute { value, attr, .. } => {
                self.expr(value)?;
                self.emit(Instruction::StoreAttr(Rc::from(attr.as_str())));
                Ok(())
            }
            ExprKind::Subscript { value, slice, .. } => {
                self.expr(value)?;
                self.slice(slice)?;
                self.emit(Instruction::StoreSubscript);
                Ok(())
            }
            ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
                self.unpack(elts, target.pos)?;
                for elt in elts {
                    match &elt.kind {
                        ExprKind::Starred { value, .. } => self.assign(value)?,
                        _ => self.assign(elt)?,
                    }
                }
                Ok(())
            }
            ExprKind::Starred { .. } => Err(self.error(
                target.pos,
                "starred assignment target must be in a list or tuple",
            )),
            _ => Err(self.error(target.pos, format!("can't assign to {}", target.describe()))),
        }
    }

    fn unpack(&mut self, elts: &[Expr], pos: Pos) -> CompileResult<()> {
        let mut starred = None;
        for (index, elt) in elts.iter().enumerate() {
            if matches!(elt.kind, ExprKind::Starred { .. }) {
                if starred.is_some() {
                    return Err(self.error(pos, "two starred expressions in assignment"));
                }
                starred = Some(index);
            }
        }
        match starred {
            Some(index) => self.emit(Instruction::UnpackEx {
                before: index,
                after: elts.len() - index - 1,
            }),
            None => self.emit(Instruction::UnpackSequence(elts.len())),
        }
        Ok(())
    }

    fn delete(&mut self, target: &'a Expr) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Name { name, .. } => self.name_op(name, ExprContext::Del, target.pos),
            ExprKind::Attribute { value, attr, .. } => {
                self.expr(value)?;
                self.emit(Instruction::DeleteAttr(Rc::from(attr.as_str())));
                Ok(())
            }
            ExprKind::Subscript { value, slice, .. } => {
                self.expr(value)?;
                self.slice(slice)?;
                self.emit(Instruction::DeleteSubscript);
                Ok(())
            }
            ExprKind::Tuple { elts, .. } | ExprKind::List { elts, .. } => {
                for elt in elts {
                    self.delete(elt)?;
                }
                Ok(())
            }
            _ => Err(self.error(target.pos, format!("can't delete {}", target.describe()))),
        }
    }

    fn aug_assign(&mut self, target: &'a Expr, op: ast::Operator, value: &'a Expr) -> CompileResult<()> {
        match &target.kind {
            ExprKind::Name { name, .. } => {
                self.name_op(name, ExprContext::Load, target.pos)?;
                self.expr(value)?;
                self.emit(Instruction::Inplace(op));
                self.name_op(name, ExprContext::Store, target.pos)
            }
            ExprKind::Attribute { value: object, attr, .. } => {
                let attr: Name = Rc::from(attr.as_str());
                self.expr(object)?;
                self.emit(Instruction::Dup);
                self.emit(Instruction::LoadAttr(attr.clone()));
                self.expr(value)?;
                self.emit(Instruction::Inplace(op));
                self.emit(Instruction::Rot2);
                self.emit(Instruction::StoreAttr(attr));
                Ok(())
            }
            ExprKind::Subscript {
                value: object,
                slice,
                ..
            } => {
                self.expr(object)?;
                self.slice(slice)?;
                self.emit(Instruction::DupTwo);
                self.emit(Instruction::LoadSubscript);
                self.expr(value)?;
                self.emit(Instruction::Inplace(op));
                self.emit(Instruction::Rot3);
                self.emit(Instruction::StoreSubscript);
                Ok(())
            }
            _ => Err(self.error(
                target.pos,
                format!("illegal expression for augmented assignment ({})", target.describe()),
            )),
        }
    }

    fn slice(&mut self, slice: &'a Slice) -> CompileResult<()> {
        match slice {
            Slice::Index(value) => self.expr(value),
            Slice::Slice { lower, upper, step } => {
                for part in [lower, upper] {
                    match part {
                        Some(part) => self.expr(part)?,
                        None => self.load_const(Constant::None),
                    }
                }
                match step {
                    Some(step) => {
                        self.expr(step)?;
                        self.emit(Instruction::BuildSlice(3));
                    }
                    None => self.emit(Instruction::BuildSlice(2)),
                }
                Ok(())
            }
            Slice::ExtSlice(dims) => {
                for dim in dims {
                    self.slice(dim)?;
                }
                self.emit(Instruction::BuildTuple(dims.len()));
                Ok(())
            }
        }
    }

    fn exprs(&mut self, exprs: &'a [Expr]) -> CompileResult<()> {
        for expr in exprs {
            self.expr(expr)?;
        }
        Ok(())
    }

    fn expr(&mut self, expr: &'a Expr) -> CompileResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(expr.pos, "too many nested expressions"));
        }
        self.depth += 1;
        let result = self.compile_expr(expr);
        self.depth -= 1;
        result
    }

    fn compile_expr(&mut self, expr: &'a Expr) -> CompileResult<()> {
        self.set_line(expr.pos);
        match &expr.kind {
            ExprKind::BoolOp { op, values } => {
                let end = self.new_block();
                for (index, value) in values.iter().enumerate() {
                    self.expr(value)?;
                    if index + 1 < values.len() {
                        self.emit(match op {
                            BoolOp::And => Instruction::JumpIfFalseOrPop(end),
                            BoolOp::Or => Instruction::JumpIfTrueOrPop(end),
                        });
                    }
                }
                self.use_block(end);
            }
            ExprKind::BinOp { left, op, right } => {
                self.expr(left)?;
                self.expr(right)?;
                self.emit(Instruction::Binary(*op));
            }
            ExprKind::UnaryOp { op, operand } => {
                self.expr(operand)?;
                self.emit(Instruction::Unary(*op));
            }
            ExprKind::Lambda { args, body } => {
                let (defaults, kwdefaults) = self.argument_defaults(args)?;
                self.enter_scope(expr.id, "<lambda>", CodeKind::Function, expr.pos.line);
                self.set_signature(args);
                self.expr(body)?;
                if !self.unit().scope.is_generator {
                    self.emit(Instruction::ReturnValue);
                }
                let code = self.leave_scope();
                self.make_function(code, defaults, kwdefaults, expr.pos)?;
            }
            ExprKind::IfExp { test, body, orelse } => {
                let orelse_block = self.new_block();
                let end = self.new_block();
                self.expr(test)?;
                self.emit(Instruction::PopJumpIfFalse(orelse_block));
                self.expr(body)?;
                self.emit(Instruction::Jump(end));
                self.use_block(orelse_block);
                self.expr(orelse)?;
                self.use_block(end);
            }
            ExprKind::Dict { keys, values } => {
                if keys.iter().all(Option::is_some) {
                    for (key, value) in keys.iter().zip(values) {
                        if let Some(key) = key {
                            self.expr(key)?;
                        }
                        self.expr(value)?;
                    }
                    self.emit(Instruction::BuildMap(values.len()));
                } else {
                    self.emit(Instruction::BuildMap(0));
                    for (key, value) in keys.iter().zip(values) {
                        match key {
                            Some(key) => {
                                self.expr(key)?;
                                self.expr(value)?;
                                self.emit(Instruction::MapAdd(1));
                            }
                            None => {
                                self.expr(value)?;
                                self.emit(Instruction::DictUpdate(1));
                            }
                        }
                    }
                }
            }
            ExprKind::Set(elts) => {
                self.sequence_display(elts, Instruction::BuildSet(elts.len()), Display::Set)?;
            }
            ExprKind::List { elts, ctx } => {
                self.load_context(expr, *ctx)?;
                self.sequence_display(elts, Instruction::BuildList(elts.len()), Display::List)?;
            }
            ExprKind::Tuple { elts, ctx } => {
                self.load_context(expr, *ctx)?;
                self.sequence_display(elts, Instruction::BuildTuple(elts.len()), Display::Tuple)?;
            }
            ExprKind::ListComp { elt, generators } => {
                self.comprehension(expr, "<listcomp>", generators, Element::List(elt))?;
            }
            ExprKind::SetComp { elt, generators } => {
                self.comprehension(expr, "<setcomp>", generators, Element::Set(elt))?;
            }
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => {
                self.comprehension(expr, "<dictcomp>", generators, Element::Dict(key, value))?;
            }
            ExprKind::GeneratorExp { elt, generators } => {
                self.comprehension(expr, "<genexpr>", generators, Element::Generator(elt))?;
            }
            ExprKind::Yield(value) => {
                match value {
                    Some(value) => self.expr(value)?,
                    None => self.load_const(Constant::None),
                }
                let resume = self.new_block();
                self.emit(Instruction::YieldValue { resume });
                self.use_block(resume);
            }
            ExprKind::YieldFrom(value) => {
                self.expr(value)?;
                self.emit(Instruction::GetYieldFromIter);
                self.load_const(Constant::None);
                let delegate = self.new_block();
                let after = self.new_block();
                self.use_block(delegate);
                self.emit(Instruction::YieldFrom { resume: delegate });
                self.use_block(after);
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => self.compare(left, ops, comparators)?,
            ExprKind::Call {
                func,
                args,
                keywords,
            } => {
                self.expr(func)?;
                self.call_args(args, keywords, expr.pos)?;
            }
            ExprKind::Num(number) => self.load_const(match number {
                Number::Int(value) => Constant::Int(*value),
                Number::Big(value) => Constant::Big(Rc::new(value.clone())),
                Number::Float(value) => Constant::Float(*value),
            }),
            ExprKind::Str(text) => self.load_const(Constant::Str(Rc::from(text.as_str()))),
            ExprKind::NameConstant(constant) => self.load_const(match constant {
                AstConstant::None => Constant::None,
                AstConstant::True => Constant::Bool(true),
                AstConstant::False => Constant::Bool(false),
            }),
            ExprKind::Ellipsis => self.load_const(Constant::Ellipsis),
            ExprKind::Attribute { value, attr, ctx } => {
                self.load_context(expr, *ctx)?;
                self.expr(value)?;
                self.emit(Instruction::LoadAttr(Rc::from(attr.as_str())));
            }
            ExprKind::Subscript { value, slice, ctx } => {
                self.load_context(expr, *ctx)?;
                self.expr(value)?;
                self.slice(slice)?;
                self.emit(Instruction::LoadSubscript);
            }
            ExprKind::Starred { .. } => {
                return Err(self.error(expr.pos, "can't use starred expression here"));
            }
            ExprKind::Name { name, ctx } => {
                self.load_context(expr, *ctx)?;
                self.name_op(name, ExprContext::Load, expr.pos)?;
            }
        }
        Ok(())
    }

    fn load_context(&self, expr: &Expr, ctx: ExprContext) -> CompileResult<()> {
        if ctx == ExprContext::Load {
            Ok(())
        } else {
            Err(self.error(expr.pos, format!("{} in a load position", expr.describe())))
        }
    }

    fn sequence_display(&mut self, elts: &'a [Expr], plain: Instruction, display: Display) -> CompileResult<()> {
        let has_star = elts
            .iter()
            .any(|elt| matches!(elt.kind, ExprKind::Starred { .. }));
        if !has_star {
            self.exprs(elts)?;
            self.emit(plain);
            return Ok(());
        }
        let (start, add, extend) = match display {
            Display::Set => (
                Instruction::BuildSet(0),
                Instruction::SetAdd(1),
                Instruction::SetUpdate(1),
            ),
            Display::List | Display::Tuple => (
                Instruction::BuildList(0),
                Instruction::ListAppend(1),
                Instruction::ListExtend(1),
            ),
        };
        self.emit(start);
        for elt in elts {
            match &elt.kind {
                ExprKind::Starred { value, .. } => {
                    self.expr(value)?;
                    self.emit(extend.clone());
                }
                _ => {
                    self.expr(elt)?;
                    self.emit(add.clone());
                }
            }
        }
        if matches!(display, Display::Tuple) {
            self.emit(Instruction::ListToTuple);
        }
        Ok(())
    }

    fn compare(&mut self, left: &'a Expr, ops: &[CmpOp], comparators: &'a [Expr]) -> CompileResult<()> {
        self.expr(left)?;
        if ops.len() == 1 {
            self.expr(&comparators[0])?;
            self.emit(Instruction::Compare(ops[0]));
            return Ok(());
        }
        let cleanup = self.new_block();
        let end = self.new_block();
        let last = ops.len() - 1;
        for (index, (op, comparator)) in ops.iter().zip(comparators).enumerate() {
            self.expr(comparator)?;
            if index < last {
                self.emit(Instruction::Dup);
                self.emit(Instruction::Rot3);
                self.emit(Instruction::Compare(*op));
                self.emit(Instruction::JumpIfFalseOrPop(cleanup));
            } else {
                self.emit(Instruction::Compare(*op));
                self.emit(Instruction::Jump(end));
            }
        }
        self.use_block(cleanup);
        self.emit(Instruction::Rot2);
        self.emit(Instruction::Pop);
        self.use_block(end);
        Ok(())
    }

    fn call_args(&mut self, args: &'a [Expr], keywords: &'a [Keyword], pos: Pos) -> CompileResult<()> {
        let starred = args
            .iter()
            .any(|arg| matches!(arg.kind, ExprKind::Starred { .. }));
        let double_starred = keywords.iter().any(|keyword| keyword.arg.is_none());

        if !starred && !double_starred {
            self.exprs(args)?;
            if keywords.is_empty() {
                self.emit(Instruction::CallFunction { argc: args.len() });
            } else {
                let mut names = Vec::with_capacity(keywords.len());
                for keyword in keywords {
                    self.expr(&keyword.value)?;
                    names.push(Rc::from(keyword.arg.as_deref().unwrap_or_default()));
                }
                self.set_line(pos);
                self.emit(Instruction::CallFunctionKw {
                    argc: args.len(),
                    names: names.into(),
                });
            }
            return Ok(());
        }

        self.sequence_display(args, Instruction::BuildTuple(args.len()), Display::Tuple)?;
        if !keywords.is_empty() {
            self.emit(Instruction::BuildMap(0));
            for keyword in keywords {
                match &keyword.arg {
                    Some(name) => {
                        self.load_const(Constant::Str(Rc::from(name.as_str())));
                        self.expr(&keyword.value)?;
                        self.emit(Instruction::MapAdd(1));
                    }
                    None => {
                        self.expr(&keyword.value)?;
                        self.emit(Instruction::DictMerge(1));
                    }
                }
            }
        }
        self.set_line(pos);
        self.emit(Instruction::CallFunctionEx {
            kwargs: !keywords.is_empty(),
        });
        Ok(())
    }

    /// Compiles a comprehension as a nested function called with the
    /// outermost iterator.
    fn comprehension(
        &mut self,
        expr: &'a Expr,
        name: &str,
        generators: &'a [Comprehension],
        element: Element<'a>,
    ) -> CompileResult<()> {
        let Some(first) = generators.first() else {
            return Err(self.error(expr.pos, "comprehension without a for clause"));
        };

        self.enter_scope(expr.id, name, CodeKind::Function, expr.pos.line);
        self.unit_mut().argcount = 1;
        debug_assert_eq!(&*self.unit().varnames[0], COMPREHENSION_ARG);
        match element {
            Element::List(_) => self.emit(Instruction::BuildList(0)),
            Element::Set(_) => self.emit(Instruction::BuildSet(0)),
            Element::Dict(..) => self.emit(Instruction::BuildMap(0)),
            Element::Generator(_) => {}
        }
        self.comprehension_loop(generators, 0, element)?;
        if !matches!(element, Element::Generator(_)) {
            self.emit(Instruction::ReturnValue);
        }
        let code = self.leave_scope();

        self.make_function(code, false, false, expr.pos)?;
        self.expr(&first.iter)?;
        self.emit(Instruction::GetIter);
        self.emit(Instruction::CallFunction { argc: 1 });
        Ok(())
    }

    fn comprehension_loop(
        &mut self,
        generators: &'a [Comprehension],
        index: usize,
        element: Element<'a>,
    ) -> CompileResult<()> {
        let generator = &generators[index];
        let head = self.new_block();
        let exit = self.new_block();

        if index == 0 {
            self.emit(Instruction::LoadFast(0));
        } else {
            self.expr(&generator.iter)?;
            self.emit(Instruction::GetIter);
        }
        self.use_block(head);
        self.emit(Instruction::ForIter { exit });
        self.assign(&generator.target)?;
        for condition in &generator.ifs {
            self.expr(condition)?;
            self.emit(Instruction::PopJumpIfFalse(head));
        }

        if index + 1 < generators.len() {
            self.comprehension_loop(generators, index + 1, element)?;
        } else {
            let depth = generators.len() + 1;
            match element {
                Element::List(elt) => {
                    self.expr(elt)?;
                    self.emit(Instruction::ListAppend(depth));
                }
                Element::Set(elt) => {
                    self.expr(elt)?;
                    self.emit(Instruction::SetAdd(depth));
                }
                Element::Dict(key, value) => {
                    self.expr(key)?;
                    self.expr(value)?;
                    self.emit(Instruction::MapAdd(depth));
                }
                Element::Generator(elt) => {
                    self.expr(elt)?;
                    let resume = self.new_block();
                    self.emit(Instruction::YieldValue { resume });
                    self.use_block(resume);
                    self.emit(Instruction::Pop);
                }
            }
        }
        self.emit(Instruction::Jump(head));
        self.use_block(exit);
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Display {
    Set,
    List,
    Tuple,
}

#[derive(Clone, Copy)]
enum Element<'a> {
    List(&'a Expr),
    Set(&'a Expr),
    Dict(&'a Expr, &'a Expr),
    Generator(&'a Expr),
}

fn is_constant_true(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::NameConstant(AstConstant::True) => true,
        ExprKind::Num(Number::Int(value)) => *value != 0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn compile_exec(source: &str) -> Rc<CodeObject> {
        compile_source(source, "<test>", Mode::Exec).expect("valid program")
    }

    fn nested<'c>(code: &'c CodeObject, name: &str) -> &'c Rc<CodeObject> {
        code.blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .find_map(|instruction| match instruction {
                Instruction::MakeFunction { code, .. } | Instruction::BuildClass { code, .. }
                    if &*code.name == name =>
                {
                    Some(code)
                }
                _ => None,
            })
            .unwrap_or_else(|| panic!("no nested unit named {name}"))
    }

    fn listing(code: &CodeObject) -> Vec<String> {
        code.blocks
            .iter()
            .flat_map(|block| &block.instructions)
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn names_compile_by_scope() {
        let code = compile_exec(indoc! {"
            g = 1
            def f(a):
                b = a + g
                def inner():
                    return b
                return inner
        "});
        let f = nested(&code, "f");
        assert_eq!(f.varnames.len(), 2);
        assert_eq!(&*f.cellvars[0], "b");
        let body = listing(f);
        assert!(body.contains(&"LoadFast(0)".to_string()), "{body:?}");
        assert!(body.contains(&"LoadGlobal(\"g\")".to_string()), "{body:?}");
        assert!(body.contains(&"StoreDeref(0)".to_string()), "{body:?}");
        let inner = nested(f, "inner");
        assert_eq!(&*inner.freevars[0], "b");
        assert_eq!(&*inner.qualname, "f.<locals>.inner");
        assert!(listing(inner).contains(&"LoadDeref(0)".to_string()));
        assert!(listing(&code).contains(&"StoreName(\"g\")".to_string()));
    }

    #[test]
    fn every_unit_ends_in_a_terminal_instruction() {
        let code = compile_exec(indoc! {"
            def f(x):
                while x:
                    if x > 3:
                        break
                    x -= 1
                else:
                    return 2
            for i in range(3):
                try:
                    f(i)
                except ValueError as e:
                    continue
                finally:
                    pass
        "});
        code.walk(&mut |unit| {
            let last = unit.blocks.last().expect("at least one block");
            assert!(last.is_terminated(), "{}", unit.disassemble());
            for block in &unit.blocks {
                for instruction in &block.instructions {
                    if let Instruction::Jump(target) | Instruction::PopJumpIfFalse(target) = instruction {
                        assert!(*target < unit.blocks.len());
                    }
                }
            }
        });
    }

    #[test]
    fn yield_ends_a_block() {
        let code = compile_exec("def gen():\n    x = 1\n    yield x\n    yield x + 1\n");
        let gen_code = nested(&code, "gen");
        assert!(gen_code.is_generator);
        let resumes = gen_code
            .blocks
            .iter()
            .enumerate()
            .filter_map(|(index, block)| match block.instructions.last() {
                Some(Instruction::YieldValue { resume }) => Some((index, *resume)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(resumes.len(), 2);
        for (index, resume) in resumes {
            assert_eq!(resume, index + 1);
        }
    }

    #[test]
    fn comprehensions_become_nested_units() {
        let code = compile_exec("squares = [x * x for x in range(4) if x % 2]\n");
        let comp = nested(&code, "<listcomp>");
        assert_eq!(comp.argcount, 1);
        assert_eq!(&*comp.varnames[0], ".0");
        assert!(listing(comp).contains(&"ListAppend(2)".to_string()));
        let genexpr = compile_exec("total = sum(x for x in range(4))\n");
        assert!(nested(&genexpr, "<genexpr>").is_generator);
    }

    #[test]
    fn class_body_gets_class_cell_for_super() {
        let code = compile_exec(indoc! {"
            class A:
                def m(self):
                    return super().m()
        "});
        let class_code = nested(&code, "A");
        assert_eq!(class_code.kind, CodeKind::Class);
        assert_eq!(&*class_code.cellvars[0], "__class__");
        let method = nested(class_code, "m");
        assert_eq!(&*method.qualname, "A.m");
        assert_eq!(&*method.freevars[0], "__class__");
        assert!(listing(class_code).contains(&"LoadClosure(0)".to_string()));
    }

    #[test]
    fn captured_parameters_are_copied_into_cells() {
        let code = compile_exec("def f(a, b):\n    return lambda: b\n");
        let f = nested(&code, "f");
        assert_eq!(f.cell_params, vec![(0, 1)]);
    }

    #[test]
    fn starred_call_uses_ex_form() {
        let code = compile_exec("f(1, *rest, k=2, **extra)\n");
        let body = listing(&code);
        assert!(body.contains(&"CallFunctionEx { kwargs: true }".to_string()), "{body:?}");
        let plain = listing(&compile_exec("f(1, k=2)\n"));
        assert!(plain.iter().any(|line| line.starts_with("CallFunctionKw 1")), "{plain:?}");
    }

    #[test]
    fn rejects_bad_starred_targets() {
        for (source, message) in [
            ("*a, *b = c\n", "two starred expressions"),
            ("print(*a)\nx = *a\n", "can't use starred expression here"),
        ] {
            let err = compile_source(source, "<test>", Mode::Exec).expect_err(source);
            assert!(err.message.contains(message), "{source}: {}", err.message);
        }
    }

    #[test]
    fn eval_mode_returns_the_expression() {
        let code = compile_source("1 + 2", "<eval>", Mode::Eval).expect("valid expression");
        assert_eq!(
            listing(&code),
            vec!["LoadConst 1", "LoadConst 2", "Binary +", "ReturnValue"]
        );
    }

    #[test]
    fn class_bodies_load_module_names_by_name() {
        let code = compile_exec(indoc! {"
            x = 'module'
            class C:
                x = 'class'
                y = x
        "});
        let body = listing(nested(&code, "C"));
        assert!(body.contains(&"LoadName(\"x\")".to_string()), "{body:?}");
        assert!(!body.iter().any(|line| line.starts_with("LoadGlobal")), "{body:?}");
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let deep_block = (0..120)
            .map(|level| format!("{}if x:\n", " ".repeat(level)))
            .collect::<String>()
            + &" ".repeat(120)
            + "pass\n";
        for (source, message) in [
            (format!("x = {}1\n", "1+".repeat(1000)), "too many nested expressions"),
            (format!("x = {}x\n", "not ".repeat(1000)), "too many nested expressions"),
            (format!("x = {}1{}\n", "(".repeat(300), ")".repeat(300)), "too many nested parentheses"),
            (deep_block, "too many levels of indentation"),
        ] {
            let err = compile_source(&source, "<test>", Mode::Exec).expect_err("nesting limit");
            assert!(err.message.contains(message), "{}", err.message);
        }
        compile_exec(&format!("x = {}1\n", "1+".repeat(40)));
    }
}
