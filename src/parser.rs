//! Table-driven parser producing a concrete syntax tree.
//!
//! The parser keeps an explicit stack of `(rule, DFA state, partial node)`
//! entries and is fed one token at a time, so nesting depth in the source
//! never turns into host recursion.

use log::trace;

use crate::error::{CompileError, CompileErrorKind, CompileResult};
use crate::grammar::{Grammar, Label, Symbol, grammar};
use crate::lexer::{Pos, Token, TokenKind, Tokenizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Terminal(TokenKind),
    Rule(Symbol),
}

/// One grammar match. Terminals carry their source text; rules carry their
/// children in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<'a> {
    pub kind: NodeKind,
    pub value: &'a str,
    pub children: Vec<Node<'a>>,
    pub start: Pos,
}

impl<'a> Node<'a> {
    fn rule(symbol: Symbol, start: Pos) -> Self {
        Self {
            kind: NodeKind::Rule(symbol),
            value: "",
            children: Vec::new(),
            start,
        }
    }

    fn terminal(token: &Token<'a>) -> Self {
        Self {
            kind: NodeKind::Terminal(token.kind),
            value: token.text,
            children: Vec::new(),
            start: token.start,
        }
    }

    pub fn symbol(&self) -> Option<Symbol> {
        match self.kind {
            NodeKind::Rule(symbol) => Some(symbol),
            NodeKind::Terminal(_) => None,
        }
    }

    pub fn is(&self, symbol: Symbol) -> bool {
        self.kind == NodeKind::Rule(symbol)
    }

    pub fn is_token(&self, kind: TokenKind) -> bool {
        self.kind == NodeKind::Terminal(kind)
    }

    /// True for a terminal whose text is `text` (keywords and operators).
    pub fn is_text(&self, text: &str) -> bool {
        matches!(self.kind, NodeKind::Terminal(_)) && self.value == text
    }

    pub fn child(&self, index: usize) -> &Node<'a> {
        &self.children[index]
    }

    /// Renders the tree as an indented outline, one node per line.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        self.write_outline(0, &mut out);
        out
    }

    fn write_outline(&self, depth: usize, out: &mut String) {
        out.push_str(&"  ".repeat(depth));
        match self.kind {
            NodeKind::Rule(symbol) => out.push_str(symbol.name()),
            NodeKind::Terminal(kind) => {
                out.push_str(kind.grammar_name());
                if !self.value.is_empty() {
                    out.push_str(&format!(" {:?}", self.value));
                }
            }
        }
        out.push('\n');
        for child in &self.children {
            child.write_outline(depth + 1, out);
        }
    }
}

/// Which start rule a compile uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// A module: `file_input`.
    Exec,
    /// A single expression: `eval_input`.
    Eval,
    /// One interactive statement: `single_input`.
    Single,
}

impl Mode {
    pub fn start_symbol(self) -> Symbol {
        match self {
            Self::Exec => Symbol::FileInput,
            Self::Eval => Symbol::EvalInput,
            Self::Single => Symbol::SingleInput,
        }
    }
}

struct StackEntry<'a> {
    symbol: Symbol,
    state: usize,
    node: Node<'a>,
}

pub struct Parser<'a> {
    grammar: &'static Grammar,
    filename: &'a str,
    stack: Vec<StackEntry<'a>>,
    root: Option<Node<'a>>,
}

impl<'a> Parser<'a> {
    pub fn new(start: Symbol, filename: &'a str) -> Self {
        Self {
            grammar: grammar(),
            filename,
            stack: vec![StackEntry {
                symbol: start,
                state: 0,
                node: Node::rule(start, Pos::new(1, 0)),
            }],
            root: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.stack.is_empty()
    }

    /// Feeds one token. Returns `Ok(true)` once the start rule is complete.
    pub fn add_token(&mut self, token: &Token<'a>) -> CompileResult<bool> {
        let Some(label) = self.grammar.classify(token) else {
            return Err(self.error(token, "invalid syntax"));
        };

        loop {
            let Some(top) = self.stack.last() else {
                return Err(self.error(token, "invalid syntax"));
            };
            let dfa = self.grammar.dfa(top.symbol);
            let state = &dfa.states[top.state];

            let mut pushed = false;
            for &(arc_label, next) in &state.arcs {
                if arc_label == label {
                    self.shift(token, next);
                    return Ok(self.pop_completed());
                }
                if let Label::Nonterminal(symbol) = self.grammar.label(arc_label)
                    && self.grammar.dfa(symbol).first.contains(&label)
                {
                    self.push(symbol, next, token.start);
                    pushed = true;
                    break;
                }
            }
            if pushed {
                continue;
            }

            if state.is_final {
                self.pop();
                if self.stack.is_empty() {
                    return Err(self.error(token, "invalid syntax"));
                }
                continue;
            }

            return Err(self.unexpected(token, &state.arcs));
        }
    }

    fn shift(&mut self, token: &Token<'a>, next: usize) {
        if let Some(top) = self.stack.last_mut() {
            top.state = next;
            top.node.children.push(Node::terminal(token));
        }
    }

    fn push(&mut self, symbol: Symbol, next: usize, start: Pos) {
        if let Some(top) = self.stack.last_mut() {
            top.state = next;
        }
        self.stack.push(StackEntry {
            symbol,
            state: 0,
            node: Node::rule(symbol, start),
        });
    }

    fn pop(&mut self) {
        let Some(entry) = self.stack.pop() else {
            return;
        };
        match self.stack.last_mut() {
            Some(parent) => parent.node.children.push(entry.node),
            None => self.root = Some(entry.node),
        }
    }

    /// Pops every entry sitting in an accept-only state.
    fn pop_completed(&mut self) -> bool {
        while let Some(top) = self.stack.last() {
            let dfa = self.grammar.dfa(top.symbol);
            if !dfa.states[top.state].is_accept_only() {
                return false;
            }
            self.pop();
        }
        true
    }

    fn unexpected(&self, token: &Token<'a>, arcs: &[(usize, usize)]) -> CompileError {
        let expects_indent = arcs.iter().any(|(label, _)| {
            self.grammar.label(*label) == Label::Token(TokenKind::Indent)
        });
        match token.kind {
            TokenKind::Indent => CompileError::new(
                CompileErrorKind::Indentation,
                "unexpected indent",
                self.filename,
                token.start,
            ),
            _ if expects_indent => CompileError::new(
                CompileErrorKind::Indentation,
                "expected an indented block",
                self.filename,
                token.start,
            ),
            TokenKind::EndMarker => self.error(token, "unexpected EOF while parsing"),
            _ => self.error(token, "invalid syntax"),
        }
    }

    fn error(&self, token: &Token<'a>, message: &str) -> CompileError {
        CompileError::syntax(message, self.filename, token.start)
    }

    pub fn finish(self) -> Option<Node<'a>> {
        self.root
    }
}

/// Tokenizes and parses `source` into a CST rooted at the mode's start rule.
pub fn parse<'a>(source: &'a str, filename: &'a str, mode: Mode) -> CompileResult<Node<'a>> {
    let mut parser = Parser::new(mode.start_symbol(), filename);
    let mut last_pos = Pos::new(1, 0);

    for token in Tokenizer::new(source, filename) {
        let token = token?;
        if token.kind.is_trivia() {
            continue;
        }
        last_pos = token.start;
        if parser.is_done() {
            if mode == Mode::Single && matches!(token.kind, TokenKind::Dedent | TokenKind::EndMarker) {
                continue;
            }
            return Err(CompileError::syntax(
                "multiple statements found while compiling a single statement",
                filename,
                token.start,
            ));
        }
        if mode == Mode::Single && token.kind == TokenKind::EndMarker {
            // An interactive compound statement ends at the blank line the
            // REPL would have sent.
            let newline = Token::new(TokenKind::Newline, "", token.start, token.start, token.line);
            if parser.add_token(&newline)? {
                continue;
            }
        }
        if parser.add_token(&token)? {
            trace!("parsed {filename} as {}", mode.start_symbol().name());
        }
    }

    parser
        .finish()
        .ok_or_else(|| CompileError::syntax("unexpected EOF while parsing", filename, last_pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn parses_a_module_into_file_input() {
        let source = indoc! {"
            def add(a, b=2):
                return a + b
            print(add(1))
        "};
        let root = parse(source, "<test>", Mode::Exec).expect("valid source");
        assert!(root.is(Symbol::FileInput));
        let statements = root.children.iter().filter(|child| child.is(Symbol::Stmt)).count();
        assert_eq!(statements, 2);
        assert!(root.children.last().is_some_and(|node| node.is_token(TokenKind::EndMarker)));
    }

    #[test]
    fn keeps_every_production_in_the_tree() {
        let root = parse("x\n", "<test>", Mode::Eval).expect("valid expression");
        let outline = root.outline();
        for rule in ["eval_input", "testlist", "test", "or_test", "comparison", "atom_expr", "atom"] {
            assert!(outline.contains(rule), "missing {rule} in\n{outline}");
        }
        assert!(outline.contains("NAME \"x\""));
    }

    #[test]
    fn reports_line_and_column_of_bad_token() {
        let err = parse("x = (1 +)\n", "<test>", Mode::Exec).expect_err("invalid source");
        assert_eq!(err.kind, CompileErrorKind::Syntax);
        assert_eq!((err.line, err.column), (1, 8));
        assert_eq!(err.message, "invalid syntax");
    }

    #[test]
    fn missing_block_is_an_indentation_error() {
        let err = parse("if x:\npass\n", "<test>", Mode::Exec).expect_err("missing block");
        assert_eq!(err.kind, CompileErrorKind::Indentation);
        assert_eq!(err.message, "expected an indented block");
    }

    #[test]
    fn unexpected_indent() {
        let err = parse("x = 1\n    y = 2\n", "<test>", Mode::Exec).expect_err("stray indent");
        assert_eq!(err.kind, CompileErrorKind::Indentation);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn single_mode_accepts_compound_statement_without_blank_line() {
        let root = parse("if x:\n    y\n", "<test>", Mode::Single).expect("valid statement");
        assert!(root.is(Symbol::SingleInput));
        let err = parse("x = 1\ny = 2\n", "<test>", Mode::Single).expect_err("two statements");
        assert!(err.message.contains("multiple statements"));
    }

    #[test]
    fn deep_nesting_does_not_recurse() {
        let depth = 150;
        let source = format!("x = {}1{}\n", "(".repeat(depth), ")".repeat(depth));
        let root = parse(&source, "<test>", Mode::Exec).expect("deeply nested expression");
        assert!(root.is(Symbol::FileInput));
    }
}
