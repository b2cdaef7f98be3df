//! Front-end error taxonomy shared by the tokenizer, parser, AST builder,
//! symbol table and code generator.

use std::fmt;

use thiserror::Error;

use crate::lexer::Pos;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileErrorKind {
    Token,
    Indentation,
    Syntax,
}

impl CompileErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Token => "TokenError",
            Self::Indentation => "IndentationError",
            Self::Syntax => "SyntaxError",
        }
    }
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A failure in one of the four front-end stages.
///
/// Any of these aborts compilation of the whole unit; nothing is cached.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message} (\"{filename}\", line {line}, column {column})")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub filename: String,
    pub line: usize,
    pub column: usize,
}

impl CompileError {
    pub fn new(
        kind: CompileErrorKind,
        message: impl Into<String>,
        filename: &str,
        pos: Pos,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            filename: filename.to_string(),
            line: pos.line,
            column: pos.column,
        }
    }

    pub fn token(message: impl Into<String>, filename: &str, pos: Pos) -> Self {
        Self::new(CompileErrorKind::Token, message, filename, pos)
    }

    pub fn indentation(message: impl Into<String>, filename: &str, pos: Pos) -> Self {
        Self::new(CompileErrorKind::Indentation, message, filename, pos)
    }

    pub fn syntax(message: impl Into<String>, filename: &str, pos: Pos) -> Self {
        Self::new(CompileErrorKind::Syntax, message, filename, pos)
    }
}

pub type CompileResult<T> = Result<T, CompileError>;
