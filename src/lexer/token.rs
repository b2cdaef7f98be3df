use std::fmt;

/// A source position: 1-based line, 0-based byte column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
}

impl Pos {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TokenKind {
    Name,
    Number,
    String,
    Op,

    // Structural
    Newline,
    Nl,
    Comment,
    Indent,
    Dedent,
    EndMarker,
}

impl TokenKind {
    /// Name used for terminals in the grammar text.
    pub fn grammar_name(self) -> &'static str {
        match self {
            Self::Name => "NAME",
            Self::Number => "NUMBER",
            Self::String => "STRING",
            Self::Op => "OP",
            Self::Newline => "NEWLINE",
            Self::Nl => "NL",
            Self::Comment => "COMMENT",
            Self::Indent => "INDENT",
            Self::Dedent => "DEDENT",
            Self::EndMarker => "ENDMARKER",
        }
    }

    pub fn from_grammar_name(name: &str) -> Option<Self> {
        Some(match name {
            "NAME" => Self::Name,
            "NUMBER" => Self::Number,
            "STRING" => Self::String,
            "OP" => Self::Op,
            "NEWLINE" => Self::Newline,
            "NL" => Self::Nl,
            "COMMENT" => Self::Comment,
            "INDENT" => Self::Indent,
            "DEDENT" => Self::Dedent,
            "ENDMARKER" => Self::EndMarker,
            _ => return None,
        })
    }

    /// Tokens the parser never sees.
    pub fn is_trivia(self) -> bool {
        matches!(self, Self::Nl | Self::Comment)
    }
}

/// One lexical unit borrowed from the source text.
///
/// `line` is the physical line the token starts on, kept for error reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    pub start: Pos,
    pub end: Pos,
    pub line: &'a str,
}

impl<'a> Token<'a> {
    pub fn new(kind: TokenKind, text: &'a str, start: Pos, end: Pos, line: &'a str) -> Self {
        Self {
            kind,
            text,
            start,
            end,
            line,
        }
    }
}
