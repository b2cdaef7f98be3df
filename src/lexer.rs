//! Line-oriented tokenizer.
//!
//! Source text is consumed one physical line at a time. The state carried
//! between lines is the indent stack, the bracket depth, the backslash
//! continuation flag and a pending (not yet terminated) string literal.
//! Tokens are produced lazily through the `Iterator` impl.

use std::collections::VecDeque;

use crate::error::{CompileError, CompileResult};

mod token;

pub use token::{Pos, Token, TokenKind};

const TAB_SIZE: usize = 8;
const MAX_INDENT_LEVELS: usize = 100;
const MAX_PAREN_DEPTH: usize = 200;

const OPERATORS_3: [&str; 5] = ["**=", "//=", ">>=", "<<=", "..."];
const OPERATORS_2: [&str; 18] = [
    "**", "//", "<<", ">>", "<=", ">=", "==", "!=", "->", "+=", "-=", "*=", "/=", "%=", "&=", "|=",
    "^=", "@=",
];
const OPERATORS_1: &str = "+-*/%&|^~<>()[]{},:;.=@";

/// A string literal whose terminator has not been seen yet.
#[derive(Debug, Clone, Copy)]
struct PendingString {
    start_offset: usize,
    start: Pos,
    terminator: &'static str,
    triple: bool,
}

pub struct Tokenizer<'a> {
    source: &'a str,
    filename: &'a str,
    offset: usize,
    line_number: usize,
    paren_depth: usize,
    continued: bool,
    indents: Vec<usize>,
    pending_string: Option<PendingString>,
    queue: VecDeque<Token<'a>>,
    done: bool,
}

impl<'a> Tokenizer<'a> {
    pub fn new(source: &'a str, filename: &'a str) -> Self {
        let source = source.strip_prefix('\u{feff}').unwrap_or(source);
        Self {
            source,
            filename,
            offset: 0,
            line_number: 0,
            paren_depth: 0,
            continued: false,
            indents: vec![0],
            pending_string: None,
            queue: VecDeque::new(),
            done: false,
        }
    }

    fn emit(&mut self, kind: TokenKind, text: &'a str, start: Pos, end: Pos, line: &'a str) {
        self.queue.push_back(Token::new(kind, text, start, end, line));
    }

    fn read_line(&mut self) -> CompileResult<()> {
        if self.offset >= self.source.len() {
            return self.finish_input();
        }

        let line_start = self.offset;
        let line_end = self.source[line_start..]
            .find('\n')
            .map_or(self.source.len(), |index| line_start + index + 1);
        let line = &self.source[line_start..line_end];
        self.offset = line_end;
        self.line_number += 1;

        let mut column = 0;
        if let Some(pending) = self.pending_string.take() {
            match find_string_end(line, 0, pending.terminator) {
                Some(end) => {
                    let text = &self.source[pending.start_offset..line_start + end];
                    let end_pos = Pos::new(self.line_number, end);
                    self.emit(TokenKind::String, text, pending.start, end_pos, line);
                    column = end;
                }
                None => {
                    if !pending.triple && !ends_with_continuation(line) {
                        return Err(CompileError::token(
                            "EOL while scanning string literal",
                            self.filename,
                            pending.start,
                        ));
                    }
                    self.pending_string = Some(pending);
                    return Ok(());
                }
            }
        } else if self.paren_depth == 0 && !self.continued {
            let (indent, index) = measure_indent(line);
            let start = Pos::new(self.line_number, index);
            match line[index..].chars().next() {
                None => {
                    self.emit(TokenKind::Nl, "", start, start, line);
                    return Ok(());
                }
                Some('#') => {
                    let comment_end = line_content_end(line);
                    let end = Pos::new(self.line_number, comment_end);
                    self.emit(TokenKind::Comment, &line[index..comment_end], start, end, line);
                    let nl_end = Pos::new(self.line_number, line.len());
                    self.emit(TokenKind::Nl, &line[comment_end..], end, nl_end, line);
                    return Ok(());
                }
                Some('\r' | '\n') => {
                    let end = Pos::new(self.line_number, line.len());
                    self.emit(TokenKind::Nl, &line[index..], start, end, line);
                    return Ok(());
                }
                Some(_) => {}
            }

            let top = self.current_indent();
            if indent > top {
                if self.indents.len() > MAX_INDENT_LEVELS {
                    return Err(CompileError::indentation(
                        "too many levels of indentation",
                        self.filename,
                        start,
                    ));
                }
                self.indents.push(indent);
                self.emit(TokenKind::Indent, &line[..index], Pos::new(self.line_number, 0), start, line);
            }
            while indent < self.current_indent() {
                if !self.indents.contains(&indent) {
                    return Err(CompileError::indentation(
                        "unindent does not match any outer indentation level",
                        self.filename,
                        start,
                    ));
                }
                self.indents.pop();
                self.emit(TokenKind::Dedent, "", start, start, line);
            }
            column = index;
        } else {
            self.continued = false;
        }

        self.scan_line(line, line_start, column)
    }

    fn current_indent(&self) -> usize {
        self.indents.last().copied().unwrap_or(0)
    }

    fn scan_line(&mut self, line: &'a str, line_start: usize, mut column: usize) -> CompileResult<()> {
        let bytes = line.as_bytes();
        let mut saw_newline = false;
        let mut saw_token = false;

        while column < line.len() {
            while column < line.len() && matches!(bytes[column], b' ' | b'\t' | b'\x0c') {
                column += 1;
            }
            let Some(ch) = line[column..].chars().next() else {
                break;
            };
            let start = Pos::new(self.line_number, column);

            match ch {
                '#' => {
                    let end = line_content_end(line);
                    let end_pos = Pos::new(self.line_number, end);
                    self.emit(TokenKind::Comment, &line[column..end], start, end_pos, line);
                    column = end;
                }
                '\r' | '\n' => {
                    let kind = if self.paren_depth > 0 {
                        TokenKind::Nl
                    } else {
                        TokenKind::Newline
                    };
                    let end = Pos::new(self.line_number, line.len());
                    self.emit(kind, &line[column..], start, end, line);
                    column = line.len();
                    saw_newline = true;
                }
                '\\' => {
                    let rest = &line[column + 1..];
                    if rest == "\n" || rest == "\r\n" {
                        self.continued = true;
                        return Ok(());
                    }
                    return Err(CompileError::token(
                        "unexpected character after line continuation character",
                        self.filename,
                        start,
                    ));
                }
                c if c.is_ascii_digit()
                    || c == '.' && bytes.get(column + 1).is_some_and(u8::is_ascii_digit) =>
                {
                    let end = self.scan_number(line, column)?;
                    let end_pos = Pos::new(self.line_number, end);
                    self.emit(TokenKind::Number, &line[column..end], start, end_pos, line);
                    column = end;
                    saw_token = true;
                }
                c if c == '\'' || c == '"' || is_string_prefix(&line[column..]) => {
                    match self.scan_string(line, line_start, column)? {
                        Some(end) => {
                            let end_pos = Pos::new(self.line_number, end);
                            self.emit(TokenKind::String, &line[column..end], start, end_pos, line);
                            column = end;
                            saw_token = true;
                        }
                        None => return Ok(()),
                    }
                }
                c if c.is_alphabetic() || c == '_' => {
                    let end = line[column..]
                        .char_indices()
                        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_'))
                        .map_or(line.len(), |(index, _)| column + index);
                    let end_pos = Pos::new(self.line_number, end);
                    self.emit(TokenKind::Name, &line[column..end], start, end_pos, line);
                    column = end;
                    saw_token = true;
                }
                _ => {
                    let Some(width) = operator_width(&line[column..]) else {
                        return Err(CompileError::token(
                            format!("invalid character '{ch}' in source"),
                            self.filename,
                            start,
                        ));
                    };
                    match ch {
                        '(' | '[' | '{' => {
                            if self.paren_depth >= MAX_PAREN_DEPTH {
                                return Err(CompileError::token(
                                    "too many nested parentheses",
                                    self.filename,
                                    start,
                                ));
                            }
                            self.paren_depth += 1;
                        }
                        ')' | ']' | '}' => self.paren_depth = self.paren_depth.saturating_sub(1),
                        _ => {}
                    }
                    let end = column + width;
                    let end_pos = Pos::new(self.line_number, end);
                    self.emit(TokenKind::Op, &line[column..end], start, end_pos, line);
                    column = end;
                    saw_token = true;
                }
            }
        }

        if !saw_newline && saw_token && self.paren_depth == 0 && !self.continued {
            let end = Pos::new(self.line_number, line.len());
            self.emit(TokenKind::Newline, "", end, end, line);
        }
        Ok(())
    }

    fn scan_number(&self, line: &str, start: usize) -> CompileResult<usize> {
        let bytes = line.as_bytes();
        let mut index = start;
        let radix_prefix = bytes.get(start) == Some(&b'0')
            && bytes
                .get(start + 1)
                .is_some_and(|b| matches!(b, b'x' | b'X' | b'o' | b'O' | b'b' | b'B'));

        if radix_prefix {
            let radix = match bytes[start + 1] {
                b'x' | b'X' => 16,
                b'o' | b'O' => 8,
                _ => 2,
            };
            index += 2;
            let digits_start = index;
            while index < bytes.len()
                && (bytes[index] == b'_' || (bytes[index] as char).is_digit(radix))
            {
                index += 1;
            }
            if index == digits_start {
                return Err(CompileError::token(
                    "invalid number literal",
                    self.filename,
                    Pos::new(self.line_number, start),
                ));
            }
        } else {
            while index < bytes.len() && (bytes[index].is_ascii_digit() || bytes[index] == b'_') {
                index += 1;
            }
            if bytes.get(index) == Some(&b'.') {
                index += 1;
                while index < bytes.len() && (bytes[index].is_ascii_digit() || bytes[index] == b'_') {
                    index += 1;
                }
            }
            if matches!(bytes.get(index), Some(b'e' | b'E')) {
                let mut exponent = index + 1;
                if matches!(bytes.get(exponent), Some(b'+' | b'-')) {
                    exponent += 1;
                }
                if bytes.get(exponent).is_some_and(u8::is_ascii_digit) {
                    index = exponent;
                    while index < bytes.len() && bytes[index].is_ascii_digit() {
                        index += 1;
                    }
                }
            }
        }

        match line[index..].chars().next() {
            Some('j' | 'J') => Err(CompileError::token(
                "imaginary literals are not supported",
                self.filename,
                Pos::new(self.line_number, start),
            )),
            Some(c) if c.is_alphanumeric() || c == '_' => Err(CompileError::token(
                "invalid number literal",
                self.filename,
                Pos::new(self.line_number, start),
            )),
            _ => Ok(index),
        }
    }

    /// Scans a string literal starting at `start` (prefix included).
    ///
    /// Returns `None` when the literal continues on the next line; the pending
    /// state is recorded and the rest of the line is consumed.
    fn scan_string(&mut self, line: &str, line_start: usize, start: usize) -> CompileResult<Option<usize>> {
        let bytes = line.as_bytes();
        let mut quote_index = start;
        while bytes[quote_index] != b'\'' && bytes[quote_index] != b'"' {
            quote_index += 1;
        }
        let quote = bytes[quote_index];
        let triple = bytes.get(quote_index + 1) == Some(&quote) && bytes.get(quote_index + 2) == Some(&quote);
        let terminator: &'static str = match (quote, triple) {
            (b'\'', true) => "'''",
            (b'"', true) => "\"\"\"",
            (b'\'', false) => "'",
            _ => "\"",
        };
        let body_start = quote_index + terminator.len();

        if let Some(end) = find_string_end(line, body_start, terminator) {
            return Ok(Some(end));
        }

        if !triple && !ends_with_continuation(line) {
            return Err(self.eol_error(start));
        }
        self.pending_string = Some(PendingString {
            start_offset: line_start + start,
            start: Pos::new(self.line_number, start),
            terminator,
            triple,
        });
        Ok(None)
    }

    fn eol_error(&self, column: usize) -> CompileError {
        CompileError::token(
            "EOL while scanning string literal",
            self.filename,
            Pos::new(self.line_number, column),
        )
    }

    fn finish_input(&mut self) -> CompileResult<()> {
        let end = Pos::new(self.line_number + 1, 0);
        if let Some(pending) = self.pending_string {
            return Err(CompileError::token(
                "EOF in multi-line string",
                self.filename,
                pending.start,
            ));
        }
        if self.paren_depth > 0 || self.continued {
            return Err(CompileError::token(
                "EOF in multi-line statement",
                self.filename,
                end,
            ));
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.emit(TokenKind::Dedent, "", end, end, "");
        }
        self.emit(TokenKind::EndMarker, "", end, end, "");
        self.done = true;
        Ok(())
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = CompileResult<Token<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(token) = self.queue.pop_front() {
                return Some(Ok(token));
            }
            if self.done {
                return None;
            }
            if let Err(error) = self.read_line() {
                self.done = true;
                self.queue.clear();
                return Some(Err(error));
            }
        }
    }
}

/// Column of the first non-blank character and its byte index.
fn measure_indent(line: &str) -> (usize, usize) {
    let mut column = 0;
    for (index, byte) in line.bytes().enumerate() {
        match byte {
            b' ' => column += 1,
            b'\t' => column = (column / TAB_SIZE + 1) * TAB_SIZE,
            b'\x0c' => column = 0,
            _ => return (column, index),
        }
    }
    (column, line.len())
}

fn line_content_end(line: &str) -> usize {
    line.trim_end_matches(['\r', '\n']).len()
}

fn ends_with_continuation(line: &str) -> bool {
    line.trim_end_matches(['\r', '\n']).ends_with('\\') && line.ends_with('\n')
}

fn is_string_prefix(text: &str) -> bool {
    let bytes = text.as_bytes();
    let prefix_len = bytes
        .iter()
        .take(3)
        .take_while(|b| matches!(b, b'r' | b'R' | b'b' | b'B' | b'u' | b'U' | b'f' | b'F'))
        .count();
    prefix_len > 0 && prefix_len <= 2 && matches!(bytes.get(prefix_len), Some(b'\'' | b'"'))
}

/// Index just past `terminator` in `line[from..]`, skipping escaped characters.
fn find_string_end(line: &str, from: usize, terminator: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut index = from;
    while index < bytes.len() {
        if bytes[index] == b'\\' {
            index += 1 + bytes.get(index + 1).map_or(1, |&lead| utf8_width(lead));
            continue;
        }
        if bytes[index..].starts_with(terminator.as_bytes()) {
            return Some(index + terminator.len());
        }
        index += utf8_width(bytes[index]);
    }
    None
}

/// Byte length of the UTF-8 sequence starting with `lead`.
fn utf8_width(lead: u8) -> usize {
    match lead {
        0xf0.. => 4,
        0xe0.. => 3,
        0xc0.. => 2,
        _ => 1,
    }
}

fn operator_width(text: &str) -> Option<usize> {
    if OPERATORS_3.iter().any(|op| text.starts_with(op)) {
        return Some(3);
    }
    if OPERATORS_2.iter().any(|op| text.starts_with(op)) {
        return Some(2);
    }
    let first = text.chars().next()?;
    OPERATORS_1.contains(first).then_some(1)
}

pub fn tokenize<'a>(source: &'a str, filename: &'a str) -> CompileResult<Vec<Token<'a>>> {
    Tokenizer::new(source, filename).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;
    use indoc::indoc;

    fn kinds_and_text(source: &str) -> Vec<(TokenKind, String)> {
        tokenize(source, "<test>")
            .expect("tokenize should succeed")
            .into_iter()
            .map(|token| (token.kind, token.text.to_string()))
            .collect()
    }

    #[test]
    fn test_simple_program() {
        let input = indoc! {"
            def fn():
                n = 4 + 4
                print(n)
            fn()
        "};
        let actual = tokenize(input, "<test>")
            .expect("tokenize should succeed")
            .into_iter()
            .map(|token| token.kind)
            .collect::<Vec<_>>();
        use TokenKind::*;
        let expected = vec![
            Name, Name, Op, Op, Op, Newline, Indent, Name, Op, Number, Op, Number, Newline, Name,
            Op, Name, Op, Newline, Dedent, Name, Op, Op, Newline, EndMarker,
        ];
        assert_eq!(actual, expected);
    }

    #[test]
    fn comments_and_blank_lines_become_nl_tokens() {
        let tokens = kinds_and_text("x = 1  # one\n\n# lone\ny = 2\n");
        assert_eq!(
            tokens,
            vec![
                (TokenKind::Name, "x".into()),
                (TokenKind::Op, "=".into()),
                (TokenKind::Number, "1".into()),
                (TokenKind::Comment, "# one".into()),
                (TokenKind::Newline, "\n".into()),
                (TokenKind::Nl, "\n".into()),
                (TokenKind::Comment, "# lone".into()),
                (TokenKind::Nl, "\n".into()),
                (TokenKind::Name, "y".into()),
                (TokenKind::Op, "=".into()),
                (TokenKind::Number, "2".into()),
                (TokenKind::Newline, "\n".into()),
                (TokenKind::EndMarker, "".into()),
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_nl() {
        let tokens = kinds_and_text("f(1,\n  2)\n");
        let kinds = tokens.iter().map(|(kind, _)| *kind).collect::<Vec<_>>();
        assert_eq!(kinds.iter().filter(|kind| **kind == TokenKind::Nl).count(), 1);
        assert_eq!(kinds.iter().filter(|kind| **kind == TokenKind::Newline).count(), 1);
        assert!(!kinds.contains(&TokenKind::Indent));
    }

    #[test]
    fn triple_quoted_string_spans_lines() {
        let source = "s = '''a\nb\nc'''\nt = 1\n";
        let tokens = tokenize(source, "<test>").expect("tokenize");
        let string = tokens
            .iter()
            .find(|token| token.kind == TokenKind::String)
            .expect("string token");
        assert_eq!(string.text, "'''a\nb\nc'''");
        assert_eq!(string.start, Pos::new(1, 4));
        assert_eq!(string.end, Pos::new(3, 4));
    }

    #[test]
    fn non_ascii_string_literals() {
        let cases = [
            ("s = 'café'\n", "'café'"),
            ("s = '''é\nü'''\n", "'''é\nü'''"),
            ("s = \"a\\é\"\n", "\"a\\é\""),
            ("s = '日本' + 'x'\n", "'日本'"),
        ];
        for (source, expected) in cases {
            let tokens = tokenize(source, "<test>").expect("tokenize");
            let string = tokens
                .iter()
                .find(|token| token.kind == TokenKind::String)
                .expect("string token");
            assert_eq!(string.text, expected, "source: {source:?}");
        }
    }

    #[test]
    fn backslash_continues_statement() {
        let tokens = kinds_and_text("x = 1 + \\\n    2\n");
        let kinds = tokens.iter().map(|(kind, _)| *kind).collect::<Vec<_>>();
        assert!(!kinds.contains(&TokenKind::Indent));
        assert_eq!(
            kinds,
            vec![
                TokenKind::Name,
                TokenKind::Op,
                TokenKind::Number,
                TokenKind::Op,
                TokenKind::Number,
                TokenKind::Newline,
                TokenKind::EndMarker
            ]
        );
    }

    #[test]
    fn missing_final_newline_is_synthesized() {
        let tokens = kinds_and_text("if x:\n    y");
        let kinds = tokens.iter().map(|(kind, _)| *kind).collect::<Vec<_>>();
        assert_eq!(
            &kinds[kinds.len() - 3..],
            &[TokenKind::Newline, TokenKind::Dedent, TokenKind::EndMarker]
        );
    }

    #[test]
    fn numbers_with_prefixes_and_exponents() {
        let tokens = kinds_and_text("0xff 0o17 0b101 1_000 3.25 1e10 .5\n");
        let numbers = tokens
            .into_iter()
            .filter(|(kind, _)| *kind == TokenKind::Number)
            .map(|(_, text)| text)
            .collect::<Vec<_>>();
        assert_eq!(numbers, vec!["0xff", "0o17", "0b101", "1_000", "3.25", "1e10", ".5"]);
    }

    #[test]
    fn operators_use_longest_match() {
        let tokens = kinds_and_text("a **= b // c ... d != e\n");
        let ops = tokens
            .into_iter()
            .filter(|(kind, _)| *kind == TokenKind::Op)
            .map(|(_, text)| text)
            .collect::<Vec<_>>();
        assert_eq!(ops, vec!["**=", "//", "...", "!="]);
    }

    #[test]
    fn errors_on_inconsistent_dedent() {
        let source = indoc! {"
            if x:
                    y = 1
                z = 2
        "};
        let err = tokenize(source, "<test>").expect_err("expected indentation failure");
        assert_eq!(err.kind, CompileErrorKind::Indentation);
        assert_eq!(err.line, 3);
    }

    #[test]
    fn errors_on_unterminated_triple_string() {
        let err = tokenize("s = '''abc\n", "<test>").expect_err("expected token error");
        assert_eq!(err.kind, CompileErrorKind::Token);
        assert!(err.message.contains("EOF in multi-line string"));
    }

    #[test]
    fn errors_on_unclosed_bracket() {
        let err = tokenize("x = (1,\n", "<test>").expect_err("expected token error");
        assert_eq!(err.kind, CompileErrorKind::Token);
        assert!(err.message.contains("EOF in multi-line statement"));
    }

    #[test]
    fn errors_on_invalid_character() {
        let err = tokenize("x = 1 $ 2\n", "<test>").expect_err("expected lexing failure");
        assert!(err.message.contains("invalid character '$'"));
    }

    #[test]
    fn errors_on_single_quoted_string_at_eol() {
        let err = tokenize("s = 'abc\n", "<test>").expect_err("expected token error");
        assert!(err.message.contains("EOL while scanning string literal"));
    }
}
