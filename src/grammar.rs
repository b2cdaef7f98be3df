//! Parse tables for the grammar in `Grammar.txt`.
//!
//! The tables are generated from the grammar text on first use and shared
//! for the life of the process. Every rule is a DFA whose arcs are keyed by
//! label ids; a label is a token kind, a keyword, an operator or another
//! rule.

use std::sync::OnceLock;

use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::lexer::{Token, TokenKind};

mod pgen;
mod symbol;

pub use pgen::GrammarError;
pub use symbol::Symbol;

const GRAMMAR_TEXT: &str = include_str!("grammar/Grammar.txt");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Nonterminal(Symbol),
    Token(TokenKind),
    Keyword(&'static str),
    Operator(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfaState {
    /// `(label id, next state)` pairs.
    pub arcs: Vec<(usize, usize)>,
    pub is_final: bool,
}

impl DfaState {
    /// A final state with no way forward: the rule is complete.
    pub fn is_accept_only(&self) -> bool {
        self.is_final && self.arcs.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Dfa {
    pub symbol: Symbol,
    pub states: Vec<DfaState>,
    /// Label ids of every terminal that can begin this rule.
    pub first: FxHashSet<usize>,
}

#[derive(Debug)]
pub struct Grammar {
    labels: Vec<Label>,
    label_ids: FxHashMap<Label, usize>,
    keywords: FxHashMap<&'static str, usize>,
    operators: FxHashMap<&'static str, usize>,
    dfas: FxHashMap<Symbol, Dfa>,
}

impl Grammar {
    pub fn dfa(&self, symbol: Symbol) -> &Dfa {
        &self.dfas[&symbol]
    }

    pub fn label(&self, id: usize) -> Label {
        self.labels[id]
    }

    pub fn label_id(&self, label: &Label) -> Option<usize> {
        self.label_ids.get(label).copied()
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.keywords.contains_key(word)
    }

    /// Label id the parser matches `token` against, if any arc can.
    pub fn classify(&self, token: &Token<'_>) -> Option<usize> {
        match token.kind {
            TokenKind::Name => self
                .keywords
                .get(token.text)
                .copied()
                .or_else(|| self.label_id(&Label::Token(TokenKind::Name))),
            TokenKind::Op => self.operators.get(token.text).copied(),
            kind => self.label_id(&Label::Token(kind)),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.dfas.len()
    }
}

/// The process-wide tables, generated on first use.
pub fn grammar() -> &'static Grammar {
    static GRAMMAR: OnceLock<Grammar> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        let grammar = pgen::generate(GRAMMAR_TEXT).expect("built-in grammar must generate");
        debug!(
            "generated parse tables: {} rules, {} labels",
            grammar.rule_count(),
            grammar.labels.len()
        );
        grammar
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Pos;

    #[test]
    fn builtin_grammar_generates() {
        let grammar = pgen::generate(GRAMMAR_TEXT).expect("grammar should generate");
        assert_eq!(grammar.rule_count(), Symbol::ALL.len());
    }

    #[test]
    fn keywords_are_classified_before_names() {
        let grammar = grammar();
        let token = Token::new(TokenKind::Name, "while", Pos::new(1, 0), Pos::new(1, 5), "while");
        let id = grammar.classify(&token).expect("keyword label");
        assert_eq!(grammar.label(id), Label::Keyword("while"));

        let token = Token::new(TokenKind::Name, "whale", Pos::new(1, 0), Pos::new(1, 5), "whale");
        let id = grammar.classify(&token).expect("name label");
        assert_eq!(grammar.label(id), Label::Token(TokenKind::Name));
        assert!(!grammar.is_keyword("None"));
    }

    #[test]
    fn first_sets_include_terminals_of_nested_rules() {
        let grammar = grammar();
        let first = &grammar.dfa(Symbol::Stmt).first;
        let keyword = grammar
            .label_id(&Label::Keyword("while"))
            .expect("while is a keyword");
        let name = grammar
            .label_id(&Label::Token(TokenKind::Name))
            .expect("NAME is a terminal");
        assert!(first.contains(&keyword));
        assert!(first.contains(&name));
    }
}
