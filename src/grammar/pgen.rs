//! Table generator: grammar text to one DFA per rule.
//!
//! Each rule's right-hand side becomes an NFA with epsilon arcs, converted by
//! subset construction and then minimized by merging equivalent states.
//! FIRST sets are computed afterwards and any overlap between two arcs of the
//! same start state is rejected, which keeps the tables LL(1).

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use super::{Dfa, DfaState, Grammar, Label, Symbol};
use crate::error::CompileError;
use crate::lexer::{Token, TokenKind, Tokenizer};

#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("grammar text could not be tokenized: {0}")]
    Token(#[from] CompileError),
    #[error("grammar line {line}: expected {expected}, found `{found}`")]
    Unexpected {
        line: usize,
        expected: &'static str,
        found: String,
    },
    #[error("rule `{0}` has no matching symbol")]
    UnknownRule(String),
    #[error("unknown terminal `{0}`")]
    UnknownTerminal(String),
    #[error("rule `{0}` is defined twice")]
    DuplicateRule(String),
    #[error("symbol `{0}` has no rule")]
    MissingRule(&'static str),
    #[error("rule `{0}` is left-recursive")]
    LeftRecursive(&'static str),
    #[error("rule `{rule}` is ambiguous: one token starts both `{first}` and `{second}`")]
    Ambiguous {
        rule: &'static str,
        first: String,
        second: String,
    },
}

type Arc = (Option<&'static str>, usize);

#[derive(Debug, Default)]
struct Nfa {
    arcs: Vec<Vec<Arc>>,
}

impl Nfa {
    fn new_state(&mut self) -> usize {
        self.arcs.push(Vec::new());
        self.arcs.len() - 1
    }

    fn add_arc(&mut self, from: usize, to: usize, label: Option<&'static str>) {
        self.arcs[from].push((label, to));
    }

    fn closure(&self, state: usize, into: &mut BTreeSet<usize>) {
        if !into.insert(state) {
            return;
        }
        for (label, next) in &self.arcs[state] {
            if label.is_none() {
                self.closure(*next, into);
            }
        }
    }
}

struct Rule {
    name: &'static str,
    nfa: Nfa,
    start: usize,
    finish: usize,
}

/// Recursive-descent reader for the EBNF meta-grammar.
struct MetaParser {
    tokens: Vec<Token<'static>>,
    position: usize,
}

impl MetaParser {
    fn new(text: &'static str) -> Result<Self, GrammarError> {
        let mut tokens = Vec::new();
        for token in Tokenizer::new(text, "Grammar.txt") {
            let token = token?;
            if !token.kind.is_trivia() {
                tokens.push(token);
            }
        }
        Ok(Self {
            tokens,
            position: 0,
        })
    }

    fn peek(&self) -> &Token<'static> {
        let last = self.tokens.len() - 1;
        &self.tokens[self.position.min(last)]
    }

    fn advance(&mut self) -> Token<'static> {
        let token = self.peek().clone();
        self.position += 1;
        token
    }

    fn peek_is_op(&self, text: &str) -> bool {
        let token = self.peek();
        token.kind == TokenKind::Op && token.text == text
    }

    fn expect(&mut self, kind: TokenKind, text: Option<&str>, expected: &'static str) -> Result<Token<'static>, GrammarError> {
        let token = self.peek();
        if token.kind != kind || text.is_some_and(|text| token.text != text) {
            return Err(GrammarError::Unexpected {
                line: token.start.line,
                expected,
                found: token.text.to_string(),
            });
        }
        Ok(self.advance())
    }

    fn parse_rules(&mut self) -> Result<Vec<Rule>, GrammarError> {
        let mut rules = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::EndMarker => return Ok(rules),
                TokenKind::Newline => {
                    self.advance();
                }
                _ => {
                    let name = self.expect(TokenKind::Name, None, "rule name")?.text;
                    self.expect(TokenKind::Op, Some(":"), "':'")?;
                    let mut nfa = Nfa::default();
                    let (start, finish) = self.parse_rhs(&mut nfa)?;
                    self.expect(TokenKind::Newline, None, "end of rule")?;
                    rules.push(Rule {
                        name,
                        nfa,
                        start,
                        finish,
                    });
                }
            }
        }
    }

    fn parse_rhs(&mut self, nfa: &mut Nfa) -> Result<(usize, usize), GrammarError> {
        let (start, finish) = self.parse_alt(nfa)?;
        if !self.peek_is_op("|") {
            return Ok((start, finish));
        }
        let outer_start = nfa.new_state();
        let outer_finish = nfa.new_state();
        nfa.add_arc(outer_start, start, None);
        nfa.add_arc(finish, outer_finish, None);
        while self.peek_is_op("|") {
            self.advance();
            let (start, finish) = self.parse_alt(nfa)?;
            nfa.add_arc(outer_start, start, None);
            nfa.add_arc(finish, outer_finish, None);
        }
        Ok((outer_start, outer_finish))
    }

    fn parse_alt(&mut self, nfa: &mut Nfa) -> Result<(usize, usize), GrammarError> {
        let (start, mut finish) = self.parse_item(nfa)?;
        while self.peek_is_op("(")
            || self.peek_is_op("[")
            || matches!(self.peek().kind, TokenKind::Name | TokenKind::String)
        {
            let (next_start, next_finish) = self.parse_item(nfa)?;
            nfa.add_arc(finish, next_start, None);
            finish = next_finish;
        }
        Ok((start, finish))
    }

    fn parse_item(&mut self, nfa: &mut Nfa) -> Result<(usize, usize), GrammarError> {
        if self.peek_is_op("[") {
            self.advance();
            let (start, finish) = self.parse_rhs(nfa)?;
            self.expect(TokenKind::Op, Some("]"), "']'")?;
            nfa.add_arc(start, finish, None);
            return Ok((start, finish));
        }
        let (start, finish) = self.parse_atom(nfa)?;
        let repeat = if self.peek_is_op("+") {
            "+"
        } else if self.peek_is_op("*") {
            "*"
        } else {
            return Ok((start, finish));
        };
        self.advance();
        nfa.add_arc(finish, start, None);
        if repeat == "+" {
            Ok((start, finish))
        } else {
            Ok((start, start))
        }
    }

    fn parse_atom(&mut self, nfa: &mut Nfa) -> Result<(usize, usize), GrammarError> {
        if self.peek_is_op("(") {
            self.advance();
            let result = self.parse_rhs(nfa)?;
            self.expect(TokenKind::Op, Some(")"), "')'")?;
            return Ok(result);
        }
        let token = self.peek();
        if !matches!(token.kind, TokenKind::Name | TokenKind::String) {
            return Err(GrammarError::Unexpected {
                line: token.start.line,
                expected: "name, string or '('",
                found: token.text.to_string(),
            });
        }
        let label = self.advance().text;
        let start = nfa.new_state();
        let finish = nfa.new_state();
        nfa.add_arc(start, finish, Some(label));
        Ok((start, finish))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SubsetState {
    nfa_states: BTreeSet<usize>,
    is_final: bool,
    arcs: BTreeMap<&'static str, usize>,
}

fn make_dfa(rule: &Rule) -> Vec<SubsetState> {
    let mut initial = BTreeSet::new();
    rule.nfa.closure(rule.start, &mut initial);
    let mut states = vec![SubsetState {
        is_final: initial.contains(&rule.finish),
        nfa_states: initial,
        arcs: BTreeMap::new(),
    }];

    let mut index = 0;
    while index < states.len() {
        let mut targets: BTreeMap<&'static str, BTreeSet<usize>> = BTreeMap::new();
        for &state in &states[index].nfa_states {
            for (label, next) in &rule.nfa.arcs[state] {
                if let Some(label) = label {
                    rule.nfa.closure(*next, targets.entry(label).or_default());
                }
            }
        }
        for (label, set) in targets {
            let target = match states.iter().position(|state| state.nfa_states == set) {
                Some(existing) => existing,
                None => {
                    states.push(SubsetState {
                        is_final: set.contains(&rule.finish),
                        nfa_states: set,
                        arcs: BTreeMap::new(),
                    });
                    states.len() - 1
                }
            };
            states[index].arcs.insert(label, target);
        }
        index += 1;
    }
    states
}

/// Merges states with identical finality and arcs until none remain.
fn simplify(states: &mut Vec<SubsetState>) {
    loop {
        let mut merged = None;
        'search: for i in 0..states.len() {
            for j in i + 1..states.len() {
                if states[i].is_final == states[j].is_final && states[i].arcs == states[j].arcs {
                    merged = Some((i, j));
                    break 'search;
                }
            }
        }
        let Some((keep, remove)) = merged else {
            return;
        };
        states.remove(remove);
        for state in states.iter_mut() {
            for target in state.arcs.values_mut() {
                if *target == remove {
                    *target = keep;
                } else if *target > remove {
                    *target -= 1;
                }
            }
        }
    }
}

struct Builder {
    labels: Vec<Label>,
    label_ids: FxHashMap<Label, usize>,
    keywords: FxHashMap<&'static str, usize>,
    operators: FxHashMap<&'static str, usize>,
}

impl Builder {
    fn intern(&mut self, text: &'static str) -> Result<usize, GrammarError> {
        let label = if let Some(quoted) = text
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''))
        {
            if quoted.starts_with(|c: char| c.is_alphabetic()) {
                Label::Keyword(quoted)
            } else {
                Label::Operator(quoted)
            }
        } else if text.starts_with(|c: char| c.is_ascii_uppercase()) {
            Label::Token(
                TokenKind::from_grammar_name(text)
                    .ok_or_else(|| GrammarError::UnknownTerminal(text.to_string()))?,
            )
        } else {
            Label::Nonterminal(
                Symbol::from_name(text).ok_or_else(|| GrammarError::UnknownRule(text.to_string()))?,
            )
        };

        if let Some(id) = self.label_ids.get(&label) {
            return Ok(*id);
        }
        let id = self.labels.len();
        self.labels.push(label);
        self.label_ids.insert(label, id);
        match label {
            Label::Keyword(word) => {
                self.keywords.insert(word, id);
            }
            Label::Operator(op) => {
                self.operators.insert(op, id);
            }
            _ => {}
        }
        Ok(id)
    }
}

struct FirstSets<'a> {
    labels: &'a [Label],
    dfas: &'a FxHashMap<Symbol, Dfa>,
    done: FxHashMap<Symbol, FxHashSet<usize>>,
    in_progress: FxHashSet<Symbol>,
}

impl FirstSets<'_> {
    fn first(&mut self, symbol: Symbol) -> Result<FxHashSet<usize>, GrammarError> {
        if let Some(first) = self.done.get(&symbol) {
            return Ok(first.clone());
        }
        if !self.in_progress.insert(symbol) {
            return Err(GrammarError::LeftRecursive(symbol.name()));
        }

        let dfa = &self.dfas[&symbol];
        let mut all = FxHashSet::default();
        let mut owners: FxHashMap<usize, usize> = FxHashMap::default();
        for &(label_id, _) in &dfa.states[0].arcs {
            let subset = match self.labels[label_id] {
                Label::Nonterminal(inner) => self.first(inner)?,
                _ => FxHashSet::from_iter([label_id]),
            };
            for terminal in &subset {
                if let Some(previous) = owners.insert(*terminal, label_id)
                    && previous != label_id
                {
                    return Err(GrammarError::Ambiguous {
                        rule: symbol.name(),
                        first: describe(self.labels[previous]),
                        second: describe(self.labels[label_id]),
                    });
                }
            }
            all.extend(subset);
        }

        self.in_progress.remove(&symbol);
        self.done.insert(symbol, all.clone());
        Ok(all)
    }
}

fn describe(label: Label) -> String {
    match label {
        Label::Nonterminal(symbol) => symbol.name().to_string(),
        Label::Token(kind) => kind.grammar_name().to_string(),
        Label::Keyword(text) | Label::Operator(text) => format!("'{text}'"),
    }
}

pub(super) fn generate(text: &'static str) -> Result<Grammar, GrammarError> {
    let rules = MetaParser::new(text)?.parse_rules()?;
    let mut builder = Builder {
        labels: Vec::new(),
        label_ids: FxHashMap::default(),
        keywords: FxHashMap::default(),
        operators: FxHashMap::default(),
    };

    let mut dfas = FxHashMap::default();
    for rule in &rules {
        let symbol =
            Symbol::from_name(rule.name).ok_or_else(|| GrammarError::UnknownRule(rule.name.to_string()))?;
        if dfas.contains_key(&symbol) {
            return Err(GrammarError::DuplicateRule(rule.name.to_string()));
        }
        let mut states = make_dfa(rule);
        simplify(&mut states);
        let mut dfa_states = Vec::with_capacity(states.len());
        for state in states {
            let mut arcs = Vec::with_capacity(state.arcs.len());
            for (label, next) in state.arcs {
                arcs.push((builder.intern(label)?, next));
            }
            dfa_states.push(DfaState {
                arcs,
                is_final: state.is_final,
            });
        }
        dfas.insert(
            symbol,
            Dfa {
                symbol,
                states: dfa_states,
                first: FxHashSet::default(),
            },
        );
    }

    if let Some(missing) = Symbol::ALL.iter().find(|symbol| !dfas.contains_key(symbol)) {
        return Err(GrammarError::MissingRule(missing.name()));
    }

    let mut first_sets = FirstSets {
        labels: &builder.labels,
        dfas: &dfas,
        done: FxHashMap::default(),
        in_progress: FxHashSet::default(),
    };
    let mut computed = Vec::with_capacity(Symbol::ALL.len());
    for symbol in Symbol::ALL {
        computed.push((*symbol, first_sets.first(*symbol)?));
    }
    for (symbol, first) in computed {
        if let Some(dfa) = dfas.get_mut(&symbol) {
            dfa.first = first;
        }
    }

    Ok(Grammar {
        labels: builder.labels,
        label_ids: builder.label_ids,
        keywords: builder.keywords,
        operators: builder.operators,
        dfas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_and_repeat_collapse_to_small_dfas() {
        let grammar = super::super::grammar();
        // dotted_name: NAME ('.' NAME)*. The start state and the state after
        // a dot both expect a NAME, so they merge.
        let dfa = grammar.dfa(Symbol::DottedName);
        assert_eq!(dfa.states.len(), 2);
        assert!(!dfa.states[0].is_final);
        assert!(dfa.states[1].is_final);
    }

    #[test]
    fn pass_stmt_accepts_after_one_keyword() {
        let grammar = super::super::grammar();
        let dfa = grammar.dfa(Symbol::PassStmt);
        assert_eq!(dfa.states.len(), 2);
        assert!(dfa.states[1].is_accept_only());
    }

    #[test]
    fn every_start_state_has_arcs() {
        let grammar = super::super::grammar();
        for symbol in Symbol::ALL {
            assert!(
                !grammar.dfa(*symbol).states[0].arcs.is_empty(),
                "{} has an empty start state",
                symbol.name()
            );
        }
    }
}
