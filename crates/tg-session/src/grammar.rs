//! Grammar-constrained sampling.
//!
//! Parses a GBNF subset into rules, tracks generation progress with a
//! char-level NFA, and masks candidate logits so only tokens whose text
//! is a valid continuation can be selected. End-of-sequence is allowed
//! only once the grammar accepts what has been generated.
//!
//! Supported syntax: `name ::= production` per rule, alternation `|`,
//! quoted literals with `\"` `\\` `\n` `\r` `\t` escapes, character
//! classes `[a-z0-9]` (negated with `^`), `.` for any character, rule
//! references, grouping `( ... )`, and postfix `*` `+` `?`. The first
//! rule is the root.

use std::collections::{HashMap, HashSet};

use tg_engine::{InferenceEngine, TokenId};

use crate::error::{Result, SessionError};

/// Rule-reference nesting limit in the NFA; cuts off left-recursive grammars.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Element {
    Char(char),
    Class { items: Vec<(char, char)>, negated: bool },
    Any,
    Rule(String),
}

type Alternative = Vec<Element>;

/// A parsed grammar: named rules, each a set of alternatives.
#[derive(Debug, Clone)]
pub struct Grammar {
    rules: HashMap<String, Vec<Alternative>>,
    root: String,
}

impl Grammar {
    /// Parse GBNF text. The first rule becomes the root.
    pub fn parse(text: &str) -> Result<Self> {
        Parser::new(text).parse()
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn alternatives(&self, name: &str) -> &[Alternative] {
        // Validated at parse time: every referenced rule exists.
        self.rules.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    src: Vec<char>,
    pos: usize,
    rules: HashMap<String, Vec<Alternative>>,
    aux: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            src: text.chars().collect(),
            pos: 0,
            rules: HashMap::new(),
            aux: 0,
        }
    }

    fn parse(mut self) -> Result<Grammar> {
        let mut root = None;
        loop {
            self.skip_all_whitespace();
            if self.peek().is_none() {
                break;
            }
            let name = self.ident()?;
            self.skip_inline_whitespace();
            self.expect_str("::=")?;
            let alts = self.alternatives(&name)?;
            if self.rules.insert(name.clone(), alts).is_some() {
                return Err(SessionError::Grammar(format!("duplicate rule '{name}'")));
            }
            root.get_or_insert(name);
        }
        let root = root.ok_or_else(|| SessionError::Grammar("no rules defined".to_string()))?;

        let grammar = Grammar {
            rules: self.rules,
            root,
        };
        validate(&grammar)?;
        Ok(grammar)
    }

    /// Parse alternatives of one rule, ending at a newline that does not
    /// continue with `|`.
    fn alternatives(&mut self, rule: &str) -> Result<Vec<Alternative>> {
        let mut alts = vec![self.sequence(rule)?];
        loop {
            let mark = self.pos;
            self.skip_all_whitespace();
            if self.peek() == Some('|') {
                self.pos += 1;
                alts.push(self.sequence(rule)?);
            } else {
                self.pos = mark;
                // Consume the trailing newline of this rule, if any.
                self.skip_inline_whitespace();
                if self.peek() == Some('\n') {
                    self.pos += 1;
                }
                if alts.iter().any(Vec::is_empty) {
                    return Err(SessionError::Grammar(format!(
                        "empty production in rule '{rule}'"
                    )));
                }
                return Ok(alts);
            }
        }
    }

    /// Parse one sequence of terms, stopping at `|`, `)`, newline, or eof.
    fn sequence(&mut self, rule: &str) -> Result<Alternative> {
        let mut seq = Alternative::new();
        loop {
            self.skip_inline_whitespace();
            match self.peek() {
                None | Some('\n') | Some('|') | Some(')') => return Ok(seq),
                Some('#') => {
                    self.skip_comment();
                }
                _ => {
                    let term = self.term(rule)?;
                    seq.extend(term);
                }
            }
        }
    }

    /// Parse one term: a base plus an optional postfix operator.
    fn term(&mut self, rule: &str) -> Result<Vec<Element>> {
        let base = match self.peek() {
            Some('"') => self.literal()?,
            Some('[') => vec![self.class()?],
            Some('(') => {
                self.pos += 1;
                let alts = self.group_alternatives(rule)?;
                self.expect_char(')')?;
                if alts.len() == 1 && self.peek_postfix().is_none() {
                    alts.into_iter().next().unwrap_or_default()
                } else {
                    vec![Element::Rule(self.aux_rule(rule, alts))]
                }
            }
            Some('.') => {
                self.pos += 1;
                vec![Element::Any]
            }
            Some(c) if is_ident_char(c) => vec![Element::Rule(self.ident()?)],
            Some(c) => {
                return Err(SessionError::Grammar(format!("unexpected character '{c}'")));
            }
            None => return Err(SessionError::Grammar("unexpected end of input".to_string())),
        };

        match self.peek_postfix() {
            Some(op) => {
                self.pos += 1;
                Ok(vec![Element::Rule(self.repeat_rule(rule, base, op))])
            }
            None => Ok(base),
        }
    }

    /// Alternatives inside a `( ... )` group; newlines are plain whitespace here.
    fn group_alternatives(&mut self, rule: &str) -> Result<Vec<Alternative>> {
        let mut alts = Vec::new();
        loop {
            self.skip_all_whitespace();
            alts.push(self.group_sequence(rule)?);
            self.skip_all_whitespace();
            if self.peek() == Some('|') {
                self.pos += 1;
            } else {
                return Ok(alts);
            }
        }
    }

    fn group_sequence(&mut self, rule: &str) -> Result<Alternative> {
        let mut seq = Alternative::new();
        loop {
            self.skip_all_whitespace();
            match self.peek() {
                None | Some('|') | Some(')') => return Ok(seq),
                _ => seq.extend(self.term(rule)?),
            }
        }
    }

    fn peek_postfix(&self) -> Option<char> {
        match self.peek() {
            Some(op @ ('*' | '+' | '?')) => Some(op),
            _ => None,
        }
    }

    /// Desugar a repetition into an auxiliary rule.
    ///
    /// `x?` => aux ::= x | ε
    /// `x*` => aux ::= x aux | ε
    /// `x+` => aux ::= x aux | x
    fn repeat_rule(&mut self, rule: &str, base: Vec<Element>, op: char) -> String {
        let name = self.fresh_name(rule);
        let recurse = {
            let mut seq = base.clone();
            seq.push(Element::Rule(name.clone()));
            seq
        };
        let alts = match op {
            '?' => vec![base, Alternative::new()],
            '*' => vec![recurse, Alternative::new()],
            _ => vec![recurse, base],
        };
        self.rules.insert(name.clone(), alts);
        name
    }

    fn aux_rule(&mut self, rule: &str, alts: Vec<Alternative>) -> String {
        let name = self.fresh_name(rule);
        self.rules.insert(name.clone(), alts);
        name
    }

    fn fresh_name(&mut self, rule: &str) -> String {
        self.aux += 1;
        format!("{rule}__{}", self.aux)
    }

    fn literal(&mut self) -> Result<Vec<Element>> {
        self.expect_char('"')?;
        let mut out = Vec::new();
        loop {
            match self.next() {
                Some('"') => return Ok(out),
                Some('\\') => out.push(Element::Char(self.escape()?)),
                Some(c) => out.push(Element::Char(c)),
                None => return Err(SessionError::Grammar("unterminated literal".to_string())),
            }
        }
    }

    fn class(&mut self) -> Result<Element> {
        self.expect_char('[')?;
        let negated = if self.peek() == Some('^') {
            self.pos += 1;
            true
        } else {
            false
        };
        let mut items = Vec::new();
        loop {
            let lo = match self.next() {
                Some(']') => {
                    if items.is_empty() {
                        return Err(SessionError::Grammar("empty character class".to_string()));
                    }
                    return Ok(Element::Class { items, negated });
                }
                Some('\\') => self.escape()?,
                Some(c) => c,
                None => {
                    return Err(SessionError::Grammar(
                        "unterminated character class".to_string(),
                    ))
                }
            };
            if self.peek() == Some('-') && self.src.get(self.pos + 1) != Some(&']') {
                self.pos += 1;
                let hi = match self.next() {
                    Some('\\') => self.escape()?,
                    Some(c) => c,
                    None => {
                        return Err(SessionError::Grammar(
                            "unterminated character class".to_string(),
                        ))
                    }
                };
                items.push((lo, hi));
            } else {
                items.push((lo, lo));
            }
        }
    }

    fn escape(&mut self) -> Result<char> {
        match self.next() {
            Some('n') => Ok('\n'),
            Some('r') => Ok('\r'),
            Some('t') => Ok('\t'),
            Some(c @ ('"' | '\\' | '[' | ']' | '^' | '-')) => Ok(c),
            Some(c) => Err(SessionError::Grammar(format!("unknown escape '\\{c}'"))),
            None => Err(SessionError::Grammar("dangling escape".to_string())),
        }
    }

    fn ident(&mut self) -> Result<String> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(SessionError::Grammar(format!(
                "expected rule name at offset {start}"
            )));
        }
        Ok(self.src[start..self.pos].iter().collect())
    }

    fn expect_str(&mut self, s: &str) -> Result<()> {
        for expected in s.chars() {
            self.expect_char(expected)?;
        }
        Ok(())
    }

    fn expect_char(&mut self, expected: char) -> Result<()> {
        match self.next() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(SessionError::Grammar(format!(
                "expected '{expected}', found '{c}'"
            ))),
            None => Err(SessionError::Grammar(format!(
                "expected '{expected}', found end of input"
            ))),
        }
    }

    fn skip_inline_whitespace(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t') | Some('\r')) {
            self.pos += 1;
        }
    }

    fn skip_all_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => self.pos += 1,
                Some('#') => self.skip_comment(),
                _ => return,
            }
        }
    }

    fn skip_comment(&mut self) {
        while !matches!(self.peek(), None | Some('\n')) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn validate(grammar: &Grammar) -> Result<()> {
    for (name, alts) in &grammar.rules {
        for alt in alts {
            for elem in alt {
                if let Element::Rule(referenced) = elem {
                    if !grammar.rules.contains_key(referenced) {
                        return Err(SessionError::Grammar(format!(
                            "rule '{name}' references undefined rule '{referenced}'"
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// NFA
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct State {
    rule: String,
    alt: usize,
    idx: usize,
    stack: Vec<(String, usize, usize)>,
}

/// Char-level NFA over a grammar; tracks every parse the generated text
/// could still be a prefix of.
#[derive(Debug, Clone)]
pub(crate) struct Machine<'g> {
    grammar: &'g Grammar,
    /// States whose current element is a terminal.
    states: Vec<State>,
    /// Whether a completed parse is reachable at this point.
    accepting: bool,
}

impl<'g> Machine<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        let seeds = (0..grammar.alternatives(grammar.root()).len())
            .map(|alt| State {
                rule: grammar.root().to_string(),
                alt,
                idx: 0,
                stack: Vec::new(),
            })
            .collect();
        let (states, accepting) = closure(grammar, seeds);
        Self {
            grammar,
            states,
            accepting,
        }
    }

    /// Feed one character. Returns false (leaving the machine unchanged)
    /// if no in-progress parse accepts it.
    pub fn advance(&mut self, c: char) -> bool {
        let mut successors = Vec::new();
        for state in &self.states {
            let elem = current_element(self.grammar, state);
            if matches_terminal(elem, c) {
                let mut next = state.clone();
                next.idx += 1;
                successors.push(next);
            }
        }
        if successors.is_empty() {
            return false;
        }
        let (states, accepting) = closure(self.grammar, successors);
        self.states = states;
        self.accepting = accepting;
        true
    }

    /// Feed a whole piece; false if any character is rejected.
    pub fn advance_piece(&mut self, piece: &str) -> bool {
        piece.chars().all(|c| self.advance(c))
    }

    /// Would this piece be a valid continuation? Does not move the machine.
    pub fn accepts_piece(&self, piece: &str) -> bool {
        let mut probe = self.clone();
        probe.advance_piece(piece)
    }

    /// Whether the text generated so far forms a complete parse.
    pub fn is_complete(&self) -> bool {
        self.accepting
    }
}

fn current_element<'g>(grammar: &'g Grammar, state: &State) -> &'g Element {
    &grammar.alternatives(&state.rule)[state.alt][state.idx]
}

fn matches_terminal(elem: &Element, c: char) -> bool {
    match elem {
        Element::Char(expected) => c == *expected,
        Element::Class { items, negated } => {
            let inside = items.iter().any(|&(lo, hi)| c >= lo && c <= hi);
            inside != *negated
        }
        Element::Any => true,
        Element::Rule(_) => false,
    }
}

/// Epsilon-closure: expand rule references and pop completed frames until
/// every state rests on a terminal. Also reports whether any expansion
/// reached a completed parse.
fn closure(grammar: &Grammar, seeds: Vec<State>) -> (Vec<State>, bool) {
    let mut terminal = Vec::new();
    let mut accepting = false;
    let mut seen: HashSet<State> = HashSet::new();
    let mut work = seeds;

    'work: while let Some(mut state) = work.pop() {
        if !seen.insert(state.clone()) {
            continue;
        }
        // Pop frames for every alternative the state has run off the end of.
        loop {
            let alts = grammar.alternatives(&state.rule);
            let len = alts.get(state.alt).map_or(0, Vec::len);
            if state.idx < len {
                break;
            }
            match state.stack.pop() {
                Some((rule, alt, idx)) => {
                    state.rule = rule;
                    state.alt = alt;
                    state.idx = idx;
                }
                None => {
                    accepting = true;
                    continue 'work;
                }
            }
        }
        match current_element(grammar, &state) {
            Element::Rule(name) => {
                if state.stack.len() >= MAX_DEPTH {
                    continue;
                }
                let name = name.clone();
                for alt in 0..grammar.alternatives(&name).len() {
                    let mut stack = state.stack.clone();
                    stack.push((state.rule.clone(), state.alt, state.idx + 1));
                    work.push(State {
                        rule: name.clone(),
                        alt,
                        idx: 0,
                        stack,
                    });
                }
            }
            _ => terminal.push(state),
        }
    }
    (terminal, accepting)
}

// ---------------------------------------------------------------------------
// Token filter
// ---------------------------------------------------------------------------

/// Masks logits so only grammar-valid tokens survive, and follows the
/// committed token through the grammar.
pub(crate) struct TokenFilter<'g> {
    machine: Machine<'g>,
    pieces: Vec<String>,
    eos: TokenId,
}

impl<'g> TokenFilter<'g> {
    pub fn new<E: InferenceEngine>(
        grammar: &'g Grammar,
        engine: &E,
        model: &E::Model,
        eos: TokenId,
    ) -> Result<Self> {
        let vocab_size = engine.vocab_size(model);
        let mut pieces = Vec::with_capacity(vocab_size);
        for id in 0..vocab_size {
            pieces.push(engine.token_text(model, id as TokenId)?);
        }
        Ok(Self {
            machine: Machine::new(grammar),
            pieces,
            eos,
        })
    }

    /// Set disallowed candidates to negative infinity. End-of-sequence is
    /// allowed only when the grammar accepts completion; if nothing at all
    /// is allowed, end-of-sequence is forced so the loop terminates.
    pub fn mask(&self, logits: &mut [f32]) {
        let complete = self.machine.is_complete();
        let mut any_allowed = false;
        for (id, logit) in logits.iter_mut().enumerate() {
            let allowed = if id as TokenId == self.eos {
                complete
            } else {
                self.pieces
                    .get(id)
                    .is_some_and(|piece| !piece.is_empty() && self.machine.accepts_piece(piece))
            };
            if allowed {
                any_allowed = true;
            } else {
                *logit = f32::NEG_INFINITY;
            }
        }
        if !any_allowed {
            if let Some(logit) = logits.get_mut(self.eos as usize) {
                *logit = 0.0;
            }
        }
    }

    /// Follow the token the loop committed to.
    pub fn advance(&mut self, token: TokenId) {
        if token == self.eos {
            return;
        }
        if let Some(piece) = self.pieces.get(token as usize) {
            self.machine.advance_piece(piece);
        }
    }
}
