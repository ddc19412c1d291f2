//! Recursive-descent parser and schema checker for descriptors.

use std::collections::HashSet;
use std::str::FromStr;

use super::lexer::{Token, TokenKind};
use super::{CompiledStatement, Condition, Limit, Term};
use crate::storage::statement::{
    ComparisonOperator, QueryKind, SortDirection, StatementKind, WriteKind,
};
use crate::storage::types::{Key, Schema, Value, ValueType};

type ParseResult<T> = Result<T, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Required,
    Optional,
    Forbidden,
}

/// Clause rules for `[SET, WHERE, SORT, LIMIT]`.
fn clause_rules(kind: StatementKind) -> [Rule; 4] {
    use Rule::*;

    match kind {
        StatementKind::Write(WriteKind::Add) => [Required, Forbidden, Forbidden, Forbidden],
        StatementKind::Write(WriteKind::Replace | WriteKind::Update) => {
            [Required, Required, Forbidden, Forbidden]
        }
        StatementKind::Write(WriteKind::Remove) => [Forbidden, Optional, Forbidden, Forbidden],
        StatementKind::Query(QueryKind::Select) => [Forbidden, Optional, Optional, Optional],
        StatementKind::Query(QueryKind::Count) => [Forbidden, Optional, Forbidden, Forbidden],
    }
}

const CLAUSES: [&str; 4] = ["SET", "WHERE", "SORT", "LIMIT"];

pub(super) struct Parser<'a> {
    schema: &'a Schema,
    descriptor: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    signature: Vec<ValueType>,
}

impl<'a> Parser<'a> {
    pub(super) fn new(schema: &'a Schema, descriptor: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            schema,
            descriptor,
            tokens,
            pos: 0,
            signature: Vec::new(),
        }
    }

    pub(super) fn parse(mut self) -> ParseResult<CompiledStatement> {
        let kind = match self.advance() {
            Some(TokenKind::Word(verb)) => StatementKind::from_str(&verb)
                .map_err(|_| format!("unknown statement verb '{verb}'"))?,
            Some(other) => return Err(format!("expected a statement verb, found {other}")),
            None => return Err("descriptor is empty".to_string()),
        };

        match self.advance() {
            Some(TokenKind::Word(name)) if name == self.schema.name() => {}
            Some(TokenKind::Word(name)) => {
                return Err(format!(
                    "category '{name}' does not match '{}'",
                    self.schema.name()
                ));
            }
            Some(other) => return Err(format!("expected a category name, found {other}")),
            None => return Err(format!("{kind} requires a category name")),
        }

        let rules = clause_rules(kind);
        let mut present = [false; 4];

        let mut set_list = Vec::new();
        let mut condition = None;
        let mut sort = Vec::new();
        let mut limit = None;

        for (slot, clause) in CLAUSES.iter().enumerate() {
            if !self.eat_word(clause) {
                continue;
            }
            if rules[slot] == Rule::Forbidden {
                return Err(format!("{kind} does not allow a {clause} clause"));
            }
            present[slot] = true;
            match slot {
                0 => set_list = self.parse_set_list()?,
                1 => condition = Some(self.parse_or()?),
                2 => sort = self.parse_sort_list()?,
                _ => limit = Some(self.parse_limit()?),
            }
        }

        if let Some(token) = self.tokens.get(self.pos) {
            return Err(format!(
                "unexpected {} at offset {}",
                token.kind, token.offset
            ));
        }

        for (slot, clause) in CLAUSES.iter().enumerate() {
            if rules[slot] == Rule::Required && !present[slot] {
                return Err(format!("{kind} requires a {clause} clause"));
            }
        }

        Ok(CompiledStatement {
            descriptor: self.descriptor.to_string(),
            category: self.schema.name().to_string(),
            kind,
            signature: self.signature,
            set_list,
            condition,
            sort,
            limit,
        })
    }

    // =========================================================================
    // Token helpers
    // =========================================================================

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Option<TokenKind> {
        let token = self.tokens.get(self.pos)?.kind.clone();
        self.pos += 1;
        Some(token)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(TokenKind::Word(w)) if w == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_comma(&mut self) -> bool {
        if self.peek() == Some(&TokenKind::Comma) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn describe_next(&self) -> String {
        match self.tokens.get(self.pos) {
            Some(token) => format!("{} at offset {}", token.kind, token.offset),
            None => "end of descriptor".to_string(),
        }
    }

    // =========================================================================
    // Clauses
    // =========================================================================

    fn parse_key(&mut self) -> ParseResult<Key> {
        match self.peek() {
            Some(TokenKind::Quoted(name)) => {
                let key = self.schema.key(name).cloned().ok_or_else(|| {
                    format!(
                        "unknown key '{name}' in category '{}'",
                        self.schema.name()
                    )
                })?;
                self.pos += 1;
                Ok(key)
            }
            _ => Err(format!("expected a quoted key, found {}", self.describe_next())),
        }
    }

    fn parse_set_list(&mut self) -> ParseResult<Vec<(Key, Term)>> {
        let mut seen = HashSet::new();
        let mut list = Vec::new();
        loop {
            let key = self.parse_key()?;
            if !seen.insert(key.name().to_string()) {
                return Err(format!("key '{}' is set more than once", key.name()));
            }
            if self.advance() != Some(TokenKind::Op(ComparisonOperator::Equal)) {
                return Err(format!("expected '=' after key '{}'", key.name()));
            }
            let term = self.parse_term(&key, key.value_type())?;
            list.push((key, term));
            if !self.eat_comma() {
                return Ok(list);
            }
        }
    }

    fn parse_or(&mut self) -> ParseResult<Condition> {
        let mut left = self.parse_and()?;
        while self.eat_word("OR") {
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Condition> {
        let mut left = self.parse_unary()?;
        while self.eat_word("AND") {
            let right = self.parse_unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Condition> {
        if self.eat_word("NOT") {
            return Ok(Condition::Not(Box::new(self.parse_unary()?)));
        }

        let key = self.parse_key()?;
        if self.eat_word("IN") {
            let Some(list_type) = key.value_type().list_of() else {
                return Err(format!("key '{}' is a list and cannot be used with IN", key.name()));
            };
            if !matches!(self.peek(), Some(TokenKind::Param(_))) {
                return Err(format!("IN on key '{}' requires a list parameter", key.name()));
            }
            let term = self.parse_term(&key, list_type)?;
            return Ok(Condition::In { key, term });
        }

        let op = match self.advance() {
            Some(TokenKind::Op(op)) => op,
            _ => {
                return Err(format!(
                    "expected a comparison operator after key '{}'",
                    key.name()
                ));
            }
        };
        if op.is_ordering() && !key.value_type().is_ordered() {
            return Err(format!(
                "operator {op} needs an ordered type, key '{}' is {}",
                key.name(),
                key.value_type()
            ));
        }
        let term = self.parse_term(&key, key.value_type())?;
        Ok(Condition::Compare { key, op, term })
    }

    fn parse_sort_list(&mut self) -> ParseResult<Vec<(Key, SortDirection)>> {
        let mut list = Vec::new();
        loop {
            let key = self.parse_key()?;
            let direction = match self.advance() {
                Some(TokenKind::Word(word)) => SortDirection::from_str(&word)
                    .map_err(|_| format!("unknown sort direction '{word}'"))?,
                _ => return Err(format!("expected ASC or DSC after key '{}'", key.name())),
            };
            list.push((key, direction));
            if !self.eat_comma() {
                return Ok(list);
            }
        }
    }

    fn parse_limit(&mut self) -> ParseResult<Limit> {
        match self.advance() {
            Some(TokenKind::Param(ValueType::Int)) => {
                self.signature.push(ValueType::Int);
                Ok(Limit::Param(self.signature.len() - 1))
            }
            Some(TokenKind::Param(other)) => {
                Err(format!("LIMIT takes an int parameter, found {other}"))
            }
            Some(TokenKind::Word(word)) => match word.parse::<i32>() {
                Ok(n) if n > 0 => Ok(Limit::Fixed(n as usize)),
                Ok(n) => Err(format!("LIMIT must be positive, found {n}")),
                Err(_) => Err(format!("LIMIT takes an int, found '{word}'")),
            },
            _ => Err("LIMIT takes an int".to_string()),
        }
    }

    // =========================================================================
    // Terms
    // =========================================================================

    /// Parse a parameter or literal that must be of type `expected`.
    fn parse_term(&mut self, key: &Key, expected: ValueType) -> ParseResult<Term> {
        let found = self.describe_next();
        let (term, actual) = match self.advance() {
            Some(TokenKind::Param(ty)) => {
                self.signature.push(ty);
                (Term::Param(self.signature.len() - 1), ty)
            }
            Some(TokenKind::Quoted(text)) => (Term::Literal(Value::String(text)), ValueType::String),
            Some(TokenKind::Word(word)) => {
                let value = parse_literal(&word)
                    .ok_or_else(|| format!("invalid literal '{word}' for key '{}'", key.name()))?;
                let ty = value.value_type();
                (Term::Literal(value), ty)
            }
            _ => return Err(format!("expected a value for key '{}', found {found}", key.name())),
        };

        if actual != expected {
            return Err(format!(
                "key '{}' expects {expected}, found {actual}",
                key.name()
            ));
        }
        Ok(term)
    }
}

/// Parse a bare literal: `true`, `false`, `12`, `12L`, `1.5`.
fn parse_literal(word: &str) -> Option<Value> {
    match word {
        "true" => return Some(Value::Boolean(true)),
        "false" => return Some(Value::Boolean(false)),
        _ => {}
    }
    if let Some(digits) = word.strip_suffix('L') {
        return digits.parse::<i64>().ok().map(Value::Long);
    }
    if let Ok(n) = word.parse::<i32>() {
        return Some(Value::Int(n));
    }
    if word.contains('.') {
        return word
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite())
            .map(Value::Double);
    }
    None
}
