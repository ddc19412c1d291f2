//! Descriptor tokenizer.

use std::fmt;

use crate::storage::statement::ComparisonOperator;
use crate::storage::types::ValueType;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum TokenKind {
    /// Verb, keyword, category name, bare literal.
    Word(String),
    /// Text between single quotes, quotes stripped.
    Quoted(String),
    /// Free parameter with its declared type.
    Param(ValueType),
    Comma,
    Op(ComparisonOperator),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Word(word) => f.write_str(word),
            Self::Quoted(text) => write!(f, "'{text}'"),
            Self::Param(ty) => write!(f, "parameter of type {ty}"),
            Self::Comma => f.write_str(","),
            Self::Op(op) => f.write_str(op.as_ref()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Token {
    pub kind: TokenKind,
    /// Byte offset in the descriptor text.
    pub offset: usize,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | '=' | '!' | '<' | '>' | '\'' | '?')
}

fn param_type(c: char) -> Option<ValueType> {
    match c {
        's' => Some(ValueType::String),
        'i' => Some(ValueType::Int),
        'l' => Some(ValueType::Long),
        'd' => Some(ValueType::Double),
        'b' => Some(ValueType::Boolean),
        'p' => Some(ValueType::Pojo),
        _ => None,
    }
}

pub(super) fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        let kind = match c {
            c if c.is_whitespace() => continue,
            ',' => TokenKind::Comma,
            '=' => TokenKind::Op(ComparisonOperator::Equal),
            '!' => match chars.next_if(|&(_, c)| c == '=') {
                Some(_) => TokenKind::Op(ComparisonOperator::NotEqual),
                None => return Err(format!("expected '=' after '!' at offset {offset}")),
            },
            '<' => match chars.next_if(|&(_, c)| c == '=') {
                Some(_) => TokenKind::Op(ComparisonOperator::LessEqual),
                None => TokenKind::Op(ComparisonOperator::Less),
            },
            '>' => match chars.next_if(|&(_, c)| c == '=') {
                Some(_) => TokenKind::Op(ComparisonOperator::GreaterEqual),
                None => TokenKind::Op(ComparisonOperator::Greater),
            },
            '\'' => {
                let mut quoted = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\'')) => break,
                        Some((_, c)) => quoted.push(c),
                        None => return Err(format!("unterminated quote at offset {offset}")),
                    }
                }
                TokenKind::Quoted(quoted)
            }
            '?' => {
                let scalar = chars
                    .next()
                    .and_then(|(_, c)| param_type(c))
                    .ok_or_else(|| format!("unknown parameter type at offset {offset}"))?;
                let ty = match chars.next_if(|&(_, c)| c == '[') {
                    Some(_) => scalar.list_of().unwrap_or(scalar),
                    None => scalar,
                };
                if chars.peek().is_some_and(|&(_, c)| !is_delimiter(c)) {
                    return Err(format!("malformed parameter at offset {offset}"));
                }
                TokenKind::Param(ty)
            }
            first => {
                let mut word = String::from(first);
                while let Some((_, c)) = chars.next_if(|&(_, c)| !is_delimiter(c)) {
                    word.push(c);
                }
                TokenKind::Word(word)
            }
        };
        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}
